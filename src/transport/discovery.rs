//! Socket address resolution.
//!
//! A backend is reached either directly (a `ws://` / `wss://` address) or via
//! a discovery endpoint: `GET <url>` answers `{ "address": "ws://…" }`.
//! Discovery is attempted once; retrying is the socket layer's job.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::config::ConnectionConfig;

// ---------------------------------------------------------------------------
// DiscoveryError
// ---------------------------------------------------------------------------

/// The discovery handshake failed.
#[derive(Debug, Clone, Error)]
pub enum DiscoveryError {
    /// Transport-level failure (DNS, refused, TLS, timeout).
    #[error("discovery request failed: {0}")]
    Request(String),

    /// The endpoint answered with a non-success status.
    #[error("discovery endpoint returned HTTP {0}")]
    Status(u16),

    /// The body was not the expected JSON document.
    #[error("discovery response is not valid JSON: {0}")]
    Parse(String),

    /// The body parsed but carried no usable address.
    #[error("discovery response has no address")]
    MissingAddress,
}

impl From<reqwest::Error> for DiscoveryError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            DiscoveryError::Parse(e.to_string())
        } else {
            DiscoveryError::Request(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// AddressResolver trait
// ---------------------------------------------------------------------------

/// Produces the websocket address for a new connection.
#[async_trait]
pub trait AddressResolver: Send + Sync {
    async fn resolve(&self) -> Result<String, DiscoveryError>;
}

/// A fixed, already-known address.
#[derive(Debug, Clone)]
pub struct StaticAddress(pub String);

#[async_trait]
impl AddressResolver for StaticAddress {
    async fn resolve(&self) -> Result<String, DiscoveryError> {
        Ok(self.0.clone())
    }
}

// ---------------------------------------------------------------------------
// HttpDiscovery
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct DiscoveryBody {
    address: Option<String>,
}

/// Parse a discovery response body into a socket address.
pub fn parse_discovery_body(body: &str) -> Result<String, DiscoveryError> {
    let parsed: DiscoveryBody =
        serde_json::from_str(body).map_err(|e| DiscoveryError::Parse(e.to_string()))?;
    match parsed.address {
        Some(address) if !address.trim().is_empty() => Ok(address.trim().to_string()),
        _ => Err(DiscoveryError::MissingAddress),
    }
}

/// Resolves the address through an HTTP discovery endpoint.
pub struct HttpDiscovery {
    client: reqwest::Client,
    url: String,
}

impl HttpDiscovery {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl AddressResolver for HttpDiscovery {
    async fn resolve(&self) -> Result<String, DiscoveryError> {
        log::info!("transport: discovering socket address via {}", self.url);

        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DiscoveryError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        let address = parse_discovery_body(&body)?;
        log::info!("transport: discovery returned {address}");
        Ok(address)
    }
}

// ---------------------------------------------------------------------------
// resolver_for
// ---------------------------------------------------------------------------

/// Pick a resolver for `target`, falling back to the configured endpoints.
///
/// An `http(s)://` target is a discovery URL; anything else is used as the
/// socket address as-is.  Without a target, a configured discovery URL
/// wins over the configured direct address.
pub fn resolver_for(target: Option<&str>, config: &ConnectionConfig) -> Box<dyn AddressResolver> {
    let timeout = Duration::from_secs(config.discovery_timeout_secs);
    let chosen = target
        .map(str::to_string)
        .or_else(|| config.discovery_url.clone().filter(|u| !u.is_empty()));

    match chosen {
        Some(url) if url.starts_with("http://") || url.starts_with("https://") => {
            Box::new(HttpDiscovery::new(url, timeout))
        }
        Some(address) => Box::new(StaticAddress(address)),
        None => Box::new(StaticAddress(config.address.clone())),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
