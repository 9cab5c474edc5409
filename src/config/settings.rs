//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across tasks.

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::AppPaths;

// ---------------------------------------------------------------------------
// BoundaryPolicy
// ---------------------------------------------------------------------------

/// Selects how speech boundaries are derived from the inbound audio stream.
///
/// | Variant          | Start edge                        | Stop edge                          |
/// |------------------|-----------------------------------|------------------------------------|
/// | `ExplicitMarker` | first chunk submitted after idle  | `audio_end` marker dequeued        |
/// | `Heuristic`      | first packet, or gap > `gap_ms`   | > `repeat_limit` zero-delta packets |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoundaryPolicy {
    /// The backend sends `audio_end` after every utterance.
    ExplicitMarker,
    /// The backend gives no reliable end signal; infer it from packet timing.
    Heuristic,
}

impl Default for BoundaryPolicy {
    fn default() -> Self {
        Self::ExplicitMarker
    }
}

// ---------------------------------------------------------------------------
// ConnectionConfig
// ---------------------------------------------------------------------------

/// Where to connect and how hard to try.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// HTTP endpoint returning `{ "address": "ws://…" }`.  When set it takes
    /// precedence over [`address`](Self::address).
    pub discovery_url: Option<String>,
    /// Direct websocket address used when no discovery URL is configured.
    pub address: String,
    /// Total socket connection attempts before giving up.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles after every failure.
    pub backoff_base_ms: u64,
    /// Interval of the readiness poll performed before the first control
    /// message is sent.
    pub ready_poll_ms: u64,
    /// Upper bound on the readiness poll.
    pub ready_timeout_ms: u64,
    /// Timeout for the discovery GET.
    pub discovery_timeout_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            discovery_url: None,
            address: "ws://127.0.0.1:8080".into(),
            max_attempts: 7,
            backoff_base_ms: 1_000,
            ready_poll_ms: 100,
            ready_timeout_ms: 10_000,
            discovery_timeout_secs: 10,
        }
    }
}

impl ConnectionConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn ready_poll(&self) -> Duration {
        Duration::from_millis(self.ready_poll_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }
}

// ---------------------------------------------------------------------------
// BoundaryConfig
// ---------------------------------------------------------------------------

/// Speech-boundary detection settings.
///
/// The heuristic thresholds gate avatar animation state directly, so they are
/// part of the observable contract even though they were tuned by hand.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BoundaryConfig {
    pub policy: BoundaryPolicy,
    /// Inter-packet gap (ms) that opens a new utterance when idle.
    pub gap_ms: u64,
    /// An utterance ends once more than this many consecutive packets share
    /// the previous packet's timestamp.
    pub repeat_limit: u32,
}

impl Default for BoundaryConfig {
    fn default() -> Self {
        Self {
            policy: BoundaryPolicy::default(),
            gap_ms: 200,
            repeat_limit: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// AudioConfig
// ---------------------------------------------------------------------------

/// Settings for audio capture and playback formats.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Output device rate in Hz. `None` means the device default.
    pub output_sample_rate: Option<u32>,
    /// Rate assumed for inbound chunks that arrive as bare PCM16 without a
    /// WAV header.
    pub fallback_pcm_sample_rate: u32,
    /// Rate the microphone stream is converted to before upload. `None`
    /// sends the device's native rate.
    pub input_sample_rate: Option<u32>,
    /// Request echo cancellation from the input path.  Advertised to the
    /// backend; the host audio layer decides whether it is honoured.
    pub echo_cancellation: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            output_sample_rate: None,
            fallback_pcm_sample_rate: 24_000,
            input_sample_rate: None,
            echo_cancellation: true,
        }
    }
}

// ---------------------------------------------------------------------------
// CaptureConfig
// ---------------------------------------------------------------------------

/// Microphone uplink behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Initial state of the user mic toggle.
    pub start_active: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self { start_active: true }
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use realtime_voice::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
///
/// // Modify and save
/// // config.save().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Socket target and retry budget.
    pub connection: ConnectionConfig,
    /// Speech-boundary policy and thresholds.
    pub boundary: BoundaryConfig,
    /// Capture / playback format settings.
    pub audio: AudioConfig,
    /// Microphone uplink settings.
    pub capture: CaptureConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet
    /// so callers never need to special-case a missing file.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path (useful for tests).
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn load_missing_returns_default() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("nonexistent.toml");

        let config = AppConfig::load_from(&path).expect("should not error");
        let default = AppConfig::default();

        assert_eq!(config.connection.address, default.connection.address);
        assert_eq!(config.boundary.policy, default.boundary.policy);
        assert_eq!(
            config.audio.fallback_pcm_sample_rate,
            default.audio.fallback_pcm_sample_rate
        );
    }

    #[test]
    fn default_values() {
        let cfg = AppConfig::default();

        assert!(cfg.connection.discovery_url.is_none());
        assert_eq!(cfg.connection.max_attempts, 7);
        assert_eq!(cfg.connection.backoff_base(), Duration::from_secs(1));
        assert_eq!(cfg.connection.ready_poll(), Duration::from_millis(100));
        assert_eq!(cfg.boundary.policy, BoundaryPolicy::ExplicitMarker);
        assert_eq!(cfg.boundary.gap_ms, 200);
        assert_eq!(cfg.boundary.repeat_limit, 10);
        assert!(cfg.audio.echo_cancellation);
        assert!(cfg.capture.start_active);
    }

    #[test]
    fn round_trip_modified_values() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("modified.toml");

        let mut cfg = AppConfig::default();
        cfg.connection.discovery_url = Some("https://example.test/run/abc".into());
        cfg.connection.max_attempts = 3;
        cfg.boundary.policy = BoundaryPolicy::Heuristic;
        cfg.boundary.gap_ms = 350;
        cfg.audio.output_sample_rate = Some(48_000);
        cfg.capture.start_active = false;

        cfg.save_to(&path).expect("save");
        let loaded = AppConfig::load_from(&path).expect("load");

        assert_eq!(
            loaded.connection.discovery_url.as_deref(),
            Some("https://example.test/run/abc")
        );
        assert_eq!(loaded.connection.max_attempts, 3);
        assert_eq!(loaded.boundary.policy, BoundaryPolicy::Heuristic);
        assert_eq!(loaded.boundary.gap_ms, 350);
        assert_eq!(loaded.audio.output_sample_rate, Some(48_000));
        assert!(!loaded.capture.start_active);
    }

    /// Sections missing from a hand-edited file fall back to their defaults.
    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("partial.toml");
        std::fs::write(&path, "[boundary]\npolicy = \"Heuristic\"\n").expect("write");

        let loaded = AppConfig::load_from(&path).expect("load");
        assert_eq!(loaded.boundary.policy, BoundaryPolicy::Heuristic);
        assert_eq!(loaded.boundary.repeat_limit, 10);
        assert_eq!(loaded.connection.max_attempts, 7);
    }
}
