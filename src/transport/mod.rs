//! Signaling client: address discovery, bounded-retry connection, and the
//! JSON frame protocol spoken over the socket.
//!
//! # Connection sequence
//!
//! ```text
//! resolver_for(target) ──▶ AddressResolver::resolve()      (HTTP GET once, or static)
//!        │
//!        ▼
//! SignalingClient::connect(address, RetryPolicy)           (≤ 7 attempts, 1 s · 2ⁿ backoff)
//!        │
//!        ▼
//! wait_until_open(poll = 100 ms)  ──▶ send(audio_metadata)
//! ```

pub mod backoff;
pub mod discovery;
pub mod protocol;
pub mod socket;

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use backoff::{retry_with_backoff, Exhausted, RetryPolicy};
pub use discovery::{
    parse_discovery_body, resolver_for, AddressResolver, DiscoveryError, HttpDiscovery,
    StaticAddress,
};
pub use protocol::{OutboundMessage, RawFrame};
pub use socket::{
    ConnectionError, ReadyState, SignalingClient, SocketCallback, SocketEvent, Uplink,
};
