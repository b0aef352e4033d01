//! `mdns-sd` transport for the zerocast responder core.
//!
//! The daemon only speaks whole DNS-SD services, so announced SRV, TXT and
//! address records are folded into service registrations, and resolved
//! services are unfolded back into records for the core's cache.

mod client;
mod server;
mod transport;
mod types;

pub use server::get_local_ips;
pub use transport::MdnsSdTransport;
pub use types::{BRIDGE_INTERFACE, HOST_TTL, Incoming, SERVICE_TTL};

/// Errors for discovery operations.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("mDNS error: {0}")]
    Mdns(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("configuration error: {0}")]
    Config(String),
}
