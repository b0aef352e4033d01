//! Error types for the responder core.

/// Errors returned synchronously by server, group and browser operations.
///
/// Name collisions and resolver timeouts are not errors: they are reported
/// through the listeners as state changes and events.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The operation is not allowed in the object's current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// An identical record is already part of the entry group.
    #[error("duplicate record: {0}")]
    Duplicate(String),

    /// Interface/protocol scope inconsistent with the request.
    #[error("invalid scope: {0}")]
    InvalidScope(String),

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("invalid host name: {0}")]
    InvalidHostName(String),

    #[error("invalid domain name: {0}")]
    InvalidDomainName(String),

    #[error("invalid service name: {0}")]
    InvalidServiceName(String),

    #[error("invalid service type: {0}")]
    InvalidServiceType(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unknown entry group or browser handle.
    #[error("not found: {0}")]
    NotFound(String),

    /// The transport could not be opened; fatal to server construction.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
}
