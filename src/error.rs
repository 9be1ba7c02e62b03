use thiserror::Error;

/// Error kinds by semantic category (spec §7). Every fallible component
/// surfaces one of these instead of panicking; `main` is the only place a
/// startup failure becomes a process exit code.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("missing required configuration: {0}")]
    ConfigMissing(String),

    #[error("SignalK discovery failed: {0}")]
    DiscoveryFailed(String),

    #[error("SignalK discovery document has no signalk-ws endpoint")]
    EndpointMissing,

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("transport down: {0}")]
    TransportDown(String),

    #[error("failed to parse frame: {0}")]
    ParseFailed(String),

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("max reconnect attempts exhausted")]
    MaxRetriesExhausted,

    #[error("shutting down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, RelayError>;

impl From<serde_json::Error> for RelayError {
    fn from(e: serde_json::Error) -> Self {
        RelayError::ParseFailed(e.to_string())
    }
}
