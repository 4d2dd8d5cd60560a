use thiserror::Error;

/// Failures seen by the link. They are reported as data in the published
/// reading, never returned across the public boundary of a running link.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("connection refused: {0}")]
    Refused(String),
    #[error("request timed out")]
    Timeout,
    #[error("endpoint not found: {0}")]
    NotFound(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("invalid state: {0}")]
    State(String),
    /// The backend answered `ok=false`.
    #[error("rejected by backend: {0}")]
    Rejected(String),
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing scale api")]
    MissingApi,
    #[error("missing stream connector")]
    MissingConnector,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
