//! Error types shared by the client and server call paths.

/// Errors returned from client calls and server handlers.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("service not found: {service}")]
    ServiceNotFound { service: String },
    #[error("unknown endpoint: {endpoint}")]
    UnknownEndpoint { endpoint: String },
    #[error("nothing listening at {address}")]
    Unreachable { address: String },
    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl CallError {
    /// Convenience constructor for handler-side application errors.
    pub fn internal(msg: impl std::fmt::Display) -> Self {
        CallError::Internal(anyhow::anyhow!("{msg}"))
    }
}
