//! RPC error taxonomy
//!
//! Every failed call surfaces exactly one of these, and the variant tells the
//! caller whether retrying later might help (timeout/connection/server/
//! circuit-open) or definitely will not (protocol/application).

/// Result type for RPC operations
pub type RpcResult<T> = Result<T, RpcError>;

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// The attempt exceeded a configured timeout. Retryable.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Connection refused, reset, broken pipe and friends. Retryable.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The engine answered with a 5xx. Retryable.
    #[error("server error {status}: {body}")]
    Server { status: u16, body: String },

    /// The response was transported fine but the envelope is malformed.
    /// Never retried — the engine is speaking a different language.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// A well-formed error response from the engine. Never retried unless
    /// the caller whitelisted the code.
    #[error("application error {code}: {message}")]
    Application { code: i64, message: String },

    /// The circuit for this endpoint is open; no attempt was made.
    #[error("circuit open for endpoint: {endpoint}")]
    CircuitOpen { endpoint: String },
}

impl RpcError {
    /// Whether another attempt against the same endpoint could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RpcError::Timeout(_) | RpcError::Connection(_) | RpcError::Server { .. }
        )
    }

    /// Stable taxonomy label for diagnostics payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            RpcError::Timeout(_) => "timeout",
            RpcError::Connection(_) => "connection",
            RpcError::Server { .. } => "server",
            RpcError::Protocol(_) => "protocol",
            RpcError::Application { .. } => "application",
            RpcError::CircuitOpen { .. } => "circuit_open",
        }
    }
}

impl From<reqwest::Error> for RpcError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RpcError::Timeout(err.to_string())
        } else if err.is_decode() {
            // Body arrived but is not the envelope we expect
            RpcError::Protocol(err.to_string())
        } else {
            RpcError::Connection(err.to_string())
        }
    }
}

impl From<axon_core::Error> for RpcError {
    fn from(err: axon_core::Error) -> Self {
        match err {
            axon_core::Error::InvalidEnvelope(reason) => RpcError::Protocol(reason),
            other => RpcError::Protocol(other.to_string()),
        }
    }
}
