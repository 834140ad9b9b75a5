//! Error types for Axon

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("config error: {0}")]
    ConfigError(String),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn invalid_envelope(reason: impl Into<String>) -> Self {
        Self::InvalidEnvelope(reason.into())
    }

    pub fn config(reason: impl Into<String>) -> Self {
        Self::ConfigError(reason.into())
    }
}
