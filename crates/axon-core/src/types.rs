//! Core types for Axon

use std::sync::Arc;

/// Subscriber identifier - cheaply cloneable
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct SubscriberId(Arc<str>);

impl SubscriberId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(Arc::from(s.into()))
    }

    /// Generate a fresh random id (used for WebSocket sessions).
    pub fn generate() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SubscriberId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SubscriberId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}
