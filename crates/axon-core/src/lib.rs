//! Axon Core - wire protocol, error taxonomy, and configuration

pub mod config;
pub mod error;
pub mod protocol;
pub mod types;

pub use config::{AxonConfig, BindMode, GatewayConfig, RealtimeConfig, RetryPolicy};
pub use error::{Error, Result};
pub use protocol::*;
pub use types::*;
