//! Axon Client - retrying, circuit-breaking RPC client for the upstream engine

pub mod backoff;
pub mod circuit;
pub mod client;
pub mod error;

pub use circuit::{CircuitBreaker, CircuitState};
pub use client::RpcClient;
pub use error::{RpcError, RpcResult};
