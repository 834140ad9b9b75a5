//! Axon config — validated, immutable configuration structs
//!
//! Loaded once at startup (JSON file and/or CLI overrides) and validated
//! before anything touches the network. Validation failures are construction
//! errors, not runtime surprises: a config that passes `validate()` never
//! needs re-checking on the hot path.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Retry / circuit-breaker policy
// ---------------------------------------------------------------------------

/// Policy for the outbound RPC client. All durations are seconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total budget for one `call()`, including retries of a single attempt.
    pub request_timeout: f64,
    pub connect_timeout: f64,
    pub read_timeout: f64,
    /// Attempt budget; the first attempt counts, so `1` means no retry.
    pub max_retries: u32,
    pub backoff_base: f64,
    pub backoff_cap: f64,
    /// Random perturbation applied to each backoff delay, as a fraction.
    pub jitter_fraction: f64,
    /// Consecutive failures before a circuit opens.
    pub failure_threshold: u32,
    /// Consecutive half-open successes before a circuit closes again.
    pub success_threshold: u32,
    /// How long an open circuit rejects calls before probing.
    pub recovery_timeout: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            request_timeout: 30.0,
            connect_timeout: 5.0,
            read_timeout: 20.0,
            max_retries: 3,
            backoff_base: 1.0,
            backoff_cap: 60.0,
            jitter_fraction: 0.1,
            failure_threshold: 5,
            success_threshold: 2,
            recovery_timeout: 30.0,
        }
    }
}

impl RetryPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout <= 0.0 {
            return Err(Error::config("request_timeout must be positive"));
        }
        if self.connect_timeout <= 0.0 || self.connect_timeout >= self.request_timeout {
            return Err(Error::config(
                "connect_timeout must be positive and below request_timeout",
            ));
        }
        if self.read_timeout <= 0.0 || self.read_timeout >= self.request_timeout {
            return Err(Error::config(
                "read_timeout must be positive and below request_timeout",
            ));
        }
        if self.max_retries < 1 {
            return Err(Error::config("max_retries must be at least 1"));
        }
        if self.backoff_base <= 0.0 {
            return Err(Error::config("backoff_base must be positive"));
        }
        if self.backoff_cap < self.backoff_base {
            return Err(Error::config("backoff_cap must be at least backoff_base"));
        }
        if !(0.0..=0.5).contains(&self.jitter_fraction) {
            return Err(Error::config("jitter_fraction must be within [0, 0.5]"));
        }
        if self.failure_threshold < 3 {
            return Err(Error::config("failure_threshold must be at least 3"));
        }
        if self.success_threshold < 1 {
            return Err(Error::config("success_threshold must be at least 1"));
        }
        if self.recovery_timeout <= 0.0 {
            return Err(Error::config("recovery_timeout must be positive"));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.request_timeout)
    }
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.connect_timeout)
    }
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.read_timeout)
    }
    pub fn backoff_base(&self) -> Duration {
        Duration::from_secs_f64(self.backoff_base)
    }
    pub fn backoff_cap(&self) -> Duration {
        Duration::from_secs_f64(self.backoff_cap)
    }
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.recovery_timeout)
    }
}

// ---------------------------------------------------------------------------
// Real-time fan-out configuration
// ---------------------------------------------------------------------------

/// Tuning for the broadcast dispatcher and liveness probe.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Fixed capacity of the broadcast queue.
    pub broadcast_queue_capacity: usize,
    /// How long a publisher may wait for queue space before the message is
    /// dropped, in seconds. Keeps producers from ever stalling.
    pub enqueue_timeout: f64,
    /// Per-subscriber outbound buffer; a subscriber this far behind starts
    /// losing messages rather than slowing everyone else down.
    pub subscriber_buffer: usize,
    /// Interval between liveness pings, in seconds.
    pub heartbeat_interval: f64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            broadcast_queue_capacity: 1024,
            enqueue_timeout: 0.05,
            subscriber_buffer: 64,
            heartbeat_interval: 30.0,
        }
    }
}

impl RealtimeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.broadcast_queue_capacity == 0 {
            return Err(Error::config("broadcast_queue_capacity must be at least 1"));
        }
        if self.enqueue_timeout <= 0.0 {
            return Err(Error::config("enqueue_timeout must be positive"));
        }
        if self.subscriber_buffer == 0 {
            return Err(Error::config("subscriber_buffer must be at least 1"));
        }
        if self.heartbeat_interval <= 0.0 {
            return Err(Error::config("heartbeat_interval must be positive"));
        }
        Ok(())
    }

    pub fn enqueue_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.enqueue_timeout)
    }
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs_f64(self.heartbeat_interval)
    }
}

// ---------------------------------------------------------------------------
// Gateway configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindMode {
    Loopback,
    Lan,
}

impl BindMode {
    pub fn to_addr(self) -> &'static str {
        match self {
            BindMode::Loopback => "127.0.0.1",
            BindMode::Lan => "0.0.0.0",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub port: u16,
    pub bind: BindMode,
    /// Base URL of the upstream engine the RPC client talks to.
    pub engine_url: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: 8900,
            bind: BindMode::Loopback,
            engine_url: "http://127.0.0.1:8950/rpc".to_string(),
        }
    }
}

impl GatewayConfig {
    pub fn validate(&self) -> Result<()> {
        if self.engine_url.is_empty() {
            return Err(Error::config("engine_url must not be empty"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AxonConfig {
    pub gateway: GatewayConfig,
    pub retry: RetryPolicy,
    pub realtime: RealtimeConfig,
}

impl AxonConfig {
    /// Load from a JSON file. Missing keys fall back to defaults; a file
    /// that fails to parse or validate is a hard startup error.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.gateway.validate()?;
        self.retry.validate()?;
        self.realtime.validate()?;
        Ok(())
    }
}
