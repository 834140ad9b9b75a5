//! Wire protocol — RPC envelopes and real-time event messages
//!
//! RPC wire format (client → engine):
//!   { "protocol": "2.0", "method": "metrics.phi", "params": { ... }, "id": "req-uuid" }
//!
//! Engine → client (exactly one of result/error):
//!   { "protocol": "2.0", "id": "req-uuid", "result": { ... } }
//!   { "protocol": "2.0", "id": "req-uuid", "error": { "code": -32000, "message": "..." } }
//!
//! Real-time envelope (server → subscriber):
//!   { "type": "metrics_update", "data": { ... }, "channel": "metrics", "timestamp": 1723000000.5 }
//!
//! Subscriber → server control messages:
//!   { "type": "subscribe", "channels": ["metrics", "tasks"] }
//!   { "type": "unsubscribe", "channels": ["tasks"] }
//!   { "type": "pong" }   (in answer to { "type": "ping" })

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Protocol tag carried by every RPC envelope.
pub const PROTOCOL_VERSION: &str = "2.0";

/// Wildcard channel — every subscriber matches it.
pub const CHANNEL_ALL: &str = "all";

// ---------------------------------------------------------------------------
// RPC request envelope
// ---------------------------------------------------------------------------

/// RPC request sent to the upstream engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub protocol: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
    pub id: String,
}

impl RequestEnvelope {
    /// Build an envelope with a fresh unique request id.
    pub fn new(method: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            protocol: PROTOCOL_VERSION.to_string(),
            method: method.into(),
            params,
            id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// RPC response envelope
// ---------------------------------------------------------------------------

/// RPC response from the upstream engine, as parsed off the wire.
///
/// All fields are optional at the serde layer so that [`validate`] can report
/// what exactly is missing rather than failing opaquely during parse.
///
/// [`validate`]: ResponseEnvelope::validate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

/// Error detail carried by a well-formed error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: i64,
    pub message: String,
}

impl ResponseEnvelope {
    /// Successful response envelope (used by mock engines in tests).
    pub fn ok(id: impl Into<String>, result: serde_json::Value) -> Self {
        Self {
            protocol: Some(PROTOCOL_VERSION.to_string()),
            id: Some(id.into()),
            result: Some(result),
            error: None,
        }
    }

    /// Error response envelope.
    pub fn err(id: impl Into<String>, code: i64, message: impl Into<String>) -> Self {
        Self {
            protocol: Some(PROTOCOL_VERSION.to_string()),
            id: Some(id.into()),
            result: None,
            error: Some(ErrorBody {
                code,
                message: message.into(),
            }),
        }
    }

    /// Check the envelope against the request that produced it.
    ///
    /// A valid envelope carries the protocol tag, echoes the request id, and
    /// holds exactly one of result/error. Anything else is a protocol
    /// violation the caller must not retry.
    pub fn validate(&self, expected_id: &str) -> Result<()> {
        match self.protocol.as_deref() {
            None => return Err(Error::invalid_envelope("missing protocol tag")),
            Some(PROTOCOL_VERSION) => {}
            Some(other) => {
                return Err(Error::invalid_envelope(format!(
                    "unsupported protocol version: {}",
                    other
                )))
            }
        }

        match self.id.as_deref() {
            None => return Err(Error::invalid_envelope("missing id")),
            Some(id) if id != expected_id => {
                return Err(Error::invalid_envelope(format!(
                    "id mismatch: expected {}, got {}",
                    expected_id, id
                )))
            }
            Some(_) => {}
        }

        match (&self.result, &self.error) {
            (Some(_), Some(_)) => Err(Error::invalid_envelope("both result and error present")),
            (None, None) => Err(Error::invalid_envelope("neither result nor error present")),
            _ => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Real-time event envelope — server → subscriber
// ---------------------------------------------------------------------------

/// One broadcast event. Immutable once enqueued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: serde_json::Value,
    pub channel: String,
    /// Seconds since the Unix epoch, fractional.
    pub timestamp: f64,
}

impl BroadcastMessage {
    /// Build an event stamped with the current wall clock.
    pub fn new(
        kind: impl Into<String>,
        data: serde_json::Value,
        channel: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            data,
            channel: channel.into(),
            timestamp: chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0,
        }
    }

    /// Greeting pushed to a subscriber right after it connects.
    pub fn connected(subscriber_id: &str) -> Self {
        Self::new(
            "connected",
            serde_json::json!({ "subscriber_id": subscriber_id }),
            CHANNEL_ALL,
        )
    }

    /// Acknowledgement of a subscribe/unsubscribe, echoing the current set.
    pub fn subscription_update(channels: &HashSet<String>) -> Self {
        let mut sorted: Vec<&str> = channels.iter().map(String::as_str).collect();
        sorted.sort_unstable();
        Self::new(
            "subscription",
            serde_json::json!({ "channels": sorted }),
            CHANNEL_ALL,
        )
    }

    /// Whether a subscriber with the given channel set should receive this.
    pub fn matches(&self, channels: &HashSet<String>) -> bool {
        self.channel == CHANNEL_ALL || channels.contains(&self.channel)
    }
}

// ---------------------------------------------------------------------------
// Control messages — subscriber → server
// ---------------------------------------------------------------------------

/// Control messages a subscriber may send over its socket.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlMessage {
    Subscribe { channels: Vec<String> },
    Unsubscribe { channels: Vec<String> },
    /// Client-initiated ping; answered inline with a pong.
    Ping,
    /// Answer to a server ping; resets the liveness clock.
    Pong,
}

/// Control frames the server pushes outside the event envelope.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerControl {
    Ping,
    Pong,
}
