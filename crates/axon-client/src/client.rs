//! Resilient RPC client
//!
//! Issues typed request/response calls against the upstream engine. Each call
//! consults the circuit breaker before every attempt, classifies failures
//! into the retryable/non-retryable taxonomy, sleeps the computed backoff
//! between retries, and validates response envelopes before handing the
//! result back.

use axon_core::config::RetryPolicy;
use axon_core::protocol::{RequestEnvelope, ResponseEnvelope};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::circuit::CircuitBreaker;
use crate::error::{RpcError, RpcResult};

pub struct RpcClient {
    http: reqwest::Client,
    url: String,
    endpoint_id: String,
    policy: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
}

impl RpcClient {
    /// Build a client for one engine endpoint. Fails if the policy does not
    /// validate or the HTTP client cannot be constructed.
    pub fn new(url: impl Into<String>, policy: RetryPolicy) -> axon_core::Result<Self> {
        policy.validate()?;
        let http = reqwest::Client::builder()
            .connect_timeout(policy.connect_timeout())
            .read_timeout(policy.read_timeout())
            .build()
            .map_err(|e| axon_core::Error::config(format!("failed to build http client: {}", e)))?;

        let url = url.into();
        Ok(Self {
            endpoint_id: url.clone(),
            http,
            url,
            breaker: Arc::new(CircuitBreaker::new(policy.clone())),
            policy,
        })
    }

    /// Override the endpoint identity used for circuit bookkeeping
    /// (defaults to the URL; a logical name reads better in diagnostics).
    pub fn with_endpoint_id(mut self, id: impl Into<String>) -> Self {
        self.endpoint_id = id.into();
        self
    }

    /// Share a breaker table with other clients talking to the same engines.
    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn endpoint_id(&self) -> &str {
        &self.endpoint_id
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Call `method` with `params`, retrying transient failures.
    pub async fn call(&self, method: &str, params: Value) -> RpcResult<Value> {
        self.call_with_retryable(method, params, &[]).await
    }

    /// Like [`call`], but application error codes listed in
    /// `retryable_codes` are treated as transient rather than final.
    ///
    /// The whole retry loop runs inside the `request_timeout` total budget;
    /// hitting the budget abandons the in-flight attempt without scheduling
    /// another, the same as external cancellation.
    ///
    /// [`call`]: RpcClient::call
    pub async fn call_with_retryable(
        &self,
        method: &str,
        params: Value,
        retryable_codes: &[i64],
    ) -> RpcResult<Value> {
        let envelope = RequestEnvelope::new(method, params);
        match tokio::time::timeout(
            self.policy.request_timeout(),
            self.run_attempts(&envelope, retryable_codes),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(RpcError::Timeout(format!(
                "call budget of {:.1}s exhausted for method {}",
                self.policy.request_timeout, envelope.method
            ))),
        }
    }

    async fn run_attempts(
        &self,
        envelope: &RequestEnvelope,
        retryable_codes: &[i64],
    ) -> RpcResult<Value> {
        // The first attempt counts toward max_retries: 1 means no retry.
        for attempt in 1..=self.policy.max_retries {
            if !self.breaker.should_attempt(&self.endpoint_id) {
                return Err(RpcError::CircuitOpen {
                    endpoint: self.endpoint_id.clone(),
                });
            }

            debug!(
                method = %envelope.method,
                id = %envelope.id,
                attempt,
                "rpc attempt"
            );

            match self.attempt(envelope).await {
                Ok(value) => {
                    self.breaker.record_success(&self.endpoint_id);
                    return Ok(value);
                }
                Err(err) if is_retryable(&err, retryable_codes) => {
                    self.breaker.record_failure(&self.endpoint_id);
                    warn!(
                        method = %envelope.method,
                        attempt,
                        max_retries = self.policy.max_retries,
                        error = %err,
                        "rpc attempt failed"
                    );
                    if attempt >= self.policy.max_retries {
                        return Err(err);
                    }
                    let delay = self.breaker.compute_backoff(&self.endpoint_id);
                    debug!(delay_ms = delay.as_millis() as u64, "backing off");
                    tokio::time::sleep(delay).await;
                }
                // Protocol/application errors surface immediately and leave
                // the circuit untouched: the endpoint is up, just unhelpful.
                Err(err) => return Err(err),
            }
        }

        Err(RpcError::Connection(
            "retry loop exited without an attempt".to_string(),
        ))
    }

    async fn attempt(&self, envelope: &RequestEnvelope) -> RpcResult<Value> {
        let response = self.http.post(&self.url).json(envelope).send().await?;

        let status = response.status();
        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(RpcError::Server {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ResponseEnvelope = response
            .json()
            .await
            .map_err(|e| RpcError::Protocol(format!("unparseable response envelope: {}", e)))?;
        parsed.validate(&envelope.id)?;

        if let Some(err) = parsed.error {
            return Err(RpcError::Application {
                code: err.code,
                message: err.message,
            });
        }
        Ok(parsed.result.unwrap_or(Value::Null))
    }
}

fn is_retryable(err: &RpcError, retryable_codes: &[i64]) -> bool {
    match err {
        RpcError::Application { code, .. } => retryable_codes.contains(code),
        other => other.is_retryable(),
    }
}
