//! Gateway server — wires the broadcaster, liveness probe and RPC client
//! behind an axum surface, and owns the ordered shutdown sequence.

use crate::ws::handle_connection;
use axon_broadcast::{BroadcastDispatcher, LivenessProbe, SubscriberRegistry};
use axon_client::{RpcClient, RpcError};
use axon_core::config::AxonConfig;
use axon_core::protocol::BroadcastMessage;
use axum::{
    extract::{State, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

/// Shared state behind every route.
pub struct AppState {
    pub registry: Arc<SubscriberRegistry>,
    pub dispatcher: BroadcastDispatcher,
    pub client: Arc<RpcClient>,
    pub subscriber_buffer: usize,
    pub started_at: Instant,
}

/// Build the route table over an already-wired state.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/publish", post(publish_handler))
        .route("/call", post(call_handler))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any))
        .with_state(state)
}

/// Start the gateway and block until shutdown completes.
pub async fn start_gateway(config: AxonConfig) -> anyhow::Result<()> {
    config.validate()?;

    let registry = Arc::new(SubscriberRegistry::new());
    let (dispatcher, worker) = BroadcastDispatcher::channel(Arc::clone(&registry), &config.realtime);
    let worker_handle = tokio::spawn(worker.run());

    let probe_shutdown = CancellationToken::new();
    let probe = LivenessProbe::new(
        Arc::clone(&registry),
        config.realtime.heartbeat_interval(),
        probe_shutdown.clone(),
    );
    let probe_handle = tokio::spawn(probe.run());

    let client = Arc::new(
        RpcClient::new(&config.gateway.engine_url, config.retry.clone())?
            .with_endpoint_id("engine"),
    );

    let state = Arc::new(AppState {
        registry: Arc::clone(&registry),
        dispatcher: dispatcher.clone(),
        client,
        subscriber_buffer: config.realtime.subscriber_buffer,
        started_at: Instant::now(),
    });
    let app = router(state);

    let bind_addr: SocketAddr =
        format!("{}:{}", config.gateway.bind.to_addr(), config.gateway.port).parse()?;

    info!("Axon Gateway v{} starting", env!("CARGO_PKG_VERSION"));
    info!("  Listening on: {}", bind_addr);
    info!("  WebSocket: ws://{}/ws", bind_addr);
    info!("  Engine: {}", config.gateway.engine_url);
    info!(
        "  Broadcast queue: {} (heartbeat every {}s)",
        config.realtime.broadcast_queue_capacity, config.realtime.heartbeat_interval
    );

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Ordered teardown, each step time-boxed: stop accepting publishes,
    // drain the queue, close subscriber handles, stop the liveness loop.
    dispatcher.begin_shutdown();
    if tokio::time::timeout(Duration::from_secs(3), worker_handle)
        .await
        .is_err()
    {
        warn!("dispatcher drain exceeded its deadline");
    }
    registry.close_all();
    probe_shutdown.cancel();
    if tokio::time::timeout(Duration::from_secs(1), probe_handle)
        .await
        .is_err()
    {
        warn!("liveness probe ignored shutdown");
    }
    info!("gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "subscribers": state.registry.len(),
        "circuits": state.client.breaker().snapshot(),
        "broadcast": state.dispatcher.stats(),
    }))
}

/// Body accepted by `POST /publish` — producers hand events to the fan-out.
#[derive(Debug, Deserialize)]
struct PublishRequest {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
    channel: String,
}

async fn publish_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PublishRequest>,
) -> impl IntoResponse {
    let message = BroadcastMessage::new(body.kind, body.data, body.channel);
    let queued = state.dispatcher.publish(message).await;
    Json(serde_json::json!({ "queued": queued }))
}

/// Body accepted by `POST /call` — proxied to the engine through the
/// resilient client.
#[derive(Debug, Deserialize)]
struct CallRequest {
    method: String,
    #[serde(default)]
    params: serde_json::Value,
    #[serde(default)]
    retryable_codes: Vec<i64>,
}

async fn call_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CallRequest>,
) -> impl IntoResponse {
    match state
        .client
        .call_with_retryable(&body.method, body.params, &body.retryable_codes)
        .await
    {
        Ok(result) => (StatusCode::OK, Json(serde_json::json!({ "result": result }))),
        Err(err) => {
            let status = match &err {
                RpcError::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
                RpcError::Timeout(_) | RpcError::Connection(_) | RpcError::Server { .. } => {
                    StatusCode::BAD_GATEWAY
                }
                RpcError::Protocol(_) | RpcError::Application { .. } => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            };
            (
                status,
                Json(serde_json::json!({
                    "error": { "kind": err.kind(), "message": err.to_string() }
                })),
            )
        }
    }
}
