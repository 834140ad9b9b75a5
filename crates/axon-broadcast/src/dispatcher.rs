//! Broadcast dispatcher — bounded queue plus a single fan-out worker
//!
//! Producers publish onto a bounded queue with a short enqueue timeout; a
//! full queue drops the message rather than stalling whatever produced it.
//! One worker drains the queue and fans each message out to every matching
//! subscriber via `try_send` on its handle, so one slow client never blocks
//! the rest. Per-subscriber ordering follows queue order: single worker,
//! FIFO queue, FIFO per-subscriber handle.

use axon_core::config::RealtimeConfig;
use axon_core::protocol::BroadcastMessage;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::registry::{Outbound, SubscriberRegistry};

/// How long the worker may keep delivering queued messages after shutdown.
const DRAIN_BUDGET: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

/// Monotonic fan-out counters, shared between dispatcher handles and worker.
#[derive(Default)]
pub struct BroadcastStats {
    published: AtomicU64,
    delivered: AtomicU64,
    dropped_queue_full: AtomicU64,
    dropped_slow_subscriber: AtomicU64,
}

/// Serializable view of [`BroadcastStats`] for diagnostics endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub published: u64,
    pub delivered: u64,
    pub dropped_queue_full: u64,
    pub dropped_slow_subscriber: u64,
}

impl BroadcastStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped_queue_full: self.dropped_queue_full.load(Ordering::Relaxed),
            dropped_slow_subscriber: self.dropped_slow_subscriber.load(Ordering::Relaxed),
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatcher handle — the publish side
// ---------------------------------------------------------------------------

/// Cloneable publish handle. Publishing never blocks the producer beyond the
/// configured enqueue timeout.
#[derive(Clone)]
pub struct BroadcastDispatcher {
    tx: mpsc::Sender<BroadcastMessage>,
    enqueue_timeout: Duration,
    stats: Arc<BroadcastStats>,
    shutdown: CancellationToken,
}

impl BroadcastDispatcher {
    /// Build the dispatcher pair: the publish handle and the worker that
    /// must be spawned to drain it.
    pub fn channel(
        registry: Arc<SubscriberRegistry>,
        config: &RealtimeConfig,
    ) -> (BroadcastDispatcher, BroadcastWorker) {
        let (tx, rx) = mpsc::channel(config.broadcast_queue_capacity);
        let stats = Arc::new(BroadcastStats::default());
        let shutdown = CancellationToken::new();

        let dispatcher = BroadcastDispatcher {
            tx,
            enqueue_timeout: config.enqueue_timeout(),
            stats: Arc::clone(&stats),
            shutdown: shutdown.clone(),
        };
        let worker = BroadcastWorker {
            rx,
            registry,
            stats,
            shutdown,
        };
        (dispatcher, worker)
    }

    /// Enqueue a message for fan-out. Returns false if the message was
    /// dropped (queue full past the enqueue timeout, or shutting down).
    pub async fn publish(&self, message: BroadcastMessage) -> bool {
        if self.shutdown.is_cancelled() {
            self.stats.dropped_queue_full.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        match self.tx.send_timeout(message, self.enqueue_timeout).await {
            Ok(()) => {
                self.stats.published.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(SendTimeoutError::Timeout(message) | SendTimeoutError::Closed(message)) => {
                self.stats.dropped_queue_full.fetch_add(1, Ordering::Relaxed);
                warn!(
                    channel = %message.channel,
                    kind = %message.kind,
                    "broadcast queue full, message dropped"
                );
                false
            }
        }
    }

    /// Stop accepting publishes. The worker drains what is already queued
    /// (time-boxed) and exits.
    pub fn begin_shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

// ---------------------------------------------------------------------------
// Worker — the consume side
// ---------------------------------------------------------------------------

pub struct BroadcastWorker {
    rx: mpsc::Receiver<BroadcastMessage>,
    registry: Arc<SubscriberRegistry>,
    stats: Arc<BroadcastStats>,
    shutdown: CancellationToken,
}

impl BroadcastWorker {
    /// Run until shutdown (then drain, time-boxed) or until every publish
    /// handle is gone.
    pub async fn run(mut self) {
        info!("broadcast dispatcher started");
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                message = self.rx.recv() => match message {
                    Some(message) => self.dispatch(message),
                    None => {
                        info!("broadcast dispatcher stopped: publishers gone");
                        return;
                    }
                },
            }
        }

        // Shutdown: publishers are rejected already, deliver what's queued.
        let deadline = Instant::now() + DRAIN_BUDGET;
        let mut drained = 0u64;
        while let Ok(message) = self.rx.try_recv() {
            if Instant::now() >= deadline {
                warn!("drain budget exhausted, remaining broadcasts dropped");
                break;
            }
            self.dispatch(message);
            drained += 1;
        }
        info!(drained, "broadcast dispatcher stopped");
    }

    fn dispatch(&self, message: BroadcastMessage) {
        for subscriber in self.registry.snapshot() {
            if !message.matches(&subscriber.channels) {
                continue;
            }
            match subscriber.sender.try_send(Outbound::Event(message.clone())) {
                Ok(()) => {
                    self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(TrySendError::Full(_)) => {
                    // Slow client: shed this message for them, keep the rest
                    // of the fan-out moving. The liveness probe reaps them if
                    // they never recover.
                    self.stats
                        .dropped_slow_subscriber
                        .fetch_add(1, Ordering::Relaxed);
                    debug!(subscriber = %subscriber.id, "subscriber buffer full, event dropped");
                }
                Err(TrySendError::Closed(_)) => {
                    warn!(subscriber = %subscriber.id, "send handle closed, disconnecting");
                    self.registry.disconnect(&subscriber.id);
                }
            }
        }
    }
}
