//! Liveness probe — periodic heartbeat that prunes dead subscribers
//!
//! Every interval, pings each registered subscriber through its send handle.
//! A closed handle disconnects immediately, exactly like a dispatcher send
//! failure. A subscriber that keeps accepting writes but never answers with
//! a pong is reaped once its heartbeat clock goes stale: a stuck client can
//! hold a socket open forever without reading from it.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::registry::{Outbound, SubscriberRegistry};

/// Extra slack on top of two missed heartbeat intervals before a silent
/// subscriber counts as dead.
const STALE_GRACE: Duration = Duration::from_secs(5);

pub struct LivenessProbe {
    registry: Arc<SubscriberRegistry>,
    interval: Duration,
    shutdown: CancellationToken,
}

impl LivenessProbe {
    pub fn new(
        registry: Arc<SubscriberRegistry>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            interval,
            shutdown,
        }
    }

    pub async fn run(self) {
        info!(interval_secs = self.interval.as_secs_f64(), "liveness probe started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => self.sweep(),
            }
        }
        info!("liveness probe stopped");
    }

    fn sweep(&self) {
        let stale_after = self.interval * 2 + STALE_GRACE;
        for subscriber in self.registry.snapshot() {
            if subscriber.last_heartbeat_at.elapsed() > stale_after {
                warn!(
                    subscriber = %subscriber.id,
                    "no pong within {:?}, disconnecting",
                    stale_after
                );
                self.registry.disconnect(&subscriber.id);
                continue;
            }
            match subscriber.sender.try_send(Outbound::Ping) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    // Buffer full; the stale check above settles their fate.
                    debug!(subscriber = %subscriber.id, "ping skipped, buffer full");
                }
                Err(TrySendError::Closed(_)) => {
                    warn!(subscriber = %subscriber.id, "ping failed, disconnecting");
                    self.registry.disconnect(&subscriber.id);
                }
            }
        }
    }
}
