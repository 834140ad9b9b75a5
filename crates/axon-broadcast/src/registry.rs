//! Subscriber registry
//!
//! Tracks connected real-time subscribers and their channel subscriptions.
//! The dispatcher and the liveness probe never hold the registry lock across
//! I/O: they take a `snapshot()` and talk to the cloned send handles.

use axon_core::protocol::BroadcastMessage;
use axon_core::types::SubscriberId;
use dashmap::DashMap;
use std::collections::HashSet;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Frame pushed to one subscriber's writer task.
#[derive(Debug, Clone)]
pub enum Outbound {
    Event(BroadcastMessage),
    Ping,
}

struct Subscriber {
    channels: HashSet<String>,
    connected_at: Instant,
    last_heartbeat_at: Instant,
    sender: mpsc::Sender<Outbound>,
    cancel: CancellationToken,
}

/// Point-in-time copy of one subscriber, safe to use without the lock.
#[derive(Clone)]
pub struct SubscriberSnapshot {
    pub id: SubscriberId,
    pub channels: HashSet<String>,
    pub connected_at: Instant,
    pub last_heartbeat_at: Instant,
    pub sender: mpsc::Sender<Outbound>,
}

#[derive(Default)]
pub struct SubscriberRegistry {
    inner: DashMap<SubscriberId, Subscriber>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber. A duplicate id replaces the prior entry,
    /// cancelling its connection first — ids are caller-supplied session
    /// tokens and unique in practice.
    ///
    /// The returned token is cancelled when the subscriber is disconnected;
    /// the connection's writer task must stop on it.
    pub fn connect(&self, id: SubscriberId, sender: mpsc::Sender<Outbound>) -> CancellationToken {
        let cancel = CancellationToken::new();
        let now = Instant::now();
        let subscriber = Subscriber {
            channels: HashSet::new(),
            connected_at: now,
            last_heartbeat_at: now,
            sender,
            cancel: cancel.clone(),
        };
        if let Some(previous) = self.inner.insert(id.clone(), subscriber) {
            previous.cancel.cancel();
            info!(subscriber = %id, "replaced existing subscriber entry");
        } else {
            info!(subscriber = %id, "subscriber connected");
        }
        cancel
    }

    /// Remove a subscriber and cancel its connection. Idempotent; dispatch
    /// racing against a removal is a no-op, not an error.
    pub fn disconnect(&self, id: &SubscriberId) -> bool {
        match self.inner.remove(id) {
            Some((_, subscriber)) => {
                subscriber.cancel.cancel();
                info!(subscriber = %id, "subscriber disconnected");
                true
            }
            None => false,
        }
    }

    /// Add channels to a subscriber's set. Returns the updated set, or None
    /// for an unknown id.
    pub fn subscribe(
        &self,
        id: &SubscriberId,
        channels: impl IntoIterator<Item = String>,
    ) -> Option<HashSet<String>> {
        let mut entry = self.inner.get_mut(id)?;
        entry.channels.extend(channels);
        debug!(subscriber = %id, channels = ?entry.channels, "subscriptions updated");
        Some(entry.channels.clone())
    }

    /// Remove channels from a subscriber's set. Returns the updated set, or
    /// None for an unknown id.
    pub fn unsubscribe(&self, id: &SubscriberId, channels: &[String]) -> Option<HashSet<String>> {
        let mut entry = self.inner.get_mut(id)?;
        for channel in channels {
            entry.channels.remove(channel);
        }
        debug!(subscriber = %id, channels = ?entry.channels, "subscriptions updated");
        Some(entry.channels.clone())
    }

    /// Reset a subscriber's liveness clock (called on pong).
    pub fn touch(&self, id: &SubscriberId) {
        if let Some(mut entry) = self.inner.get_mut(id) {
            entry.last_heartbeat_at = Instant::now();
        }
    }

    /// Point-in-time copy of every subscriber. A subscription added after
    /// the snapshot is taken does not see in-flight messages.
    pub fn snapshot(&self) -> Vec<SubscriberSnapshot> {
        self.inner
            .iter()
            .map(|entry| SubscriberSnapshot {
                id: entry.key().clone(),
                channels: entry.value().channels.clone(),
                connected_at: entry.value().connected_at,
                last_heartbeat_at: entry.value().last_heartbeat_at,
                sender: entry.value().sender.clone(),
            })
            .collect()
    }

    pub fn contains(&self, id: &SubscriberId) -> bool {
        self.inner.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Disconnect everyone (shutdown path).
    pub fn close_all(&self) {
        let ids: Vec<SubscriberId> = self.inner.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.disconnect(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> (mpsc::Sender<Outbound>, mpsc::Receiver<Outbound>) {
        mpsc::channel(8)
    }

    #[test]
    fn connect_subscribe_snapshot() {
        let registry = SubscriberRegistry::new();
        let (tx, _rx) = handle();
        registry.connect(SubscriberId::new("s1"), tx);
        registry.subscribe(&SubscriberId::new("s1"), vec!["tasks".to_string()]);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot[0].channels.contains("tasks"));
    }

    #[test]
    fn duplicate_id_replaces_and_cancels_previous() {
        let registry = SubscriberRegistry::new();
        let (tx1, _rx1) = handle();
        let token1 = registry.connect(SubscriberId::new("s1"), tx1);
        let (tx2, _rx2) = handle();
        let _token2 = registry.connect(SubscriberId::new("s1"), tx2);

        assert!(token1.is_cancelled());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn disconnect_is_idempotent() {
        let registry = SubscriberRegistry::new();
        let (tx, _rx) = handle();
        let token = registry.connect(SubscriberId::new("s1"), tx);

        assert!(registry.disconnect(&SubscriberId::new("s1")));
        assert!(token.is_cancelled());
        assert!(!registry.disconnect(&SubscriberId::new("s1")));
    }

    #[test]
    fn unsubscribe_removes_only_named_channels() {
        let registry = SubscriberRegistry::new();
        let (tx, _rx) = handle();
        let id = SubscriberId::new("s1");
        registry.connect(id.clone(), tx);
        registry.subscribe(&id, vec!["tasks".to_string(), "metrics".to_string()]);

        let remaining = registry.unsubscribe(&id, &["tasks".to_string()]).unwrap();
        assert!(!remaining.contains("tasks"));
        assert!(remaining.contains("metrics"));
    }

    #[test]
    fn subscribe_unknown_id_is_none() {
        let registry = SubscriberRegistry::new();
        assert!(registry
            .subscribe(&SubscriberId::new("ghost"), vec!["tasks".to_string()])
            .is_none());
    }
}
