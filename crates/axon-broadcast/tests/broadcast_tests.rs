//! Integration tests for the fan-out path: registry + dispatcher + probe

use axon_broadcast::{BroadcastDispatcher, LivenessProbe, Outbound, SubscriberRegistry};
use axon_core::config::RealtimeConfig;
use axon_core::protocol::BroadcastMessage;
use axon_core::types::SubscriberId;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

fn test_config(capacity: usize) -> RealtimeConfig {
    RealtimeConfig {
        broadcast_queue_capacity: capacity,
        enqueue_timeout: 0.02,
        subscriber_buffer: 64,
        heartbeat_interval: 30.0,
    }
}

fn event(kind: &str, channel: &str) -> BroadcastMessage {
    BroadcastMessage::new(kind, serde_json::json!({}), channel)
}

/// Receive the next event frame within a deadline, skipping pings.
async fn recv_event(rx: &mut mpsc::Receiver<Outbound>) -> Option<BroadcastMessage> {
    loop {
        match timeout(Duration::from_millis(500), rx.recv()).await {
            Ok(Some(Outbound::Event(msg))) => return Some(msg),
            Ok(Some(Outbound::Ping)) => continue,
            Ok(None) | Err(_) => return None,
        }
    }
}

/// Assert nothing arrives for a little while.
async fn assert_silent(rx: &mut mpsc::Receiver<Outbound>) {
    match timeout(Duration::from_millis(100), rx.recv()).await {
        Ok(Some(Outbound::Event(msg))) => panic!("unexpected event: {}", msg.kind),
        _ => {}
    }
}

// ===========================================================================
// Channel routing
// ===========================================================================

#[tokio::test]
async fn subscriber_receives_only_matching_channels() {
    let registry = Arc::new(SubscriberRegistry::new());
    let (dispatcher, worker) = BroadcastDispatcher::channel(Arc::clone(&registry), &test_config(64));
    tokio::spawn(worker.run());

    let id = SubscriberId::new("tasks-watcher");
    let (tx, mut rx) = mpsc::channel(16);
    registry.connect(id.clone(), tx);
    registry.subscribe(&id, vec!["tasks".to_string()]);

    assert!(dispatcher.publish(event("off-topic", "security")).await);
    assert!(dispatcher.publish(event("assigned", "tasks")).await);

    // The security event is filtered out; the tasks event arrives
    let received = recv_event(&mut rx).await.expect("tasks event");
    assert_eq!(received.kind, "assigned");
    assert_silent(&mut rx).await;
}

#[tokio::test]
async fn all_channel_reaches_every_subscriber() {
    let registry = Arc::new(SubscriberRegistry::new());
    let (dispatcher, worker) = BroadcastDispatcher::channel(Arc::clone(&registry), &test_config(64));
    tokio::spawn(worker.run());

    let tasks_id = SubscriberId::new("tasks-only");
    let (tasks_tx, mut tasks_rx) = mpsc::channel(16);
    registry.connect(tasks_id.clone(), tasks_tx);
    registry.subscribe(&tasks_id, vec!["tasks".to_string()]);

    let bare_id = SubscriberId::new("no-subscriptions");
    let (bare_tx, mut bare_rx) = mpsc::channel(16);
    registry.connect(bare_id, bare_tx);

    assert!(dispatcher.publish(event("announcement", "all")).await);

    assert_eq!(recv_event(&mut tasks_rx).await.unwrap().kind, "announcement");
    assert_eq!(recv_event(&mut bare_rx).await.unwrap().kind, "announcement");
}

#[tokio::test]
async fn events_arrive_in_publish_order() {
    let registry = Arc::new(SubscriberRegistry::new());
    let (dispatcher, worker) = BroadcastDispatcher::channel(Arc::clone(&registry), &test_config(64));
    tokio::spawn(worker.run());

    let id = SubscriberId::new("ordered");
    let (tx, mut rx) = mpsc::channel(16);
    registry.connect(id.clone(), tx);
    registry.subscribe(&id, vec!["tasks".to_string()]);

    for i in 0..5 {
        assert!(dispatcher.publish(event(&format!("evt-{}", i), "tasks")).await);
    }

    for i in 0..5 {
        let received = recv_event(&mut rx).await.expect("ordered event");
        assert_eq!(received.kind, format!("evt-{}", i));
    }
}

// ===========================================================================
// Backpressure
// ===========================================================================

#[tokio::test]
async fn full_queue_drops_instead_of_blocking_publisher() {
    let registry = Arc::new(SubscriberRegistry::new());
    // Worker intentionally not spawned: the queue can only fill up
    let (dispatcher, _worker) = BroadcastDispatcher::channel(Arc::clone(&registry), &test_config(10));

    for i in 0..10 {
        assert!(
            dispatcher.publish(event(&format!("evt-{}", i), "all")).await,
            "event {} should fit",
            i
        );
    }

    let started = Instant::now();
    let queued = dispatcher.publish(event("overflow", "all")).await;
    assert!(!queued, "overflow event must be dropped");
    assert!(
        started.elapsed() < Duration::from_millis(500),
        "publish blocked for {:?}",
        started.elapsed()
    );

    let stats = dispatcher.stats();
    assert_eq!(stats.published, 10);
    assert_eq!(stats.dropped_queue_full, 1);
}

#[tokio::test]
async fn slow_subscriber_sheds_load_without_stalling_others() {
    let registry = Arc::new(SubscriberRegistry::new());
    let (dispatcher, worker) = BroadcastDispatcher::channel(Arc::clone(&registry), &test_config(64));
    tokio::spawn(worker.run());

    // Slow subscriber: buffer of 1, never drained during the burst
    let slow_id = SubscriberId::new("slow");
    let (slow_tx, mut slow_rx) = mpsc::channel(1);
    registry.connect(slow_id.clone(), slow_tx);
    registry.subscribe(&slow_id, vec!["tasks".to_string()]);

    let fast_id = SubscriberId::new("fast");
    let (fast_tx, mut fast_rx) = mpsc::channel(64);
    registry.connect(fast_id.clone(), fast_tx);
    registry.subscribe(&fast_id, vec!["tasks".to_string()]);

    for i in 0..5 {
        assert!(dispatcher.publish(event(&format!("evt-{}", i), "tasks")).await);
    }

    // The fast subscriber sees the whole burst
    for i in 0..5 {
        assert_eq!(recv_event(&mut fast_rx).await.unwrap().kind, format!("evt-{}", i));
    }

    // The slow one got the first event and shed the rest, but stays connected
    assert_eq!(recv_event(&mut slow_rx).await.unwrap().kind, "evt-0");
    assert!(registry.contains(&slow_id));
    assert!(dispatcher.stats().dropped_slow_subscriber > 0);
}

// ===========================================================================
// Disconnection
// ===========================================================================

#[tokio::test]
async fn disconnected_subscriber_receives_nothing_further() {
    let registry = Arc::new(SubscriberRegistry::new());
    let (dispatcher, worker) = BroadcastDispatcher::channel(Arc::clone(&registry), &test_config(64));
    tokio::spawn(worker.run());

    let id = SubscriberId::new("leaver");
    let (tx, mut rx) = mpsc::channel(16);
    let cancel = registry.connect(id.clone(), tx);
    registry.subscribe(&id, vec!["tasks".to_string()]);

    assert!(dispatcher.publish(event("before", "tasks")).await);
    assert_eq!(recv_event(&mut rx).await.unwrap().kind, "before");

    registry.disconnect(&id);
    assert!(cancel.is_cancelled());

    assert!(dispatcher.publish(event("after", "tasks")).await);
    // The stored sender is gone; the receiver drains to None
    match timeout(Duration::from_millis(200), rx.recv()).await {
        Ok(None) | Err(_) => {}
        Ok(Some(Outbound::Event(msg))) => panic!("received after disconnect: {}", msg.kind),
        Ok(Some(Outbound::Ping)) => panic!("pinged after disconnect"),
    }
}

#[tokio::test]
async fn closed_send_handle_prunes_subscriber_mid_fanout() {
    let registry = Arc::new(SubscriberRegistry::new());
    let (dispatcher, worker) = BroadcastDispatcher::channel(Arc::clone(&registry), &test_config(64));
    tokio::spawn(worker.run());

    let dead_id = SubscriberId::new("dead");
    let (dead_tx, dead_rx) = mpsc::channel(16);
    registry.connect(dead_id.clone(), dead_tx);
    registry.subscribe(&dead_id, vec!["tasks".to_string()]);
    drop(dead_rx); // Connection task is gone

    let live_id = SubscriberId::new("live");
    let (live_tx, mut live_rx) = mpsc::channel(16);
    registry.connect(live_id.clone(), live_tx);
    registry.subscribe(&live_id, vec!["tasks".to_string()]);

    assert!(dispatcher.publish(event("who-is-there", "tasks")).await);

    // Fan-out reaches the live subscriber despite the dead one
    assert_eq!(recv_event(&mut live_rx).await.unwrap().kind, "who-is-there");

    // And the dead one is pruned from the registry
    let deadline = Instant::now() + Duration::from_secs(1);
    while registry.contains(&dead_id) && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!registry.contains(&dead_id));
    assert!(registry.contains(&live_id));
}

// ===========================================================================
// Shutdown
// ===========================================================================

#[tokio::test]
async fn shutdown_rejects_new_publishes_and_drains_queue() {
    let registry = Arc::new(SubscriberRegistry::new());
    let (dispatcher, worker) = BroadcastDispatcher::channel(Arc::clone(&registry), &test_config(64));

    let id = SubscriberId::new("draining");
    let (tx, mut rx) = mpsc::channel(16);
    registry.connect(id.clone(), tx);
    registry.subscribe(&id, vec!["tasks".to_string()]);

    // Queue two events before the worker even starts
    assert!(dispatcher.publish(event("evt-0", "tasks")).await);
    assert!(dispatcher.publish(event("evt-1", "tasks")).await);

    dispatcher.begin_shutdown();
    assert!(!dispatcher.publish(event("late", "tasks")).await);

    let worker_handle = tokio::spawn(worker.run());

    // Queued events are still delivered during the drain
    assert_eq!(recv_event(&mut rx).await.unwrap().kind, "evt-0");
    assert_eq!(recv_event(&mut rx).await.unwrap().kind, "evt-1");

    timeout(Duration::from_secs(3), worker_handle)
        .await
        .expect("worker exits after drain")
        .unwrap();
}

// ===========================================================================
// Liveness probe
// ===========================================================================

#[tokio::test]
async fn probe_pings_connected_subscribers() {
    let registry = Arc::new(SubscriberRegistry::new());
    let shutdown = CancellationToken::new();
    let probe = LivenessProbe::new(
        Arc::clone(&registry),
        Duration::from_millis(50),
        shutdown.clone(),
    );
    tokio::spawn(probe.run());

    let id = SubscriberId::new("pinged");
    let (tx, mut rx) = mpsc::channel(16);
    registry.connect(id, tx);

    match timeout(Duration::from_millis(500), rx.recv()).await {
        Ok(Some(Outbound::Ping)) => {}
        other => panic!("expected ping, got {:?}", other.map(|o| o.is_some())),
    }
    shutdown.cancel();
}

#[tokio::test]
async fn probe_disconnects_closed_handles() {
    let registry = Arc::new(SubscriberRegistry::new());
    let shutdown = CancellationToken::new();
    let probe = LivenessProbe::new(
        Arc::clone(&registry),
        Duration::from_millis(50),
        shutdown.clone(),
    );
    tokio::spawn(probe.run());

    let id = SubscriberId::new("gone");
    let (tx, rx) = mpsc::channel(16);
    registry.connect(id.clone(), tx);
    drop(rx);

    let deadline = Instant::now() + Duration::from_secs(1);
    while registry.contains(&id) && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!registry.contains(&id));
    shutdown.cancel();
}
