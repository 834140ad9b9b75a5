//! Axon Broadcast - subscriber registry, fan-out dispatcher, liveness probe

pub mod dispatcher;
pub mod probe;
pub mod registry;

pub use dispatcher::{BroadcastDispatcher, BroadcastStats, BroadcastWorker, StatsSnapshot};
pub use probe::LivenessProbe;
pub use registry::{Outbound, SubscriberRegistry, SubscriberSnapshot};
