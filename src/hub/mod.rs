//! Real-time alert fan-out hub
//!
//! A single coordination task owns the set of connected subscribers. Every
//! membership change and every broadcast reaches it through one bounded FIFO
//! channel, so commands are applied strictly in arrival order and nothing
//! else ever touches the set.
//!
//! Callers only ever wait for room on that channel. Broadcasts never wait on
//! a subscriber: the record is serialized once and offered to each outbound
//! queue with `try_send`. A full or closed queue gets its subscriber evicted
//! instead of slowing everyone else down.

mod subscriber;

pub use subscriber::{Payload, Subscriber, SubscriberId, SubscriberQueue};

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::alert::AlertRecord;

/// Hub sizing
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Outbound queue capacity per subscriber
    pub queue_capacity: usize,
    /// Capacity of the coordination channel
    pub command_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            command_capacity: 1024,
        }
    }
}

enum Command {
    Register(Subscriber),
    Unregister(SubscriberId),
    Broadcast(Arc<AlertRecord>),
    Sync(oneshot::Sender<usize>),
    Shutdown,
}

#[derive(Default)]
struct Gauges {
    members: AtomicUsize,
    evicted: AtomicU64,
}

/// Cloneable handle to the coordination task
#[derive(Clone)]
pub struct Hub {
    commands: mpsc::Sender<Command>,
    gauges: Arc<Gauges>,
    queue_capacity: usize,
}

impl Hub {
    /// Start the coordination task. The returned handle resolves once the
    /// hub has been shut down and every queued command has been drained.
    pub fn spawn(config: HubConfig) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.command_capacity.max(1));
        let gauges = Arc::new(Gauges::default());

        let hub_loop = HubLoop {
            commands: rx,
            members: HashMap::new(),
            gauges: gauges.clone(),
        };
        let task = tokio::spawn(hub_loop.run());

        info!(
            queue_capacity = config.queue_capacity,
            command_capacity = config.command_capacity,
            "Alert hub started"
        );

        let hub = Self {
            commands: tx,
            gauges,
            queue_capacity: config.queue_capacity,
        };
        (hub, task)
    }

    /// Build a subscriber pair sized for this hub
    pub fn subscriber(&self) -> (Subscriber, SubscriberQueue) {
        subscriber::pair(self.queue_capacity)
    }

    /// Add a subscriber to the membership set.
    ///
    /// Only waits for room on the coordination channel. If the hub is gone
    /// the subscriber is dropped, which closes its queue.
    pub async fn register(&self, subscriber: Subscriber) {
        let id = subscriber.id();
        if self.commands.send(Command::Register(subscriber)).await.is_err() {
            debug!(subscriber = %id, "Hub stopped, subscriber not registered");
        }
    }

    /// Remove a subscriber and close its queue. Unknown ids are ignored.
    pub async fn unregister(&self, id: SubscriberId) {
        let _ = self.commands.send(Command::Unregister(id)).await;
    }

    /// Queue `record` for every current subscriber.
    ///
    /// Only waits for room on the coordination channel, never on a
    /// subscriber, so a saturated hub slows the producer down instead of
    /// losing the alert.
    pub async fn broadcast(&self, record: AlertRecord) {
        if self.commands.send(Command::Broadcast(Arc::new(record))).await.is_err() {
            debug!("Hub stopped, broadcast ignored");
        }
    }

    /// Wait until every command submitted before this call has been applied.
    ///
    /// Returns the member count at that point, or `None` once the hub has
    /// stopped.
    pub async fn sync(&self) -> Option<usize> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(Command::Sync(tx)).await.ok()?;
        rx.await.ok()
    }

    /// Stop accepting commands. Already queued commands are still applied,
    /// then every subscriber queue is closed and the task exits.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }

    pub fn subscriber_count(&self) -> usize {
        self.gauges.members.load(Ordering::Relaxed)
    }

    pub fn evicted_subscribers(&self) -> u64 {
        self.gauges.evicted.load(Ordering::Relaxed)
    }
}

/// The single writer of the membership set
struct HubLoop {
    commands: mpsc::Receiver<Command>,
    members: HashMap<SubscriberId, Subscriber>,
    gauges: Arc<Gauges>,
}

impl HubLoop {
    async fn run(mut self) {
        while let Some(command) = self.commands.recv().await {
            match command {
                Command::Register(subscriber) => self.register(subscriber),
                Command::Unregister(id) => self.unregister(id),
                Command::Broadcast(record) => self.broadcast(&record),
                Command::Sync(reply) => {
                    let _ = reply.send(self.members.len());
                }
                Command::Shutdown => {
                    debug!("Alert hub draining");
                    self.commands.close();
                }
            }
            self.gauges.members.store(self.members.len(), Ordering::Relaxed);
        }

        let remaining = self.members.len();
        self.members.clear();
        self.gauges.members.store(0, Ordering::Relaxed);
        info!(closed = remaining, "Alert hub stopped");
    }

    fn register(&mut self, subscriber: Subscriber) {
        let id = subscriber.id();
        if self.members.insert(id, subscriber).is_some() {
            warn!(subscriber = %id, "Subscriber registered twice, replacing previous queue");
        }
        debug!(subscriber = %id, members = self.members.len(), "Subscriber registered");
    }

    fn unregister(&mut self, id: SubscriberId) {
        match self.members.remove(&id) {
            Some(_) => debug!(subscriber = %id, members = self.members.len(), "Subscriber unregistered"),
            None => debug!(subscriber = %id, "Unregister for unknown subscriber ignored"),
        }
    }

    fn broadcast(&mut self, record: &AlertRecord) {
        let payload: Payload = match serde_json::to_string(record) {
            Ok(json) => json.into(),
            Err(e) => {
                error!(rule = %record.rule_name, error = %e, "Failed to serialize alert");
                return;
            }
        };

        let mut evicted = Vec::new();
        for (id, subscriber) in &self.members {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| subscriber.try_deliver(&payload)));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(mpsc::error::TrySendError::Full(_))) => {
                    warn!(subscriber = %id, "Subscriber queue full, evicting");
                    evicted.push(*id);
                }
                Ok(Err(mpsc::error::TrySendError::Closed(_))) => {
                    debug!(subscriber = %id, "Subscriber queue closed, evicting");
                    evicted.push(*id);
                }
                Err(_) => {
                    error!(subscriber = %id, "Panic while delivering alert, evicting");
                    evicted.push(*id);
                }
            }
        }

        for id in evicted {
            self.members.remove(&id);
            self.gauges.evicted.fetch_add(1, Ordering::Relaxed);
        }
    }
}
