//! Subscriber handles and the per-subscriber delivery task

use futures::{Sink, SinkExt};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::Hub;

/// Serialized alert shared by every subscriber of one broadcast
pub type Payload = Arc<str>;

/// Opaque unique handle of one connected client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0.simple())
    }
}

/// Hub-owned half of a subscriber.
///
/// Holds the only sender of the outbound queue, so dropping it is what
/// closes the queue.
#[derive(Debug)]
pub struct Subscriber {
    id: SubscriberId,
    outbound: mpsc::Sender<Payload>,
}

impl Subscriber {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub(super) fn try_deliver(&self, payload: &Payload) -> Result<(), mpsc::error::TrySendError<Payload>> {
        self.outbound.try_send(Arc::clone(payload))
    }
}

/// Transport-owned half of a subscriber: the receiving end of its outbound queue
#[derive(Debug)]
pub struct SubscriberQueue {
    id: SubscriberId,
    inbound: mpsc::Receiver<Payload>,
}

/// Create a connected subscriber pair with a queue of `capacity` messages (minimum 1)
pub fn pair(capacity: usize) -> (Subscriber, SubscriberQueue) {
    let id = SubscriberId::generate();
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        Subscriber { id, outbound: tx },
        SubscriberQueue { id, inbound: rx },
    )
}

impl SubscriberQueue {
    /// Next queued payload, or `None` once the hub has closed the queue
    #[cfg(test)]
    pub async fn recv(&mut self) -> Option<Payload> {
        self.inbound.recv().await
    }

    /// Drain the queue into `sink` until the hub closes it or a write fails.
    ///
    /// A write failure unregisters the subscriber. When the queue closes the
    /// sink is closed too so the transport can send its own close frame.
    pub async fn deliver<S>(mut self, mut sink: S, hub: Hub)
    where
        S: Sink<Payload> + Unpin,
        S::Error: fmt::Display,
    {
        let id = self.id;
        while let Some(payload) = self.inbound.recv().await {
            if let Err(e) = sink.send(payload).await {
                warn!(subscriber = %id, error = %e, "Write to subscriber failed, unregistering");
                hub.unregister(id).await;
                return;
            }
        }

        debug!(subscriber = %id, "Outbound queue closed");
        if let Err(e) = sink.close().await {
            debug!(subscriber = %id, error = %e, "Closing subscriber sink failed");
        }
    }
}
