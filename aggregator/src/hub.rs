use std::sync::Arc;

use tokio::sync::broadcast;

use crate::store::SnapshotPayload;

/// How many unconsumed broadcasts a slow connection may fall behind before
/// it starts skipping ahead to the latest version.
const CAPACITY: usize = 16;

/// Fans canonical snapshots out to every currently attached connection.
///
/// Delivery is best-effort: a connection that is gone at publish time simply
/// misses the payload and catches up on the next one it does receive.
#[derive(Clone)]
pub struct BroadcastHub {
    tx: broadcast::Sender<Arc<SnapshotPayload>>,
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CAPACITY);
        Self { tx }
    }

    /// Subscribes one connection; only payloads published after this call are
    /// delivered.
    pub fn attach(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
        }
    }

    /// Hands `payload` to every attached connection.
    ///
    /// # Returns
    /// The number of connections the payload was handed to.
    pub fn publish(&self, payload: Arc<SnapshotPayload>) -> usize {
        self.tx.send(payload).unwrap_or(0)
    }
}

/// One connection's view of the broadcast stream.
pub struct Subscription {
    rx: broadcast::Receiver<Arc<SnapshotPayload>>,
}

impl Subscription {
    /// Waits for the next published snapshot.
    ///
    /// A subscriber that lagged past the hub's capacity skips straight to the
    /// newest payloads; stale intermediate versions are superseded anyway.
    /// `None` means the hub itself is gone.
    pub async fn recv(&mut self) -> Option<Arc<SnapshotPayload>> {
        loop {
            match self.rx.recv().await {
                Ok(payload) => return Some(payload),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
