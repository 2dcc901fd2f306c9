//! Fan-out of server-pushed events to every connected chat client, so a
//! notification ingested off `/api/notifications` or the background poller
//! can reach a live browser session without it going back through `/ws`.

use tokio::sync::broadcast;

const BROADCAST_CAPACITY: usize = 256;

pub struct ConnectionRegistry {
    tx: broadcast::Sender<String>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { tx }
    }

    /// A newly opened `/ws` connection subscribes to hear pushed events.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    /// Push a serialized envelope to every subscriber. Silently drops if
    /// nobody is listening.
    pub fn broadcast(&self, payload: String) {
        let _ = self.tx.send(payload);
    }

    /// Number of live `/ws` connections currently subscribed.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
