//! Commit notifications. After a block's commit protocol completes and
//! the in-memory pointer has advanced, subscribers (mempools, indexers,
//! RPC layers) get a [`CommitEvent`] over a tokio broadcast channel.
//! Delivery is best effort: a slow or absent subscriber never blocks or
//! fails a commit, and a lagged subscriber simply misses events.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use crate::crypto::hash::Hash;
use crate::types::ExecNotify;

/// Broadcast channel depth. A subscriber further behind than this loses
/// the oldest events.
const CHANNEL_CAPACITY: usize = 256;

/// What subscribers learn about each committed block.
#[derive(Clone, Debug)]
pub struct CommitEvent {
    /// Committed height.
    pub height: u64,
    /// Committed block hash.
    pub block_hash: Hash,
    /// State root recorded for this height.
    pub state_root: Hash,
    /// Per-transaction notifications, shared rather than copied per
    /// subscriber.
    pub notify: Arc<Vec<ExecNotify>>,
}

/// Fan-out point for commit events.
pub struct CommitNotifier {
    sender: broadcast::Sender<CommitEvent>,
}

impl Default for CommitNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl CommitNotifier {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Open a new subscription. Only commits after this call are seen.
    pub fn subscribe(&self) -> broadcast::Receiver<CommitEvent> {
        self.sender.subscribe()
    }

    /// Publish one commit. An error from the channel just means nobody
    /// is listening right now.
    pub fn publish(&self, event: CommitEvent) {
        let height = event.height;
        if self.sender.send(event).is_err() {
            debug!(height, "no commit subscribers");
        }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash::sha256;

    fn event(height: u64) -> CommitEvent {
        CommitEvent {
            height,
            block_hash: sha256(&height.to_le_bytes()),
            state_root: sha256(b"root"),
            notify: Arc::new(Vec::new()),
        }
    }

    #[tokio::test]
    async fn subscribers_see_commits_in_order() {
        let notifier = CommitNotifier::new();
        let mut rx = notifier.subscribe();
        notifier.publish(event(1));
        notifier.publish(event(2));
        assert_eq!(rx.recv().await.unwrap().height, 1);
        assert_eq!(rx.recv().await.unwrap().height, 2);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_harmless() {
        let notifier = CommitNotifier::new();
        notifier.publish(event(1));
        assert_eq!(notifier.subscriber_count(), 0);

        // A late subscriber only sees what comes after it.
        let mut rx = notifier.subscribe();
        notifier.publish(event(2));
        assert_eq!(rx.recv().await.unwrap().height, 2);
    }
}
