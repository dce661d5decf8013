use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::limits::CHANGE_CHANNEL_CAPACITY;
use crate::model::{ChangeEvent, EntityKind};

/// Broadcast hub for row changes, one channel per table.
pub struct NotifyHub {
    channels: DashMap<EntityKind, broadcast::Sender<ChangeEvent>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to changes of one table. Creates the channel if needed.
    pub fn subscribe(&self, kind: EntityKind) -> broadcast::Receiver<ChangeEvent> {
        let sender = self
            .channels
            .entry(kind)
            .or_insert_with(|| broadcast::channel(CHANGE_CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a change. No-op if nobody is listening.
    pub fn send(&self, event: ChangeEvent) {
        let Some(kind) = event.kind() else { return };
        if let Some(sender) = self.channels.get(&kind) {
            let _ = sender.send(event);
        }
    }

    pub fn subscriber_count(&self, kind: EntityKind) -> usize {
        self.channels
            .get(&kind)
            .map_or(0, |s| s.receiver_count())
    }
}
