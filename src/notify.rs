use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Per-unit broadcast channels behind LISTEN and conflict watches.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
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

    /// Subscribe to events touching a unit or anything under it.
    pub fn subscribe(&self, unit_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(unit_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// No-op if nobody is listening.
    pub fn send(&self, unit_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&unit_id) {
            let _ = sender.send(event.clone());
        }
    }
}
