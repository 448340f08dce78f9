use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for per-calendar change notifications.
#[derive(Default)]
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to changes on a calendar. Creates the channel if needed.
    pub fn subscribe(&self, calendar_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(calendar_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, calendar_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&calendar_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Drop a calendar's channel; subscribers see the stream close.
    pub fn remove(&self, calendar_id: &Ulid) {
        self.channels.remove(calendar_id);
    }
}
