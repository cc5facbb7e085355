//! Process-wide notification bus.
//!
//! Cheap to clone; every clone publishes to the same listeners. Publishing
//! with nobody listening is not an error.

use nostr::Event;
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 1000;

/// Topics published on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A relay sent a NOTICE
    RelayNotice { relay_url: String, message: String },
    /// A newer contact list was accepted for `pubkey`
    ContactsUpdated { pubkey: String, event: Event },
    /// Profile metadata for `pubkey` was stored
    ProfileUpdated { pubkey: String },
}

#[derive(Debug, Clone)]
pub struct NotificationBus {
    tx: broadcast::Sender<Notification>,
}

impl NotificationBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, notification: Notification) {
        let _ = self.tx.send(notification);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new()
    }
}
