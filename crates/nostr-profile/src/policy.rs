//! Visibility policies applied before ingestion.

use nostr::Event;
use parking_lot::RwLock;
use std::collections::HashSet;

/// Decides whether an event may enter an aggregator at all.
pub trait VisibilityPolicy: Send + Sync {
    fn should_show(&self, event: &Event) -> bool;
}

/// Accepts everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShowAll;

impl VisibilityPolicy for ShowAll {
    fn should_show(&self, _event: &Event) -> bool {
        true
    }
}

/// Hides events authored by muted pubkeys.
#[derive(Debug, Default)]
pub struct MuteList {
    muted: RwLock<HashSet<String>>,
}

impl MuteList {
    pub fn new<I, S>(pubkeys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            muted: RwLock::new(pubkeys.into_iter().map(Into::into).collect()),
        }
    }

    pub fn mute(&self, pubkey: impl Into<String>) {
        self.muted.write().insert(pubkey.into());
    }

    pub fn unmute(&self, pubkey: &str) {
        self.muted.write().remove(pubkey);
    }

    pub fn is_muted(&self, pubkey: &str) -> bool {
        self.muted.read().contains(pubkey)
    }

    pub fn len(&self) -> usize {
        self.muted.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.muted.read().is_empty()
    }
}

impl VisibilityPolicy for MuteList {
    fn should_show(&self, event: &Event) -> bool {
        !self.is_muted(&event.pubkey)
    }
}
