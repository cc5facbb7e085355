//! Profile metadata cache.

use nostr::{Event, ProfileMetadata};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

/// Cached metadata for one pubkey.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileRecord {
    pub pubkey: String,
    pub metadata: ProfileMetadata,
    /// `created_at` of the metadata event this record came from
    pub created_at: u64,
    pub event_id: String,
}

/// Where aggregators put the metadata and contact lists they see.
pub trait ProfileStore: Send + Sync {
    /// Offer a kind 0 event. Returns true when the store kept it.
    fn process_metadata(&self, event: &Event) -> bool;

    fn lookup(&self, pubkey: &str) -> Option<ProfileRecord>;

    /// Offer a contact list. Ignored unless the store cares.
    fn process_contacts(&self, _event: &Event) {}
}

/// In-memory store keeping the newest metadata per pubkey.
#[derive(Debug, Default)]
pub struct Profiles {
    records: RwLock<HashMap<String, ProfileRecord>>,
}

impl Profiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    pub fn contains(&self, pubkey: &str) -> bool {
        self.records.read().contains_key(pubkey)
    }

    /// Best display name for `pubkey`, if cached.
    pub fn display_name(&self, pubkey: &str) -> Option<String> {
        self.records
            .read()
            .get(pubkey)
            .and_then(|r| r.metadata.best_name().map(str::to_string))
    }
}

impl ProfileStore for Profiles {
    fn process_metadata(&self, event: &Event) -> bool {
        let metadata = match ProfileMetadata::from_event(event) {
            Ok(metadata) => metadata,
            Err(e) => {
                debug!(pubkey = %event.pubkey, event_id = %event.id, error = %e, "ignoring metadata");
                return false;
            }
        };

        let mut records = self.records.write();
        if let Some(existing) = records.get(&event.pubkey)
            && existing.created_at >= event.created_at
        {
            return false;
        }

        records.insert(
            event.pubkey.clone(),
            ProfileRecord {
                pubkey: event.pubkey.clone(),
                metadata,
                created_at: event.created_at,
                event_id: event.id.clone(),
            },
        );
        true
    }

    fn lookup(&self, pubkey: &str) -> Option<ProfileRecord> {
        self.records.read().get(pubkey).cloned()
    }
}
