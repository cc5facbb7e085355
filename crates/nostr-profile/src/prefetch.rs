//! Metadata prefetch bookkeeping shared by the aggregators.

use crate::store::ProfileStore;
use nostr::Kind;
use nostr_client::{Filter, generate_subscription_id};
use std::collections::{BTreeSet, HashSet};

/// A metadata request ready to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PrefetchRequest {
    pub id: String,
    pub authors: Vec<String>,
}

impl PrefetchRequest {
    pub fn filters(&self) -> Vec<Filter> {
        vec![
            Filter::new()
                .known_kinds([Kind::Metadata])
                .authors(self.authors.clone()),
        ]
    }
}

/// Tracks which authors were already asked for and which prefetch
/// subscriptions are still open.
#[derive(Debug, Default)]
pub(crate) struct Prefetcher {
    requested: HashSet<String>,
    open: BTreeSet<String>,
}

impl Prefetcher {
    /// Plan a request for the candidates that are neither cached nor
    /// already requested. `None` when nothing is left to ask for.
    pub fn plan(
        &mut self,
        candidates: impl IntoIterator<Item = String>,
        store: &dyn ProfileStore,
    ) -> Option<PrefetchRequest> {
        let authors: BTreeSet<String> = candidates
            .into_iter()
            .filter(|pk| !self.requested.contains(pk) && store.lookup(pk).is_none())
            .collect();
        if authors.is_empty() {
            return None;
        }

        self.requested.extend(authors.iter().cloned());
        let id = format!("prefetch-{}", generate_subscription_id());
        self.open.insert(id.clone());
        Some(PrefetchRequest {
            id,
            authors: authors.into_iter().collect(),
        })
    }

    pub fn is_open(&self, id: &str) -> bool {
        self.open.contains(id)
    }

    /// Forget `id`. Returns whether it was open.
    pub fn close(&mut self, id: &str) -> bool {
        self.open.remove(id)
    }

    pub fn open_ids(&self) -> Vec<String> {
        self.open.iter().cloned().collect()
    }

    /// Close everything and forget what was requested.
    pub fn reset(&mut self) -> Vec<String> {
        self.requested.clear();
        std::mem::take(&mut self.open).into_iter().collect()
    }
}
