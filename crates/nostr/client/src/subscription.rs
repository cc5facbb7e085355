//! Subscriptions and the multiplexer seam.
//!
//! A [`Subscription`] binds a client-chosen id to a filter set and the
//! [`SubscriptionHandler`] that receives every `EVENT`, `EOSE` and `CLOSED`
//! addressed to that id. Consumers depend on the [`Multiplexer`] trait rather
//! than on [`RelayPool`](crate::RelayPool) so they can be driven without a
//! network.

use crate::message::{Filter, RelayMessage};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Generate a unique subscription ID.
pub fn generate_subscription_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Receives the relay messages routed to one subscription id.
///
/// Called from the relay's driver task, outside any pool lock, so an
/// implementation may call back into the pool.
pub trait SubscriptionHandler: Send + Sync {
    fn handle(&self, relay_url: &str, message: &RelayMessage);
}

impl<F> SubscriptionHandler for F
where
    F: Fn(&str, &RelayMessage) + Send + Sync,
{
    fn handle(&self, relay_url: &str, message: &RelayMessage) {
        self(relay_url, message)
    }
}

/// Registers and closes subscriptions across a set of relays.
pub trait Multiplexer: Send + Sync {
    /// Register `handler` under `id` and request `filters` from every
    /// connected relay. Registering an existing id replaces it.
    fn subscribe(&self, id: &str, filters: Vec<Filter>, handler: Arc<dyn SubscriptionHandler>);

    /// Drop the handler for `id` and send `CLOSE`. Unknown ids are ignored.
    fn unsubscribe(&self, id: &str);

    /// Whether every relay `id` was sent to has answered EOSE. Already true
    /// while the handler is seeing the last of those EOSEs.
    fn all_eose(&self, id: &str) -> bool;
}

/// A registered subscription plus per-relay EOSE tracking.
#[derive(Clone)]
pub struct Subscription {
    pub id: String,
    pub filters: Vec<Filter>,
    handler: Arc<dyn SubscriptionHandler>,
    /// Relays the REQ was sent to
    relays: HashSet<String>,
    /// Relays that have sent EOSE
    eose_relays: HashSet<String>,
}

impl Subscription {
    pub fn new(
        id: impl Into<String>,
        filters: Vec<Filter>,
        handler: Arc<dyn SubscriptionHandler>,
    ) -> Self {
        Self {
            id: id.into(),
            filters,
            handler,
            relays: HashSet::new(),
            eose_relays: HashSet::new(),
        }
    }

    pub fn handler(&self) -> Arc<dyn SubscriptionHandler> {
        Arc::clone(&self.handler)
    }

    /// Record that the REQ went out to `relay_url`.
    ///
    /// A relay that re-receives the REQ (after a reconnect) must answer EOSE again.
    pub fn add_relay(&mut self, relay_url: impl Into<String>) {
        let relay_url = relay_url.into();
        self.eose_relays.remove(&relay_url);
        self.relays.insert(relay_url);
    }

    pub fn remove_relay(&mut self, relay_url: &str) {
        self.relays.remove(relay_url);
        self.eose_relays.remove(relay_url);
    }

    /// Mark EOSE from `relay_url`. Returns true when this completes the set.
    pub fn mark_eose(&mut self, relay_url: &str) -> bool {
        if !self.relays.contains(relay_url) {
            return false;
        }
        let newly_marked = self.eose_relays.insert(relay_url.to_string());
        newly_marked && self.all_eose()
    }

    /// Whether every relay the REQ was sent to has answered EOSE.
    pub fn all_eose(&self) -> bool {
        !self.relays.is_empty() && self.relays.len() == self.eose_relays.len()
    }

    pub fn has_relay(&self, relay_url: &str) -> bool {
        self.relays.contains(relay_url)
    }

    pub fn relay_count(&self) -> usize {
        self.relays.len()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("filters", &self.filters)
            .field("relays", &self.relays)
            .field("eose_relays", &self.eose_relays)
            .finish_non_exhaustive()
    }
}
