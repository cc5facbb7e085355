//! Recording multiplexer and event builders shared by the aggregator tests.

#![allow(dead_code)]

pub mod relay;

use nostr::{Event, KIND_CONTACTS, KIND_METADATA, KIND_SHORT_TEXT_NOTE};
use nostr_client::{Filter, Multiplexer, RelayMessage, SubscriptionHandler};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Once};

pub const RELAY_A: &str = "wss://a.example";
pub const RELAY_B: &str = "wss://b.example";

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Subscribe { id: String, filters: Vec<Filter> },
    Unsubscribe { id: String },
}

/// Multiplexer that records every call and routes injected messages the
/// way the relay pool does: by subscription id, to the current handler.
/// Every subscription counts as sent to the pool's relays, and EOSE is
/// recorded before the handler sees it.
pub struct RecordingPool {
    relays: Vec<String>,
    handlers: Mutex<BTreeMap<String, Arc<dyn SubscriptionHandler>>>,
    eose: Mutex<BTreeMap<String, BTreeSet<String>>>,
    calls: Mutex<Vec<Call>>,
}

impl RecordingPool {
    /// A pool connected to [`RELAY_A`] only.
    pub fn new() -> Arc<Self> {
        Self::with_relays(&[RELAY_A])
    }

    pub fn with_relays(relays: &[&str]) -> Arc<Self> {
        init_tracing();
        Arc::new(Self {
            relays: relays.iter().map(|r| r.to_string()).collect(),
            handlers: Mutex::new(BTreeMap::new()),
            eose: Mutex::new(BTreeMap::new()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Ids currently registered, sorted.
    pub fn active(&self) -> Vec<String> {
        self.handlers.lock().keys().cloned().collect()
    }

    /// Subscribe calls whose filters request `kind`.
    pub fn subscriptions_for_kind(&self, kind: u16) -> Vec<(String, Vec<Filter>)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                Call::Subscribe { id, filters }
                    if filters
                        .iter()
                        .any(|f| f.kinds.as_ref().is_some_and(|k| k.contains(&kind))) =>
                {
                    Some((id.clone(), filters.clone()))
                }
                _ => None,
            })
            .collect()
    }

    pub fn deliver(&self, relay_url: &str, message: RelayMessage) {
        if let RelayMessage::Eose { subscription_id } = &message
            && self.relays.iter().any(|r| r == relay_url)
            && let Some(done) = self.eose.lock().get_mut(subscription_id)
        {
            done.insert(relay_url.to_string());
        }
        let handler = message
            .subscription_id()
            .and_then(|id| self.handlers.lock().get(id).cloned());
        if let Some(handler) = handler {
            handler.handle(relay_url, &message);
        }
    }

    pub fn event(&self, relay_url: &str, subscription_id: &str, event: &Event) {
        self.deliver(
            relay_url,
            RelayMessage::Event {
                subscription_id: subscription_id.to_string(),
                event: event.clone(),
            },
        );
    }

    pub fn eose(&self, relay_url: &str, subscription_id: &str) {
        self.deliver(
            relay_url,
            RelayMessage::Eose {
                subscription_id: subscription_id.to_string(),
            },
        );
    }

    pub fn closed(&self, relay_url: &str, subscription_id: &str, message: &str) {
        self.deliver(
            relay_url,
            RelayMessage::Closed {
                subscription_id: subscription_id.to_string(),
                message: message.to_string(),
            },
        );
    }
}

impl Multiplexer for RecordingPool {
    fn subscribe(&self, id: &str, filters: Vec<Filter>, handler: Arc<dyn SubscriptionHandler>) {
        self.handlers.lock().insert(id.to_string(), handler);
        self.eose.lock().insert(id.to_string(), BTreeSet::new());
        self.calls.lock().push(Call::Subscribe {
            id: id.to_string(),
            filters,
        });
    }

    fn unsubscribe(&self, id: &str) {
        self.eose.lock().remove(id);
        if self.handlers.lock().remove(id).is_some() {
            self.calls.lock().push(Call::Unsubscribe { id: id.to_string() });
        }
    }

    fn all_eose(&self, id: &str) -> bool {
        self.eose
            .lock()
            .get(id)
            .is_some_and(|done| self.relays.iter().all(|r| done.contains(r)))
    }
}

pub fn event(id: &str, pubkey: &str, created_at: u64, kind: u16) -> Event {
    Event {
        id: id.to_string(),
        pubkey: pubkey.to_string(),
        created_at,
        kind,
        tags: vec![],
        content: String::new(),
        sig: "sig".to_string(),
    }
}

pub fn note(id: &str, pubkey: &str, created_at: u64) -> Event {
    Event {
        content: format!("note {id}"),
        ..event(id, pubkey, created_at, KIND_SHORT_TEXT_NOTE)
    }
}

pub fn contacts(id: &str, pubkey: &str, created_at: u64, follows: &[&str]) -> Event {
    Event {
        tags: follows
            .iter()
            .map(|pk| vec!["p".to_string(), pk.to_string()])
            .collect(),
        ..event(id, pubkey, created_at, KIND_CONTACTS)
    }
}

pub fn metadata(id: &str, pubkey: &str, created_at: u64, name: &str) -> Event {
    Event {
        content: format!(r#"{{"name":"{name}"}}"#),
        ..event(id, pubkey, created_at, KIND_METADATA)
    }
}

/// Drain whatever is buffered on a broadcast receiver.
pub fn drain<T: Clone>(rx: &mut tokio::sync::broadcast::Receiver<T>) -> Vec<T> {
    let mut items = Vec::new();
    while let Ok(item) = rx.try_recv() {
        items.push(item);
    }
    items
}
