//! Followers aggregator.
//!
//! Counts the authors whose contact list tags a target pubkey.

use crate::policy::VisibilityPolicy;
use crate::prefetch::Prefetcher;
use crate::store::ProfileStore;
use nostr::{Event, Kind};
use nostr_client::{
    Filter, Multiplexer, Notification, NotificationBus, RelayMessage, SubscriptionHandler,
    generate_subscription_id,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tracing::{debug, info, trace};

const EVENT_CAPACITY: usize = 256;

/// Changes announced by a [`FollowersModel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FollowersEvent {
    Subscribed,
    Unsubscribed,
    FollowerAdded { pubkey: String, count: usize },
    /// A relay finished sending stored contact lists
    Progress { progress: u32 },
    PrefetchRequested {
        subscription_id: String,
        authors: Vec<String>,
    },
}

#[derive(Default)]
struct FollowersState {
    active: bool,
    followers: HashSet<String>,
    seen: HashSet<String>,
    /// EOSEs received on the follower subscription
    progress: u32,
    /// Set by the first EOSE or the first follower
    counted: bool,
    prefetch: Prefetcher,
}

struct FollowersInner {
    target: String,
    subscription_id: String,
    pool: Arc<dyn Multiplexer>,
    store: Arc<dyn ProfileStore>,
    policy: Arc<dyn VisibilityPolicy>,
    bus: NotificationBus,
    state: Mutex<FollowersState>,
    events_tx: broadcast::Sender<FollowersEvent>,
}

/// Live follower count for one pubkey.
///
/// Dropping the model closes its subscriptions.
pub struct FollowersModel {
    inner: Arc<FollowersInner>,
}

impl FollowersModel {
    pub fn new(
        target: impl Into<String>,
        pool: Arc<dyn Multiplexer>,
        store: Arc<dyn ProfileStore>,
        policy: Arc<dyn VisibilityPolicy>,
        bus: NotificationBus,
    ) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(FollowersInner {
                target: target.into(),
                subscription_id: format!("followers-{}", generate_subscription_id()),
                pool,
                store,
                policy,
                bus,
                state: Mutex::new(FollowersState::default()),
                events_tx,
            }),
        }
    }

    pub fn subscribe(&self) {
        let inner = &self.inner;
        {
            let mut state = inner.state.lock();
            if state.active {
                return;
            }
            state.active = true;
        }

        info!(target_pubkey = %inner.target, "subscribing to followers");
        let filter = Filter::new()
            .known_kinds([Kind::Contacts])
            .pubkey_refs(vec![inner.target.clone()]);
        inner
            .pool
            .subscribe(&inner.subscription_id, vec![filter], inner.handler());
        inner.emit(FollowersEvent::Subscribed);
    }

    pub fn unsubscribe(&self) {
        let inner = &self.inner;
        let prefetch = {
            let mut state = inner.state.lock();
            if !state.active {
                return;
            }
            state.active = false;
            state.prefetch.reset()
        };

        inner.pool.unsubscribe(&inner.subscription_id);
        for id in prefetch {
            inner.pool.unsubscribe(&id);
        }
        inner.emit(FollowersEvent::Unsubscribed);
    }

    pub fn is_subscribed(&self) -> bool {
        self.inner.state.lock().active
    }

    pub fn target(&self) -> &str {
        &self.inner.target
    }

    pub fn subscription_id(&self) -> &str {
        &self.inner.subscription_id
    }

    /// Open prefetch subscriptions.
    pub fn prefetch_ids(&self) -> Vec<String> {
        self.inner.state.lock().prefetch.open_ids()
    }

    /// Follower count, `None` until the relays have had a say.
    pub fn count(&self) -> Option<usize> {
        let state = self.inner.state.lock();
        state.counted.then_some(state.followers.len())
    }

    /// Followers, sorted.
    pub fn followers(&self) -> Vec<String> {
        let mut followers: Vec<String> =
            self.inner.state.lock().followers.iter().cloned().collect();
        followers.sort();
        followers
    }

    pub fn is_follower(&self, pubkey: &str) -> bool {
        self.inner.state.lock().followers.contains(pubkey)
    }

    pub fn progress(&self) -> u32 {
        self.inner.state.lock().progress
    }

    pub fn seen_count(&self) -> usize {
        self.inner.state.lock().seen.len()
    }

    pub fn observe(&self) -> broadcast::Receiver<FollowersEvent> {
        self.inner.events_tx.subscribe()
    }

    pub fn handler(&self) -> Arc<dyn SubscriptionHandler> {
        self.inner.handler()
    }
}

impl Drop for FollowersModel {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for FollowersModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("FollowersModel")
            .field("target", &self.inner.target)
            .field("active", &state.active)
            .field("followers", &state.followers.len())
            .finish()
    }
}

struct FollowersHandler {
    model: Weak<FollowersInner>,
}

impl SubscriptionHandler for FollowersHandler {
    fn handle(&self, relay_url: &str, message: &RelayMessage) {
        let Some(inner) = self.model.upgrade() else {
            return;
        };
        match message {
            RelayMessage::Event {
                subscription_id,
                event,
            } => inner.ingest(subscription_id, event),
            RelayMessage::Eose { subscription_id } => inner.handle_eose(subscription_id),
            RelayMessage::Closed {
                subscription_id,
                message,
            } => {
                info!(
                    relay = %relay_url,
                    subscription_id = %subscription_id,
                    "relay closed followers subscription: {}",
                    message
                );
                if subscription_id != &inner.subscription_id {
                    inner.close_prefetch(subscription_id);
                }
            }
            RelayMessage::Notice { message } => inner.bus.publish(Notification::RelayNotice {
                relay_url: relay_url.to_string(),
                message: message.clone(),
            }),
            RelayMessage::Ok { .. } | RelayMessage::Auth { .. } => {}
        }
    }
}

impl FollowersInner {
    fn handler(self: &Arc<Self>) -> Arc<dyn SubscriptionHandler> {
        Arc::new(FollowersHandler {
            model: Arc::downgrade(self),
        })
    }

    fn emit(&self, event: FollowersEvent) {
        let _ = self.events_tx.send(event);
    }

    fn ingest(&self, subscription_id: &str, event: &Event) {
        let mut change = None;
        let mut stored = false;

        {
            let mut state = self.state.lock();
            let ours =
                subscription_id == self.subscription_id || state.prefetch.is_open(subscription_id);
            if !state.active || !ours {
                trace!(subscription_id, "dropping event for inactive subscription");
                return;
            }
            if !self.policy.should_show(event) || !state.seen.insert(event.id.clone()) {
                return;
            }

            match event.known_kind() {
                Some(Kind::Contacts) => {
                    self.store.process_contacts(event);
                    if nostr::follows(&event.tags, &self.target)
                        && state.followers.insert(event.pubkey.clone())
                    {
                        state.counted = true;
                        change = Some(FollowersEvent::FollowerAdded {
                            pubkey: event.pubkey.clone(),
                            count: state.followers.len(),
                        });
                    }
                }
                Some(Kind::Metadata) => stored = self.store.process_metadata(event),
                _ => {}
            }
        }

        if stored {
            self.bus.publish(Notification::ProfileUpdated {
                pubkey: event.pubkey.clone(),
            });
        }
        if let Some(change) = change {
            self.emit(change);
        }
    }

    fn handle_eose(self: &Arc<Self>, subscription_id: &str) {
        if subscription_id != self.subscription_id {
            if self.pool.all_eose(subscription_id) {
                self.close_prefetch(subscription_id);
            }
            return;
        }

        let (request, progress) = {
            let mut state = self.state.lock();
            if !state.active {
                return;
            }

            state.counted = true;
            state.progress += 1;
            let progress = state.progress;
            let candidates: Vec<String> = state.followers.iter().cloned().collect();
            let request = state.prefetch.plan(candidates, self.store.as_ref());
            (request, progress)
        };

        if let Some(request) = request {
            debug!(
                subscription_id = %request.id,
                authors = request.authors.len(),
                "prefetching follower profiles"
            );
            self.pool
                .subscribe(&request.id, request.filters(), self.handler());
            if !self.state.lock().prefetch.is_open(&request.id) {
                self.pool.unsubscribe(&request.id);
            } else {
                self.emit(FollowersEvent::PrefetchRequested {
                    subscription_id: request.id,
                    authors: request.authors,
                });
            }
        }

        self.emit(FollowersEvent::Progress { progress });
    }

    fn close_prefetch(&self, subscription_id: &str) {
        let closed = {
            let mut state = self.state.lock();
            state.active && state.prefetch.close(subscription_id)
        };
        if closed {
            debug!(subscription_id, "follower prefetch complete");
            self.pool.unsubscribe(subscription_id);
        }
    }
}
