//! Profile aggregator.
//!
//! A [`ProfileModel`] follows one pubkey. It opens two subscriptions on a
//! [`Multiplexer`]:
//! - the content subscription (notes and channel messages, newest
//!   `content_limit`) feeding the timeline
//! - the profile subscription (contact list, metadata, boosts)
//!
//! Every event goes through the same ingestion path: visibility check,
//! dedup by id, then a kind-specific update. Contact lists only ever move
//! forward in time. When the content subscription reaches EOSE the model
//! asks for the metadata of everyone its timeline mentions; after that,
//! each new timeline entry asks for its own authors as it arrives.
//!
//! Changes are announced on a broadcast channel (see [`ProfileModel::observe`])
//! after the model's lock is released.

use crate::holder::EventHolder;
use crate::policy::VisibilityPolicy;
use crate::prefetch::{PrefetchRequest, Prefetcher};
use crate::store::ProfileStore;
use nostr::{Event, Kind, RelayInfo, count_follows, decode_relays};
use nostr_client::{
    Filter, Multiplexer, Notification, NotificationBus, ProfileConfig, RelayMessage,
    SubscriptionHandler, generate_subscription_id,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tracing::{debug, info, trace};

const EVENT_CAPACITY: usize = 256;

/// What to follow when the user taps "follow" on this profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FollowTarget {
    /// The profile's current contact list
    Contact(Event),
    /// Just the pubkey, no contact list seen yet
    Pubkey(String),
}

impl FollowTarget {
    pub fn pubkey(&self) -> &str {
        match self {
            FollowTarget::Contact(event) => &event.pubkey,
            FollowTarget::Pubkey(pubkey) => pubkey,
        }
    }
}

/// Changes announced by a [`ProfileModel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileEvent {
    Subscribed,
    Unsubscribed,
    /// A post or boost was added to the timeline
    TimelineInserted { event_id: String },
    /// A newer contact list replaced the previous one
    ContactsUpdated { event_id: String, following: usize },
    /// Metadata for `pubkey` was accepted by the store
    MetadataStored { pubkey: String },
    /// A subscription finished sending stored events
    Progress { progress: u32 },
    /// Metadata was requested for `authors`
    PrefetchRequested {
        subscription_id: String,
        authors: Vec<String>,
    },
}

/// Subscription ids a model uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionIds {
    pub content: String,
    pub profile: String,
    /// Open prefetch subscriptions
    pub prefetch: Vec<String>,
}

struct ProfileState {
    active: bool,
    contacts: Option<Event>,
    following: usize,
    relays: Option<BTreeMap<String, RelayInfo>>,
    /// EOSEs received on the content and profile subscriptions
    progress: u32,
    /// Content subscription reached EOSE; new entries prefetch right away
    live: bool,
    seen: HashSet<String>,
    events: EventHolder,
    prefetch: Prefetcher,
}

struct ProfileInner {
    pubkey: String,
    content_id: String,
    profile_id: String,
    pool: Arc<dyn Multiplexer>,
    store: Arc<dyn ProfileStore>,
    policy: Arc<dyn VisibilityPolicy>,
    bus: NotificationBus,
    config: ProfileConfig,
    /// Authors and `p` tag pubkeys of timeline entries not yet planned
    pending: Arc<Mutex<BTreeSet<String>>>,
    state: Mutex<ProfileState>,
    events_tx: broadcast::Sender<ProfileEvent>,
}

/// Live view of one pubkey's timeline, contacts and relays.
///
/// Dropping the model closes its subscriptions.
pub struct ProfileModel {
    inner: Arc<ProfileInner>,
}

impl ProfileModel {
    pub fn new(
        pubkey: impl Into<String>,
        pool: Arc<dyn Multiplexer>,
        store: Arc<dyn ProfileStore>,
        policy: Arc<dyn VisibilityPolicy>,
        bus: NotificationBus,
        config: ProfileConfig,
    ) -> Self {
        let pending = Arc::new(Mutex::new(BTreeSet::new()));
        let sink = Arc::clone(&pending);
        let events = EventHolder::with_callback(move |event: &Event| {
            let mut pending = sink.lock();
            pending.insert(event.pubkey.clone());
            pending.extend(event.referenced_pubkeys().map(str::to_string));
        });
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            inner: Arc::new(ProfileInner {
                pubkey: pubkey.into(),
                content_id: format!("content-{}", generate_subscription_id()),
                profile_id: format!("profile-{}", generate_subscription_id()),
                pool,
                store,
                policy,
                bus,
                config,
                pending,
                state: Mutex::new(ProfileState {
                    active: false,
                    contacts: None,
                    following: 0,
                    relays: None,
                    progress: 0,
                    live: false,
                    seen: HashSet::new(),
                    events,
                    prefetch: Prefetcher::default(),
                }),
                events_tx,
            }),
        }
    }

    /// Open the content and profile subscriptions. No-op while subscribed.
    pub fn subscribe(&self) {
        let inner = &self.inner;
        {
            let mut state = inner.state.lock();
            if state.active {
                return;
            }
            state.active = true;
            state.live = false;
        }

        info!(pubkey = %inner.pubkey, "subscribing to profile");
        let handler = inner.handler();
        inner.pool.subscribe(
            &inner.content_id,
            vec![inner.content_filter()],
            Arc::clone(&handler),
        );
        inner
            .pool
            .subscribe(&inner.profile_id, vec![inner.profile_filter()], handler);
        inner.emit(ProfileEvent::Subscribed);
    }

    /// Close every subscription this model opened. The timeline, contacts
    /// and seen ids are kept.
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

        info!(pubkey = %inner.pubkey, "unsubscribing from profile");
        inner.pool.unsubscribe(&inner.content_id);
        inner.pool.unsubscribe(&inner.profile_id);
        for id in prefetch {
            inner.pool.unsubscribe(&id);
        }
        inner.emit(ProfileEvent::Unsubscribed);
    }

    pub fn is_subscribed(&self) -> bool {
        self.inner.state.lock().active
    }

    pub fn pubkey(&self) -> &str {
        &self.inner.pubkey
    }

    pub fn subscription_ids(&self) -> SubscriptionIds {
        SubscriptionIds {
            content: self.inner.content_id.clone(),
            profile: self.inner.profile_id.clone(),
            prefetch: self.inner.state.lock().prefetch.open_ids(),
        }
    }

    /// Receive change notifications.
    pub fn observe(&self) -> broadcast::Receiver<ProfileEvent> {
        self.inner.events_tx.subscribe()
    }

    /// Whether the current contact list follows `pubkey`.
    pub fn follows(&self, pubkey: &str) -> bool {
        self.inner
            .state
            .lock()
            .contacts
            .as_ref()
            .is_some_and(|contacts| nostr::follows(&contacts.tags, pubkey))
    }

    pub fn follow_target(&self) -> FollowTarget {
        match &self.inner.state.lock().contacts {
            Some(contacts) => FollowTarget::Contact(contacts.clone()),
            None => FollowTarget::Pubkey(self.inner.pubkey.clone()),
        }
    }

    pub fn contacts(&self) -> Option<Event> {
        self.inner.state.lock().contacts.clone()
    }

    /// Number of `p` tags in the current contact list.
    pub fn following(&self) -> usize {
        self.inner.state.lock().following
    }

    /// Relays advertised in the current contact list.
    pub fn relays(&self) -> Option<BTreeMap<String, RelayInfo>> {
        self.inner.state.lock().relays.clone()
    }

    pub fn relay_count(&self) -> usize {
        self.inner
            .state
            .lock()
            .relays
            .as_ref()
            .map_or(0, BTreeMap::len)
    }

    /// Number of EOSEs received on the content and profile subscriptions,
    /// across all relays and sessions.
    pub fn progress(&self) -> u32 {
        self.inner.state.lock().progress
    }

    /// Timeline snapshot, newest first.
    pub fn events(&self) -> Vec<Event> {
        self.inner.state.lock().events.events()
    }

    pub fn event_count(&self) -> usize {
        self.inner.state.lock().events.len()
    }

    pub fn seen_count(&self) -> usize {
        self.inner.state.lock().seen.len()
    }

    /// The handler this model registers. Exposed for driving the model
    /// without a pool.
    pub fn handler(&self) -> Arc<dyn SubscriptionHandler> {
        self.inner.handler()
    }
}

impl Drop for ProfileModel {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl PartialEq for ProfileModel {
    fn eq(&self, other: &Self) -> bool {
        self.inner.pubkey == other.inner.pubkey
    }
}

impl Eq for ProfileModel {}

impl Hash for ProfileModel {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.pubkey.hash(state);
    }
}

impl fmt::Debug for ProfileModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("ProfileModel")
            .field("pubkey", &self.inner.pubkey)
            .field("active", &state.active)
            .field("following", &state.following)
            .field("events", &state.events.len())
            .field("progress", &state.progress)
            .finish()
    }
}

struct ProfileHandler {
    model: Weak<ProfileInner>,
}

impl SubscriptionHandler for ProfileHandler {
    fn handle(&self, relay_url: &str, message: &RelayMessage) {
        if let Some(inner) = self.model.upgrade() {
            inner.handle(relay_url, message);
        }
    }
}

impl ProfileInner {
    fn handler(self: &Arc<Self>) -> Arc<dyn SubscriptionHandler> {
        Arc::new(ProfileHandler {
            model: Arc::downgrade(self),
        })
    }

    fn content_filter(&self) -> Filter {
        let mut kinds = vec![Kind::Text, Kind::ChannelMessage];
        if self.config.include_boosts_in_content {
            kinds.push(Kind::Boost);
        }
        Filter::new()
            .known_kinds(kinds)
            .authors(vec![self.pubkey.clone()])
            .limit(self.config.content_limit)
    }

    fn profile_filter(&self) -> Filter {
        Filter::new()
            .known_kinds([Kind::Contacts, Kind::Metadata, Kind::Boost])
            .authors(vec![self.pubkey.clone()])
    }

    fn emit(&self, event: ProfileEvent) {
        let _ = self.events_tx.send(event);
    }

    fn owns(&self, state: &ProfileState, subscription_id: &str) -> bool {
        subscription_id == self.content_id
            || subscription_id == self.profile_id
            || state.prefetch.is_open(subscription_id)
    }

    fn handle(self: &Arc<Self>, relay_url: &str, message: &RelayMessage) {
        match message {
            RelayMessage::Event {
                subscription_id,
                event,
            } => self.ingest(subscription_id, event),
            RelayMessage::Eose { subscription_id } => self.handle_eose(subscription_id),
            RelayMessage::Closed {
                subscription_id,
                message,
            } => {
                info!(
                    relay = %relay_url,
                    subscription_id = %subscription_id,
                    "relay closed profile subscription: {}",
                    message
                );
                if subscription_id != &self.content_id && subscription_id != &self.profile_id {
                    self.close_prefetch(subscription_id);
                }
            }
            RelayMessage::Notice { message } => self.bus.publish(Notification::RelayNotice {
                relay_url: relay_url.to_string(),
                message: message.clone(),
            }),
            RelayMessage::Ok { .. } | RelayMessage::Auth { .. } => {}
        }
    }

    fn ingest(self: &Arc<Self>, subscription_id: &str, event: &Event) {
        let mut changes = Vec::new();
        let mut notifications = Vec::new();
        let mut request = None;

        {
            let mut state = self.state.lock();
            if !state.active || !self.owns(&state, subscription_id) {
                trace!(subscription_id, event_id = %event.id, "dropping event for inactive subscription");
                return;
            }
            if !self.policy.should_show(event) {
                trace!(event_id = %event.id, "event hidden by policy");
                return;
            }
            if !state.seen.insert(event.id.clone()) {
                return;
            }

            match event.known_kind() {
                Some(kind) if kind.is_textlike() || kind == Kind::Boost => {
                    if state.events.insert(event.clone()) {
                        changes.push(ProfileEvent::TimelineInserted {
                            event_id: event.id.clone(),
                        });
                        if state.live {
                            request = self.plan_pending(&mut state);
                        }
                    }
                }
                Some(Kind::Contacts) => {
                    self.store.process_contacts(event);
                    if Self::update_contacts(&mut state, event) {
                        changes.push(ProfileEvent::ContactsUpdated {
                            event_id: event.id.clone(),
                            following: state.following,
                        });
                        notifications.push(Notification::ContactsUpdated {
                            pubkey: event.pubkey.clone(),
                            event: event.clone(),
                        });
                    }
                }
                Some(Kind::Metadata) => {
                    if self.store.process_metadata(event) {
                        changes.push(ProfileEvent::MetadataStored {
                            pubkey: event.pubkey.clone(),
                        });
                        notifications.push(Notification::ProfileUpdated {
                            pubkey: event.pubkey.clone(),
                        });
                    }
                }
                _ => trace!(kind = event.kind, "no profile state for kind"),
            }
        }

        for notification in notifications {
            self.bus.publish(notification);
        }
        for change in changes {
            self.emit(change);
        }
        if let Some(request) = request {
            self.request_prefetch(request);
        }
    }

    /// Replace the contact list if `event` is strictly newer.
    fn update_contacts(state: &mut ProfileState, event: &Event) -> bool {
        if let Some(current) = &state.contacts
            && current.created_at >= event.created_at
        {
            debug!(
                current = current.created_at,
                offered = event.created_at,
                "ignoring older contact list"
            );
            return false;
        }

        state.following = count_follows(&event.tags);
        state.relays = if event.content.trim().is_empty() {
            None
        } else {
            match decode_relays(&event.content) {
                Ok(relays) => Some(relays),
                Err(e) => {
                    debug!(event_id = %event.id, error = %e, "contact list relays not decodable");
                    None
                }
            }
        };
        state.contacts = Some(event.clone());
        true
    }

    fn handle_eose(self: &Arc<Self>, subscription_id: &str) {
        if subscription_id != self.content_id && subscription_id != self.profile_id {
            // A prefetch stays open until every relay it went to is done.
            if self.pool.all_eose(subscription_id) {
                self.close_prefetch(subscription_id);
            } else {
                trace!(subscription_id, "prefetch waiting on other relays");
            }
            return;
        }

        let (request, progress) = {
            let mut state = self.state.lock();
            if !state.active {
                return;
            }

            let mut request = None;
            if subscription_id == self.content_id {
                state.live = true;
                request = self.plan_pending(&mut state);
            }
            state.progress += 1;
            (request, state.progress)
        };

        if let Some(request) = request {
            self.request_prefetch(request);
        }
        self.emit(ProfileEvent::Progress { progress });
    }

    /// Plan a prefetch for the timeline authors gathered since the last plan.
    fn plan_pending(&self, state: &mut ProfileState) -> Option<PrefetchRequest> {
        let candidates = std::mem::take(&mut *self.pending.lock());
        state.prefetch.plan(candidates, self.store.as_ref())
    }

    fn request_prefetch(self: &Arc<Self>, request: PrefetchRequest) {
        debug!(
            subscription_id = %request.id,
            authors = request.authors.len(),
            "prefetching profiles"
        );
        self.pool
            .subscribe(&request.id, request.filters(), self.handler());
        // Unsubscribed while the request was going out.
        if !self.state.lock().prefetch.is_open(&request.id) {
            self.pool.unsubscribe(&request.id);
        } else {
            self.emit(ProfileEvent::PrefetchRequested {
                subscription_id: request.id,
                authors: request.authors,
            });
        }
    }

    fn close_prefetch(&self, subscription_id: &str) {
        let closed = {
            let mut state = self.state.lock();
            state.active && state.prefetch.close(subscription_id)
        };
        if closed {
            debug!(subscription_id, "prefetch complete");
            self.pool.unsubscribe(subscription_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::ShowAll;
    use crate::store::Profiles;
    use pretty_assertions::assert_eq;

    struct NullPool;

    impl Multiplexer for NullPool {
        fn subscribe(&self, _: &str, _: Vec<Filter>, _: Arc<dyn SubscriptionHandler>) {}
        fn unsubscribe(&self, _: &str) {}
        fn all_eose(&self, _: &str) -> bool {
            true
        }
    }

    fn model(pubkey: &str) -> ProfileModel {
        ProfileModel::new(
            pubkey,
            Arc::new(NullPool),
            Arc::new(Profiles::new()),
            Arc::new(ShowAll),
            NotificationBus::new(),
            ProfileConfig::default(),
        )
    }

    #[test]
    fn test_equality_by_pubkey() {
        let a = model("alice");
        let a2 = model("alice");
        let b = model("bob");
        assert_eq!(a, a2);
        assert_ne!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        set.insert(a2);
        set.insert(b);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_filters() {
        let m = model("alice");
        let content = m.inner.content_filter();
        assert_eq!(content.kinds, Some(vec![1, 42]));
        assert_eq!(content.authors, Some(vec!["alice".to_string()]));
        assert_eq!(content.limit, Some(500));

        let profile = m.inner.profile_filter();
        assert_eq!(profile.kinds, Some(vec![3, 0, 6]));
        assert_eq!(profile.limit, None);
    }

    #[test]
    fn test_boosts_in_content_when_configured() {
        let m = ProfileModel::new(
            "alice",
            Arc::new(NullPool),
            Arc::new(Profiles::new()),
            Arc::new(ShowAll),
            NotificationBus::new(),
            ProfileConfig {
                content_limit: 50,
                include_boosts_in_content: true,
            },
        );
        let content = m.inner.content_filter();
        assert_eq!(content.kinds, Some(vec![1, 42, 6]));
        assert_eq!(content.limit, Some(50));
    }

    #[test]
    fn test_follow_target_without_contacts() {
        let m = model("alice");
        assert_eq!(m.follow_target(), FollowTarget::Pubkey("alice".to_string()));
        assert_eq!(m.follow_target().pubkey(), "alice");
        assert!(!m.follows("bob"));
        assert_eq!(m.relay_count(), 0);
    }

    #[test]
    fn test_ids_are_distinct() {
        let m = model("alice");
        let ids = m.subscription_ids();
        assert_ne!(ids.content, ids.profile);
        assert!(ids.prefetch.is_empty());
    }
}
