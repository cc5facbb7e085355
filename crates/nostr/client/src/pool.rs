//! Relay pool for multiplexing subscriptions over multiple Nostr relays.
//!
//! The pool owns one [`Transport`] per relay and one driver task per
//! transport. A driver connects its transport, replays every registered
//! subscription when the socket comes up, parses inbound frames and routes
//! them to subscription handlers, and reconnects with exponential backoff
//! when the socket goes away.
//!
//! Handlers for a relay run on that relay's driver task, so a slow handler
//! only delays its own relay. Frames from one relay reach handlers in the
//! order they were received and none are dropped; no ordering is guaranteed
//! across relays.

use crate::backoff::ReconnectBackoff;
use crate::bus::{Notification, NotificationBus};
use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::message::{ClientMessage, Filter, RelayMessage};
use crate::subscription::{Multiplexer, Subscription, SubscriptionHandler};
use crate::transport::{CLOSE_NORMAL, Transport, TransportEvent, WsMessage};
use nostr::Event;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Something that happened on one relay connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Socket lifecycle change or raw frame
    Transport(TransportEvent),
    /// Parsed relay message
    Relay(RelayMessage),
}

/// Events emitted by the relay pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolEvent {
    /// Connection event tagged with the relay it came from
    Relay {
        relay_url: String,
        event: ConnectionEvent,
    },
    /// Every relay the subscription was sent to has sent EOSE
    AllEose { subscription_id: String },
}

struct RelayEntry {
    transport: Arc<Transport>,
    driver: Option<JoinHandle<()>>,
}

struct PoolInner {
    config: PoolConfig,
    relays: RwLock<HashMap<String, RelayEntry>>,
    subscriptions: RwLock<HashMap<String, Subscription>>,
    events_tx: broadcast::Sender<PoolEvent>,
    bus: NotificationBus,
    running: AtomicBool,
}

/// A pool of Nostr relay connections.
///
/// Cheap to clone; clones share the same relays and subscriptions.
#[derive(Clone)]
pub struct RelayPool {
    inner: Arc<PoolInner>,
}

impl RelayPool {
    /// Create a pool with the relays listed in `config`.
    ///
    /// Relays with invalid URLs are skipped with a warning.
    pub fn new(config: PoolConfig) -> Self {
        Self::with_bus(config, NotificationBus::new())
    }

    /// Create a pool with the given relays and default settings.
    pub fn with_relays(relays: Vec<String>) -> Self {
        Self::new(PoolConfig::default().with_relays(relays))
    }

    /// Create a pool that publishes relay notices on `bus`.
    pub fn with_bus(config: PoolConfig, bus: NotificationBus) -> Self {
        let (events_tx, _) = broadcast::channel(config.event_capacity.max(1));
        let relays = config.relays.clone();

        let pool = Self {
            inner: Arc::new(PoolInner {
                config,
                relays: RwLock::new(HashMap::new()),
                subscriptions: RwLock::new(HashMap::new()),
                events_tx,
                bus,
                running: AtomicBool::new(false),
            }),
        };

        for url in relays {
            if let Err(e) = pool.add_relay(&url) {
                warn!("Skipping relay {}: {}", url, e);
            }
        }
        pool
    }

    /// Subscribe to pool events.
    pub fn events(&self) -> broadcast::Receiver<PoolEvent> {
        self.inner.events_tx.subscribe()
    }

    pub fn bus(&self) -> &NotificationBus {
        &self.inner.bus
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Add a relay to the pool.
    ///
    /// If the pool is already running the relay is connected right away.
    /// Adding a relay twice is a no-op.
    pub fn add_relay(&self, url: &str) -> Result<(), PoolError> {
        let mut relays = self.inner.relays.write();
        if relays.contains_key(url) {
            return Ok(());
        }

        let transport = Arc::new(Transport::with_config(
            url,
            self.inner.config.transport.clone(),
        )?);
        info!("Adding relay to pool: {}", url);

        let driver = self
            .inner
            .running
            .load(Ordering::SeqCst)
            .then(|| self.spawn_driver(url, Arc::clone(&transport)));
        relays.insert(url.to_string(), RelayEntry { transport, driver });
        Ok(())
    }

    /// Remove a relay from the pool, closing its connection.
    pub fn remove_relay(&self, url: &str) {
        let Some(entry) = self.inner.relays.write().remove(url) else {
            return;
        };
        info!("Removing relay from pool: {}", url);

        if let Some(driver) = entry.driver {
            driver.abort();
        }
        entry.transport.disconnect(CLOSE_NORMAL, "relay removed");

        for sub in self.inner.subscriptions.write().values_mut() {
            sub.remove_relay(url);
        }
    }

    /// Start a driver for every relay. Drivers keep reconnecting until
    /// [`disconnect`](Self::disconnect) is called.
    pub async fn connect(&self) {
        self.inner.running.store(true, Ordering::SeqCst);

        let mut relays = self.inner.relays.write();
        for (url, entry) in relays.iter_mut() {
            if entry.driver.as_ref().is_some_and(|d| !d.is_finished()) {
                continue;
            }
            entry.driver = Some(self.spawn_driver(url, Arc::clone(&entry.transport)));
        }
    }

    /// Stop all drivers and close every connection.
    pub fn disconnect(&self) {
        self.inner.running.store(false, Ordering::SeqCst);

        let transports: Vec<(String, Arc<Transport>)> = {
            let mut relays = self.inner.relays.write();
            relays
                .iter_mut()
                .map(|(url, entry)| {
                    if let Some(driver) = entry.driver.take() {
                        driver.abort();
                    }
                    (url.clone(), Arc::clone(&entry.transport))
                })
                .collect()
        };

        for (url, transport) in transports {
            let was_connected = transport.is_connected();
            transport.disconnect(CLOSE_NORMAL, "pool disconnect");
            for sub in self.inner.subscriptions.write().values_mut() {
                sub.remove_relay(&url);
            }
            if was_connected {
                self.inner.emit_transport(
                    &url,
                    TransportEvent::Disconnected {
                        code: CLOSE_NORMAL,
                        reason: "pool disconnect".to_string(),
                    },
                );
            }
        }
    }

    fn spawn_driver(&self, url: &str, transport: Arc<Transport>) -> JoinHandle<()> {
        tokio::spawn(drive_relay(
            Arc::downgrade(&self.inner),
            url.to_string(),
            transport,
            ReconnectBackoff::from_config(&self.inner.config),
        ))
    }

    /// Register a subscription and send its REQ to every connected relay.
    ///
    /// An existing subscription with the same id is replaced: the new filters
    /// and handler take over, nothing is merged.
    pub fn subscribe(
        &self,
        subscription_id: &str,
        filters: Vec<Filter>,
        handler: Arc<dyn SubscriptionHandler>,
    ) {
        let connected = self.connected_transports();

        let frame = ClientMessage::req(subscription_id, filters.clone()).to_json();

        {
            let mut sub = Subscription::new(subscription_id, filters, handler);
            for (url, _) in &connected {
                sub.add_relay(url.as_str());
            }
            let replaced = self
                .inner
                .subscriptions
                .write()
                .insert(subscription_id.to_string(), sub)
                .is_some();
            if replaced {
                debug!(subscription_id, "replacing existing subscription");
            }
        }

        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                warn!(subscription_id, error = %e, "failed to encode REQ");
                return;
            }
        };

        info!(
            subscription_id,
            relays = connected.len(),
            "opened subscription"
        );
        for (url, transport) in connected {
            if let Err(e) = transport.send_text(&frame) {
                warn!("Failed to subscribe {} on {}: {}", subscription_id, url, e);
            }
        }
    }

    /// Drop the handler for `subscription_id`, then send CLOSE to every
    /// connected relay. Unknown ids are a no-op.
    pub fn unsubscribe(&self, subscription_id: &str) {
        if self
            .inner
            .subscriptions
            .write()
            .remove(subscription_id)
            .is_none()
        {
            return;
        }

        info!(subscription_id, "closing subscription");
        let frame = match ClientMessage::close(subscription_id).to_json() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(subscription_id, error = %e, "failed to encode CLOSE");
                return;
            }
        };
        for (url, transport) in self.connected_transports() {
            if let Err(e) = transport.send_text(&frame) {
                warn!("Failed to unsubscribe {} on {}: {}", subscription_id, url, e);
            }
        }
    }

    /// Publish an event to all connected relays. Returns how many relays it
    /// was sent to.
    pub fn publish(&self, event: &Event) -> Result<usize, PoolError> {
        let frame = ClientMessage::Event(event.clone()).to_json()?;
        let mut sent = 0;
        for (url, transport) in self.connected_transports() {
            match transport.send_text(&frame) {
                Ok(()) => sent += 1,
                Err(e) => warn!("Failed to publish {} to {}: {}", event.id, url, e),
            }
        }
        Ok(sent)
    }

    /// All relay URLs in the pool, sorted.
    pub fn relay_urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = self.inner.relays.read().keys().cloned().collect();
        urls.sort();
        urls
    }

    pub fn is_connected(&self, url: &str) -> bool {
        self.inner
            .relays
            .read()
            .get(url)
            .is_some_and(|entry| entry.transport.is_connected())
    }

    pub fn connected_count(&self) -> usize {
        self.inner
            .relays
            .read()
            .values()
            .filter(|entry| entry.transport.is_connected())
            .count()
    }

    /// Registered subscription ids, sorted.
    pub fn subscription_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.subscriptions.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Whether every relay `subscription_id` was sent to has answered EOSE.
    pub fn all_eose(&self, subscription_id: &str) -> bool {
        self.inner
            .subscriptions
            .read()
            .get(subscription_id)
            .is_some_and(Subscription::all_eose)
    }

    /// Filters registered under `subscription_id`.
    pub fn filters(&self, subscription_id: &str) -> Option<Vec<Filter>> {
        self.inner
            .subscriptions
            .read()
            .get(subscription_id)
            .map(|sub| sub.filters.clone())
    }

    fn connected_transports(&self) -> Vec<(String, Arc<Transport>)> {
        self.inner
            .relays
            .read()
            .iter()
            .filter(|(_, entry)| entry.transport.is_connected())
            .map(|(url, entry)| (url.clone(), Arc::clone(&entry.transport)))
            .collect()
    }

    #[cfg(test)]
    fn route(&self, relay_url: &str, message: RelayMessage) {
        self.inner.route(relay_url, message);
    }
}

impl Multiplexer for RelayPool {
    fn subscribe(&self, id: &str, filters: Vec<Filter>, handler: Arc<dyn SubscriptionHandler>) {
        RelayPool::subscribe(self, id, filters, handler);
    }

    fn unsubscribe(&self, id: &str) {
        RelayPool::unsubscribe(self, id);
    }

    fn all_eose(&self, id: &str) -> bool {
        RelayPool::all_eose(self, id)
    }
}

impl Default for RelayPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

impl PoolInner {
    fn emit(&self, event: PoolEvent) {
        let _ = self.events_tx.send(event);
    }

    fn emit_transport(&self, relay_url: &str, event: TransportEvent) {
        self.emit(PoolEvent::Relay {
            relay_url: relay_url.to_string(),
            event: ConnectionEvent::Transport(event),
        });
    }

    /// Re-send every registered subscription on a freshly connected relay.
    fn replay_subscriptions(&self, relay_url: &str, transport: &Transport) {
        let requests: Vec<(String, Vec<Filter>)> = {
            let mut subs = self.subscriptions.write();
            subs.values_mut()
                .map(|sub| {
                    sub.add_relay(relay_url);
                    (sub.id.clone(), sub.filters.clone())
                })
                .collect()
        };

        if !requests.is_empty() {
            debug!(
                relay = %relay_url,
                count = requests.len(),
                "replaying subscriptions"
            );
        }
        for (id, filters) in requests {
            match ClientMessage::req(&id, filters).to_json() {
                Ok(frame) => {
                    if let Err(e) = transport.send_text(&frame) {
                        warn!("Failed to resubscribe {} on {}: {}", id, relay_url, e);
                    }
                }
                Err(e) => warn!(subscription_id = %id, error = %e, "failed to encode REQ"),
            }
        }
    }

    fn forget_relay(&self, relay_url: &str) {
        for sub in self.subscriptions.write().values_mut() {
            sub.remove_relay(relay_url);
        }
    }

    fn handle_frame(&self, relay_url: &str, frame: &WsMessage) {
        let WsMessage::Text(text) = frame else {
            debug!(relay = %relay_url, "ignoring binary frame");
            return;
        };

        match RelayMessage::from_json(text) {
            Ok(message) => self.route(relay_url, message),
            Err(e) => debug!(relay = %relay_url, error = %e, "dropping malformed relay message"),
        }
    }

    /// Deliver a parsed message to its handler and to pool observers.
    fn route(&self, relay_url: &str, message: RelayMessage) {
        let mut all_eose = false;

        let handler = match &message {
            RelayMessage::Eose { subscription_id } => {
                let mut subs = self.subscriptions.write();
                subs.get_mut(subscription_id).map(|sub| {
                    all_eose = sub.mark_eose(relay_url);
                    sub.handler()
                })
            }
            RelayMessage::Event {
                subscription_id, ..
            } => self
                .subscriptions
                .read()
                .get(subscription_id)
                .map(Subscription::handler),
            RelayMessage::Closed {
                subscription_id,
                message,
            } => {
                info!(
                    "Subscription {} closed by {}: {}",
                    subscription_id, relay_url, message
                );
                self.subscriptions
                    .read()
                    .get(subscription_id)
                    .map(Subscription::handler)
            }
            RelayMessage::Notice { message } => {
                info!(relay = %relay_url, "notice: {}", message);
                self.bus.publish(Notification::RelayNotice {
                    relay_url: relay_url.to_string(),
                    message: message.clone(),
                });
                None
            }
            RelayMessage::Ok { .. } | RelayMessage::Auth { .. } => None,
        };

        match (handler, message.subscription_id()) {
            (Some(handler), _) => handler.handle(relay_url, &message),
            (None, Some(subscription_id)) => {
                trace!(relay = %relay_url, subscription_id, "no handler for subscription");
            }
            (None, None) => {}
        }

        let subscription_id = all_eose
            .then(|| message.subscription_id().map(str::to_string))
            .flatten();

        self.emit(PoolEvent::Relay {
            relay_url: relay_url.to_string(),
            event: ConnectionEvent::Relay(message),
        });

        if let Some(subscription_id) = subscription_id {
            self.emit(PoolEvent::AllEose { subscription_id });
        }
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        for entry in self.relays.get_mut().values_mut() {
            if let Some(driver) = entry.driver.take() {
                driver.abort();
            }
        }
    }
}

/// Per-relay driver: connect, pump events until the link drops, back off,
/// repeat. Exits when the pool is gone or reconnect attempts run out.
async fn drive_relay(
    pool: Weak<PoolInner>,
    url: String,
    transport: Arc<Transport>,
    mut backoff: ReconnectBackoff,
) {
    let mut events = transport.listen();

    loop {
        if let Err(e) = transport.connect().await {
            debug!(relay = %url, error = %e, "connect attempt failed");
        }

        if !pump_events(&pool, &url, &transport, &mut events, &mut backoff).await {
            return;
        }

        let Some(delay) = backoff.next_delay() else {
            warn!(relay = %url, attempts = backoff.attempt(), "giving up on relay");
            return;
        };
        debug!(relay = %url, ?delay, "reconnecting after delay");
        tokio::time::sleep(delay).await;
    }
}

/// Forward transport events until the link is lost. Returns false when the
/// driver should stop.
async fn pump_events(
    pool: &Weak<PoolInner>,
    url: &str,
    transport: &Transport,
    events: &mut mpsc::UnboundedReceiver<TransportEvent>,
    backoff: &mut ReconnectBackoff,
) -> bool {
    loop {
        let Some(event) = events.recv().await else {
            return false;
        };

        let Some(pool) = pool.upgrade() else {
            return false;
        };

        match event {
            TransportEvent::Connected => {
                backoff.reset();
                pool.replay_subscriptions(url, transport);
                pool.emit_transport(url, TransportEvent::Connected);
            }
            TransportEvent::Message(frame) => pool.handle_frame(url, &frame),
            TransportEvent::Disconnected { .. } => {
                pool.forget_relay(url);
                pool.emit_transport(url, event);
                return true;
            }
            TransportEvent::Error(_) => {
                pool.emit_transport(url, event);
                // A failed write leaves the socket up; only a dead link ends the pump.
                if !transport.is_connected() {
                    pool.forget_relay(url);
                    return true;
                }
            }
        }
    }
}
