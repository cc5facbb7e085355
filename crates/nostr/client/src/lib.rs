//! Nostr relay WebSocket client.
//!
//! This crate provides:
//! - WebSocket transport to a single relay with explicit lifecycle events
//! - Message parsing (NIP-01 relay protocol)
//! - A relay pool that multiplexes subscriptions across relays and routes
//!   messages to per-subscription handlers
//! - Reconnect backoff, a process-wide notification bus and TOML configuration
//!
//! # Example
//!
//! ```rust,no_run
//! use nostr_client::{Filter, PoolEvent, RelayMessage, RelayPool};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let pool = RelayPool::with_relays(vec![
//!         "wss://relay.damus.io".to_string(),
//!         "wss://nos.lol".to_string(),
//!     ]);
//!     let mut events = pool.events();
//!
//!     // Subscriptions registered before connecting are sent on connect.
//!     let filter = Filter::new().kinds(vec![1]).limit(10);
//!     pool.subscribe(
//!         "notes",
//!         vec![filter],
//!         Arc::new(|relay: &str, msg: &RelayMessage| {
//!             if let RelayMessage::Event { event, .. } = msg {
//!                 println!("{relay}: {}", event.content);
//!             }
//!         }),
//!     );
//!
//!     pool.connect().await;
//!
//!     while let Ok(event) = events.recv().await {
//!         if let PoolEvent::AllEose { subscription_id } = event {
//!             println!("Got all stored events for {}", subscription_id);
//!             break;
//!         }
//!     }
//! }
//! ```

mod backoff;
mod bus;
mod config;
mod error;
mod message;
mod pool;
mod subscription;
mod transport;

pub use backoff::{Jitter, ReconnectBackoff};
pub use bus::{Notification, NotificationBus};
pub use config::{ClientConfig, ConfigError, PoolConfig, ProfileConfig, TransportConfig};
pub use error::{PoolError, Result, TransportError};
pub use message::{ClientMessage, Filter, MessageError, RelayMessage};
pub use pool::{ConnectionEvent, PoolEvent, RelayPool};
pub use subscription::{Multiplexer, Subscription, SubscriptionHandler, generate_subscription_id};
pub use transport::{
    CLOSE_ABNORMAL, CLOSE_NO_STATUS, CLOSE_NORMAL, ConnectionState, Transport, TransportEvent,
    WsMessage,
};

/// Default relays.
pub const DEFAULT_RELAYS: &[&str] = &[
    "wss://relay.damus.io",
    "wss://nos.lol",
    "wss://relay.nostr.band",
    "wss://nostr.wine",
];

/// Create a relay pool with the default relays.
pub fn default_pool() -> RelayPool {
    RelayPool::with_relays(DEFAULT_RELAYS.iter().map(|s| s.to_string()).collect())
}
