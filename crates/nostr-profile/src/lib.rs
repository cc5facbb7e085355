//! Event aggregation for Nostr profiles.
//!
//! This crate turns the raw event stream of a [`Multiplexer`] into derived,
//! queryable state:
//! - [`ProfileModel`]: one pubkey's timeline, contact list and relay list
//! - [`FollowersModel`]: who follows a pubkey
//! - [`EventHolder`]: the deduplicating newest-first buffer behind timelines
//!
//! Both models deduplicate by event id, so the same event arriving from
//! several relays is applied once.
//!
//! # Example
//!
//! ```rust,no_run
//! use nostr_client::{NotificationBus, ProfileConfig, RelayPool};
//! use nostr_profile::{ProfileModel, ProfileEvent, Profiles, ShowAll};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let pool = RelayPool::with_relays(vec!["wss://nos.lol".to_string()]);
//!     pool.connect().await;
//!
//!     let model = ProfileModel::new(
//!         "3bf0c63fcb93463407af97a5e5ee64fa883d107ef9e558472c4eb9aaaefa459d",
//!         Arc::new(pool.clone()),
//!         Arc::new(Profiles::new()),
//!         Arc::new(ShowAll),
//!         pool.bus().clone(),
//!         ProfileConfig::default(),
//!     );
//!     let mut changes = model.observe();
//!     model.subscribe();
//!
//!     while let Ok(change) = changes.recv().await {
//!         if let ProfileEvent::ContactsUpdated { following, .. } = change {
//!             println!("following {}", following);
//!         }
//!     }
//! }
//! ```

mod followers;
mod holder;
mod policy;
mod prefetch;
mod profile;
mod store;

pub use followers::{FollowersEvent, FollowersModel};
pub use holder::{EventHolder, InsertCallback};
pub use policy::{MuteList, ShowAll, VisibilityPolicy};
pub use profile::{FollowTarget, ProfileEvent, ProfileModel, SubscriptionIds};
pub use store::{ProfileRecord, ProfileStore, Profiles};

pub use nostr_client::{Multiplexer, NotificationBus, ProfileConfig};
