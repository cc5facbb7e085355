//! Nostr protocol types for the profile client.
//!
//! This crate provides:
//! - NIP-01: Event structure, known kinds and timeline ordering
//! - NIP-02: Follow List (Contact List and relay hints)
//! - Kind 0 profile metadata decoding
//!
//! Events are taken as delivered by relays; nothing here signs or verifies.

mod metadata;
mod nip01;
mod nip02;

// NIP-01: Basic protocol
pub use nip01::{
    Event, KIND_BOOST, KIND_CHANNEL_MESSAGE, KIND_CONTACTS, KIND_DELETION, KIND_ENCRYPTED_DM,
    KIND_LONG_FORM, KIND_METADATA, KIND_REACTION, KIND_RECOMMEND_RELAY, KIND_SHORT_TEXT_NOTE,
    KIND_ZAP, KIND_ZAP_REQUEST, Kind, display_order, sort_events,
};

// NIP-02: Follow List
pub use nip02::{ContactsError, RelayInfo, count_follows, decode_relays, follows, is_follow_tag};

// Kind 0 metadata
pub use metadata::{MetadataError, ProfileMetadata};
