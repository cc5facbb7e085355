//! NIP-01: Basic protocol flow description.
//!
//! This module implements the core Nostr event structure:
//! - Event structure (id, pubkey, created_at, kind, tags, content, sig)
//! - Kind enumeration for the kinds this client understands
//! - Display ordering (newest first, ties broken by id)
//!
//! Signature creation and verification are not handled here; events are
//! trusted as delivered by relays.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

// Standard event kinds
pub const KIND_METADATA: u16 = 0;
pub const KIND_SHORT_TEXT_NOTE: u16 = 1;
pub const KIND_RECOMMEND_RELAY: u16 = 2;
pub const KIND_CONTACTS: u16 = 3;
pub const KIND_ENCRYPTED_DM: u16 = 4;
pub const KIND_DELETION: u16 = 5;
pub const KIND_BOOST: u16 = 6;
pub const KIND_REACTION: u16 = 7;
pub const KIND_CHANNEL_MESSAGE: u16 = 42;
pub const KIND_ZAP_REQUEST: u16 = 9734;
pub const KIND_ZAP: u16 = 9735;
pub const KIND_LONG_FORM: u16 = 30023;

/// Event kinds with client-side meaning.
///
/// Anything else is carried as a raw `u16` on [`Event::kind`] and is
/// reported as `None` by [`Event::known_kind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Kind {
    Metadata,
    Text,
    RecommendRelay,
    Contacts,
    EncryptedDm,
    Deletion,
    Boost,
    Reaction,
    ChannelMessage,
    ZapRequest,
    Zap,
    LongForm,
}

impl Kind {
    /// Map a wire kind to a known kind.
    pub fn from_u16(kind: u16) -> Option<Self> {
        Some(match kind {
            KIND_METADATA => Kind::Metadata,
            KIND_SHORT_TEXT_NOTE => Kind::Text,
            KIND_RECOMMEND_RELAY => Kind::RecommendRelay,
            KIND_CONTACTS => Kind::Contacts,
            KIND_ENCRYPTED_DM => Kind::EncryptedDm,
            KIND_DELETION => Kind::Deletion,
            KIND_BOOST => Kind::Boost,
            KIND_REACTION => Kind::Reaction,
            KIND_CHANNEL_MESSAGE => Kind::ChannelMessage,
            KIND_ZAP_REQUEST => Kind::ZapRequest,
            KIND_ZAP => Kind::Zap,
            KIND_LONG_FORM => Kind::LongForm,
            _ => return None,
        })
    }

    /// The wire value of this kind.
    pub fn as_u16(self) -> u16 {
        match self {
            Kind::Metadata => KIND_METADATA,
            Kind::Text => KIND_SHORT_TEXT_NOTE,
            Kind::RecommendRelay => KIND_RECOMMEND_RELAY,
            Kind::Contacts => KIND_CONTACTS,
            Kind::EncryptedDm => KIND_ENCRYPTED_DM,
            Kind::Deletion => KIND_DELETION,
            Kind::Boost => KIND_BOOST,
            Kind::Reaction => KIND_REACTION,
            Kind::ChannelMessage => KIND_CHANNEL_MESSAGE,
            Kind::ZapRequest => KIND_ZAP_REQUEST,
            Kind::Zap => KIND_ZAP,
            Kind::LongForm => KIND_LONG_FORM,
        }
    }

    /// Post-like kinds that belong on a timeline.
    pub fn is_textlike(self) -> bool {
        matches!(self, Kind::Text | Kind::ChannelMessage | Kind::LongForm)
    }
}

impl From<Kind> for u16 {
    fn from(kind: Kind) -> Self {
        kind.as_u16()
    }
}

/// A signed Nostr event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// 32-bytes lowercase hex-encoded sha256 of the serialized event data
    pub id: String,
    /// 32-bytes lowercase hex-encoded public key of the event creator
    pub pubkey: String,
    /// Unix timestamp in seconds
    pub created_at: u64,
    /// Event kind (integer between 0 and 65535)
    pub kind: u16,
    /// Array of arrays of strings (tags)
    pub tags: Vec<Vec<String>>,
    /// Arbitrary string content
    pub content: String,
    /// 64-bytes lowercase hex signature
    pub sig: String,
}

impl Event {
    /// The classified kind, if this client knows it.
    pub fn known_kind(&self) -> Option<Kind> {
        Kind::from_u16(self.kind)
    }

    /// Whether the event is a post-like kind (note, channel message, article).
    pub fn is_textlike(&self) -> bool {
        self.known_kind().is_some_and(Kind::is_textlike)
    }

    /// Whether the event is a boost (repost).
    pub fn is_boost(&self) -> bool {
        self.kind == KIND_BOOST
    }

    /// Values at position 1 of every tag named `name` with at least two elements.
    pub fn tag_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.tags
            .iter()
            .filter(move |tag| tag.len() >= 2 && tag[0] == name)
            .map(|tag| tag[1].as_str())
    }

    /// Pubkeys referenced through `p` tags.
    pub fn referenced_pubkeys(&self) -> impl Iterator<Item = &str> + '_ {
        self.tag_values("p")
    }
}

/// Display ordering: newer first, then id ascending for ties.
pub fn display_order(a: &Event, b: &Event) -> Ordering {
    match b.created_at.cmp(&a.created_at) {
        Ordering::Equal => a.id.cmp(&b.id),
        other => other,
    }
}

/// Sort events in reverse-chronological order by created_at,
/// then by id (lexicographically) in case of ties.
pub fn sort_events(events: &mut [Event]) {
    events.sort_by(display_order);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: &str, created_at: u64, kind: u16) -> Event {
        Event {
            id: id.to_string(),
            pubkey: "pk".to_string(),
            created_at,
            kind,
            tags: vec![],
            content: String::new(),
            sig: "sig".to_string(),
        }
    }

    #[test]
    fn test_kind_round_trip_for_known_kinds() {
        for kind in [
            Kind::Metadata,
            Kind::Text,
            Kind::Contacts,
            Kind::Boost,
            Kind::ChannelMessage,
            Kind::Zap,
            Kind::LongForm,
        ] {
            assert_eq!(Kind::from_u16(kind.as_u16()), Some(kind));
        }
        assert_eq!(Kind::from_u16(1984), None);
    }

    #[test]
    fn test_textlike_classification() {
        assert!(event("a", 1, KIND_SHORT_TEXT_NOTE).is_textlike());
        assert!(event("a", 1, KIND_CHANNEL_MESSAGE).is_textlike());
        assert!(event("a", 1, KIND_LONG_FORM).is_textlike());
        assert!(!event("a", 1, KIND_BOOST).is_textlike());
        assert!(!event("a", 1, KIND_CONTACTS).is_textlike());
        assert!(!event("a", 1, 1984).is_textlike());
        assert!(event("a", 1, KIND_BOOST).is_boost());
    }

    #[test]
    fn test_sort_events_newest_first_ties_by_id() {
        let mut events = vec![
            event("b", 10, 1),
            event("c", 30, 1),
            event("a", 10, 1),
            event("d", 20, 1),
        ];
        sort_events(&mut events);
        let ids: Vec<&str> = events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "d", "a", "b"]);
    }

    #[test]
    fn test_tag_values() {
        let mut ev = event("a", 1, 1);
        ev.tags = vec![
            vec!["p".to_string(), "x".to_string()],
            vec!["e".to_string(), "y".to_string()],
            vec!["p".to_string()],
            vec!["p".to_string(), "z".to_string(), "wss://relay".to_string()],
        ];
        let pubkeys: Vec<&str> = ev.referenced_pubkeys().collect();
        assert_eq!(pubkeys, vec!["x", "z"]);
    }

    #[test]
    fn test_event_json_shape() {
        let json = r#"{"id":"abc","pubkey":"def","created_at":123,"kind":1,"tags":[["p","x"]],"content":"hello","sig":"xyz"}"#;
        let ev: Event = serde_json::from_str(json).unwrap();
        assert_eq!(ev.id, "abc");
        assert_eq!(ev.known_kind(), Some(Kind::Text));
        assert_eq!(ev.tags, vec![vec!["p".to_string(), "x".to_string()]]);
    }
}
