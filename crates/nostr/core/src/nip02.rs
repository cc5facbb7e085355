//! NIP-02: Follow List (Contact List and Petnames)
//!
//! Defines how users publish their follow/contact lists as kind 3 events.
//! Each followed profile is represented by a "p" tag with optional relay URL and petname.
//! Many clients also store the user's relay configuration in the event content as a
//! JSON object mapping relay URLs to read/write flags; [`decode_relays`] reads that.
//!
//! Decoding here is deliberately lenient: a follow tag only needs to be a `p` tag with
//! a value, matching what relays actually deliver.
//!
//! See: <https://github.com/nostr-protocol/nips/blob/master/02.md>

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors that can occur during NIP-02 operations
#[derive(Debug, Error)]
pub enum ContactsError {
    #[error("invalid relay list: {0}")]
    InvalidRelays(String),
}

/// Read/write flags for one relay advertised in a contact list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayInfo {
    #[serde(default = "default_true")]
    pub read: bool,
    #[serde(default = "default_true")]
    pub write: bool,
}

fn default_true() -> bool {
    true
}

impl Default for RelayInfo {
    fn default() -> Self {
        Self {
            read: true,
            write: true,
        }
    }
}

/// A tag counts as a follow when it is `["p", <pubkey>, ...]`.
pub fn is_follow_tag(tag: &[String]) -> bool {
    tag.len() >= 2 && tag[0] == "p"
}

/// Number of follow tags in a tag list.
pub fn count_follows(tags: &[Vec<String>]) -> usize {
    tags.iter().filter(|tag| is_follow_tag(tag)).count()
}

/// Whether the tag list follows `pubkey` (exact match).
pub fn follows(tags: &[Vec<String>], pubkey: &str) -> bool {
    tags.iter()
        .any(|tag| is_follow_tag(tag) && tag[1] == pubkey)
}

/// Decode the relay map carried in a contact list's content.
///
/// Entries whose value is not a relay-info object are skipped. Content that
/// is not a JSON object at all is an error.
pub fn decode_relays(content: &str) -> Result<BTreeMap<String, RelayInfo>, ContactsError> {
    let value: Value = serde_json::from_str(content)
        .map_err(|e| ContactsError::InvalidRelays(e.to_string()))?;

    let Value::Object(entries) = value else {
        return Err(ContactsError::InvalidRelays(
            "content is not a JSON object".to_string(),
        ));
    };

    Ok(entries
        .into_iter()
        .filter_map(|(url, info)| {
            if url.is_empty() || !info.is_object() {
                return None;
            }
            serde_json::from_value::<RelayInfo>(info)
                .ok()
                .map(|info| (url, info))
        })
        .collect())
}
