//! Relay wire messages.
//!
//! The NIP-01 relay protocol is a JSON array per frame:
//! - Client to Relay: EVENT, REQ, CLOSE
//! - Relay to Client: EVENT, OK, EOSE, CLOSED, NOTICE, AUTH
//!
//! Only the frames this client acts on are modelled. Anything else fails to
//! parse with [`MessageError::UnknownType`] and is dropped by the pool.

use nostr::{Event, Kind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur when parsing relay messages.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("invalid message format: {0}")]
    InvalidFormat(String),

    #[error("unknown message type: {0}")]
    UnknownType(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing field: {0}")]
    MissingField(&'static str),
}

/// Messages sent from client to relay.
#[derive(Debug, Clone)]
pub enum ClientMessage {
    /// Publish an event: ["EVENT", <event JSON>]
    Event(Event),

    /// Subscribe to events: ["REQ", <subscription_id>, <filter1>, <filter2>, ...]
    Req {
        subscription_id: String,
        filters: Vec<Filter>,
    },

    /// Close a subscription: ["CLOSE", <subscription_id>]
    Close { subscription_id: String },
}

impl ClientMessage {
    pub fn req(subscription_id: impl Into<String>, filters: Vec<Filter>) -> Self {
        ClientMessage::Req {
            subscription_id: subscription_id.into(),
            filters,
        }
    }

    pub fn close(subscription_id: impl Into<String>) -> Self {
        ClientMessage::Close {
            subscription_id: subscription_id.into(),
        }
    }

    /// Serialize to the JSON array sent to relays.
    pub fn to_json(&self) -> Result<String, MessageError> {
        let value = match self {
            ClientMessage::Event(event) => serde_json::json!(["EVENT", event]),
            ClientMessage::Req {
                subscription_id,
                filters,
            } => {
                let mut arr = Vec::with_capacity(filters.len() + 2);
                arr.push(Value::String("REQ".to_string()));
                arr.push(Value::String(subscription_id.clone()));
                for filter in filters {
                    arr.push(serde_json::to_value(filter)?);
                }
                Value::Array(arr)
            }
            ClientMessage::Close { subscription_id } => {
                serde_json::json!(["CLOSE", subscription_id])
            }
        };
        Ok(value.to_string())
    }
}

/// Messages sent from relay to client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayMessage {
    /// Event matching a subscription: ["EVENT", <subscription_id>, <event JSON>]
    Event {
        subscription_id: String,
        event: Event,
    },

    /// Command result: ["OK", <event_id>, <true|false>, <message>]
    Ok {
        event_id: String,
        success: bool,
        message: String,
    },

    /// End of stored events: ["EOSE", <subscription_id>]
    Eose { subscription_id: String },

    /// Subscription closed by relay: ["CLOSED", <subscription_id>, <message>]
    Closed {
        subscription_id: String,
        message: String,
    },

    /// Human-readable notice: ["NOTICE", <message>]
    Notice { message: String },

    /// Authentication challenge (NIP-42): ["AUTH", <challenge>]
    Auth { challenge: String },
}

impl RelayMessage {
    /// Parse a JSON frame from the relay.
    pub fn from_json(json: &str) -> Result<Self, MessageError> {
        let arr: Vec<Value> =
            serde_json::from_str(json).map_err(|e| MessageError::InvalidFormat(e.to_string()))?;

        let msg_type = arr
            .first()
            .ok_or_else(|| MessageError::InvalidFormat("empty array".to_string()))?
            .as_str()
            .ok_or_else(|| MessageError::InvalidFormat("first element not a string".to_string()))?;

        match msg_type {
            "EVENT" => {
                let subscription_id = str_at(&arr, 1, "subscription_id")?;
                let raw = arr.get(2).ok_or(MessageError::MissingField("event"))?;
                let event: Event = serde_json::from_value(raw.clone())?;
                Ok(RelayMessage::Event {
                    subscription_id,
                    event,
                })
            }
            "OK" => {
                let event_id = str_at(&arr, 1, "event_id")?;
                let success = arr
                    .get(2)
                    .ok_or(MessageError::MissingField("success"))?
                    .as_bool()
                    .ok_or_else(|| {
                        MessageError::InvalidFormat("success not a boolean".to_string())
                    })?;
                Ok(RelayMessage::Ok {
                    event_id,
                    success,
                    message: lenient_str_at(&arr, 3),
                })
            }
            "EOSE" => Ok(RelayMessage::Eose {
                subscription_id: str_at(&arr, 1, "subscription_id")?,
            }),
            "CLOSED" => Ok(RelayMessage::Closed {
                subscription_id: str_at(&arr, 1, "subscription_id")?,
                message: lenient_str_at(&arr, 2),
            }),
            "NOTICE" => Ok(RelayMessage::Notice {
                message: str_at(&arr, 1, "message")?,
            }),
            "AUTH" => Ok(RelayMessage::Auth {
                challenge: str_at(&arr, 1, "challenge")?,
            }),
            other => Err(MessageError::UnknownType(other.to_string())),
        }
    }

    /// The subscription this message is addressed to, if any.
    pub fn subscription_id(&self) -> Option<&str> {
        match self {
            RelayMessage::Event {
                subscription_id, ..
            }
            | RelayMessage::Eose { subscription_id }
            | RelayMessage::Closed {
                subscription_id, ..
            } => Some(subscription_id),
            RelayMessage::Ok { .. } | RelayMessage::Notice { .. } | RelayMessage::Auth { .. } => {
                None
            }
        }
    }
}

fn str_at(arr: &[Value], idx: usize, field: &'static str) -> Result<String, MessageError> {
    arr.get(idx)
        .ok_or(MessageError::MissingField(field))?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| MessageError::InvalidFormat(format!("{field} not a string")))
}

// Trailing human-readable strings are optional on some relays.
fn lenient_str_at(arr: &[Value], idx: usize) -> String {
    arr.get(idx)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Filter for subscription requests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    /// Event IDs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,

    /// Authors (pubkeys)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,

    /// Event kinds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u16>>,

    /// Events since timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,

    /// Events until timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<u64>,

    /// Maximum number of events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,

    /// Generic tag queries keyed by `#<letter>` (e.g. `#p`).
    #[serde(flatten, skip_serializing_if = "HashMap::is_empty")]
    pub tags: HashMap<String, Vec<String>>,
}

impl Filter {
    /// Create a new empty filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter by event IDs.
    pub fn ids(mut self, ids: Vec<String>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Filter by authors.
    pub fn authors(mut self, authors: Vec<String>) -> Self {
        self.authors = Some(authors);
        self
    }

    /// Filter by raw kind numbers.
    pub fn kinds(mut self, kinds: Vec<u16>) -> Self {
        self.kinds = Some(kinds);
        self
    }

    /// Filter by known kinds.
    pub fn known_kinds(self, kinds: impl IntoIterator<Item = Kind>) -> Self {
        self.kinds(kinds.into_iter().map(u16::from).collect())
    }

    /// Filter by events since timestamp.
    pub fn since(mut self, timestamp: u64) -> Self {
        self.since = Some(timestamp);
        self
    }

    /// Filter by events until timestamp.
    pub fn until(mut self, timestamp: u64) -> Self {
        self.until = Some(timestamp);
        self
    }

    /// Limit number of results.
    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    /// Add a tag filter. The key should be the tag letter (e.g., "e", "p").
    pub fn tag(mut self, key: impl Into<String>, values: Vec<String>) -> Self {
        self.tags.insert(format!("#{}", key.into()), values);
        self
    }

    /// Filter by #e (event reference) tags.
    pub fn event_refs(self, event_ids: Vec<String>) -> Self {
        self.tag("e", event_ids)
    }

    /// Filter by #p (pubkey reference) tags.
    pub fn pubkey_refs(self, pubkeys: Vec<String>) -> Self {
        self.tag("p", pubkeys)
    }

    /// Values of the `#<letter>` tag query, if set.
    pub fn tag_values(&self, key: &str) -> Option<&[String]> {
        self.tags.get(&format!("#{key}")).map(Vec::as_slice)
    }
}
