//! Kind 0 profile metadata.

use crate::Event;
use crate::nip01::KIND_METADATA;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("invalid event kind: expected 0, got {0}")]
    InvalidKind(u16),

    #[error("invalid metadata content: {0}")]
    InvalidContent(#[from] serde_json::Error),
}

/// Profile fields published in a kind 0 event's content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileMetadata {
    #[serde(default)]
    pub name: Option<String>,
    /// User-facing display name (takes priority over name).
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub about: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
    #[serde(default)]
    pub banner: Option<String>,
    /// NIP-05 identifier (e.g., "user@domain.com").
    #[serde(default)]
    pub nip05: Option<String>,
    /// Lightning address for zaps.
    #[serde(default)]
    pub lud16: Option<String>,
    #[serde(default)]
    pub lud06: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
}

impl ProfileMetadata {
    /// Decode the content of a kind 0 event.
    pub fn from_event(event: &Event) -> Result<Self, MetadataError> {
        if event.kind != KIND_METADATA {
            return Err(MetadataError::InvalidKind(event.kind));
        }
        Ok(serde_json::from_str(&event.content)?)
    }

    /// Best display name available, falling back from display_name to name.
    pub fn best_name(&self) -> Option<&str> {
        self.display_name
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.name.as_deref().filter(|s| !s.is_empty()))
    }
}
