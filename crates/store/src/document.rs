//! The persisted watermark document.
//!
//! One JSON object holds every source's checkpoint together with the watchers
//! subscribed to it:
//!
//! ```json
//! {
//!   "communities": [
//!     { "community_name": "rust", "last_processed_id": 100,
//!       "watchers": [{ "user_id": 1, "thread_id": 10 }] }
//!   ],
//!   "chats": [
//!     { "community_name": "rust", "last_processed_id": 7, "chat_status": "quiet",
//!       "watchers": [] }
//!   ]
//! }
//! ```
//!
//! Parsing is strict: unknown fields, missing fields and duplicate community
//! names all fail with [`StoreError::Corrupt`].

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::StoreError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatStatus {
    #[default]
    Quiet,
    Busy,
}

impl fmt::Display for ChatStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Quiet => f.write_str("quiet"),
            Self::Busy => f.write_str("busy"),
        }
    }
}

/// A recipient and the message thread notifications are delivered into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Watcher {
    pub user_id: i64,
    pub thread_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommunityWatermark {
    pub community_name: String,
    pub last_processed_id: i64,
    pub watchers: Vec<Watcher>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChatWatermark {
    pub community_name: String,
    pub last_processed_id: i64,
    pub chat_status: ChatStatus,
    pub watchers: Vec<Watcher>,
}

/// Identifies one watched feed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SourceKey {
    Posts(String),
    Chat(String),
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Posts(name) => write!(f, "{name}"),
            Self::Chat(name) => write!(f, "{name}:chat"),
        }
    }
}

/// Every source's checkpoint, loaded and saved as one document.
///
/// `chats` is optional so documents written before chat support round-trip
/// without gaining a key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WatermarkMap {
    pub communities: Vec<CommunityWatermark>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chats: Option<Vec<ChatWatermark>>,
}

impl WatermarkMap {
    /// Parse and validate a document.  Never returns a partially-read map.
    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        let map: Self = serde_json::from_str(raw)
            .map_err(|err| StoreError::Corrupt(format!("schema mismatch: {err}")))?;
        map.validate()?;
        Ok(map)
    }

    /// Deterministic pretty JSON with a trailing newline.
    pub fn render(&self) -> Result<String, StoreError> {
        let mut out = serde_json::to_string_pretty(self)
            .map_err(|err| StoreError::Corrupt(format!("cannot serialize: {err}")))?;
        out.push('\n');
        Ok(out)
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        let mut seen = HashSet::new();
        for entry in &self.communities {
            check_name(&entry.community_name, "communities")?;
            if !seen.insert(entry.community_name.as_str()) {
                return Err(StoreError::Corrupt(format!(
                    "community {:?} listed twice in communities",
                    entry.community_name
                )));
            }
        }

        let mut seen = HashSet::new();
        for entry in self.chats() {
            check_name(&entry.community_name, "chats")?;
            if !seen.insert(entry.community_name.as_str()) {
                return Err(StoreError::Corrupt(format!(
                    "community {:?} listed twice in chats",
                    entry.community_name
                )));
            }
        }
        Ok(())
    }

    pub fn chats(&self) -> &[ChatWatermark] {
        self.chats.as_deref().unwrap_or_default()
    }

    pub fn chats_mut(&mut self) -> &mut [ChatWatermark] {
        self.chats.as_deref_mut().unwrap_or_default()
    }

    /// Post feeds first, then chat feeds, in document order.
    pub fn sources(&self) -> Vec<SourceKey> {
        self.communities
            .iter()
            .map(|c| SourceKey::Posts(c.community_name.clone()))
            .chain(
                self.chats()
                    .iter()
                    .map(|c| SourceKey::Chat(c.community_name.clone())),
            )
            .collect()
    }

    pub fn watcher_count(&self) -> usize {
        self.communities.iter().map(|c| c.watchers.len()).sum::<usize>()
            + self.chats().iter().map(|c| c.watchers.len()).sum::<usize>()
    }
}

fn check_name(name: &str, list: &str) -> Result<(), StoreError> {
    if name.trim().is_empty() {
        return Err(StoreError::Corrupt(format!("empty community_name in {list}")));
    }
    Ok(())
}
