use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

/// One post or chat message, normalised from whatever shape the API returned.
///
/// `id` is the only ordering and dedup key; `created_at` is informational
/// except for chat activity classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub id: i64,
    pub author: String,
    /// Post title, or the message body for chat messages.
    pub title: String,
    pub url: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl Item {
    pub fn new(id: i64, author: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id,
            author: author.into(),
            title: title.into(),
            url: None,
            created_at: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = Some(at);
        self
    }
}

// ── Wire shapes ──────────────────────────────────────────────────────────────

/// Feeds come back either wrapped (`{"data": [...]}` / `{"messages": [...]}`)
/// or as a bare list.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum FeedPage {
    Data { data: Vec<RawItem> },
    Messages { messages: Vec<RawItem> },
    Bare(Vec<RawItem>),
}

impl FeedPage {
    pub(crate) fn into_items(self) -> Vec<RawItem> {
        match self {
            Self::Data { data } => data,
            Self::Messages { messages } => messages,
            Self::Bare(items) => items,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawItem {
    id: i64,
    #[serde(default)]
    author_username: Option<String>,
    #[serde(default, alias = "user")]
    author: Option<RawAuthor>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawAuthor {
    #[serde(default)]
    username: Option<String>,
}

impl RawItem {
    pub(crate) fn normalize(self) -> Item {
        let author = self
            .author_username
            .or_else(|| self.author.and_then(|a| a.username))
            .unwrap_or_else(|| "unknown".to_string());
        let title = self.title.or(self.content).unwrap_or_default();
        let created_at = self.created_at.as_deref().and_then(|raw| {
            let parsed = parse_timestamp(raw);
            if parsed.is_none() {
                debug!(id = self.id, raw, "unparseable created_at; ignoring");
            }
            parsed
        });

        Item {
            id: self.id,
            author,
            title,
            url: self.url.filter(|u| !u.trim().is_empty()),
            created_at,
        }
    }
}

/// Parses `YYYY-MM-DDTHH:MM:SS.ffffffZ` and any other RFC 3339 timestamp.
pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|at| at.with_timezone(&Utc))
}
