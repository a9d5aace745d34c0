//! Squabbles API surface used by the bot: reading community feeds and
//! delivering direct messages.

mod client;
mod error;
mod types;

use async_trait::async_trait;

pub use client::{SquabblesClient, SquabblesClientConfig};
pub use error::{NotifyError, UpstreamError};
pub use types::Item;

/// Read-only access to a community's recent items.
///
/// Both feeds return one page, newest first.
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    async fn fetch_posts(&self, community: &str) -> Result<Vec<Item>, UpstreamError>;
    async fn fetch_chat_messages(&self, community: &str) -> Result<Vec<Item>, UpstreamError>;
}

/// Delivers one message into one thread.  Exactly one attempt per call.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, thread_id: i64, message: &str) -> Result<(), NotifyError>;
}
