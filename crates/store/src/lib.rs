//! Persistence of per-source watermarks.
//!
//! The whole [`WatermarkMap`] is read once at the start of a run and written
//! back once at the end.  None of the backends support partial writes: every
//! [`WatermarkStore::save`] replaces the full document.

mod document;
mod error;
mod file;
mod gist;
mod memory;

use async_trait::async_trait;

pub use document::{ChatStatus, ChatWatermark, CommunityWatermark, SourceKey, Watcher, WatermarkMap};
pub use error::StoreError;
pub use file::FileStore;
pub use gist::{GistStore, GistStoreConfig};
pub use memory::MemoryStore;

#[async_trait]
pub trait WatermarkStore: Send + Sync {
    /// Human-readable location, for logs.
    fn describe(&self) -> String;

    /// Fetch and parse the current document.
    async fn load(&self) -> Result<WatermarkMap, StoreError>;

    /// Replace the persisted document with `map`.  On error the caller must
    /// assume nothing was persisted.
    async fn save(&self, map: &WatermarkMap) -> Result<(), StoreError>;
}
