use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::{StoreError, WatermarkMap, WatermarkStore};

/// In-process store holding the rendered document text.
///
/// Goes through the same parse/render path as the remote backends, so a
/// document that survives a `MemoryStore` round-trip survives the real ones.
#[derive(Debug, Default)]
pub struct MemoryStore {
    document: Mutex<Option<String>>,
    saves: AtomicUsize,
    fail_saves: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(raw: impl Into<String>) -> Self {
        Self {
            document: Mutex::new(Some(raw.into())),
            ..Self::default()
        }
    }

    /// Raw text of the last saved (or seeded) document.
    pub fn contents(&self) -> Option<String> {
        self.document.lock().ok().and_then(|doc| doc.clone())
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Make every following `save` fail with `Unavailable`.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl WatermarkStore for MemoryStore {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    async fn load(&self) -> Result<WatermarkMap, StoreError> {
        let raw = self
            .document
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))?
            .clone()
            .ok_or_else(|| StoreError::Unavailable("memory store is empty".to_string()))?;
        WatermarkMap::parse(&raw)
    }

    async fn save(&self, map: &WatermarkMap) -> Result<(), StoreError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("simulated save failure".to_string()));
        }
        let rendered = map.render()?;
        let mut doc = self
            .document
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))?;
        *doc = Some(rendered);
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_store_is_unavailable() {
        let store = MemoryStore::new();
        assert!(matches!(store.load().await, Err(StoreError::Unavailable(_))));
    }

    #[tokio::test]
    async fn save_then_load() {
        let store = MemoryStore::with_document(r#"{"communities": []}"#);
        let mut map = store.load().await.unwrap();
        map.communities.push(crate::CommunityWatermark {
            community_name: "rust".into(),
            last_processed_id: 9,
            watchers: vec![],
        });
        store.save(&map).await.unwrap();
        assert_eq!(store.save_count(), 1);
        assert_eq!(store.load().await.unwrap(), map);
    }

    #[tokio::test]
    async fn failed_save_leaves_document_untouched() {
        let raw = r#"{"communities": []}"#;
        let store = MemoryStore::with_document(raw);
        store.set_fail_saves(true);
        let map = WatermarkMap::default();
        assert!(store.save(&map).await.is_err());
        assert_eq!(store.contents().as_deref(), Some(raw));
        assert_eq!(store.save_count(), 0);
    }
}
