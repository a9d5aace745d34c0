use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::{StoreError, WatermarkMap, WatermarkStore};

/// Watermark document kept in a local JSON file.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn tmp_path(&self) -> PathBuf {
        let filename = self
            .path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_else(|| "notifybot.json".to_string());
        self.path.with_file_name(format!("{filename}.tmp"))
    }
}

#[async_trait]
impl WatermarkStore for FileStore {
    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }

    async fn load(&self) -> Result<WatermarkMap, StoreError> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|err| {
            StoreError::Unavailable(format!("cannot read {}: {err}", self.path.display()))
        })?;
        WatermarkMap::parse(&raw)
    }

    /// Atomically replace the file.
    ///
    /// The document is written to a `.tmp` sibling, synced, then renamed over
    /// the original.  A crash before the rename leaves the previous document in
    /// place; the `.tmp` file is removed on any error path.
    async fn save(&self, map: &WatermarkMap) -> Result<(), StoreError> {
        let rendered = map.render()?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let tmp_path = self.tmp_path();
        let write_result: Result<(), StoreError> = async {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)
                .await?;
            file.write_all(rendered.as_bytes()).await?;
            file.flush().await?;
            file.sync_all().await?;
            Ok(())
        }
        .await;

        if let Err(err) = write_result {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(err);
        }

        if let Err(err) = tokio::fs::rename(&tmp_path, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(err.into());
        }

        debug!(path = %self.path.display(), bytes = rendered.len(), "watermark file written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChatStatus, ChatWatermark, Watcher};
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_file_is_unavailable_not_empty() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().join("absent.json"));
        assert!(matches!(store.load().await, Err(StoreError::Unavailable(_))));
    }

    #[tokio::test]
    async fn garbage_file_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "not json").unwrap();
        let store = FileStore::new(&path);
        assert!(store.load().await.unwrap_err().is_corrupt());
    }

    #[tokio::test]
    async fn save_creates_parents_and_leaves_no_tmp() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a/b/state.json");
        let store = FileStore::new(&path);

        let map = WatermarkMap {
            communities: vec![],
            chats: Some(vec![ChatWatermark {
                community_name: "rust".into(),
                last_processed_id: 12,
                chat_status: ChatStatus::Busy,
                watchers: vec![Watcher { user_id: 1, thread_id: 2 }],
            }]),
        };
        store.save(&map).await.unwrap();

        assert!(path.exists());
        assert!(!dir.path().join("a/b/state.json.tmp").exists());
        assert_eq!(store.load().await.unwrap(), map);
    }

    #[tokio::test]
    async fn save_overwrites_whole_document() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(
            &path,
            r#"{"communities": [{"community_name": "old", "last_processed_id": 1, "watchers": []}]}"#,
        )
        .unwrap();
        let store = FileStore::new(&path);

        store.save(&WatermarkMap::default()).await.unwrap();
        let reloaded = store.load().await.unwrap();
        assert!(reloaded.communities.is_empty());
    }
}
