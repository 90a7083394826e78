//! LocalFileStore - ローカルディレクトリに出力ファイルを置く FileStore
//!
//! # 実装詳細
//! - ファイル名: `{task_id}_{format}_{stem}.{ext}`
//! - prepare 時点で追跡を始める（書き込み途中のファイルも sweep 対象）
//! - 追跡していないファイル（前回起動時の残骸など）は mtime で判定
//! - ロックは fs 操作の await を跨がない

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::domain::naming::sanitize;
use crate::domain::{FormatKey, StoreError, TaskId};
use crate::ports::{Clock, FileStore, StoreSweep, StoredFile};

#[derive(Debug, Clone)]
struct Entry {
    task_id: TaskId,
    format: FormatKey,
    created_at: DateTime<Utc>,
}

pub struct LocalFileStore {
    root: PathBuf,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<PathBuf, Entry>>,
}

impl LocalFileStore {
    /// Open (and create if needed) the store directory.
    pub async fn open(root: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| StoreError::io(&root, e))?;
        Ok(Self {
            root,
            clock,
            entries: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of files currently tracked.
    pub fn tracked(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn file_name(task_id: TaskId, format: &FormatKey, stem: &str, extension: &str) -> String {
        let format = sanitize(format.as_str(), 32);
        let extension = sanitize(extension, 8);
        if stem.is_empty() {
            format!("{task_id}_{format}.{extension}")
        } else {
            format!("{task_id}_{format}_{stem}.{extension}")
        }
    }

    async fn remove(path: &Path) -> Result<(), StoreError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    /// Files in the directory that this store did not write, older than
    /// `retention` by modification time.
    async fn expired_untracked(&self, now: DateTime<Utc>, retention: Duration) -> Result<Vec<PathBuf>, StoreError> {
        let mut expired = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| StoreError::io(&self.root, e))?;

        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&self.root, e))?
        {
            let path = item.path();
            if self.lock().contains_key(&path) {
                continue;
            }
            let Ok(meta) = item.metadata().await else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            let Ok(modified) = meta.modified() else {
                continue;
            };
            let modified: DateTime<Utc> = modified.into();
            if now - modified > retention {
                expired.push(path);
            }
        }
        Ok(expired)
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn prepare(
        &self,
        task_id: TaskId,
        format: &FormatKey,
        stem: &str,
        extension: &str,
    ) -> Result<PathBuf, StoreError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| StoreError::io(&self.root, e))?;

        let path = self
            .root
            .join(Self::file_name(task_id, format, stem, extension));
        self.lock().insert(
            path.clone(),
            Entry {
                task_id,
                format: format.clone(),
                created_at: self.clock.now(),
            },
        );
        Ok(path)
    }

    async fn commit(
        &self,
        task_id: TaskId,
        format: &FormatKey,
        path: &Path,
    ) -> Result<StoredFile, StoreError> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| StoreError::io(path, e))?;
        let created_at = self.clock.now();
        self.lock().insert(
            path.to_path_buf(),
            Entry {
                task_id,
                format: format.clone(),
                created_at,
            },
        );
        Ok(StoredFile {
            path: path.to_path_buf(),
            size_bytes: meta.len(),
            created_at,
        })
    }

    async fn resolve(&self, task_id: TaskId, format: &FormatKey) -> Option<PathBuf> {
        let path = self
            .lock()
            .iter()
            .find(|(_, e)| e.task_id == task_id && &e.format == format)
            .map(|(p, _)| p.clone())?;
        match tokio::fs::try_exists(&path).await {
            Ok(true) => Some(path),
            _ => None,
        }
    }

    async fn discard(&self, path: &Path) -> Result<(), StoreError> {
        self.lock().remove(path);
        Self::remove(path).await
    }

    async fn sweep_expired(&self, retention: Duration) -> Result<StoreSweep, StoreError> {
        let now = self.clock.now();
        let tracked: Vec<PathBuf> = self
            .lock()
            .iter()
            .filter(|(_, e)| now - e.created_at > retention)
            .map(|(p, _)| p.clone())
            .collect();
        let untracked = self.expired_untracked(now, retention).await?;

        let mut sweep = StoreSweep::default();
        for path in tracked.iter().chain(untracked.iter()) {
            match Self::remove(path).await {
                Ok(()) => {
                    debug!(path = %path.display(), "expired file removed");
                    sweep.removed += 1;
                }
                Err(e) => {
                    warn!(error = %e, "failed to remove expired file");
                    sweep.failed += 1;
                }
            }
        }

        let mut entries = self.lock();
        for path in &tracked {
            entries.remove(path);
        }
        Ok(sweep)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::FixedClock;
    use ulid::Ulid;

    async fn store() -> (tempfile::TempDir, Arc<FixedClock>, LocalFileStore) {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let store = LocalFileStore::open(dir.path().join("out"), clock.clone())
            .await
            .unwrap();
        (dir, clock, store)
    }

    fn task_id() -> TaskId {
        TaskId::from_ulid(Ulid::new())
    }

    async fn write(store: &LocalFileStore, id: TaskId, format: &str) -> PathBuf {
        let format = FormatKey::new(format);
        let path = store.prepare(id, &format, "Some Title", "mp3").await.unwrap();
        tokio::fs::write(&path, b"0123456789").await.unwrap();
        store.commit(id, &format, &path).await.unwrap();
        path
    }

    #[tokio::test]
    async fn open_creates_directory() {
        let (_dir, _clock, store) = store().await;
        assert!(store.root().is_dir());
    }

    #[tokio::test]
    async fn file_names_carry_task_id() {
        let (_dir, _clock, store) = store().await;
        let id = task_id();
        let path = store
            .prepare(id, &FormatKey::new("mp3_128"), "Title", "mp3")
            .await
            .unwrap();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert_eq!(name, format!("{id}_mp3_128_Title.mp3"));
    }

    #[tokio::test]
    async fn same_stem_different_tasks_do_not_collide() {
        let (_dir, _clock, store) = store().await;
        let a = write(&store, task_id(), "mp3_128").await;
        let b = write(&store, task_id(), "mp3_128").await;
        assert_ne!(a, b);
        assert!(a.exists() && b.exists());
    }

    #[tokio::test]
    async fn commit_reports_size() {
        let (_dir, _clock, store) = store().await;
        let id = task_id();
        let format = FormatKey::new("mp3_128");
        let path = store.prepare(id, &format, "t", "mp3").await.unwrap();
        tokio::fs::write(&path, vec![0u8; 1234]).await.unwrap();
        let stored = store.commit(id, &format, &path).await.unwrap();
        assert_eq!(stored.size_bytes, 1234);
    }

    #[tokio::test]
    async fn resolve_finds_committed_file() {
        let (_dir, _clock, store) = store().await;
        let id = task_id();
        let path = write(&store, id, "mp3_128").await;
        assert_eq!(store.resolve(id, &FormatKey::new("mp3_128")).await, Some(path));
        assert_eq!(store.resolve(id, &FormatKey::new("mp4_720")).await, None);
    }

    #[tokio::test]
    async fn discard_tolerates_missing_file() {
        let (_dir, _clock, store) = store().await;
        let id = task_id();
        let path = store
            .prepare(id, &FormatKey::new("mp3_128"), "t", "mp3")
            .await
            .unwrap();
        store.discard(&path).await.unwrap();
        assert_eq!(store.tracked(), 0);
    }

    #[tokio::test]
    async fn sweep_removes_only_expired_files() {
        let (_dir, clock, store) = store().await;
        let old = write(&store, task_id(), "mp3_128").await;
        clock.advance(Duration::minutes(90));
        let fresh = write(&store, task_id(), "mp3_128").await;
        clock.advance(Duration::minutes(60));

        let sweep = store.sweep_expired(Duration::hours(2)).await.unwrap();

        assert_eq!(sweep, StoreSweep { removed: 1, failed: 0 });
        assert!(!old.exists());
        assert!(fresh.exists());
        assert_eq!(store.tracked(), 1);
    }

    #[tokio::test]
    async fn sweep_tolerates_file_already_gone() {
        let (_dir, clock, store) = store().await;
        let path = write(&store, task_id(), "mp3_128").await;
        tokio::fs::remove_file(&path).await.unwrap();
        clock.advance(Duration::hours(3));

        let sweep = store.sweep_expired(Duration::hours(2)).await.unwrap();
        assert_eq!(sweep.failed, 0);
        assert_eq!(store.tracked(), 0);
    }

    #[tokio::test]
    async fn sweep_removes_stale_untracked_files() {
        let (_dir, clock, store) = store().await;
        let leftover = store.root().join("leftover.mp3");
        tokio::fs::write(&leftover, b"old").await.unwrap();

        // mtime is "now" in wall-clock terms; nothing happens yet
        store.sweep_expired(Duration::hours(2)).await.unwrap();
        assert!(leftover.exists());

        clock.advance(Duration::hours(3));
        let sweep = store.sweep_expired(Duration::hours(2)).await.unwrap();
        assert_eq!(sweep.removed, 1);
        assert!(!leftover.exists());
    }
}
