//! FileStore port - 出力ファイルの置き場
//!
//! # 設計原則
//! - ファイル名には task_id を含める（同じ URL の並行タスクでも衝突しない）
//! - 作成時刻を記録し、retention を超えたものを sweep で削除
//! - 削除はダウンロード中でも行ってよい（クライアント側は読み込み失敗として見える）

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::domain::{FormatKey, StoreError, TaskId};

/// A committed output file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

/// Result of one expiry sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreSweep {
    pub removed: usize,
    pub failed: usize,
}

#[async_trait]
pub trait FileStore: Send + Sync {
    /// Reserve the on-disk path for `(task_id, format)`. `stem` is an already
    /// sanitized descriptive name, `extension` has no leading dot.
    async fn prepare(
        &self,
        task_id: TaskId,
        format: &FormatKey,
        stem: &str,
        extension: &str,
    ) -> Result<PathBuf, StoreError>;

    /// Record a file written at `path` and start its retention clock.
    async fn commit(
        &self,
        task_id: TaskId,
        format: &FormatKey,
        path: &Path,
    ) -> Result<StoredFile, StoreError>;

    /// Existing path for `(task_id, format)`, if the file is still on disk.
    async fn resolve(&self, task_id: TaskId, format: &FormatKey) -> Option<PathBuf>;

    /// Remove a (possibly partial) file. Missing files are not an error.
    async fn discard(&self, path: &Path) -> Result<(), StoreError>;

    /// Delete every file older than `retention` and forget it.
    async fn sweep_expired(&self, retention: Duration) -> Result<StoreSweep, StoreError>;
}
