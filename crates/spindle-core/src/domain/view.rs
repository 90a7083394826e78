//! Read-side views handed out by the orchestrator.
//!
//! Views are owned copies; holding one never blocks the pipeline.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::format::FormatKey;
use super::ids::TaskId;
use super::state::TaskState;
use super::task::MediaInfo;

/// Status snapshot of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskView {
    pub task_id: TaskId,
    pub status: TaskState,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_info: Option<MediaInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<BTreeMap<FormatKey, FileView>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<FailureView>,
    pub requested_formats: Vec<FormatKey>,
    pub created_at: DateTime<Utc>,
}

/// A produced file as the client sees it (no filesystem path).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileView {
    pub filename: String,
    pub size: u64,
    pub mime_category: String,
    pub download_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureView {
    pub format: FormatKey,
    pub error: String,
}

/// What the download layer needs to stream a file.
///
/// The file may be swept between lookup and read; callers treat a failed
/// open as "not found".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReference {
    pub path: PathBuf,
    pub filename: String,
    pub mime_category: String,
    pub content_type: String,
}
