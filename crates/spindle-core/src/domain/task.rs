//! Task record: the single source of truth for one conversion.
//!
//! Design (same as the queue record it grew out of):
//! - All state changes go through methods, never through field writes.
//! - Each method either applies the change or returns `TransitionError`
//!   without touching the record, so a reader can never see half an update.
//! - The terminal state is derived from `results` / `failures` in `finish()`.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::TransitionError;
use super::format::{FormatKey, MediaKind};
use super::ids::TaskId;
use super::state::TaskState;
use super::view::{FailureView, FileReference, FileView, TaskView};

/// Resolved information about the source media.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u64>,
    /// `m:ss` or `h:mm:ss`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_string: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploader: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_count: Option<u64>,
    /// `YYYYMMDD`, as the source reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_date: Option<String>,
}

/// Duration label in the form sources print it: `45`, `3:30`, `1:02:03`.
pub fn duration_label(secs: u64) -> String {
    let (h, m, s) = (secs / 3600, secs % 3600 / 60, secs % 60);
    match (h, m) {
        (0, 0) => s.to_string(),
        (0, _) => format!("{m}:{s:02}"),
        _ => format!("{h}:{m:02}:{s:02}"),
    }
}

/// One materialized output file.
#[derive(Debug, Clone, PartialEq)]
pub struct ProducedFile {
    /// Name offered to the client on download.
    pub filename: String,
    /// Location inside the file store. Never shown in views.
    pub path: PathBuf,
    pub size_bytes: u64,
    pub kind: MediaKind,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FormatFailure {
    pub format: FormatKey,
    pub error: String,
}

#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub id: TaskId,
    pub url: String,
    requested_formats: Vec<FormatKey>,
    state: TaskState,
    progress: u8,
    media: Option<MediaInfo>,
    results: BTreeMap<FormatKey, ProducedFile>,
    failures: Vec<FormatFailure>,
    error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TaskRecord {
    /// `requested_formats` must already be validated (non-empty, no duplicates).
    pub fn new(
        id: TaskId,
        url: impl Into<String>,
        requested_formats: Vec<FormatKey>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            url: url.into(),
            requested_formats,
            state: TaskState::Pending,
            progress: 0,
            media: None,
            results: BTreeMap::new(),
            failures: Vec::new(),
            error: None,
            created_at,
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn requested_formats(&self) -> &[FormatKey] {
        &self.requested_formats
    }

    pub fn media(&self) -> Option<&MediaInfo> {
        self.media.as_ref()
    }

    pub fn results(&self) -> &BTreeMap<FormatKey, ProducedFile> {
        &self.results
    }

    pub fn failures(&self) -> &[FormatFailure] {
        &self.failures
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    fn transition(&mut self, next: TaskState) -> Result<(), TransitionError> {
        if !self.state.can_transition_to(next) {
            return Err(TransitionError::IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Pending -> Resolving.
    pub fn begin_resolving(&mut self) -> Result<(), TransitionError> {
        self.transition(TaskState::Resolving)
    }

    /// Resolving -> Converting, storing the media info and moving progress to
    /// `checkpoint`.
    pub fn record_media(&mut self, media: MediaInfo, checkpoint: u8) -> Result<(), TransitionError> {
        self.transition(TaskState::Converting)?;
        self.media = Some(media);
        self.advance_progress(checkpoint);
        Ok(())
    }

    /// Resolving -> Failed. Nothing was attempted, so `results` stays empty.
    pub fn fail_resolution(&mut self, error: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(TaskState::Failed)?;
        self.error = Some(error.into());
        Ok(())
    }

    /// Raise progress to `percent`. Lower values are ignored; values above
    /// 100 are clamped. No-op once terminal.
    pub fn advance_progress(&mut self, percent: u8) {
        if self.state.is_terminal() {
            return;
        }
        self.progress = self.progress.max(percent.min(100));
    }

    fn check_outcome_slot(&self, format: &FormatKey) -> Result<(), TransitionError> {
        if self.state != TaskState::Converting {
            return Err(TransitionError::NotConverting(self.state));
        }
        if !self.requested_formats.contains(format) {
            return Err(TransitionError::UnknownFormat(format.clone()));
        }
        if self.has_outcome(format) {
            return Err(TransitionError::DuplicateOutcome(format.clone()));
        }
        Ok(())
    }

    fn has_outcome(&self, format: &FormatKey) -> bool {
        self.results.contains_key(format) || self.failures.iter().any(|f| &f.format == format)
    }

    pub fn record_result(
        &mut self,
        format: FormatKey,
        file: ProducedFile,
    ) -> Result<(), TransitionError> {
        self.check_outcome_slot(&format)?;
        self.results.insert(format, file);
        Ok(())
    }

    pub fn record_failure(
        &mut self,
        format: FormatKey,
        error: impl Into<String>,
    ) -> Result<(), TransitionError> {
        self.check_outcome_slot(&format)?;
        self.failures.push(FormatFailure {
            format,
            error: error.into(),
        });
        Ok(())
    }

    /// Converting -> terminal state, computed from `results` and `failures`.
    ///
    /// Every requested format must have an outcome first.
    pub fn finish(&mut self) -> Result<TaskState, TransitionError> {
        if self.state != TaskState::Converting {
            return Err(TransitionError::NotConverting(self.state));
        }
        let unaccounted = self
            .requested_formats
            .iter()
            .filter(|f| !self.has_outcome(f))
            .count();
        if unaccounted > 0 {
            return Err(TransitionError::Unaccounted(unaccounted));
        }

        let next = if self.failures.is_empty() {
            TaskState::Completed
        } else if self.results.is_empty() {
            TaskState::Failed
        } else {
            TaskState::PartiallyCompleted
        };

        match next {
            TaskState::Failed => {
                let summary = self
                    .failures
                    .iter()
                    .map(|f| format!("{}: {}", f.format, f.error))
                    .collect::<Vec<_>>()
                    .join("; ");
                self.error = Some(format!("all formats failed ({summary})"));
            }
            _ => self.progress = 100,
        }
        self.transition(next)?;
        Ok(next)
    }

    /// Immutable, path-free snapshot for status queries.
    pub fn view(&self) -> TaskView {
        let files = (!self.results.is_empty()).then(|| {
            self.results
                .iter()
                .map(|(format, file)| {
                    (
                        format.clone(),
                        FileView {
                            filename: file.filename.clone(),
                            size: file.size_bytes,
                            mime_category: file.kind.mime_category().to_string(),
                            download_url: format!("/api/download/{}/{}", self.id, format),
                        },
                    )
                })
                .collect()
        });

        TaskView {
            task_id: self.id,
            status: self.state,
            progress: self.progress,
            video_info: self.media.clone(),
            error: self.error.clone(),
            files,
            failures: self
                .failures
                .iter()
                .map(|f| FailureView {
                    format: f.format.clone(),
                    error: f.error.clone(),
                })
                .collect(),
            requested_formats: self.requested_formats.clone(),
            created_at: self.created_at,
        }
    }

    /// Download reference for a successfully produced format.
    pub fn file_reference(&self, format: &FormatKey) -> Option<FileReference> {
        self.results.get(format).map(|file| FileReference {
            path: file.path.clone(),
            filename: file.filename.clone(),
            mime_category: file.kind.mime_category().to_string(),
            content_type: file.kind.content_type().to_string(),
        })
    }
}
