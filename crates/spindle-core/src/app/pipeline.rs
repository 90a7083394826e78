//! ConversionPipeline - 1 タスク分の状態機械を駆動する
//!
//! # フロー
//! 1. Pending → Resolving
//! 2. resolve（lenient なリトライ）→ 失敗なら Failed で終了
//! 3. Resolving → Converting、progress = checkpoint
//! 4. format ごとに直列で acquire（strict なリトライ）
//!    - 成功: results に追加 / 失敗: failures に追加して次へ
//!    - どちらでも format のスライス終端まで progress を進める
//! 5. finish() で results / failures から終端状態を決める
//!
//! The pipeline writes only through `TaskRegistry::publish`. When the record
//! has been evicted, the run stops at the next publish without error.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::app::registry::{RecordHandle, TaskRegistry};
use crate::app::retry::{self, RetryScope};
use crate::domain::naming::display_stem;
use crate::domain::{
    FetchError, FormatKey, FormatSpec, MediaInfo, ProducedFile, RetryPolicy, TaskId,
    TaskRecord, TransitionError,
};
use crate::ports::{FetchRequest, FileStore, MediaFetcher, ProgressSink};

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub resolve_policy: RetryPolicy,
    pub acquire_policy: RetryPolicy,
    /// Cap for the sanitized title used in file names.
    pub title_max_len: usize,
    /// Progress once metadata is resolved. Must be below 100.
    pub resolve_checkpoint: u8,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            resolve_policy: RetryPolicy::lenient(),
            acquire_policy: RetryPolicy::strict(),
            title_max_len: 50,
            resolve_checkpoint: 10,
        }
    }
}

/// Why a run stopped before reaching a terminal state.
#[derive(Debug)]
enum Abandon {
    /// The record was removed or replaced.
    Evicted,
    /// The record refused an update.
    Rejected(TransitionError),
}

/// Progress range owned by one format: `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Slice {
    start: u8,
    end: u8,
}

impl Slice {
    /// The `index`-th of `count` equal slices of `[checkpoint, 100]`.
    fn nth(checkpoint: u8, index: usize, count: usize) -> Self {
        let checkpoint = u64::from(checkpoint.min(100));
        let span = 100 - checkpoint;
        let count = count.max(1) as u64;
        let at = |i: u64| (checkpoint + span * i / count) as u8;
        Self {
            start: at(index as u64),
            end: at(index as u64 + 1),
        }
    }

    fn at_bytes(&self, transferred: u64, total: u64) -> u8 {
        if total == 0 {
            return self.start;
        }
        let done = transferred.min(total);
        let width = u64::from(self.end - self.start);
        self.start + (width * done / total) as u8
    }
}

/// Maps byte progress of one fetch into the task's progress.
struct SliceProgress<'a> {
    registry: &'a TaskRegistry,
    handle: &'a RecordHandle,
    slice: Slice,
}

impl ProgressSink for SliceProgress<'_> {
    fn report(&self, transferred: u64, total: Option<u64>) {
        // without a total the slice is credited when the format ends
        let Some(total) = total else {
            return;
        };
        let percent = self.slice.at_bytes(transferred, total);
        self.registry
            .publish(self.handle, |r| r.advance_progress(percent));
    }
}

async fn with_timeout<T>(
    limit: Duration,
    attempt: impl Future<Output = Result<T, FetchError>>,
) -> Result<T, FetchError> {
    match tokio::time::timeout(limit, attempt).await {
        Ok(result) => result,
        Err(_) => Err(FetchError::transient(format!(
            "attempt timed out after {limit:?}"
        ))),
    }
}

pub struct ConversionPipeline {
    registry: Arc<TaskRegistry>,
    fetcher: Arc<dyn MediaFetcher>,
    store: Arc<dyn FileStore>,
    settings: PipelineSettings,
}

impl ConversionPipeline {
    pub fn new(
        registry: Arc<TaskRegistry>,
        fetcher: Arc<dyn MediaFetcher>,
        store: Arc<dyn FileStore>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            registry,
            fetcher,
            store,
            settings,
        }
    }

    /// Drive the task behind `handle` to a terminal state.
    pub async fn run(&self, handle: RecordHandle) {
        let task_id = handle.id();
        match self.drive(&handle).await {
            Ok(()) => {}
            Err(Abandon::Evicted) => {
                debug!(task_id = %task_id, "task record gone; abandoning run");
            }
            Err(Abandon::Rejected(e)) => {
                warn!(task_id = %task_id, error = %e, "task record rejected update; abandoning run");
            }
        }
    }

    /// Metadata lookup with the resolve policy and per-attempt timeout.
    /// Also serves previews that belong to no task.
    pub async fn resolve(
        &self,
        task_id: Option<TaskId>,
        url: &str,
    ) -> Result<MediaInfo, FetchError> {
        let policy = &self.settings.resolve_policy;
        let fetcher = &self.fetcher;
        retry::execute(
            policy,
            RetryScope {
                task_id,
                stage: "resolve",
                format: None,
            },
            FetchError::kind,
            || async move { with_timeout(policy.attempt_timeout, fetcher.resolve(url)).await },
        )
        .await
    }

    fn publish<R>(
        &self,
        handle: &RecordHandle,
        update: impl FnOnce(&mut TaskRecord) -> Result<R, TransitionError>,
    ) -> Result<R, Abandon> {
        match self.registry.publish(handle, update) {
            Some(Ok(value)) => Ok(value),
            Some(Err(e)) => Err(Abandon::Rejected(e)),
            None => Err(Abandon::Evicted),
        }
    }

    async fn drive(&self, handle: &RecordHandle) -> Result<(), Abandon> {
        let task_id = handle.id();
        let (url, formats) = self.publish(handle, |r| {
            r.begin_resolving()?;
            Ok((r.url.clone(), r.requested_formats().to_vec()))
        })?;
        info!(task_id = %task_id, stage = "resolve", formats = formats.len(), "task started");

        let media = match self.resolve(Some(task_id), &url).await {
            Ok(media) => media,
            Err(e) => {
                warn!(task_id = %task_id, stage = "resolve", error = %e, "metadata resolution failed");
                let message = e.message().to_string();
                self.publish(handle, |r| r.fail_resolution(message))?;
                return Ok(());
            }
        };
        info!(task_id = %task_id, stage = "resolve", media_id = %media.id, "media resolved");

        let stem = display_stem(&media.title, &media.id, self.settings.title_max_len);
        let checkpoint = self.settings.resolve_checkpoint;
        self.publish(handle, |r| r.record_media(media, checkpoint))?;

        for (index, format) in formats.iter().enumerate() {
            let slice = Slice::nth(checkpoint, index, formats.len());
            match self.acquire(handle, &url, format, &stem, slice).await {
                Ok(file) => {
                    info!(
                        task_id = %task_id,
                        stage = "acquire",
                        format = %format,
                        bytes = file.size_bytes,
                        "format produced"
                    );
                    let path = file.path.clone();
                    match self.publish(handle, |r| r.record_result(format.clone(), file)) {
                        Ok(()) => {}
                        Err(Abandon::Evicted) => {
                            // nothing references the file any more
                            self.discard(task_id, &path).await;
                            return Err(Abandon::Evicted);
                        }
                        Err(e) => return Err(e),
                    }
                }
                Err(message) => {
                    self.publish(handle, |r| r.record_failure(format.clone(), message))?;
                }
            }
            self.publish(handle, |r| {
                r.advance_progress(slice.end);
                Ok(())
            })?;
        }

        let state = self.publish(handle, |r| r.finish())?;
        info!(task_id = %task_id, status = state.as_str(), "task finished");
        Ok(())
    }

    /// Produce one format. The error is the client-visible failure text.
    async fn acquire(
        &self,
        handle: &RecordHandle,
        url: &str,
        format: &FormatKey,
        stem: &str,
        slice: Slice,
    ) -> Result<ProducedFile, String> {
        let task_id = handle.id();
        let spec = FormatSpec::parse(format).map_err(|e| {
            warn!(task_id = %task_id, stage = "acquire", format = %format, error = %e, "unusable format");
            e.to_string()
        })?;
        let extension = spec.kind.extension();

        let path = self
            .store
            .prepare(task_id, format, stem, extension)
            .await
            .map_err(|e| {
                warn!(task_id = %task_id, stage = "acquire", format = %format, error = %e, "cannot reserve output");
                "output storage unavailable".to_string()
            })?;
        debug!(task_id = %task_id, format = %format, path = %path.display(), "output reserved");

        let request = FetchRequest {
            url: url.to_string(),
            format: format.clone(),
            spec,
            output_path: path.clone(),
        };
        let sink = SliceProgress {
            registry: &self.registry,
            handle,
            slice,
        };

        let policy = &self.settings.acquire_policy;
        let fetcher = &self.fetcher;
        let request_ref = &request;
        let sink_ref = &sink;
        let fetched = retry::execute(
            policy,
            RetryScope {
                task_id: Some(task_id),
                stage: "acquire",
                format: Some(format),
            },
            FetchError::kind,
            || async move {
                with_timeout(
                    policy.attempt_timeout,
                    fetcher.fetch(request_ref, sink_ref),
                )
                .await
            },
        )
        .await;

        let fetched = match fetched {
            Ok(fetched) if fetched.bytes > 0 => fetched,
            Ok(_) => {
                self.discard(task_id, &path).await;
                return Err("fetcher produced an empty file".to_string());
            }
            Err(e) => {
                self.discard(task_id, &path).await;
                return Err(e.message().to_string());
            }
        };

        let stored = match self.store.commit(task_id, format, &fetched.path).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(task_id = %task_id, stage = "acquire", format = %format, error = %e, "cannot commit output");
                self.discard(task_id, &fetched.path).await;
                return Err("output storage unavailable".to_string());
            }
        };

        Ok(ProducedFile {
            filename: format!("{stem}_{format}.{extension}"),
            path: stored.path,
            size_bytes: stored.size_bytes,
            kind: spec.kind,
            created_at: stored.created_at,
        })
    }

    /// Remove partial output. Failure here only leaves a file for the sweep.
    async fn discard(&self, task_id: TaskId, path: &std::path::Path) {
        if let Err(e) = self.store.discard(path).await {
            warn!(task_id = %task_id, error = %e, "cannot remove partial output");
        }
    }
}
