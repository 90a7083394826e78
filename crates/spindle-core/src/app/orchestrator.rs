//! Orchestrator - 外部（HTTP 層など）に公開する操作
//!
//! - submit: 入力検証 → TaskRecord 作成 → pipeline を spawn → すぐ返す
//! - get_status: TaskView（コピー）を返す
//! - get_file_handle: 成功した format のファイル参照を返す
//! - video_info: タスクを作らずにメタデータだけ取得（プレビュー用）
//! - health: 状態ごとのタスク数
//!
//! `submit` and `get_status` never await; they only take short registry locks.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::{info, warn};

use crate::app::pipeline::ConversionPipeline;
use crate::app::registry::TaskRegistry;
use crate::domain::{
    FileReference, FormatKey, MediaInfo, SpindleError, TaskId, TaskRecord, TaskView,
};
use crate::observability::HealthReport;
use crate::ports::{Clock, FileStore, IdGenerator};

pub struct Orchestrator {
    registry: Arc<TaskRegistry>,
    pipeline: Arc<ConversionPipeline>,
    store: Arc<dyn FileStore>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    default_formats: Vec<FormatKey>,
    runtime: Handle,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<TaskRegistry>,
        pipeline: Arc<ConversionPipeline>,
        store: Arc<dyn FileStore>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
        default_formats: Vec<FormatKey>,
        runtime: Handle,
    ) -> Self {
        Self {
            registry,
            pipeline,
            store,
            ids,
            clock,
            default_formats,
            runtime,
        }
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// Trim, reject blanks, drop duplicates keeping the first occurrence.
    /// An empty list means the configured defaults.
    fn normalize_formats<I>(&self, formats: I) -> Result<Vec<FormatKey>, SpindleError>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut keys: Vec<FormatKey> = Vec::new();
        for raw in formats {
            let trimmed = raw.as_ref().trim();
            if trimmed.is_empty() {
                return Err(SpindleError::InvalidInput(
                    "format descriptor must not be blank".to_string(),
                ));
            }
            let key = FormatKey::new(trimmed);
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        if keys.is_empty() {
            keys = self.default_formats.clone();
        }
        if keys.is_empty() {
            return Err(SpindleError::InvalidInput(
                "no formats requested and no defaults configured".to_string(),
            ));
        }
        Ok(keys)
    }

    /// Create a task and start its pipeline in the background.
    pub fn submit<I>(&self, url: &str, formats: I) -> Result<TaskId, SpindleError>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let url = url.trim();
        if url.is_empty() {
            return Err(SpindleError::InvalidInput("url must not be empty".to_string()));
        }
        let formats = self.normalize_formats(formats)?;

        let id = self.ids.generate_task_id(url);
        let record = TaskRecord::new(id, url, formats, self.clock.now());
        let handle = self.registry.insert(record);
        info!(task_id = %id, url, "task submitted");

        let pipeline = Arc::clone(&self.pipeline);
        self.runtime.spawn(async move {
            pipeline.run(handle).await;
        });
        Ok(id)
    }

    /// Resolve metadata for `url` without creating a task. Uses the same
    /// retry budget as a task's resolution stage.
    pub async fn video_info(&self, url: &str) -> Result<MediaInfo, SpindleError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(SpindleError::InvalidInput("url must not be empty".to_string()));
        }
        self.pipeline.resolve(None, url).await.map_err(|e| {
            warn!(stage = "resolve", error = %e, "media info lookup failed");
            SpindleError::Unavailable(e.message().to_string())
        })
    }

    fn parse_id(task_id: &str) -> Result<TaskId, SpindleError> {
        task_id
            .trim()
            .parse()
            .map_err(|_| SpindleError::NotFound(format!("task {task_id}")))
    }

    pub fn get_status(&self, task_id: &str) -> Result<TaskView, SpindleError> {
        let id = Self::parse_id(task_id)?;
        self.status(id)
    }

    pub fn status(&self, id: TaskId) -> Result<TaskView, SpindleError> {
        self.registry
            .snapshot(id)
            .ok_or_else(|| SpindleError::NotFound(format!("task {id}")))
    }

    /// File reference for a successfully produced format. `NotFound` also
    /// covers a file that has already been swept from disk.
    pub async fn get_file_handle(
        &self,
        task_id: &str,
        format: &str,
    ) -> Result<FileReference, SpindleError> {
        let id = Self::parse_id(task_id)?;
        let format = FormatKey::new(format.trim());
        let not_found = || SpindleError::NotFound(format!("file {format} of task {id}"));

        let mut reference = self
            .registry
            .file_reference(id, &format)
            .ok_or_else(not_found)?;
        let path = self.store.resolve(id, &format).await.ok_or_else(not_found)?;
        reference.path = path;
        Ok(reference)
    }

    pub fn health(&self) -> HealthReport {
        HealthReport::new(self.registry.counts(), self.clock.now())
    }

    /// Poll until the task is terminal or `timeout` passes; returns the last
    /// view either way.
    pub async fn wait_for_terminal(
        &self,
        id: TaskId,
        interval: Duration,
        timeout: Duration,
    ) -> Result<TaskView, SpindleError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let view = self.status(id)?;
            if view.status.is_terminal() || tokio::time::Instant::now() >= deadline {
                return Ok(view);
            }
            tokio::time::sleep(interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::pipeline::PipelineSettings;
    use crate::domain::{FetchError, RetryPolicy, TaskState};
    use crate::impls::{LocalFileStore, SimulatedFetcher};
    use crate::ports::{SystemClock, UlidGenerator};
    use std::collections::HashSet;

    const POLL: Duration = Duration::from_millis(5);
    const WAIT: Duration = Duration::from_secs(10);

    struct Fixture {
        _dir: tempfile::TempDir,
        fetcher: Arc<SimulatedFetcher>,
        orchestrator: Orchestrator,
    }

    async fn fixture(fetcher: SimulatedFetcher) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store: Arc<dyn FileStore> = Arc::new(
            LocalFileStore::open(dir.path().join("out"), clock.clone())
                .await
                .unwrap(),
        );
        let registry = Arc::new(TaskRegistry::new());
        let fast = RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(2),
            multiplier: 2.0,
            max_delay: Duration::from_millis(4),
            attempt_timeout: Duration::from_secs(5),
        };
        let fetcher = Arc::new(fetcher);
        let pipeline = Arc::new(ConversionPipeline::new(
            registry.clone(),
            fetcher.clone(),
            store.clone(),
            PipelineSettings {
                resolve_policy: fast.clone(),
                acquire_policy: fast,
                ..PipelineSettings::default()
            },
        ));
        let orchestrator = Orchestrator::new(
            registry,
            pipeline,
            store,
            Arc::new(UlidGenerator::new(clock.clone())),
            clock,
            vec![FormatKey::new("mp3_256")],
            Handle::current(),
        );
        Fixture {
            _dir: dir,
            fetcher,
            orchestrator,
        }
    }

    impl Fixture {
        async fn finished(&self, id: TaskId) -> TaskView {
            let view = self.orchestrator.wait_for_terminal(id, POLL, WAIT).await.unwrap();
            assert!(view.status.is_terminal(), "still {:?}", view.status);
            view
        }
    }

    #[tokio::test]
    async fn submit_returns_pending_task_immediately() {
        let fetcher = SimulatedFetcher::new().with_chunk_delay(Duration::from_millis(5));
        let f = fixture(fetcher).await;

        let id = f.orchestrator.submit("https://example.test/v1", ["mp3_128"]).unwrap();
        let view = f.orchestrator.get_status(&id.to_string()).unwrap();

        assert_eq!(view.task_id, id);
        assert!(!view.status.is_terminal());
        assert_eq!(view.requested_formats, vec![FormatKey::new("mp3_128")]);
    }

    #[tokio::test]
    async fn single_format_scenario_completes() {
        let f = fixture(SimulatedFetcher::new()).await;
        let id = f.orchestrator.submit("https://example.test/v1", ["mp3_128"]).unwrap();

        let view = f.finished(id).await;

        assert_eq!(view.status, TaskState::Completed);
        assert_eq!(view.progress, 100);
        let files = view.files.unwrap();
        assert!(files[&FormatKey::new("mp3_128")].size > 0);
        assert_eq!(
            files[&FormatKey::new("mp3_128")].download_url,
            format!("/api/download/{id}/mp3_128")
        );
    }

    #[tokio::test]
    async fn partial_failure_scenario() {
        let fetcher = SimulatedFetcher::new()
            .always_fail_format("mp4_720", FetchError::permanent("format not available"));
        let f = fixture(fetcher).await;
        let id = f
            .orchestrator
            .submit("https://example.test/v1", ["mp3_128", "mp4_720"])
            .unwrap();

        let view = f.finished(id).await;

        assert_eq!(view.status, TaskState::PartiallyCompleted);
        let files = view.files.unwrap();
        assert_eq!(files.keys().collect::<Vec<_>>(), vec![&FormatKey::new("mp3_128")]);
        assert_eq!(view.failures.len(), 1);
        assert_eq!(view.failures[0].format, FormatKey::new("mp4_720"));

        let id = id.to_string();
        assert!(f.orchestrator.get_file_handle(&id, "mp3_128").await.is_ok());
        assert!(matches!(
            f.orchestrator.get_file_handle(&id, "mp4_720").await,
            Err(SpindleError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn empty_url_is_rejected_before_any_task_exists() {
        let f = fixture(SimulatedFetcher::new()).await;
        let before = f.orchestrator.registry().len();

        for url in ["", "   "] {
            let err = f.orchestrator.submit(url, ["mp3_128"]).unwrap_err();
            assert!(matches!(err, SpindleError::InvalidInput(_)));
        }
        assert_eq!(f.orchestrator.registry().len(), before);
    }

    #[tokio::test]
    async fn blank_format_is_rejected() {
        let f = fixture(SimulatedFetcher::new()).await;
        let err = f
            .orchestrator
            .submit("https://example.test/v1", ["mp3_128", " "])
            .unwrap_err();
        assert!(matches!(err, SpindleError::InvalidInput(_)));
        assert!(f.orchestrator.registry().is_empty());
    }

    #[tokio::test]
    async fn missing_formats_fall_back_to_defaults() {
        let f = fixture(SimulatedFetcher::new()).await;
        let id = f
            .orchestrator
            .submit("https://example.test/v1", Vec::<String>::new())
            .unwrap();

        let view = f.finished(id).await;
        assert_eq!(view.requested_formats, vec![FormatKey::new("mp3_256")]);
        assert_eq!(view.status, TaskState::Completed);
    }

    #[tokio::test]
    async fn duplicate_formats_are_collapsed() {
        let f = fixture(SimulatedFetcher::new()).await;
        let id = f
            .orchestrator
            .submit("https://example.test/v1", ["mp3_128", " mp3_128", "mp4_360"])
            .unwrap();

        let view = f.finished(id).await;
        assert_eq!(
            view.requested_formats,
            vec![FormatKey::new("mp3_128"), FormatKey::new("mp4_360")]
        );
        assert_eq!(view.status, TaskState::Completed);
    }

    #[tokio::test]
    async fn same_url_submitted_concurrently_gets_distinct_tasks_and_paths() {
        let f = fixture(SimulatedFetcher::new()).await;
        let ids: Vec<TaskId> = (0..4)
            .map(|_| f.orchestrator.submit("https://example.test/v1", ["mp3_128"]).unwrap())
            .collect();
        assert_eq!(ids.iter().collect::<HashSet<_>>().len(), ids.len());

        let mut paths = HashSet::new();
        for id in &ids {
            assert_eq!(f.finished(*id).await.status, TaskState::Completed);
            let reference = f
                .orchestrator
                .get_file_handle(&id.to_string(), "mp3_128")
                .await
                .unwrap();
            paths.insert(reference.path);
        }
        assert_eq!(paths.len(), ids.len());
    }

    #[tokio::test]
    async fn unknown_or_malformed_ids_are_not_found() {
        let f = fixture(SimulatedFetcher::new()).await;
        let unknown = TaskId::from_ulid(ulid::Ulid::new()).to_string();

        for id in [unknown.as_str(), "not-a-task", ""] {
            assert!(matches!(
                f.orchestrator.get_status(id),
                Err(SpindleError::NotFound(_))
            ));
            assert!(matches!(
                f.orchestrator.get_file_handle(id, "mp3_128").await,
                Err(SpindleError::NotFound(_))
            ));
        }
    }

    #[tokio::test]
    async fn unrequested_format_is_not_found() {
        let f = fixture(SimulatedFetcher::new()).await;
        let id = f.orchestrator.submit("https://example.test/v1", ["mp3_128"]).unwrap();
        f.finished(id).await;

        let err = f
            .orchestrator
            .get_file_handle(&id.to_string(), "mp3_320")
            .await
            .unwrap_err();
        assert!(matches!(err, SpindleError::NotFound(_)));
    }

    #[tokio::test]
    async fn file_removed_from_disk_is_not_found() {
        let f = fixture(SimulatedFetcher::new()).await;
        let id = f.orchestrator.submit("https://example.test/v1", ["mp3_128"]).unwrap();
        f.finished(id).await;

        let reference = f
            .orchestrator
            .get_file_handle(&id.to_string(), "mp3_128")
            .await
            .unwrap();
        assert_eq!(reference.content_type, "audio/mpeg");
        assert_eq!(reference.mime_category, "audio");
        tokio::fs::remove_file(&reference.path).await.unwrap();

        assert!(matches!(
            f.orchestrator.get_file_handle(&id.to_string(), "mp3_128").await,
            Err(SpindleError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn video_info_resolves_without_creating_a_task() {
        let f = fixture(SimulatedFetcher::new()).await;

        let info = f.orchestrator.video_info(" https://example.test/v1 ").await.unwrap();

        assert_eq!(info.id, "v1");
        assert_eq!(info.duration_string.as_deref(), Some("3:30"));
        assert_eq!(info.upload_date.as_deref(), Some("20240101"));
        assert!(info.view_count.is_some());
        assert!(f.orchestrator.registry().is_empty());
        assert_eq!(f.orchestrator.health().tasks.total(), 0);
    }

    #[tokio::test]
    async fn video_info_rejects_blank_url() {
        let f = fixture(SimulatedFetcher::new()).await;
        assert!(matches!(
            f.orchestrator.video_info("   ").await,
            Err(SpindleError::InvalidInput(_))
        ));
        assert_eq!(f.fetcher.resolve_calls(), 0);
    }

    #[tokio::test]
    async fn video_info_retries_transient_errors() {
        let fetcher = SimulatedFetcher::new().fail_resolve(FetchError::transient("timed out"));
        let f = fixture(fetcher).await;

        assert!(f.orchestrator.video_info("https://example.test/v1").await.is_ok());
        assert_eq!(f.fetcher.resolve_calls(), 2);
    }

    #[tokio::test]
    async fn video_info_reports_permanent_failure() {
        let fetcher = SimulatedFetcher::new().fail_resolve(FetchError::permanent("unsupported url"));
        let f = fixture(fetcher).await;

        let err = f.orchestrator.video_info("https://example.test/v1").await.unwrap_err();

        assert_eq!(err, SpindleError::Unavailable("unsupported url".to_string()));
        assert_eq!(f.fetcher.resolve_calls(), 1);
        assert!(f.orchestrator.registry().is_empty());
    }

    #[tokio::test]
    async fn resolution_failure_is_reported_in_status() {
        let fetcher = SimulatedFetcher::new().fail_resolve(FetchError::permanent("unsupported url"));
        let f = fixture(fetcher).await;
        let id = f.orchestrator.submit("https://example.test/v1", ["mp3_128"]).unwrap();

        let view = f.finished(id).await;
        assert_eq!(view.status, TaskState::Failed);
        assert_eq!(view.error.as_deref(), Some("unsupported url"));
        assert!(view.files.is_none());
    }

    #[tokio::test]
    async fn terminal_state_never_changes() {
        let f = fixture(SimulatedFetcher::new()).await;
        let id = f.orchestrator.submit("https://example.test/v1", ["mp3_128"]).unwrap();
        let first = f.finished(id).await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        let later = f.orchestrator.status(id).unwrap();
        assert_eq!(first.status, later.status);
        assert_eq!(first.progress, later.progress);
    }

    #[tokio::test]
    async fn health_counts_active_tasks() {
        let fetcher = SimulatedFetcher::new()
            .with_output(16, 50)
            .with_chunk_delay(Duration::from_millis(10));
        let f = fixture(fetcher).await;
        f.orchestrator.submit("https://example.test/a", ["mp3_128"]).unwrap();
        f.orchestrator.submit("https://example.test/b", ["mp3_128"]).unwrap();

        let health = f.orchestrator.health();
        assert_eq!(health.status, "healthy");
        assert_eq!(health.active_tasks, 2);
        assert_eq!(health.tasks.total(), 2);
    }
}
