//! CleanupScheduler - 期限切れファイルとタスクの回収
//!
//! # フロー（1 回の sweep）
//! 1. FileStore::sweep_expired(retention) でファイルを削除
//! 2. TaskRegistry::remove_expired(now, retention) でレコードを削除
//!
//! 実行中のタスクも区別せずに消す。pipeline 側は次の publish で
//! レコードが無いことに気付いて黙って止まる。

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::app::registry::TaskRegistry;
use crate::ports::{Clock, FileStore, StoreSweep};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub files_removed: usize,
    pub files_failed: usize,
    pub tasks_removed: usize,
}

pub struct CleanupScheduler {
    registry: Arc<TaskRegistry>,
    store: Arc<dyn FileStore>,
    clock: Arc<dyn Clock>,
    retention: chrono::Duration,
    period: Duration,
}

impl CleanupScheduler {
    pub fn new(
        registry: Arc<TaskRegistry>,
        store: Arc<dyn FileStore>,
        clock: Arc<dyn Clock>,
        retention: chrono::Duration,
        period: Duration,
    ) -> Self {
        Self {
            registry,
            store,
            clock,
            retention,
            period,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// One sweep of files and task records. A store failure is logged and
    /// does not keep task records from expiring.
    pub async fn sweep_once(&self) -> SweepReport {
        let files = match self.store.sweep_expired(self.retention).await {
            Ok(sweep) => sweep,
            Err(e) => {
                warn!(error = %e, "file sweep failed");
                StoreSweep::default()
            }
        };
        let tasks = self.registry.remove_expired(self.clock.now(), self.retention);
        for id in &tasks {
            debug!(task_id = %id, "expired task removed");
        }

        let report = SweepReport {
            files_removed: files.removed,
            files_failed: files.failed,
            tasks_removed: tasks.len(),
        };
        if report != SweepReport::default() {
            info!(
                files_removed = report.files_removed,
                files_failed = report.files_failed,
                tasks_removed = report.tasks_removed,
                "cleanup sweep"
            );
        }
        report
    }

    /// Run `sweep_once` every `period`, first one after one period.
    pub fn spawn(self: Arc<Self>, runtime: &Handle) -> CleanupHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        // interval() rejects a zero period
        let period = self.period.max(Duration::from_millis(1));
        let join = runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                if *shutdown_rx.borrow() {
                    break;
                }
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        // sender dropped
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        self.sweep_once().await;
                    }
                }
            }
            debug!("cleanup loop stopped");
        });
        CleanupHandle { shutdown_tx, join }
    }
}

/// Handle to the periodic sweep.
/// - dropping it stops the loop
/// - `shutdown_and_join()` waits for a sweep in progress to finish
pub struct CleanupHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl CleanupHandle {
    pub fn request_shutdown(&self) {
        // receiver may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        if let Err(e) = self.join.await {
            warn!(error = %e, "cleanup loop ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::orchestrator::Orchestrator;
    use crate::app::pipeline::{ConversionPipeline, PipelineSettings};
    use crate::domain::{FormatKey, SpindleError, TaskState};
    use crate::impls::{LocalFileStore, SimulatedFetcher};
    use crate::domain::{StoreError, TaskId};
    use crate::ports::{FixedClock, StoredFile, UlidGenerator};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::path::{Path, PathBuf};
    use tracing_test::traced_test;

    /// Store whose sweep always panics.
    struct PanickingStore;

    #[async_trait]
    impl FileStore for PanickingStore {
        async fn prepare(
            &self,
            _task_id: TaskId,
            _format: &FormatKey,
            _stem: &str,
            _extension: &str,
        ) -> Result<PathBuf, StoreError> {
            unimplemented!()
        }

        async fn commit(
            &self,
            _task_id: TaskId,
            _format: &FormatKey,
            _path: &Path,
        ) -> Result<StoredFile, StoreError> {
            unimplemented!()
        }

        async fn resolve(&self, _task_id: TaskId, _format: &FormatKey) -> Option<PathBuf> {
            None
        }

        async fn discard(&self, _path: &Path) -> Result<(), StoreError> {
            Ok(())
        }

        async fn sweep_expired(
            &self,
            _retention: chrono::Duration,
        ) -> Result<StoreSweep, StoreError> {
            panic!("sweep exploded");
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        clock: Arc<FixedClock>,
        orchestrator: Orchestrator,
        scheduler: Arc<CleanupScheduler>,
    }

    async fn fixture(period: Duration) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let store: Arc<dyn FileStore> = Arc::new(
            LocalFileStore::open(dir.path().join("out"), clock.clone())
                .await
                .unwrap(),
        );
        let registry = Arc::new(TaskRegistry::new());
        let pipeline = Arc::new(ConversionPipeline::new(
            registry.clone(),
            Arc::new(SimulatedFetcher::new()),
            store.clone(),
            PipelineSettings::default(),
        ));
        let orchestrator = Orchestrator::new(
            registry.clone(),
            pipeline,
            store.clone(),
            Arc::new(UlidGenerator::new(clock.clone())),
            clock.clone(),
            vec![FormatKey::new("mp3_256")],
            Handle::current(),
        );
        let scheduler = Arc::new(CleanupScheduler::new(
            registry,
            store,
            clock.clone(),
            chrono::Duration::hours(2),
            period,
        ));
        Fixture {
            _dir: dir,
            clock,
            orchestrator,
            scheduler,
        }
    }

    async fn completed_task(f: &Fixture) -> (String, std::path::PathBuf) {
        let id = f
            .orchestrator
            .submit("https://example.test/v1", ["mp3_128"])
            .unwrap();
        let view = f
            .orchestrator
            .wait_for_terminal(id, Duration::from_millis(5), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(view.status, TaskState::Completed);
        let id = id.to_string();
        let path = f
            .orchestrator
            .get_file_handle(&id, "mp3_128")
            .await
            .unwrap()
            .path;
        (id, path)
    }

    #[tokio::test]
    async fn sweep_before_retention_keeps_everything() {
        let f = fixture(Duration::from_secs(3600)).await;
        let (id, path) = completed_task(&f).await;
        f.clock.advance(chrono::Duration::minutes(119));

        let report = f.scheduler.sweep_once().await;

        assert_eq!(report, SweepReport::default());
        assert!(path.exists());
        assert!(f.orchestrator.get_status(&id).is_ok());
    }

    #[tokio::test]
    async fn expired_file_and_task_are_removed_by_one_sweep() {
        let f = fixture(Duration::from_secs(3600)).await;
        let (id, path) = completed_task(&f).await;
        f.clock.advance(chrono::Duration::hours(2) + chrono::Duration::seconds(1));

        let report = f.scheduler.sweep_once().await;

        assert_eq!(report.files_removed, 1);
        assert_eq!(report.tasks_removed, 1);
        assert!(!path.exists());
        assert!(matches!(
            f.orchestrator.get_status(&id),
            Err(SpindleError::NotFound(_))
        ));
        assert!(matches!(
            f.orchestrator.get_file_handle(&id, "mp3_128").await,
            Err(SpindleError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn spawned_loop_sweeps_and_stops() {
        let f = fixture(Duration::from_millis(10)).await;
        let (id, path) = completed_task(&f).await;
        f.clock.advance(chrono::Duration::hours(3));

        let handle = f.scheduler.clone().spawn(&Handle::current());
        let deadline = Instant::now() + Duration::from_secs(5);
        while f.orchestrator.get_status(&id).is_ok() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        handle.shutdown_and_join().await;

        assert!(f.orchestrator.get_status(&id).is_err());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn dropping_the_handle_stops_the_loop() {
        let f = fixture(Duration::from_millis(5)).await;
        let handle = f.scheduler.clone().spawn(&Handle::current());
        let join = {
            let CleanupHandle { shutdown_tx, join } = handle;
            drop(shutdown_tx);
            join
        };
        tokio::time::timeout(Duration::from_secs(5), join)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    #[traced_test]
    async fn crashed_loop_is_reported_on_join() {
        let scheduler = Arc::new(CleanupScheduler::new(
            Arc::new(TaskRegistry::new()),
            Arc::new(PanickingStore),
            Arc::new(FixedClock::new(Utc::now())),
            chrono::Duration::hours(2),
            Duration::from_millis(1),
        ));
        let handle = scheduler.spawn(&Handle::current());
        let deadline = Instant::now() + Duration::from_secs(5);
        while !handle.join.is_finished() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        handle.shutdown_and_join().await;

        assert!(logs_contain("cleanup loop ended abnormally"));
    }
}
