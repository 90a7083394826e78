//! AppBuilder - アプリケーションの構築とワイヤリング
//!
//! # Fail-fast 設計
//! - build() 時に設定を検証（ConfigError）
//! - MediaFetcher が未設定なら BuildError::MissingFetcher
//! - tokio runtime が無ければ BuildError::NoRuntime
//! - 出力ディレクトリが作れなければ BuildError::Store
//!
//! clock / store は省略可能（SystemClock / LocalFileStore が使われる）。

use std::sync::Arc;

use tokio::runtime::Handle;

use crate::app::cleanup::{CleanupHandle, CleanupScheduler};
use crate::app::orchestrator::Orchestrator;
use crate::app::pipeline::ConversionPipeline;
use crate::app::registry::TaskRegistry;
use crate::config::{ConfigError, SpindleConfig};
use crate::domain::StoreError;
use crate::impls::LocalFileStore;
use crate::ports::{Clock, FileStore, MediaFetcher, SystemClock, UlidGenerator};

/// AppBuilder はアプリケーションを構築
///
/// # 使用例
/// ```ignore
/// let app = AppBuilder::new(config)
///     .fetcher(YtDlpFetcher::from_config(&config.fetcher))
///     .build()
///     .await?;
/// let cleanup = app.start_cleanup();
/// let id = app.orchestrator.submit(url, ["mp3_256"])?;
/// ```
pub struct AppBuilder {
    config: SpindleConfig,
    fetcher: Option<Arc<dyn MediaFetcher>>,
    clock: Option<Arc<dyn Clock>>,
    store: Option<Arc<dyn FileStore>>,
    runtime: Option<Handle>,
}

/// BuildError はアプリケーション構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("No media fetcher configured. Call .fetcher(...) before build().")]
    MissingFetcher,

    #[error("No tokio runtime available. Build inside a runtime or pass one with .runtime(...).")]
    NoRuntime,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Cannot open output directory: {0}")]
    Store(#[from] StoreError),
}

impl AppBuilder {
    pub fn new(config: SpindleConfig) -> Self {
        Self {
            config,
            fetcher: None,
            clock: None,
            store: None,
            runtime: None,
        }
    }

    pub fn fetcher(mut self, fetcher: impl MediaFetcher + 'static) -> Self {
        self.fetcher = Some(Arc::new(fetcher));
        self
    }

    /// Share a fetcher the caller keeps a handle to.
    pub fn shared_fetcher(mut self, fetcher: Arc<dyn MediaFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn store(mut self, store: Arc<dyn FileStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Runtime that pipelines and the cleanup loop are spawned on.
    /// Defaults to the runtime `build()` is awaited in.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub async fn build(self) -> Result<App, BuildError> {
        self.config.validate()?;
        let fetcher = self.fetcher.ok_or(BuildError::MissingFetcher)?;
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|_| BuildError::NoRuntime)?,
        };
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);
        let store: Arc<dyn FileStore> = match self.store {
            Some(store) => store,
            None => Arc::new(
                LocalFileStore::open(&self.config.storage.output_dir, clock.clone()).await?,
            ),
        };

        let registry = Arc::new(TaskRegistry::new());
        let pipeline = Arc::new(ConversionPipeline::new(
            registry.clone(),
            fetcher,
            store.clone(),
            self.config.pipeline_settings(),
        ));
        let orchestrator = Arc::new(Orchestrator::new(
            registry.clone(),
            pipeline,
            store.clone(),
            Arc::new(UlidGenerator::new(clock.clone())),
            clock.clone(),
            self.config.default_formats(),
            runtime.clone(),
        ));
        let cleanup = Arc::new(CleanupScheduler::new(
            registry,
            store,
            clock,
            self.config.retention(),
            self.config.sweep_interval(),
        ));

        Ok(App {
            orchestrator,
            cleanup,
            runtime,
        })
    }
}

/// App はワイヤリング済みのアプリケーション
pub struct App {
    pub orchestrator: Arc<Orchestrator>,
    pub cleanup: Arc<CleanupScheduler>,
    runtime: Handle,
}

impl App {
    /// Start the periodic sweep on the app's runtime.
    pub fn start_cleanup(&self) -> CleanupHandle {
        Arc::clone(&self.cleanup).spawn(&self.runtime)
    }
}
