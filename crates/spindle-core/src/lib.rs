//! spindle-core
//!
//! Asynchronous media conversion orchestrator: accepts a media URL, resolves
//! its metadata, produces one output file per requested format in the
//! background, and keeps task state and files for a bounded retention window.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, format, state, task, view, retry, errors）
//! - **ports**: 抽象化レイヤー（Clock, IdGenerator, MediaFetcher, FileStore）
//! - **app**: アプリケーションロジック（registry, retry, pipeline, orchestrator, cleanup, builder）
//! - **impls**: 実装（LocalFileStore, YtDlpFetcher, SimulatedFetcher）
//! - **config**: TOML 設定
//! - **observability**: タスク数・health

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;

pub use app::{App, AppBuilder, BuildError, Orchestrator};
pub use config::{ConfigError, SpindleConfig};
pub use domain::{SpindleError, TaskId, TaskState, TaskView};
