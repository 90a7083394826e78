//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてアプリケーションロジックを実装します。
//!
//! # 主要コンポーネント
//! - **AppBuilder**: アプリケーションの構築とワイヤリング
//! - **Orchestrator**: 外部に公開する操作（submit / get_status / get_file_handle）
//! - **ConversionPipeline**: タスク 1 件の状態機械（resolve → format ごとの acquire）
//! - **TaskRegistry**: task_id → TaskRecord の共有マップ
//! - **retry**: RetryPolicy に従うリトライループ
//! - **CleanupScheduler**: 期限切れファイル・タスクの定期回収

pub mod builder;
pub mod cleanup;
pub mod orchestrator;
pub mod pipeline;
pub mod registry;
pub mod retry;

// 主要な型を再エクスポート
pub use self::builder::{App, AppBuilder, BuildError};
pub use self::cleanup::{CleanupHandle, CleanupScheduler, SweepReport};
pub use self::orchestrator::Orchestrator;
pub use self::pipeline::{ConversionPipeline, PipelineSettings};
pub use self::registry::{RecordHandle, TaskRegistry};
