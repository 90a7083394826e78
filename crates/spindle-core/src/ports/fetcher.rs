//! MediaFetcher port - メディア取得の抽象化
//!
//! 実体（yt-dlp など）はブラックボックスとして扱う。遅く、失敗し得る。
//!
//! # 実装
//! - **YtDlpFetcher**: yt-dlp を子プロセスとして実行（本番用）
//! - **SimulatedFetcher**: ダミーデータを書き出す（デモ・テスト用）

use std::path::PathBuf;

use async_trait::async_trait;

use crate::domain::{FetchError, FormatKey, FormatSpec, MediaInfo};

/// Receives byte-level progress of one acquisition.
///
/// Implementations must be cheap and must not block: they are called from
/// inside the transfer loop.
pub trait ProgressSink: Send + Sync {
    fn report(&self, transferred: u64, total: Option<u64>);
}

/// Sink that drops every report.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _transferred: u64, _total: Option<u64>) {}
}

/// One acquisition order.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub format: FormatKey,
    pub spec: FormatSpec,
    /// Where the output must end up. The parent directory exists.
    pub output_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedFile {
    pub path: PathBuf,
    pub bytes: u64,
}

#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Resolve title / id / duration for `url`.
    async fn resolve(&self, url: &str) -> Result<MediaInfo, FetchError>;

    /// Materialize one format at `request.output_path`.
    ///
    /// Fetchers that cannot report incremental progress simply never call
    /// `progress`.
    async fn fetch(
        &self,
        request: &FetchRequest,
        progress: &dyn ProgressSink,
    ) -> Result<FetchedFile, FetchError>;
}
