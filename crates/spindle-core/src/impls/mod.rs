//! Impls - ports の具体的な実装
//!
//! - **LocalFileStore**: ローカルディレクトリ
//! - **YtDlpFetcher**: yt-dlp 子プロセス（本番用）
//! - **SimulatedFetcher**: ダミー出力（デモ・テスト用）

pub mod local_store;
pub mod simulated;
pub mod ytdlp;

pub use self::local_store::LocalFileStore;
pub use self::simulated::SimulatedFetcher;
pub use self::ytdlp::YtDlpFetcher;
