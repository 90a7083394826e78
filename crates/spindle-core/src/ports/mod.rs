//! Ports - 抽象化レイヤー
//!
//! 外部のもの（時刻、ID、メディア取得、ファイルシステム）への
//! インターフェースを trait として定義し、実装の詳細を隠蔽します。
//! 実装は `impls` に置きます。

pub mod clock;
pub mod fetcher;
pub mod file_store;
pub mod id_generator;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::fetcher::{FetchRequest, FetchedFile, MediaFetcher, NoProgress, ProgressSink};
pub use self::file_store::{FileStore, StoreSweep, StoredFile};
pub use self::id_generator::{IdGenerator, UlidGenerator};
