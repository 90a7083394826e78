//! SimulatedFetcher - ダミーデータを書き出す MediaFetcher（デモ・テスト用）
//!
//! - タイトルは URL の最後のセグメントから作る
//! - 出力はチャンクごとに書き出し、進捗を報告する
//! - resolve / format ごとに失敗をスクリプトできる

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::domain::{FetchError, FormatKey, MediaInfo, duration_label};
use crate::ports::{FetchRequest, FetchedFile, MediaFetcher, ProgressSink};

#[derive(Default)]
struct Script {
    /// Errors returned by the next resolve calls, in order.
    resolve: VecDeque<FetchError>,
    /// Errors returned by the next fetch calls for a format, in order.
    fetch: HashMap<FormatKey, VecDeque<FetchError>>,
    /// Formats that always fail.
    always: HashMap<FormatKey, FetchError>,
}

pub struct SimulatedFetcher {
    chunk_size: usize,
    chunks: usize,
    chunk_delay: Duration,
    duration_secs: u64,
    script: Mutex<Script>,
    resolve_calls: AtomicU32,
    fetch_calls: Mutex<HashMap<FormatKey, u32>>,
}

impl Default for SimulatedFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedFetcher {
    pub fn new() -> Self {
        Self {
            chunk_size: 4096,
            chunks: 8,
            chunk_delay: Duration::ZERO,
            duration_secs: 210,
            script: Mutex::new(Script::default()),
            resolve_calls: AtomicU32::new(0),
            fetch_calls: Mutex::new(HashMap::new()),
        }
    }

    /// Output size is `chunk_size * chunks` bytes.
    pub fn with_output(mut self, chunk_size: usize, chunks: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self.chunks = chunks.max(1);
        self
    }

    /// Pause between chunks, to make progress observable.
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    /// The next resolve call fails with `error`.
    pub fn fail_resolve(self, error: FetchError) -> Self {
        self.script().resolve.push_back(error);
        self
    }

    /// The next `times` fetches of `format` fail with `error`.
    pub fn fail_format(self, format: &str, error: FetchError, times: usize) -> Self {
        self.script()
            .fetch
            .entry(FormatKey::new(format))
            .or_default()
            .extend(std::iter::repeat_n(error, times));
        self
    }

    /// Every fetch of `format` fails with `error`.
    pub fn always_fail_format(self, format: &str, error: FetchError) -> Self {
        self.script().always.insert(FormatKey::new(format), error);
        self
    }

    pub fn resolve_calls(&self) -> u32 {
        self.resolve_calls.load(Ordering::Relaxed)
    }

    pub fn fetch_calls(&self, format: &str) -> u32 {
        self.fetch_calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&FormatKey::new(format))
            .copied()
            .unwrap_or(0)
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn scripted_fetch_error(&self, format: &FormatKey) -> Option<FetchError> {
        let mut script = self.script();
        if let Some(e) = script.always.get(format) {
            return Some(e.clone());
        }
        script.fetch.get_mut(format).and_then(|q| q.pop_front())
    }

    fn media_id(url: &str) -> String {
        let last = url
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default();
        let id: String = last
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .take(11)
            .collect();
        if id.is_empty() { "demo".to_string() } else { id }
    }
}

#[async_trait]
impl MediaFetcher for SimulatedFetcher {
    async fn resolve(&self, url: &str) -> Result<MediaInfo, FetchError> {
        self.resolve_calls.fetch_add(1, Ordering::Relaxed);
        if let Some(e) = self.script().resolve.pop_front() {
            return Err(e);
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(FetchError::permanent(format!("unsupported url: {url}")));
        }

        let id = Self::media_id(url);
        Ok(MediaInfo {
            title: format!("Demo {id}"),
            id,
            duration_secs: Some(self.duration_secs),
            duration_string: Some(duration_label(self.duration_secs)),
            uploader: Some("Demo channel".to_string()),
            thumbnail: None,
            view_count: Some(1_000_000),
            upload_date: Some("20240101".to_string()),
        })
    }

    async fn fetch(
        &self,
        request: &FetchRequest,
        progress: &dyn ProgressSink,
    ) -> Result<FetchedFile, FetchError> {
        *self
            .fetch_calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(request.format.clone())
            .or_default() += 1;

        if let Some(e) = self.scripted_fetch_error(&request.format) {
            return Err(e);
        }

        let total = (self.chunk_size * self.chunks) as u64;
        let mut file = tokio::fs::File::create(&request.output_path)
            .await
            .map_err(|e| FetchError::transient(format!("create output: {e}")))?;

        let chunk = vec![b'\0'; self.chunk_size];
        let mut written = 0u64;
        for _ in 0..self.chunks {
            if !self.chunk_delay.is_zero() {
                tokio::time::sleep(self.chunk_delay).await;
            }
            file.write_all(&chunk)
                .await
                .map_err(|e| FetchError::transient(format!("write output: {e}")))?;
            written += chunk.len() as u64;
            progress.report(written, Some(total));
        }
        file.flush()
            .await
            .map_err(|e| FetchError::transient(format!("flush output: {e}")))?;

        Ok(FetchedFile {
            path: request.output_path.clone(),
            bytes: written,
        })
    }
}
