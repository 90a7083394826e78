//! YtDlpFetcher - yt-dlp を子プロセスとして実行する MediaFetcher
//!
//! - resolve: `yt-dlp --dump-single-json`
//! - fetch (audio): `-x --audio-format mp3 --audio-quality <q>K`
//! - fetch (video): `bestvideo[height<=H]+bestaudio/best[height<=H]` + mp4 merge
//! - 進捗は `--progress-template` で 1 行ずつ stdout に出させて読む
//! - 失敗の分類は stderr の内容で行う（ネットワーク系のみ Transient）
//!
//! Child processes are started with `kill_on_drop`, so an attempt that
//! times out in the retry loop does not leave yt-dlp running.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::debug;

use crate::config::FetcherSection;
use crate::domain::{ErrorKind, FetchError, MediaInfo, MediaKind, duration_label};
use crate::ports::{FetchRequest, FetchedFile, MediaFetcher, ProgressSink};

const PROGRESS_TAG: &str = "spindle-progress";

/// stderr fragments that indicate a failure worth retrying.
const TRANSIENT_MARKERS: &[&str] = &[
    "timed out",
    "timeout",
    "connection reset",
    "connection refused",
    "connection aborted",
    "temporary failure in name resolution",
    "network is unreachable",
    "remote end closed connection",
    "http error 429",
    "http error 500",
    "http error 502",
    "http error 503",
    "http error 504",
    "incompleteread",
    "unable to download webpage",
];

#[derive(Debug, Clone)]
pub struct YtDlpFetcher {
    binary: PathBuf,
    socket_timeout_secs: u64,
    user_agent: Option<String>,
    no_check_certificates: bool,
}

#[derive(Debug, Deserialize)]
struct InfoJson {
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    duration_string: Option<String>,
    #[serde(default)]
    uploader: Option<String>,
    #[serde(default)]
    thumbnail: Option<String>,
    #[serde(default)]
    view_count: Option<u64>,
    #[serde(default)]
    upload_date: Option<String>,
}

impl From<InfoJson> for MediaInfo {
    fn from(info: InfoJson) -> Self {
        let duration_secs = info.duration.map(|d| d.max(0.0).round() as u64);
        Self {
            title: info.title.unwrap_or_else(|| info.id.clone()),
            id: info.id,
            duration_string: info.duration_string.or_else(|| duration_secs.map(duration_label)),
            duration_secs,
            uploader: info.uploader,
            thumbnail: info.thumbnail,
            view_count: info.view_count,
            upload_date: info.upload_date,
        }
    }
}

impl YtDlpFetcher {
    pub fn new(binary: impl Into<PathBuf>, socket_timeout_secs: u64) -> Self {
        Self {
            binary: binary.into(),
            socket_timeout_secs,
            user_agent: None,
            no_check_certificates: false,
        }
    }

    pub fn from_config(section: &FetcherSection) -> Self {
        let user_agent = Some(section.user_agent.trim())
            .filter(|ua| !ua.is_empty())
            .map(str::to_string);
        Self {
            user_agent,
            no_check_certificates: section.no_check_certificates,
            ..Self::new(section.binary.clone(), section.socket_timeout_secs)
        }
    }

    /// Arguments shared by every invocation. Browser cookies are never read.
    fn common_args(&self) -> Vec<String> {
        let mut args: Vec<String> = [
            "--no-playlist",
            "--no-warnings",
            "--no-cache-dir",
            "--no-cookies",
            "--no-cookies-from-browser",
            "--socket-timeout",
        ]
        .iter()
        .map(|a| a.to_string())
        .collect();
        args.push(self.socket_timeout_secs.to_string());
        if let Some(ua) = &self.user_agent {
            args.push("--user-agent".to_string());
            args.push(ua.clone());
        }
        if self.no_check_certificates {
            args.push("--no-check-certificates".to_string());
        }
        args
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(self.common_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn spawn_error(&self, e: std::io::Error) -> FetchError {
        if e.kind() == std::io::ErrorKind::NotFound {
            FetchError::permanent(format!("{} not found", self.binary.display()))
        } else {
            FetchError::transient(format!("failed to start {}: {e}", self.binary.display()))
        }
    }

    fn format_args(spec_kind: MediaKind, quality: u32, output: &Path) -> Vec<String> {
        match spec_kind {
            MediaKind::Audio => vec![
                "-f".to_string(),
                "bestaudio/best".to_string(),
                "-x".to_string(),
                "--audio-format".to_string(),
                "mp3".to_string(),
                "--audio-quality".to_string(),
                format!("{quality}K"),
                "-o".to_string(),
                // yt-dlp picks the intermediate extension; extraction renames to .mp3
                output.with_extension("%(ext)s").to_string_lossy().into_owned(),
            ],
            MediaKind::Video => vec![
                "-f".to_string(),
                format!("bestvideo[height<={quality}]+bestaudio/best[height<={quality}]"),
                "--merge-output-format".to_string(),
                "mp4".to_string(),
                "-o".to_string(),
                output.to_string_lossy().into_owned(),
            ],
        }
    }
}

/// Classify a failed run from its stderr.
pub fn classify_stderr(stderr: &str) -> ErrorKind {
    let lower = stderr.to_ascii_lowercase();
    if TRANSIENT_MARKERS.iter().any(|m| lower.contains(m)) {
        ErrorKind::Transient
    } else {
        ErrorKind::Permanent
    }
}

/// Last `ERROR:` line of stderr, or its last non-empty line.
fn summarize_stderr(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    lines
        .iter()
        .rev()
        .find(|l| l.starts_with("ERROR:"))
        .or_else(|| lines.last())
        .map(|l| l.to_string())
        .unwrap_or_else(|| "yt-dlp failed without output".to_string())
}

/// Parse one `--progress-template` line: `<tag> <downloaded> <total|NA>`.
fn parse_progress_line(line: &str) -> Option<(u64, Option<u64>)> {
    let mut parts = line.split_whitespace();
    if parts.next()? != PROGRESS_TAG {
        return None;
    }
    let downloaded = parts.next()?.parse::<f64>().ok()? as u64;
    let total = parts
        .next()
        .and_then(|t| t.parse::<f64>().ok())
        .map(|t| t as u64)
        .filter(|t| *t > 0);
    Some((downloaded, total))
}

#[async_trait]
impl MediaFetcher for YtDlpFetcher {
    async fn resolve(&self, url: &str) -> Result<MediaInfo, FetchError> {
        let output = self
            .command()
            .arg("--dump-single-json")
            .arg("--skip-download")
            .arg("--")
            .arg(url)
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FetchError::new(classify_stderr(&stderr), summarize_stderr(&stderr)));
        }

        let info: InfoJson = serde_json::from_slice(&output.stdout)
            .map_err(|e| FetchError::permanent(format!("unreadable media info: {e}")))?;

        Ok(info.into())
    }

    async fn fetch(
        &self,
        request: &FetchRequest,
        progress: &dyn ProgressSink,
    ) -> Result<FetchedFile, FetchError> {
        let mut child = self
            .command()
            .arg("--newline")
            .arg("--progress-template")
            .arg(format!(
                "download:{PROGRESS_TAG} %(progress.downloaded_bytes)s %(progress.total_bytes)s"
            ))
            .args(Self::format_args(
                request.spec.kind,
                request.spec.quality,
                &request.output_path,
            ))
            .arg("--")
            .arg(&request.url)
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| FetchError::transient("yt-dlp stdout unavailable"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| FetchError::transient("yt-dlp stderr unavailable"))?;

        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| FetchError::transient(format!("reading yt-dlp output: {e}")))?
        {
            if let Some((done, total)) = parse_progress_line(&line) {
                progress.report(done, total);
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| FetchError::transient(format!("waiting for yt-dlp: {e}")))?;
        let stderr = stderr_task.await.unwrap_or_default();

        if !status.success() {
            debug!(format = %request.format, "yt-dlp exited with {status}");
            return Err(FetchError::new(classify_stderr(&stderr), summarize_stderr(&stderr)));
        }

        let meta = tokio::fs::metadata(&request.output_path)
            .await
            .map_err(|_| FetchError::permanent("yt-dlp reported success but produced no output"))?;

        Ok(FetchedFile {
            path: request.output_path.clone(),
            bytes: meta.len(),
        })
    }
}
