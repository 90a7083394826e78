//! spindle - 変換タスクを 1 件投入して終端状態までポーリングする CLI
//!
//! HTTP 層の代わりに Orchestrator の公開操作だけを呼ぶ。

use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use spindle_core::impls::{SimulatedFetcher, YtDlpFetcher};
use spindle_core::ports::MediaFetcher;
use spindle_core::{App, AppBuilder, SpindleConfig, TaskState, TaskView};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Media conversion task runner", long_about = None)]
struct Cli {
    /// TOML configuration file. Built-in defaults are used when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Overrides `storage.output_dir`.
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert one URL and print the final task status as JSON.
    Convert {
        #[arg(long)]
        url: String,

        /// Format descriptor such as mp3_256 or mp4_720. Repeatable.
        #[arg(long = "format", short = 'f')]
        formats: Vec<String>,

        /// Write placeholder output instead of running yt-dlp.
        #[arg(long)]
        simulate: bool,

        /// Give up waiting after this many seconds.
        #[arg(long, default_value_t = 3600)]
        timeout_secs: u64,

        /// Status poll interval in milliseconds.
        #[arg(long, default_value_t = 500)]
        poll_ms: u64,
    },

    /// Print the media metadata for a URL as JSON without converting it.
    Info {
        #[arg(long)]
        url: String,

        /// Answer from the placeholder fetcher instead of yt-dlp.
        #[arg(long)]
        simulate: bool,
    },

    /// Remove expired files from the output directory once.
    Sweep,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> Result<SpindleConfig, Box<dyn Error>> {
    let mut config = match &cli.config {
        Some(path) => SpindleConfig::load(path)?,
        None => SpindleConfig::default(),
    };
    if let Some(dir) = &cli.output_dir {
        config.storage.output_dir = dir.clone();
    }
    Ok(config)
}

async fn build(config: SpindleConfig, simulate: bool) -> Result<App, Box<dyn Error>> {
    let fetcher: Arc<dyn MediaFetcher> = if simulate {
        Arc::new(SimulatedFetcher::new().with_chunk_delay(Duration::from_millis(50)))
    } else {
        Arc::new(YtDlpFetcher::from_config(&config.fetcher))
    };
    Ok(AppBuilder::new(config).shared_fetcher(fetcher).build().await?)
}

async fn convert(
    app: &App,
    url: &str,
    formats: &[String],
    poll: Duration,
    timeout: Duration,
) -> Result<TaskView, Box<dyn Error>> {
    let id = app.orchestrator.submit(url, formats)?;
    info!(task_id = %id, "submitted");

    let mut last_progress = None;
    let deadline = tokio::time::Instant::now() + timeout;
    let view = loop {
        let view = app.orchestrator.status(id)?;
        if last_progress != Some(view.progress) {
            info!(task_id = %id, status = view.status.as_str(), progress = view.progress, "status");
            last_progress = Some(view.progress);
        }
        if view.status.is_terminal() || tokio::time::Instant::now() >= deadline {
            break view;
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!(task_id = %id, "interrupted");
                break view;
            }
            _ = tokio::time::sleep(poll) => {}
        }
    };

    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(view)
}

/// 0 for full success, 2 for partial success, 1 otherwise.
fn exit_status(state: TaskState) -> u8 {
    match state {
        TaskState::Completed => 0,
        TaskState::PartiallyCompleted => 2,
        _ => 1,
    }
}

async fn run(cli: Cli) -> Result<ExitCode, Box<dyn Error>> {
    let config = load_config(&cli)?;
    match cli.command {
        Command::Convert {
            url,
            formats,
            simulate,
            timeout_secs,
            poll_ms,
        } => {
            let app = build(config, simulate).await?;
            let cleanup = app.start_cleanup();
            let view = convert(
                &app,
                &url,
                &formats,
                Duration::from_millis(poll_ms.max(1)),
                Duration::from_secs(timeout_secs),
            )
            .await;
            cleanup.shutdown_and_join().await;
            Ok(ExitCode::from(exit_status(view?.status)))
        }
        Command::Info { url, simulate } => {
            let app = build(config, simulate).await?;
            let info = app.orchestrator.video_info(&url).await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Sweep => {
            let app = build(config, false).await?;
            let report = app.cleanup.sweep_once().await;
            println!(
                "removed {} file(s), {} failed",
                report.files_removed, report.files_failed
            );
            Ok(if report.files_failed == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();
    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
