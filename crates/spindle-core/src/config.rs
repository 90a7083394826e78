//! Configuration loaded from TOML. Every field has a default, so an empty
//! file is a valid configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::app::pipeline::PipelineSettings;
use crate::domain::{FormatKey, FormatSpec, RetryPolicy};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        source: toml::de::Error,
        path: PathBuf,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SpindleConfig {
    pub storage: StorageSection,
    pub conversion: ConversionSection,
    pub retry: RetrySection,
    pub fetcher: FetcherSection,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageSection {
    pub output_dir: PathBuf,
    pub retention_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("temp_files"),
            retention_secs: 2 * 60 * 60,
            sweep_interval_secs: 60 * 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConversionSection {
    pub default_formats: Vec<String>,
    pub title_max_len: usize,
    pub resolve_checkpoint: u8,
}

impl Default for ConversionSection {
    fn default() -> Self {
        Self {
            default_formats: vec!["mp3_256".to_string()],
            title_max_len: 50,
            resolve_checkpoint: 10,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySection {
    /// Overrides for the lenient preset.
    pub resolve: RetryConfig,
    /// Overrides for the strict preset.
    pub acquire: RetryConfig,
}

/// `[retry.*]` table. Each key left out keeps the preset's value.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    pub max_attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub multiplier: Option<f64>,
    pub attempt_timeout_secs: Option<u64>,
}

impl RetryConfig {
    pub fn apply(&self, preset: RetryPolicy) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.unwrap_or(preset.max_attempts),
            base_delay: self
                .base_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(preset.base_delay),
            multiplier: self.multiplier.unwrap_or(preset.multiplier),
            max_delay: self
                .max_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(preset.max_delay),
            attempt_timeout: self
                .attempt_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(preset.attempt_timeout),
        }
    }
}

fn validate_policy(table: &str, policy: &RetryPolicy) -> Result<(), ConfigError> {
    if policy.max_attempts == 0 {
        return Err(invalid(format!("{table}.max_attempts must be at least 1")));
    }
    if policy.attempt_timeout.is_zero() {
        return Err(invalid(format!("{table}.attempt_timeout_secs must be positive")));
    }
    if !policy.multiplier.is_finite() || policy.multiplier < 1.0 {
        return Err(invalid(format!("{table}.multiplier must be a finite number >= 1")));
    }
    if policy.max_delay < policy.base_delay {
        return Err(invalid(format!(
            "{table}.max_delay_ms must not be below base_delay_ms"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetcherSection {
    pub binary: PathBuf,
    pub socket_timeout_secs: u64,
    /// Sent as the HTTP `User-Agent`. An empty string leaves yt-dlp's own.
    pub user_agent: String,
    /// Pass `--no-check-certificates`.
    pub no_check_certificates: bool,
}

pub const DESKTOP_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

impl Default for FetcherSection {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("yt-dlp"),
            socket_timeout_secs: 60,
            user_agent: DESKTOP_USER_AGENT.to_string(),
            no_check_certificates: false,
        }
    }
}

fn invalid(message: String) -> ConfigError {
    ConfigError::Invalid(message)
}

impl SpindleConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            source,
            path: path.to_path_buf(),
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            source,
            path: path.to_path_buf(),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let storage = &self.storage;
        if storage.retention_secs == 0 {
            return Err(invalid("storage.retention_secs must be positive".into()));
        }
        if storage.sweep_interval_secs == 0 {
            return Err(invalid("storage.sweep_interval_secs must be positive".into()));
        }
        if storage.output_dir.as_os_str().is_empty() {
            return Err(invalid("storage.output_dir must not be empty".into()));
        }

        let conversion = &self.conversion;
        if conversion.title_max_len == 0 {
            return Err(invalid("conversion.title_max_len must be positive".into()));
        }
        if conversion.resolve_checkpoint >= 100 {
            return Err(invalid("conversion.resolve_checkpoint must be below 100".into()));
        }
        if conversion.default_formats.is_empty() {
            return Err(invalid("conversion.default_formats must not be empty".into()));
        }
        for raw in &conversion.default_formats {
            FormatSpec::parse(&FormatKey::new(raw.trim()))
                .map_err(|e| invalid(format!("conversion.default_formats: {e}")))?;
        }

        validate_policy("retry.resolve", &self.resolve_policy())?;
        validate_policy("retry.acquire", &self.acquire_policy())?;

        if self.fetcher.socket_timeout_secs == 0 {
            return Err(invalid("fetcher.socket_timeout_secs must be positive".into()));
        }
        Ok(())
    }

    pub fn resolve_policy(&self) -> RetryPolicy {
        self.retry.resolve.apply(RetryPolicy::lenient())
    }

    pub fn acquire_policy(&self) -> RetryPolicy {
        self.retry.acquire.apply(RetryPolicy::strict())
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            resolve_policy: self.resolve_policy(),
            acquire_policy: self.acquire_policy(),
            title_max_len: self.conversion.title_max_len,
            resolve_checkpoint: self.conversion.resolve_checkpoint,
        }
    }

    pub fn default_formats(&self) -> Vec<FormatKey> {
        self.conversion
            .default_formats
            .iter()
            .map(|f| FormatKey::new(f.trim()))
            .collect()
    }

    pub fn retention(&self) -> chrono::Duration {
        i64::try_from(self.storage.retention_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.storage.sweep_interval_secs)
    }
}

impl std::str::FromStr for SpindleConfig {
    type Err = toml::de::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        toml::from_str(s)
    }
}
