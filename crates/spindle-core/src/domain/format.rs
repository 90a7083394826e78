//! Format descriptors.
//!
//! A descriptor is the string the client asks for, shaped `<kind>_<quality>`:
//! - `mp3_256`: audio, 256 kbps
//! - `mp4_720`: video, at most 720 lines
//!
//! `FormatKey` keeps the raw string (it is the key of `results` and of the
//! download URL). `FormatSpec` is the parsed form handed to the fetcher.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Raw format descriptor as submitted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormatKey(String);

impl FormatKey {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FormatKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for FormatKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Which path of the fetcher a format goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn extension(self) -> &'static str {
        match self {
            MediaKind::Audio => "mp3",
            MediaKind::Video => "mp4",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            MediaKind::Audio => "audio/mpeg",
            MediaKind::Video => "video/mp4",
        }
    }

    /// Coarse category exposed to clients (`audio` / `video`).
    pub fn mime_category(self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("format {0:?} is not of the form <kind>_<quality>")]
    Malformed(String),

    #[error("format {key:?}: unsupported kind {kind:?}")]
    UnsupportedKind { key: String, kind: String },

    #[error("format {key:?}: quality {quality:?} is not a positive integer")]
    BadQuality { key: String, quality: String },
}

/// Parsed descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FormatSpec {
    pub kind: MediaKind,
    /// Bitrate in kbps for audio, maximum height in pixels for video.
    pub quality: u32,
}

impl FormatSpec {
    pub fn parse(key: &FormatKey) -> Result<Self, FormatError> {
        let raw = key.as_str();
        let (kind, quality) = raw
            .split_once('_')
            .ok_or_else(|| FormatError::Malformed(raw.to_string()))?;

        let kind = match kind.to_ascii_lowercase().as_str() {
            "mp3" => MediaKind::Audio,
            "mp4" => MediaKind::Video,
            _ => {
                return Err(FormatError::UnsupportedKind {
                    key: raw.to_string(),
                    kind: kind.to_string(),
                });
            }
        };

        let quality = quality
            .parse::<u32>()
            .ok()
            .filter(|q| *q > 0)
            .ok_or_else(|| FormatError::BadQuality {
                key: raw.to_string(),
                quality: quality.to_string(),
            })?;

        Ok(Self { kind, quality })
    }
}
