//! Output module
//!
//! Writes encoded video into container files:
//! - MP4 (`.mp4`, `.mov`)
//! - Matroska (`.mkv`, `.webm`)
//! - MPEG-TS (`.ts`)

mod muxer;

pub use muxer::{inspect, MuxSummary, Muxer, MAX_DIMENSION};

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Container format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    #[default]
    Mp4,
    Matroska,
    Ts,
}

impl Container {
    /// Pick the container from a file extension
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .ok_or_else(|| {
                Error::InvalidConfig(format!("{} has no file extension", path.display()))
            })?;

        match ext.as_str() {
            "mp4" | "mov" => Ok(Container::Mp4),
            "mkv" | "webm" => Ok(Container::Matroska),
            "ts" => Ok(Container::Ts),
            other => Err(Error::InvalidConfig(format!(
                "unknown container extension '.{}'",
                other
            ))),
        }
    }

    /// FFmpeg muxer name
    pub fn format_name(&self) -> &'static str {
        match self {
            Container::Mp4 => "mp4",
            Container::Matroska => "matroska",
            Container::Ts => "mpegts",
        }
    }
}

impl std::fmt::Display for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.format_name())
    }
}
