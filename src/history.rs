#![forbid(unsafe_code)]

//! Append-only download log: one JSON object per line, UTF-8, no schema
//! versioning. Writes are whole-line appends through `O_APPEND`, so
//! concurrent requests never interleave partial records.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::format::{self, VideoMetadata};

const HISTORY_FILE: &str = "download_history.jsonl";

/// One completed download.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub title: String,
    /// `HH:MM:SS`.
    pub duration: String,
    pub uploader: String,
    pub description: String,
    pub filename: String,
    /// RFC 3339 timestamp of the completed download.
    pub downloaded_at: String,
}

/// Builds the log record for a finished download.
pub fn record_for(metadata: &VideoMetadata, filename: &str, now: DateTime<Utc>) -> HistoryRecord {
    HistoryRecord {
        title: metadata.title.clone(),
        duration: format::format_duration_hms(metadata.duration.unwrap_or(0)),
        uploader: metadata.uploader.clone(),
        description: metadata.description.clone(),
        filename: filename.to_string(),
        downloaded_at: now.to_rfc3339(),
    }
}

pub struct HistoryLog {
    path: PathBuf,
}

impl HistoryLog {
    pub fn new(download_root: &Path) -> Self {
        Self {
            path: download_root.join(HISTORY_FILE),
        }
    }

    /// Creates the parent directory and the log file if absent. Safe to call
    /// on every startup.
    pub fn prepare(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening history log {}", self.path.display()))?;
        Ok(())
    }

    /// Appends one record as a single line.
    pub fn append(&self, record: &HistoryRecord) -> Result<()> {
        let line = serde_json::to_string(record).context("serializing history record")?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening history log {}", self.path.display()))?;
        writeln!(file, "{line}")
            .with_context(|| format!("appending to {}", self.path.display()))?;
        Ok(())
    }

    /// Reads the full log back, skipping lines that fail to parse.
    pub fn read_all(&self) -> Result<Vec<HistoryRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("reading {}", self.path.display()))?;
        Ok(content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }
}
