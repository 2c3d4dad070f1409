#![forbid(unsafe_code)]

//! Data shapes shared between the yt-dlp bridge and the HTTP layer, plus the
//! normalization pass that turns a raw extractor payload into the format
//! list we hand to clients.

use serde::{Deserialize, Serialize};
use std::cmp::Reverse;

/// Subset of yt-dlp's `--dump-single-json` payload. Everything is optional
/// because older or niche sites omit fields freely.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMediaInfo {
    pub title: Option<String>,
    pub duration: Option<i64>,
    pub uploader: Option<String>,
    pub description: Option<String>,
    pub ext: Option<String>,
    #[serde(default)]
    pub formats: Vec<RawFormat>,
}

/// One entry of the raw `formats` array.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFormat {
    pub format_id: Option<String>,
    pub ext: Option<String>,
    pub resolution: Option<String>,
    pub filesize: Option<i64>,
    pub url: Option<String>,
}

/// A downloadable rendition that survived filtering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatVariant {
    pub format_id: String,
    pub ext: String,
    pub resolution: Option<String>,
    pub filesize: Option<i64>,
    pub url: String,
}

/// Normalized extraction result. Immutable once built; the `formats` list is
/// already filtered, sorted, and truncated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub title: String,
    pub duration: Option<i64>,
    pub uploader: String,
    pub description: String,
    pub formats: Vec<FormatVariant>,
}

/// Parses the height out of a "WxH" resolution string. Anything unparsable
/// (missing, "audio only", bare labels) counts as height 0 so those entries
/// sort last.
pub fn resolution_height(resolution: Option<&str>) -> i64 {
    let Some(resolution) = resolution else {
        return 0;
    };
    let Some((_, height)) = resolution.split_once('x') else {
        return 0;
    };
    height.trim().parse().unwrap_or(0)
}

/// Filters, sorts, and truncates the raw format list.
///
/// Entries without a source URL are dropped. When `allowed_extensions` is
/// non-empty, entries whose container is not in the list are dropped too.
/// The survivors are sorted by non-increasing height (stable, so unparsable
/// resolutions keep their relative order at the tail) and capped at
/// `max_results` when set.
pub fn normalize_formats(
    raw: Vec<RawFormat>,
    allowed_extensions: &[String],
    max_results: Option<usize>,
) -> Vec<FormatVariant> {
    let mut formats: Vec<FormatVariant> = raw
        .into_iter()
        .filter_map(|entry| {
            let url = entry.url.filter(|url| !url.is_empty())?;
            let format_id = entry.format_id.filter(|id| !id.is_empty())?;
            let ext = entry.ext.unwrap_or_default();
            if !allowed_extensions.is_empty()
                && !allowed_extensions.iter().any(|allowed| allowed == &ext)
            {
                return None;
            }
            Some(FormatVariant {
                format_id,
                ext,
                resolution: entry.resolution,
                filesize: entry.filesize,
                url,
            })
        })
        .collect();

    formats.sort_by_key(|format| Reverse(resolution_height(format.resolution.as_deref())));

    if let Some(cap) = max_results {
        formats.truncate(cap);
    }

    formats
}

/// Formats a duration in seconds as `HH:MM:SS` for the download log.
pub fn format_duration_hms(duration: i64) -> String {
    let duration = duration.max(0);
    let hours = duration / 3600;
    let minutes = (duration % 3600) / 60;
    let seconds = duration % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}
