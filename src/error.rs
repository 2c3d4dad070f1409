#![forbid(unsafe_code)]

//! Classification of upstream extraction failures.
//!
//! yt-dlp reports every failure as prose on stderr, so the only reliable
//! signal is a substring match against known phrases. The table below is
//! ordered; the first matching entry wins.

use thiserror::Error;

/// Failure category attached to a finished extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// "Sign in to confirm your age".
    AgeRestricted,
    /// "Private video".
    Private,
    /// "Video unavailable" (removed, region-locked, never existed).
    Unavailable,
    /// "Sign in to confirm you're not a bot".
    BotChallenge,
    /// Extractor failed but matched no known phrase; carries the raw message.
    Generic,
    /// Extractor exited cleanly but produced no data.
    EmptyResult,
    /// Every reported format was filtered out during normalization.
    NoSuitableFormat,
    /// Fault outside the extraction call itself (spawn failure, local IO).
    UnexpectedError,
}

/// Ordered (needle, kind) pairs, matched case-insensitively against the raw
/// upstream message. Kept as data so tests can exercise priority directly.
const CLASSIFIERS: &[(&str, ErrorKind)] = &[
    ("sign in to confirm your age", ErrorKind::AgeRestricted),
    ("private video", ErrorKind::Private),
    ("video unavailable", ErrorKind::Unavailable),
    ("sign in to confirm you're not a bot", ErrorKind::BotChallenge),
];

/// Maps a raw upstream error message to an [`ErrorKind`]. Falls back to
/// [`ErrorKind::Generic`] when nothing matches.
pub fn classify(message: &str) -> ErrorKind {
    let lowered = message.to_lowercase();
    for (needle, kind) in CLASSIFIERS {
        if lowered.contains(needle) {
            return *kind;
        }
    }
    ErrorKind::Generic
}

impl ErrorKind {
    /// Whether the failure is attributable to the request (bad URL,
    /// restricted or removed content) rather than to this server. Drives the
    /// 400-vs-500 split in the HTTP layer.
    pub fn is_user_error(self) -> bool {
        !matches!(self, ErrorKind::UnexpectedError)
    }

    /// Human-readable message for classified kinds. `None` means the caller
    /// should surface the raw upstream message instead.
    pub fn canned_message(self) -> Option<&'static str> {
        match self {
            ErrorKind::AgeRestricted => {
                Some("This video is age-restricted and requires a signed-in account.")
            }
            ErrorKind::Private => Some("This video is private."),
            ErrorKind::Unavailable => Some("This video is unavailable."),
            ErrorKind::BotChallenge => {
                Some("The source is challenging automated access; try again later.")
            }
            ErrorKind::EmptyResult => Some("The extractor returned no data for this URL."),
            ErrorKind::NoSuitableFormat => Some("No downloadable format was found for this URL."),
            ErrorKind::Generic | ErrorKind::UnexpectedError => None,
        }
    }
}

/// Error raised by the extraction bridge for a single attempt.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// yt-dlp itself rejected the URL or the transfer failed. The message is
    /// the raw upstream text and feeds the classification table.
    #[error("{0}")]
    Upstream(String),
    /// The process succeeded but emitted nothing usable.
    #[error("extractor returned no data")]
    EmptyResult,
    /// Anything outside the extraction call: spawn failure, local IO, bad
    /// JSON. Never shown verbatim to clients.
    #[error("{0}")]
    Unexpected(String),
}

impl ExtractError {
    /// Collapses this error to its terminal (kind, client-facing message)
    /// pair after the retry budget is spent.
    pub fn into_outcome_parts(self) -> (ErrorKind, String) {
        match self {
            ExtractError::Upstream(raw) => {
                let kind = classify(&raw);
                let message = kind
                    .canned_message()
                    .map(str::to_owned)
                    .unwrap_or_else(|| raw.clone());
                (kind, message)
            }
            ExtractError::EmptyResult => (
                ErrorKind::EmptyResult,
                ErrorKind::EmptyResult
                    .canned_message()
                    .unwrap_or_default()
                    .to_owned(),
            ),
            ExtractError::Unexpected(raw) => (ErrorKind::UnexpectedError, raw),
        }
    }
}
