#![forbid(unsafe_code)]

//! Shared library for the tuberelay backend: configuration, the yt-dlp
//! bridge, and the retry/normalize orchestration around it.

pub mod config;
pub mod error;
pub mod extractor;
pub mod format;
pub mod history;
pub mod identity;
pub mod orchestrator;
pub mod security;
