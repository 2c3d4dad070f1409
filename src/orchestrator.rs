#![forbid(unsafe_code)]

//! The retry-and-degrade loop around the extraction bridge.
//!
//! Per request: up to `max_retries` attempts, a freshly picked client
//! identity per attempt, a fixed backoff sleep between failures, and one
//! normalization pass on success. The loop is linear; nothing is shared
//! across requests except the read-only identity pool.

use rand::Rng;
use std::sync::Arc;

use crate::config::ExtractionConfig;
use crate::error::{ErrorKind, ExtractError};
use crate::extractor::{
    AttemptRequest, Extracted, ExtractionMode, Extractor, ProgressSender,
};
use crate::format::{self, VideoMetadata};
use crate::identity::{self, ClientIdentity};

/// Terminal result of one extraction request.
#[derive(Debug, Clone)]
pub enum ExtractionOutcome {
    Success {
        metadata: VideoMetadata,
        /// File name under the download root, when a file was transferred.
        filename: Option<String>,
    },
    Failure {
        kind: ErrorKind,
        message: String,
    },
}

pub struct Orchestrator {
    extractor: Arc<dyn Extractor>,
    config: ExtractionConfig,
}

impl Orchestrator {
    pub fn new(extractor: Arc<dyn Extractor>, config: ExtractionConfig) -> Self {
        Self { extractor, config }
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Runs the full attempt loop for one URL and collapses the result into
    /// an [`ExtractionOutcome`]. Never panics and never returns early with a
    /// partial result; the caller gets exactly one terminal value.
    pub async fn extract(
        &self,
        url: &str,
        mode: ExtractionMode,
        progress: Option<ProgressSender>,
    ) -> ExtractionOutcome {
        let budget = self.config.max_retries.max(1);
        let mut attempt = 0u32;

        loop {
            let request = AttemptRequest {
                url,
                config: &self.config,
                identity: pick_identity(),
                mode: &mode,
                progress: progress.as_ref(),
            };

            match self.extractor.attempt(request).await {
                Ok(extracted) => return self.normalize(extracted),
                Err(err) => {
                    attempt += 1;
                    if attempt >= budget {
                        let (kind, message) = err.into_outcome_parts();
                        return ExtractionOutcome::Failure { kind, message };
                    }
                    // Fixed delay, per-request only; concurrent requests keep
                    // running while this one sleeps.
                    tokio::time::sleep(self.config.backoff).await;
                }
            }
        }
    }

    /// Builds [`VideoMetadata`] from a raw result. An empty filtered format
    /// list is a failure in its own right, never an empty success.
    fn normalize(&self, extracted: Extracted) -> ExtractionOutcome {
        let Extracted { info, filename } = extracted;

        let formats = format::normalize_formats(
            info.formats,
            &self.config.allowed_extensions,
            self.config.max_results,
        );
        if formats.is_empty() {
            let kind = ErrorKind::NoSuitableFormat;
            return ExtractionOutcome::Failure {
                kind,
                message: kind.canned_message().unwrap_or_default().to_owned(),
            };
        }

        ExtractionOutcome::Success {
            metadata: VideoMetadata {
                title: info.title.unwrap_or_default(),
                duration: info.duration,
                uploader: info.uploader.unwrap_or_default(),
                description: info.description.unwrap_or_default(),
                formats,
            },
            filename,
        }
    }
}

/// Random draw over the identity pool. Selection itself stays a pure lookup
/// so the rotation policy is testable without randomness.
fn pick_identity() -> &'static ClientIdentity {
    let index = rand::thread_rng().gen_range(0..identity::pool_len());
    identity::pick(index)
}
