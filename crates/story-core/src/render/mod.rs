//! Downstream renderers. Each consumes a finished [`crate::models::Story`]
//! and writes artifacts into the story directory. A failure for one part is
//! recorded in the [`RenderReport`] and never stops sibling parts.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

pub mod audio;
pub mod document;
pub mod image;
pub mod voices;

pub use audio::{AudioRenderer, AzureSpeechBackend, SpeechBackend, SpeechBackendError};
pub use document::DocumentRenderer;
pub use image::{HttpImageBackend, ImageBackend, ImageBackendError, ImageRenderer};
pub use voices::{DEFAULT_VOICE, Voice, VoicePlan};

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to prepare output directory {path}: {source}")]
    OutputDir { path: PathBuf, source: io::Error },
    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartFailure {
    pub part_number: u32,
    pub reason: String,
}

/// Outcome of one renderer over one story.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderReport {
    pub produced: Vec<PathBuf>,
    /// Part numbers intentionally left out, e.g. an empty image prompt.
    pub skipped: Vec<u32>,
    pub failed: Vec<PartFailure>,
}

impl RenderReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub(crate) fn fail(&mut self, part_number: u32, reason: impl Into<String>) {
        self.failed.push(PartFailure {
            part_number,
            reason: reason.into(),
        });
    }
}

pub(crate) async fn ensure_dir(dir: &Path) -> Result<(), RenderError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|source| RenderError::OutputDir {
            path: dir.to_path_buf(),
            source,
        })
}

/// Deletes a leftover artifact from an earlier render, if any.
pub(crate) async fn remove_artifact(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "removed stale artifact"),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => warn!(path = %path.display(), "failed to remove stale artifact: {err}"),
    }
}

pub(crate) fn is_retryable_status(status: reqwest::StatusCode) -> bool {
    use reqwest::StatusCode;

    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}
