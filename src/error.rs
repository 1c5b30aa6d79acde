//! Error kinds surfaced by the job store, orchestrator and score subsystems.
//!
//! These are deliberately distinct from HTTP status codes: the HTTP surface
//! (see [`crate::http::error`]) owns the mapping from [`JobError`] to a
//! response, so the rest of the crate never has to think about transport
//! concerns.

use std::path::PathBuf;

use uuid::Uuid;

use crate::job::{FileKind, Stage};

/// Everything that can go wrong inside the job store, orchestrator or score
/// codec, tagged so callers can match on the kind rather than parse a
/// message.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// Unknown or malformed job id.
    #[error("task not found: {id}")]
    NotFound {
        /// The id that was looked up.
        id: Uuid,
    },

    /// A write attempt landed on a job that already reached a terminal
    /// state.
    #[error("task {id} is already finalized")]
    AlreadyFinal {
        /// The finalized job.
        id: Uuid,
    },

    /// An artifact read was attempted on a job that has not completed.
    #[error("task {id} is not completed")]
    NotCompleted {
        /// The job in question.
        id: Uuid,
    },

    /// The requested file kind was never bound for this job.
    #[error("{file_kind:?} artifact is not available for task {id}")]
    ArtifactUnavailable {
        /// The job in question.
        id: Uuid,
        /// The file kind that has no binding.
        file_kind: FileKind,
    },

    /// A bound artifact path no longer exists on disk.
    #[error("artifact file missing on disk: {}", path.display())]
    FileMissing {
        /// The path that was expected to exist.
        path: PathBuf,
    },

    /// `progress` fell outside `[0.0, 1.0]`.
    #[error("progress must be within [0.0, 1.0], got {progress}")]
    OutOfRange {
        /// The rejected value.
        progress: f64,
    },

    /// Malformed request input: missing filename, empty body, unknown
    /// `file_kind`, invalid score JSON, and similar.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The upload exceeded the configured byte ceiling mid-stream.
    #[error("upload exceeds the configured limit of {limit_bytes} bytes")]
    UploadTooLarge {
        /// The configured ceiling that was exceeded.
        limit_bytes: u64,
    },

    /// An external stage adapter failed.
    #[error("stage {stage:?} failed: {message}")]
    StageFailed {
        /// The stage that was running when the failure occurred.
        stage: Stage,
        /// Human-readable explanation, suitable for `Job::error.message`.
        message: String,
    },
}

impl JobError {
    /// Build a [`JobError::StageFailed`] from any error type, capturing the
    /// stage the orchestrator was in when it occurred.
    pub fn stage_failed(stage: Stage, error: impl std::fmt::Display) -> Self {
        JobError::StageFailed {
            stage,
            message: error.to_string(),
        }
    }
}
