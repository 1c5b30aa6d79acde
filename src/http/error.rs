//! Maps [`JobError`] to an HTTP response in one place, per spec §7's
//! "Propagation policy" table, matching the status-code branching
//! `routers/generation.py`/`routers/score.py` perform on
//! `RuntimeError`/`FileNotFoundError`/`KeyError`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::error::JobError;

impl IntoResponse for JobError {
    fn into_response(self) -> Response {
        let status = match &self {
            JobError::NotFound { .. } => StatusCode::NOT_FOUND,
            JobError::AlreadyFinal { .. }
            | JobError::NotCompleted { .. }
            | JobError::ArtifactUnavailable { .. } => StatusCode::CONFLICT,
            JobError::InvalidInput(_) | JobError::OutOfRange { .. } => StatusCode::BAD_REQUEST,
            JobError::UploadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            JobError::FileMissing { .. } => StatusCode::NOT_FOUND,
            JobError::StageFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = match &self {
            // Stage failures are reported through the job's own
            // `error.message`, not the HTTP body; avoid leaking internals.
            JobError::StageFailed { .. } => "internal error".to_string(),
            other => other.to_string(),
        };

        tracing::warn!(error = %self, status = %status, "request failed");
        (status, Json(json!({ "error": message }))).into_response()
    }
}
