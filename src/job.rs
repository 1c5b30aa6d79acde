//! Job data types: the public `JobInfo` snapshot, the wire enums it is built
//! from, and the invariant checks that make an "invalid `JobInfo`" a thing
//! that fails to construct rather than merely a thing nobody checks.
//!
//! Grounded on `core/models.py` (`_TaskRecord` / timestamp formatting) and
//! `core/task_manager.py` (the field set a snapshot carries).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::JobError;

/// One of the four states a job can occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Created, not yet picked up by a worker.
    Queued,
    /// A worker has started executing stages for this job.
    Running,
    /// Terminal: exactly one audio artifact (and possibly a midi artifact)
    /// is bound.
    Completed,
    /// Terminal: no artifacts are guaranteed bound.
    Failed,
}

impl JobStatus {
    /// Terminal statuses forbid further status transitions.
    pub fn is_final(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// One of the named phases a job passes through on its way to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Cleaning/normalizing the raw upload.
    Preprocessing,
    /// Transcribing clean audio into MIDI.
    Converting,
    /// Rendering MIDI into audio.
    Synthesizing,
    /// Wrapping up: moving artifacts into place, writing the snapshot.
    Finalizing,
}

/// Which artifact a binding or download request refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    /// The rendered audio artifact.
    Audio,
    /// The MIDI artifact.
    Midi,
}

impl FileKind {
    /// Parse a `file_type` query parameter, rejecting anything else.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "audio" => Some(FileKind::Audio),
            "midi" => Some(FileKind::Midi),
            _ => None,
        }
    }
}

/// The output container requested for the synthesized audio artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// MP3 audio.
    Mp3,
    /// WAV audio.
    Wav,
    /// Standard MIDI file.
    Mid,
}

impl OutputFormat {
    /// Parse an `output_format` query parameter; only `mp3`/`wav` are legal
    /// render targets.
    pub fn parse_render_target(raw: &str) -> Option<Self> {
        match raw {
            "mp3" => Some(OutputFormat::Mp3),
            "wav" => Some(OutputFormat::Wav),
            _ => None,
        }
    }

    /// Infer an output format from a file extension, defaulting to `mp3`
    /// when the extension is absent or unrecognized — matching
    /// `_infer_output_format_from_path`.
    pub fn infer_from_path(path: &std::path::Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("wav") => OutputFormat::Wav,
            Some("mid") | Some("midi") => OutputFormat::Mid,
            _ => OutputFormat::Mp3,
        }
    }

    /// The content-type of this format's bytes.
    pub fn content_type(self) -> &'static str {
        match self {
            OutputFormat::Mp3 => "audio/mpeg",
            OutputFormat::Wav => "audio/wav",
            OutputFormat::Mid => "audio/midi",
        }
    }

    /// The file extension (without dot) this format is persisted under.
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Mp3 => "mp3",
            OutputFormat::Wav => "wav",
            OutputFormat::Mid => "mid",
        }
    }
}

/// Infer a content-type from a file extension, for artifacts whose kind is
/// known (`midi`) but whose format is read back off the path.
pub fn content_type_for_extension(path: &std::path::Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("mid") | Some("midi") => "audio/midi",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}

/// The `result` payload of a completed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    /// Which artifact this result describes.
    #[serde(rename = "file_type")]
    pub file_kind: FileKind,
    /// The output container format.
    pub output_format: OutputFormat,
    /// The artifact's file name, e.g. `"<id>.mp3"`.
    pub filename: String,
    /// `/tasks/{id}/download?file_type={file_kind}`.
    pub download_url: String,
}

/// The `error` payload of a failed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobErrorInfo {
    /// Human-readable failure description.
    pub message: String,
    /// Optional correlation id for cross-referencing logs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

/// An immutable snapshot of a job's state, as handed out by
/// [`crate::job_store::JobStore::get_info`].
///
/// Construction is checked: [`JobInfo::new`] enforces the invariants spec'd
/// for the wire format, so a `JobInfo` that exists is, by construction, one
/// that satisfies them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInfo {
    /// Stable job identifier.
    pub task_id: Uuid,
    /// Current lifecycle state.
    pub status: JobStatus,
    /// Current pipeline stage.
    pub stage: Stage,
    /// Fraction complete, in `[0.0, 1.0]`.
    pub progress: f64,
    /// Creation timestamp, UTC, second precision.
    #[serde(with = "utc_seconds")]
    pub created_at: DateTime<Utc>,
    /// Last-mutation timestamp, UTC, second precision.
    #[serde(with = "utc_seconds")]
    pub updated_at: DateTime<Utc>,
    /// Present iff `status == Completed`.
    pub result: Option<JobResult>,
    /// Present iff `status == Failed`.
    pub error: Option<JobErrorInfo>,
}

impl JobInfo {
    /// Construct a `JobInfo`, rejecting any combination that violates the
    /// `completed ⇔ result∧!error∧progress=1.0` / `failed ⇔ error∧!result`
    /// contract.
    pub fn new(
        task_id: Uuid,
        status: JobStatus,
        stage: Stage,
        progress: f64,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
        result: Option<JobResult>,
        error: Option<JobErrorInfo>,
    ) -> Result<Self, JobError> {
        if !(0.0..=1.0).contains(&progress) {
            return Err(JobError::OutOfRange { progress });
        }

        let completed_ok = status != JobStatus::Completed
            || (result.is_some() && error.is_none() && progress == 1.0);
        let failed_ok = status != JobStatus::Failed || (error.is_some() && result.is_none());
        let non_terminal_ok = status == JobStatus::Completed
            || status == JobStatus::Failed
            || (result.is_none() && error.is_none());
        let result_format_ok = result.as_ref().map_or(true, |r| match r.file_kind {
            FileKind::Midi => r.output_format == OutputFormat::Mid,
            FileKind::Audio => r.output_format != OutputFormat::Mid,
        });

        if !completed_ok || !failed_ok || !non_terminal_ok || !result_format_ok {
            return Err(JobError::InvalidInput(format!(
                "job {task_id} violates the status/result/error/progress contract"
            )));
        }

        Ok(JobInfo {
            task_id,
            status,
            stage,
            progress,
            created_at,
            updated_at,
            result,
            error,
        })
    }
}

/// Serializes a `DateTime<Utc>` as second-precision ISO-8601 with a literal
/// trailing `Z`, matching `core/models.py`'s `_to_utc_z`.
mod utc_seconds {
    use chrono::{DateTime, TimeZone, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.format("%Y-%m-%dT%H:%M:%SZ").to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .or_else(|_| {
                chrono::NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%SZ")
                    .map(|naive| Utc.from_utc_datetime(&naive))
            })
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 12, 15, 10, 0, 0).unwrap()
    }

    #[test]
    fn completed_requires_full_progress_and_result() {
        let id = Uuid::nil();
        let err = JobInfo::new(
            id,
            JobStatus::Completed,
            Stage::Finalizing,
            0.99,
            now(),
            now(),
            Some(JobResult {
                file_kind: FileKind::Audio,
                output_format: OutputFormat::Mp3,
                filename: "x.mp3".into(),
                download_url: "/tasks/x/download?file_type=audio".into(),
            }),
            None,
        );
        assert!(err.is_err());
    }

    #[test]
    fn failed_requires_error_and_no_result() {
        let id = Uuid::nil();
        let err = JobInfo::new(
            id,
            JobStatus::Failed,
            Stage::Preprocessing,
            0.4,
            now(),
            now(),
            None,
            None,
        );
        assert!(err.is_err());
    }

    #[test]
    fn queued_job_with_zero_progress_is_valid() {
        let id = Uuid::nil();
        let info = JobInfo::new(
            id,
            JobStatus::Queued,
            Stage::Preprocessing,
            0.0,
            now(),
            now(),
            None,
            None,
        )
        .unwrap();
        assert_eq!(info.status, JobStatus::Queued);
    }

    #[test]
    fn queued_job_with_error_is_rejected() {
        let id = Uuid::nil();
        let err = JobInfo::new(
            id,
            JobStatus::Queued,
            Stage::Preprocessing,
            0.0,
            now(),
            now(),
            None,
            Some(JobErrorInfo {
                message: "premature failure".into(),
                trace_id: None,
            }),
        );
        assert!(err.is_err());
    }

    #[test]
    fn timestamp_round_trips_through_second_precision_z() {
        let info = JobInfo::new(
            Uuid::nil(),
            JobStatus::Queued,
            Stage::Preprocessing,
            0.0,
            now(),
            now(),
            None,
            None,
        )
        .unwrap();
        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("\"2025-12-15T10:00:00Z\""));
        let round_tripped: JobInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(round_tripped.created_at, info.created_at);
    }
}
