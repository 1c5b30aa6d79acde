//! The job state machine: a single `Mutex`-guarded map from job id to
//! record, exposing the operation set spec'd for the store (`create`,
//! `mark_running`, `update_progress`, `mark_completed`, `mark_failed`,
//! `attach_artifact`, `get_artifact_path`, `prune`).
//!
//! Grounded on `core/task_manager.py`'s `TaskManager`: a `threading.Lock`
//! around a dict of task records, with the same transition legality and the
//! same path-exists-before-lock discipline for bind operations.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::error::JobError;
use crate::job::{FileKind, JobErrorInfo, JobInfo, JobResult, JobStatus, OutputFormat, Stage};

/// The full internal state for one job; never leaves the store by
/// reference, only ever copied out into a [`JobInfo`] snapshot.
#[derive(Debug, Clone)]
struct JobRecord {
    status: JobStatus,
    stage: Stage,
    progress: f64,
    created_at: chrono::DateTime<Utc>,
    updated_at: chrono::DateTime<Utc>,
    result: Option<JobResult>,
    error: Option<JobErrorInfo>,
    artifacts: HashMap<FileKind, PathBuf>,
}

impl JobRecord {
    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// The job store. Cheap to clone behind an `Arc`; all state lives in the
/// single internal `Mutex`.
#[derive(Debug, Default)]
pub struct JobStore {
    records: Mutex<HashMap<Uuid, JobRecord>>,
}

impl JobStore {
    /// An empty store.
    pub fn new() -> Self {
        JobStore {
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Create a queued job with `progress = 0.0` at the given initial
    /// stage, returning its freshly allocated id.
    pub fn create(&self, initial_stage: Stage) -> Uuid {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let record = JobRecord {
            status: JobStatus::Queued,
            stage: initial_stage,
            progress: 0.0,
            created_at: now,
            updated_at: now,
            result: None,
            error: None,
            artifacts: HashMap::new(),
        };
        self.records.lock().unwrap().insert(id, record);
        id
    }

    /// Whether a job with this id exists.
    pub fn exists(&self, id: Uuid) -> bool {
        self.records.lock().unwrap().contains_key(&id)
    }

    /// An immutable snapshot of a job's current state.
    pub fn get_info(&self, id: Uuid) -> Result<JobInfo, JobError> {
        let records = self.records.lock().unwrap();
        let record = records.get(&id).ok_or(JobError::NotFound { id })?;
        JobInfo::new(
            id,
            record.status,
            record.stage,
            record.progress,
            record.created_at,
            record.updated_at,
            record.result.clone(),
            record.error.clone(),
        )
    }

    /// Promote `queued` to `running`, optionally updating the current
    /// stage. Legal from `queued` or `running`.
    pub fn mark_running(&self, id: Uuid, stage: Option<Stage>) -> Result<(), JobError> {
        let mut records = self.records.lock().unwrap();
        let record = records.get_mut(&id).ok_or(JobError::NotFound { id })?;
        if record.status.is_final() {
            return Err(JobError::AlreadyFinal { id });
        }
        record.status = JobStatus::Running;
        if let Some(stage) = stage {
            record.stage = stage;
        }
        record.touch();
        Ok(())
    }

    /// Update progress (promoting `queued` to `running` on first call) and
    /// optionally the current stage. Legal pre-finalization only.
    pub fn update_progress(
        &self,
        id: Uuid,
        progress: f64,
        stage: Option<Stage>,
    ) -> Result<(), JobError> {
        if !(0.0..=1.0).contains(&progress) {
            return Err(JobError::OutOfRange { progress });
        }
        let mut records = self.records.lock().unwrap();
        let record = records.get_mut(&id).ok_or(JobError::NotFound { id })?;
        if record.status.is_final() {
            return Err(JobError::AlreadyFinal { id });
        }
        record.status = JobStatus::Running;
        record.progress = progress;
        if let Some(stage) = stage {
            record.stage = stage;
        }
        record.touch();
        Ok(())
    }

    /// Finalize a job as completed: binds `artifacts[file_kind] =
    /// artifact_path`, infers `output_format` from the path extension if
    /// absent, and builds the `result.download_url`.
    ///
    /// The path-exists check happens before the lock is taken, so the
    /// critical section never blocks on I/O.
    pub fn mark_completed(
        &self,
        id: Uuid,
        artifact_path: PathBuf,
        file_kind: FileKind,
        output_format: Option<OutputFormat>,
        filename: Option<String>,
    ) -> Result<(), JobError> {
        if !artifact_path.exists() {
            return Err(JobError::FileMissing {
                path: artifact_path,
            });
        }

        let mut records = self.records.lock().unwrap();
        let record = records.get_mut(&id).ok_or(JobError::NotFound { id })?;
        if record.status.is_final() {
            return Err(JobError::AlreadyFinal { id });
        }

        let output_format = match file_kind {
            FileKind::Midi => OutputFormat::Mid,
            FileKind::Audio => output_format.unwrap_or_else(|| OutputFormat::infer_from_path(&artifact_path)),
        };
        let filename = filename.unwrap_or_else(|| {
            artifact_path
                .file_name()
                .and_then(|n| n.to_str())
                .map(str::to_owned)
                .unwrap_or_else(|| format!("{id}.{}", output_format.extension()))
        });

        record.artifacts.insert(file_kind, artifact_path);
        record.status = JobStatus::Completed;
        record.stage = Stage::Finalizing;
        record.progress = 1.0;
        record.error = None;
        record.result = Some(JobResult {
            file_kind,
            output_format,
            filename,
            download_url: format!("/tasks/{id}/download?file_type={}", wire_file_kind(file_kind)),
        });
        record.touch();
        Ok(())
    }

    /// Finalize a job as failed with a human-readable message and the
    /// stage the orchestrator was in when it failed.
    pub fn mark_failed(
        &self,
        id: Uuid,
        message: impl Into<String>,
        trace_id: Option<String>,
        stage: Option<Stage>,
    ) -> Result<(), JobError> {
        let mut records = self.records.lock().unwrap();
        let record = records.get_mut(&id).ok_or(JobError::NotFound { id })?;
        if record.status.is_final() {
            return Err(JobError::AlreadyFinal { id });
        }
        record.status = JobStatus::Failed;
        if let Some(stage) = stage {
            record.stage = stage;
        }
        record.result = None;
        record.error = Some(JobErrorInfo {
            message: message.into(),
            trace_id,
        });
        record.touch();
        Ok(())
    }

    /// Rebind (or add) an artifact mapping on an already-completed job.
    /// Used by score-put (rebinds `midi`) and re-render (rebinds `audio`).
    pub fn attach_artifact(
        &self,
        id: Uuid,
        artifact_path: PathBuf,
        file_kind: FileKind,
    ) -> Result<(), JobError> {
        if !artifact_path.exists() {
            return Err(JobError::FileMissing {
                path: artifact_path,
            });
        }

        let mut records = self.records.lock().unwrap();
        let record = records.get_mut(&id).ok_or(JobError::NotFound { id })?;
        if record.status != JobStatus::Completed {
            return Err(JobError::NotCompleted { id });
        }

        if let (FileKind::Audio, Some(result)) = (file_kind, record.result.as_mut()) {
            result.output_format = OutputFormat::infer_from_path(&artifact_path);
            result.filename = artifact_path
                .file_name()
                .and_then(|n| n.to_str())
                .map(str::to_owned)
                .unwrap_or(result.filename.clone());
        }

        record.artifacts.insert(file_kind, artifact_path);
        record.touch();
        Ok(())
    }

    /// The on-disk path bound for a file kind, after checking the job is
    /// completed, the mapping exists, and the file is still on disk.
    pub fn get_artifact_path(&self, id: Uuid, file_kind: FileKind) -> Result<PathBuf, JobError> {
        let path = {
            let records = self.records.lock().unwrap();
            let record = records.get(&id).ok_or(JobError::NotFound { id })?;
            if record.status != JobStatus::Completed {
                return Err(JobError::NotCompleted { id });
            }
            record
                .artifacts
                .get(&file_kind)
                .cloned()
                .ok_or(JobError::ArtifactUnavailable { id, file_kind })?
        };

        if !path.exists() {
            return Err(JobError::FileMissing { path });
        }
        Ok(path)
    }

    /// Remove jobs whose `updated_at` is older than `now - max_age`,
    /// returning how many were removed. Does not touch disk artifacts.
    pub fn prune(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now() - chrono::Duration::from_std(max_age).unwrap_or_default();
        let mut records = self.records.lock().unwrap();
        let before = records.len();
        records.retain(|_, record| record.updated_at >= cutoff);
        before - records.len()
    }
}

fn wire_file_kind(kind: FileKind) -> &'static str {
    match kind {
        FileKind::Audio => "audio",
        FileKind::Midi => "midi",
    }
}

/// Convenience used by [`crate::orchestrator`] to check readability of an
/// input path before starting a run, mirroring the "precondition" step of
/// the orchestrator algorithm.
pub fn is_readable_file(path: &Path) -> bool {
    path.is_file()
}
