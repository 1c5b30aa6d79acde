//! The pipeline orchestrator: composes the three stage adapters under a job
//! id, driving every Job Store transition and handling cleanup.
//!
//! Grounded step-for-step on `core/generation_service.py`'s
//! `GenerationService.process_task` (mark_running → progress 0.1 → 0.4 →
//! runner → 0.8 → move-into-artifacts → mark_completed, with a `finally`
//! cleanup of the upload). The background worker pool is grounded on
//! `audio_engine.rs`'s `tokio::spawn` + channel worker shape, adapted from
//! an mpsc work queue to a `Semaphore`-gated admission pool so queued jobs
//! are visible in the Job Store rather than buffered in a channel.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::job::{FileKind, OutputFormat, Stage};
use crate::job_store::JobStore;
use crate::settings::Settings;
use crate::stages::StageAdapters;

/// Coordinates job execution across a bounded pool of concurrent workers.
///
/// Cloning is cheap: every field is an `Arc`, so the orchestrator can be
/// shared across the HTTP handlers that submit work to it.
#[derive(Clone)]
pub struct Orchestrator {
    job_store: Arc<JobStore>,
    stages: Arc<dyn StageAdapters>,
    settings: Arc<Settings>,
    permits: Arc<Semaphore>,
}

impl Orchestrator {
    /// Build an orchestrator with `Settings::worker_pool_size` concurrent
    /// slots.
    pub fn new(job_store: Arc<JobStore>, stages: Arc<dyn StageAdapters>, settings: Arc<Settings>) -> Self {
        let permits = Arc::new(Semaphore::new(settings.worker_pool_size));
        Orchestrator {
            job_store,
            stages,
            settings,
            permits,
        }
    }

    /// Schedule a job for asynchronous execution and return immediately.
    /// The job remains `queued` until a worker slot is free, matching the
    /// back-pressure behavior spec'd for the worker pool.
    pub fn submit(&self, job_id: Uuid, input_path: PathBuf, output_format: OutputFormat) {
        let job_store = self.job_store.clone();
        let stages = self.stages.clone();
        let settings = self.settings.clone();
        let permits = self.permits.clone();

        tokio::spawn(async move {
            let _permit = permits.acquire().await.expect("semaphore never closed");
            run_job(job_store, stages, settings, job_id, input_path, output_format).await;
        });
    }
}

async fn run_job(
    job_store: Arc<JobStore>,
    stages: Arc<dyn StageAdapters>,
    settings: Arc<Settings>,
    job_id: Uuid,
    input_path: PathBuf,
    output_format: OutputFormat,
) {
    tracing::info!(%job_id, ?output_format, "starting job");

    let outcome = run_stages(&job_store, &stages, &settings, job_id, &input_path, output_format).await;

    if let Err((stage, message)) = outcome {
        tracing::error!(%job_id, ?stage, %message, "job failed");
        let _ = job_store.mark_failed(job_id, message, None, Some(stage));
    } else {
        tracing::info!(%job_id, "job completed");
    }

    if input_path.exists() {
        if let Err(e) = tokio::fs::remove_file(&input_path).await {
            tracing::warn!(%job_id, error = %e, "failed to clean up upload");
        }
    }
}

async fn run_stages(
    job_store: &Arc<JobStore>,
    stages: &Arc<dyn StageAdapters>,
    settings: &Arc<Settings>,
    job_id: Uuid,
    input_path: &Path,
    output_format: OutputFormat,
) -> Result<(), (Stage, String)> {
    if !crate::job_store::is_readable_file(input_path) {
        return Err((Stage::Preprocessing, "input missing".to_string()));
    }

    job_store
        .mark_running(job_id, Some(Stage::Preprocessing))
        .map_err(|e| (Stage::Preprocessing, e.to_string()))?;
    job_store
        .update_progress(job_id, 0.1, Some(Stage::Preprocessing))
        .map_err(|e| (Stage::Preprocessing, e.to_string()))?;

    let clean_audio = stages
        .preprocess(input_path)
        .await
        .map_err(|e| (Stage::Preprocessing, e.to_string()))?;
    job_store
        .update_progress(job_id, 0.4, Some(Stage::Converting))
        .map_err(|e| (Stage::Converting, e.to_string()))?;

    let midi_path = stages
        .transcribe(&clean_audio)
        .await
        .map_err(|e| (Stage::Converting, e.to_string()))?;
    job_store
        .update_progress(job_id, 0.8, Some(Stage::Synthesizing))
        .map_err(|e| (Stage::Synthesizing, e.to_string()))?;

    let rendered_audio = stages
        .synthesize(&midi_path, output_format)
        .await
        .map_err(|e| (Stage::Synthesizing, e.to_string()))?;

    let final_audio_path = settings
        .output_dir
        .join(format!("{job_id}.{}", output_format.extension()));
    move_into_place(&rendered_audio, &final_audio_path)
        .await
        .map_err(|e| (Stage::Finalizing, e.to_string()))?;

    job_store
        .mark_completed(
            job_id,
            final_audio_path,
            FileKind::Audio,
            Some(output_format),
            None,
        )
        .map_err(|e| (Stage::Finalizing, e.to_string()))?;

    let final_midi_path = settings.output_dir.join(format!("{job_id}.mid"));
    move_into_place(&midi_path, &final_midi_path)
        .await
        .map_err(|e| (Stage::Finalizing, e.to_string()))?;
    job_store
        .attach_artifact(job_id, final_midi_path, FileKind::Midi)
        .map_err(|e| (Stage::Finalizing, e.to_string()))?;

    if clean_audio.exists() {
        let _ = tokio::fs::remove_file(&clean_audio).await;
    }

    Ok(())
}

async fn move_into_place(from: &Path, to: &Path) -> std::io::Result<()> {
    if from == to {
        return Ok(());
    }
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(_) => {
            tokio::fs::copy(from, to).await?;
            tokio::fs::remove_file(from).await.ok();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobStatus;
    use crate::stages::stub::StubAdapters;

    #[tokio::test]
    async fn happy_path_completes_and_binds_both_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::from_env();
        settings.output_dir = dir.path().join("outputs");
        settings.worker_pool_size = 2;
        tokio::fs::create_dir_all(&settings.output_dir).await.unwrap();

        let job_store = Arc::new(JobStore::new());
        let stages: Arc<dyn StageAdapters> = Arc::new(StubAdapters);
        let orchestrator = Orchestrator::new(job_store.clone(), stages, Arc::new(settings));

        let input_path = dir.path().join("upload.wav");
        tokio::fs::write(&input_path, b"dummy upload").await.unwrap();

        let job_id = job_store.create(Stage::Preprocessing);
        orchestrator.submit(job_id, input_path.clone(), OutputFormat::Wav);

        let mut info = job_store.get_info(job_id).unwrap();
        for _ in 0..200 {
            if info.status.is_final() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            info = job_store.get_info(job_id).unwrap();
        }

        assert_eq!(info.status, JobStatus::Completed);
        assert!(job_store.get_artifact_path(job_id, FileKind::Audio).is_ok());
        assert!(job_store.get_artifact_path(job_id, FileKind::Midi).is_ok());
        assert!(!input_path.exists());
    }

    #[tokio::test]
    async fn missing_input_marks_job_failed() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::from_env();
        settings.output_dir = dir.path().join("outputs");
        tokio::fs::create_dir_all(&settings.output_dir).await.unwrap();

        let job_store = Arc::new(JobStore::new());
        let stages: Arc<dyn StageAdapters> = Arc::new(StubAdapters);
        let orchestrator = Orchestrator::new(job_store.clone(), stages, Arc::new(settings));

        let job_id = job_store.create(Stage::Preprocessing);
        orchestrator.submit(job_id, dir.path().join("missing.wav"), OutputFormat::Mp3);

        let mut info = job_store.get_info(job_id).unwrap();
        for _ in 0..200 {
            if info.status.is_final() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            info = job_store.get_info(job_id).unwrap();
        }

        assert_eq!(info.status, JobStatus::Failed);
        assert!(info.error.is_some());
    }
}
