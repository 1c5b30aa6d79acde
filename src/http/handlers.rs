//! HTTP handlers. Every fallible handler returns `Result<T, JobError>`; the
//! `IntoResponse` impl in [`super::error`] centralizes the status-code
//! mapping, mirroring the teacher's handlers returning
//! `Result<Markup, StatusCode>`.
//!
//! Grounded on `routers/generation.py`, `routers/score.py` and
//! `routers/export.py` for the endpoint contracts, and on
//! `_save_upload_file`'s streaming-with-size-limit pattern for the upload
//! handler.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Multipart, Path as AxPath, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::error::JobError;
use crate::job::{content_type_for_extension, FileKind, JobInfo, OutputFormat, Stage};
use crate::score::{self, flatten::FlattenedScore, Score};

use super::state::AppState;

fn parse_job_id(raw: &str) -> Result<Uuid, JobError> {
    Uuid::parse_str(raw).map_err(|_| JobError::NotFound {
        id: Uuid::nil(),
    })
}

#[derive(Serialize)]
struct SubmitResponse {
    task_id: Uuid,
    status: &'static str,
    poll_url: String,
    created_at: String,
}

/// `POST /generate?output_format={mp3|wav}`
pub async fn generate(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, JobError> {
    let output_format = params
        .get("output_format")
        .and_then(|v| OutputFormat::parse_render_target(v))
        .ok_or_else(|| JobError::InvalidInput("output_format must be mp3 or wav".to_string()))?;

    let job_id = state.job_store.create(Stage::Preprocessing);
    let ext = upload_extension(job_id, output_format);
    let upload_path = state.settings.upload_dir.join(format!("{job_id}.{ext}"));

    let mut field = loop {
        let next = multipart
            .next_field()
            .await
            .map_err(|e| JobError::InvalidInput(format!("malformed multipart body: {e}")))?;
        match next {
            Some(field) if field.name() == Some("file") => break field,
            Some(_) => continue,
            None => {
                return Err(JobError::InvalidInput(
                    "missing multipart field \"file\"".to_string(),
                ))
            }
        }
    };

    if field.file_name().map(str::is_empty).unwrap_or(true) {
        return Err(JobError::InvalidInput("missing filename".to_string()));
    }

    let limit = state.settings.max_upload_size_bytes();
    let mut total: u64 = 0;
    let mut file = tokio::fs::File::create(&upload_path)
        .await
        .map_err(|e| JobError::InvalidInput(format!("failed to open upload path: {e}")))?;

    use tokio::io::AsyncWriteExt;
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| JobError::InvalidInput(format!("malformed multipart body: {e}")))?
    {
        total += chunk.len() as u64;
        if total > limit {
            drop(file);
            let _ = tokio::fs::remove_file(&upload_path).await;
            return Err(JobError::UploadTooLarge {
                limit_bytes: limit,
            });
        }
        file.write_all(&chunk)
            .await
            .map_err(|e| JobError::InvalidInput(format!("failed writing upload: {e}")))?;
    }
    file.flush().await.ok();

    if total == 0 {
        let _ = tokio::fs::remove_file(&upload_path).await;
        return Err(JobError::InvalidInput("empty upload body".to_string()));
    }

    state.orchestrator.submit(job_id, upload_path, output_format);

    let body = SubmitResponse {
        task_id: job_id,
        status: "queued",
        poll_url: format!("/tasks/{job_id}"),
        created_at: Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
    };
    Ok((axum::http::StatusCode::ACCEPTED, Json(body)))
}

fn upload_extension(_job_id: Uuid, output_format: OutputFormat) -> &'static str {
    // The raw upload's extension is independent of the requested render
    // target; audio uploads are always treated as opaque bytes until the
    // preprocess stage inspects them. `wav` is used as a conservative,
    // universally-decodable placeholder extension for the persisted path.
    let _ = output_format;
    "wav"
}

/// `GET /tasks/{id}`
pub async fn get_task(
    State(state): State<Arc<AppState>>,
    AxPath(id): AxPath<String>,
) -> Result<Json<JobInfo>, JobError> {
    let job_id = parse_job_id(&id)?;
    let info = state.job_store.get_info(job_id)?;
    Ok(Json(info))
}

#[derive(serde::Deserialize)]
pub struct FileTypeQuery {
    file_type: Option<String>,
}

/// `GET /tasks/{id}/download?file_type={audio|midi}`
pub async fn download(
    State(state): State<Arc<AppState>>,
    AxPath(id): AxPath<String>,
    Query(query): Query<FileTypeQuery>,
) -> Result<impl IntoResponse, JobError> {
    let job_id = parse_job_id(&id)?;
    let raw_kind = query
        .file_type
        .ok_or_else(|| JobError::InvalidInput("file_type is required".to_string()))?;
    let file_kind = FileKind::parse(&raw_kind)
        .ok_or_else(|| JobError::InvalidInput(format!("unknown file_type: {raw_kind}")))?;

    let path = state.job_store.get_artifact_path(job_id, file_kind)?;
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| JobError::FileMissing { path: path.clone() })?;
    let content_type = content_type_for_extension(&path);

    Ok((
        [(axum::http::header::CONTENT_TYPE, content_type)],
        bytes,
    ))
}

fn score_json_path(state: &AppState, job_id: Uuid) -> std::path::PathBuf {
    state.settings.output_dir.join(format!("{job_id}.score.json"))
}

fn midi_path(state: &AppState, job_id: Uuid) -> std::path::PathBuf {
    state.settings.output_dir.join(format!("{job_id}.mid"))
}

/// `GET /tasks/{id}/score`
pub async fn get_score(
    State(state): State<Arc<AppState>>,
    AxPath(id): AxPath<String>,
) -> Result<Json<Score>, JobError> {
    let job_id = parse_job_id(&id)?;
    // Existence/ownership check, even though the cache path is read
    // directly below — mirrors the store-mediated artifact lookup other
    // endpoints use.
    let midi_on_record = state.job_store.get_artifact_path(job_id, FileKind::Midi)?;

    let cache_path = score_json_path(&state, job_id);
    if let Ok(cached) = tokio::fs::read(&cache_path).await {
        if let Ok(score) = serde_json::from_slice::<Score>(&cached) {
            return Ok(Json(score));
        }
    }

    let midi_bytes = tokio::fs::read(&midi_on_record)
        .await
        .map_err(|_| JobError::FileMissing {
            path: midi_on_record.clone(),
        })?;
    let score = score::normalize(&score::midi_to_score(&midi_bytes)?);

    if let Ok(serialized) = serde_json::to_vec_pretty(&score) {
        let _ = tokio::fs::write(&cache_path, serialized).await;
    }

    Ok(Json(score))
}

/// `PUT /tasks/{id}/score`
pub async fn put_score(
    State(state): State<Arc<AppState>>,
    AxPath(id): AxPath<String>,
    Json(body): Json<Score>,
) -> Result<Json<Score>, JobError> {
    let job_id = parse_job_id(&id)?;
    // Rebinding only makes sense on a completed job.
    if state.job_store.get_info(job_id)?.status != crate::job::JobStatus::Completed {
        return Err(JobError::NotCompleted { id: job_id });
    }

    let normalized = score::normalize(&body);
    let midi_bytes = score::score_to_midi(&normalized)?;

    let midi_out = midi_path(&state, job_id);
    tokio::fs::write(&midi_out, &midi_bytes)
        .await
        .map_err(|e| JobError::InvalidInput(format!("failed to persist midi: {e}")))?;

    let cache_path = score_json_path(&state, job_id);
    if let Ok(serialized) = serde_json::to_vec_pretty(&normalized) {
        tokio::fs::write(&cache_path, serialized)
            .await
            .map_err(|e| JobError::InvalidInput(format!("failed to persist score cache: {e}")))?;
    }

    state
        .job_store
        .attach_artifact(job_id, midi_out, FileKind::Midi)?;

    Ok(Json(normalized))
}

#[derive(serde::Deserialize)]
pub struct RenderQuery {
    output_format: Option<String>,
}

/// `POST /tasks/{id}/render?output_format={mp3|wav}`
pub async fn render(
    State(state): State<Arc<AppState>>,
    AxPath(id): AxPath<String>,
    Query(query): Query<RenderQuery>,
) -> Result<Json<JobInfo>, JobError> {
    let job_id = parse_job_id(&id)?;
    let output_format = query
        .output_format
        .as_deref()
        .and_then(OutputFormat::parse_render_target)
        .ok_or_else(|| JobError::InvalidInput("output_format must be mp3 or wav".to_string()))?;

    let midi = state.job_store.get_artifact_path(job_id, FileKind::Midi)?;
    let rendered = state.stages.synthesize(&midi, output_format).await?;

    let final_path = state
        .settings
        .output_dir
        .join(format!("{job_id}.{}", output_format.extension()));
    if rendered != final_path {
        if let Some(parent) = final_path.parent() {
            tokio::fs::create_dir_all(parent).await.ok();
        }
        tokio::fs::rename(&rendered, &final_path)
            .await
            .or_else(|_| std::fs::rename(&rendered, &final_path))
            .map_err(|e| JobError::InvalidInput(format!("failed to move rendered audio: {e}")))?;
    }

    state
        .job_store
        .attach_artifact(job_id, final_path, FileKind::Audio)?;

    Ok(Json(state.job_store.get_info(job_id)?))
}

/// `POST /export/midi`
pub async fn export_midi(
    Json(body): Json<FlattenedScore>,
) -> Result<impl IntoResponse, JobError> {
    let score = score::flattened_to_score(&body)?;
    let bytes = score::score_to_midi(&score)?;
    Ok((
        [(axum::http::header::CONTENT_TYPE, "audio/midi")],
        bytes,
    ))
}

/// Fallback 404 handler for unmatched routes.
pub async fn not_found() -> impl IntoResponse {
    (
        axum::http::StatusCode::NOT_FOUND,
        Json(json!({ "error": "not found" })),
    )
}
