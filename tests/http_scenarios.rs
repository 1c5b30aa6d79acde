//! End-to-end scenarios against the fully assembled router, exercised the
//! way `tower::ServiceExt::oneshot` lets a test drive `axum` handlers
//! without a real listener.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use hum2song_core::job::{FileKind, JobInfo, JobStatus, OutputFormat, Stage};
use hum2song_core::http::{build_router, AppState};
use hum2song_core::job_store::JobStore;
use hum2song_core::orchestrator::Orchestrator;
use hum2song_core::score::{score_to_midi, NoteEvent, Score, Track};
use hum2song_core::settings::{AppEnv, Settings};
use hum2song_core::stages::stub::StubAdapters;
use hum2song_core::stages::StageAdapters;

fn test_settings(dir: &std::path::Path) -> Settings {
    let upload_dir = dir.join("uploads");
    let output_dir = dir.join("outputs");
    let log_dir = dir.join("logs");
    std::fs::create_dir_all(&upload_dir).unwrap();
    std::fs::create_dir_all(&output_dir).unwrap();
    std::fs::create_dir_all(&log_dir).unwrap();
    Settings {
        app_env: AppEnv::Development,
        host: "127.0.0.1".to_string(),
        port: 0,
        upload_dir,
        output_dir,
        log_dir,
        max_upload_size_mb: 10,
        max_audio_seconds: 30,
        target_sample_rate: 22050,
        onset_threshold: 0.5,
        frame_threshold: 0.3,
        use_stub_converter: true,
        worker_pool_size: 4,
    }
}

fn build_state(dir: &std::path::Path) -> Arc<AppState> {
    let settings = Arc::new(test_settings(dir));
    let job_store = Arc::new(JobStore::new());
    let stages: Arc<dyn StageAdapters> = Arc::new(StubAdapters);
    let orchestrator = Orchestrator::new(job_store.clone(), stages.clone(), settings.clone());
    Arc::new(AppState {
        job_store,
        orchestrator,
        settings,
        stages,
    })
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

fn multipart_body(boundary: &str, file_name: &str, contents: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(contents);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

async fn poll_until_final(state: &Arc<AppState>, job_id: uuid::Uuid) -> JobInfo {
    let mut info = state.job_store.get_info(job_id).unwrap();
    for _ in 0..500 {
        if info.status.is_final() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        info = state.job_store.get_info(job_id).unwrap();
    }
    info
}

fn one_note_score() -> Score {
    Score {
        version: 1,
        tempo_bpm: 120.0,
        time_signature: "4/4".to_string(),
        tracks: vec![Track {
            id: None,
            name: "lead".to_string(),
            program: Some(0),
            channel: Some(0),
            notes: vec![NoteEvent::new(None, 60, 0.0, 0.5, 90).unwrap()],
        }],
    }
}

/// Scenario 1: happy path, POST /generate, poll to completion, download.
#[tokio::test]
async fn happy_path_generate_poll_download() {
    let dir = tempfile::tempdir().unwrap();
    let state = build_state(dir.path());
    let app = build_router(state.clone());

    let boundary = "X-BOUNDARY-1";
    let body = multipart_body(boundary, "a.wav", &vec![0u8; 1024]);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/generate?output_format=mp3")
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={boundary}"),
                )
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = body_json(response).await;
    assert_eq!(json["status"], "queued");
    let task_id = json["task_id"].as_str().unwrap().to_string();
    let job_id: uuid::Uuid = task_id.parse().unwrap();

    let info = poll_until_final(&state, job_id).await;
    assert_eq!(info.status, JobStatus::Completed);

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/tasks/{task_id}/download?file_type=audio"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "audio/mpeg"
    );
    let bytes = body_bytes(response).await;
    assert!(!bytes.is_empty());
}

/// Scenario 2: download before completion -> 409.
#[tokio::test]
async fn download_before_completion_returns_conflict() {
    let dir = tempfile::tempdir().unwrap();
    let state = build_state(dir.path());
    let job_id = state.job_store.create(Stage::Preprocessing);
    let app = build_router(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/tasks/{job_id}/download?file_type=audio"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
}

/// Scenario 3: invalid file kind on a completed job -> 400.
#[tokio::test]
async fn invalid_file_kind_returns_bad_request() {
    let dir = tempfile::tempdir().unwrap();
    let state = build_state(dir.path());

    let audio = dir.path().join("a.mp3");
    std::fs::write(&audio, b"fake mp3 bytes").unwrap();
    let job_id = state.job_store.create(Stage::Preprocessing);
    state
        .job_store
        .mark_completed(job_id, audio, FileKind::Audio, Some(OutputFormat::Mp3), None)
        .unwrap();

    let app = build_router(state);
    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/tasks/{job_id}/download?file_type=xxx"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

/// Scenario 4: unknown task -> 404.
#[tokio::test]
async fn unknown_task_returns_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let state = build_state(dir.path());
    let app = build_router(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/tasks/00000000-0000-0000-0000-000000000000")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

/// Scenario 5: score round-trip, then a midi download begins with `MThd`.
#[tokio::test]
async fn score_round_trip_then_midi_download() {
    let dir = tempfile::tempdir().unwrap();
    let state = build_state(dir.path());

    let seed_score = one_note_score();
    let midi_bytes = score_to_midi(&seed_score).unwrap();
    let midi_path = dir.path().join("outputs").join("seed.mid");
    std::fs::write(&midi_path, &midi_bytes).unwrap();

    let audio_path = dir.path().join("outputs").join("seed.mp3");
    std::fs::write(&audio_path, b"fake mp3 bytes").unwrap();

    let job_id = state.job_store.create(Stage::Preprocessing);
    state
        .job_store
        .mark_completed(
            job_id,
            audio_path,
            FileKind::Audio,
            Some(OutputFormat::Mp3),
            None,
        )
        .unwrap();
    state
        .job_store
        .attach_artifact(job_id, midi_path, FileKind::Midi)
        .unwrap();

    let app = build_router(state.clone());

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/tasks/{job_id}/score"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let score: Score = serde_json::from_slice(
        &response.into_body().collect().await.unwrap().to_bytes(),
    )
    .unwrap();
    assert!(!score.tracks.is_empty());
    assert!(score.tracks.iter().any(|t| !t.notes.is_empty()));

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri(format!("/tasks/{job_id}/score"))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(&score).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/tasks/{job_id}/download?file_type=midi"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = body_bytes(response).await;
    assert_eq!(&bytes[0..4], b"MThd");
}

/// Scenario 6: re-render with a different format, bytes differ.
#[tokio::test]
async fn re_render_produces_different_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let state = build_state(dir.path());

    let midi_bytes = score_to_midi(&one_note_score()).unwrap();
    let midi_path = dir.path().join("outputs").join("seed.mid");
    std::fs::write(&midi_path, &midi_bytes).unwrap();

    let original_audio = dir.path().join("outputs").join("seed.mp3");
    std::fs::write(&original_audio, b"original mp3 bytes").unwrap();

    let job_id = state.job_store.create(Stage::Preprocessing);
    state
        .job_store
        .mark_completed(
            job_id,
            original_audio,
            FileKind::Audio,
            Some(OutputFormat::Mp3),
            None,
        )
        .unwrap();
    state
        .job_store
        .attach_artifact(job_id, midi_path, FileKind::Midi)
        .unwrap();

    let original_bytes = {
        let path = state.job_store.get_artifact_path(job_id, FileKind::Audio).unwrap();
        std::fs::read(path).unwrap()
    };

    let app = build_router(state.clone());
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/tasks/{job_id}/render?output_format=wav"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/tasks/{job_id}/download?file_type=audio"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "audio/wav"
    );
    let new_bytes = body_bytes(response).await;
    assert_ne!(new_bytes, original_bytes);
}

/// Scenario 7: flattened export produces a MIDI file.
#[tokio::test]
async fn flattened_export_produces_midi() {
    let dir = tempfile::tempdir().unwrap();
    let state = build_state(dir.path());
    let app = build_router(state);

    let body = json!({
        "bpm": 120,
        "tracks": [{
            "trackId": "tr1",
            "notes": [
                {"pitch": 60, "startSec": 0.0, "durationSec": 0.5, "velocity": 80},
                {"pitch": 64, "startSec": 0.5, "durationSec": 0.5}
            ]
        }]
    });

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/export/midi")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "audio/midi"
    );
    let bytes = body_bytes(response).await;
    assert_eq!(&bytes[0..4], b"MThd");
}

/// Scenario 8: constructing a contract-violating JobInfo must fail.
#[test]
fn contract_violation_rejected() {
    use chrono::Utc;

    let err = JobInfo::new(
        uuid::Uuid::nil(),
        JobStatus::Completed,
        Stage::Finalizing,
        0.99,
        Utc::now(),
        Utc::now(),
        None,
        None,
    );
    assert!(err.is_err());
}
