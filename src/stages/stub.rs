//! The deterministic stub adapter: produces a minimal valid MIDI file and a
//! placeholder audio file without touching any external process, so the
//! orchestrator and HTTP surface are fully exercisable without a real
//! transcription/synthesis toolchain installed.
//!
//! Grounded on `core/generation_service.py`'s `_mock_pipeline_runner`
//! (writes a tiny placeholder file tagged with a format-specific magic
//! header) and the Score Codec's `score_to_midi` for a structurally valid
//! MIDI body.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use crate::error::JobError;
use crate::job::OutputFormat;
use crate::score::{score_to_midi, NoteEvent, Score, Track};

use super::StageAdapters;

/// Deterministic stand-in for preprocess/transcribe/synthesize. Never
/// fails except on filesystem I/O errors, and never depends on the
/// content of its inputs.
#[derive(Debug, Default, Clone, Copy)]
pub struct StubAdapters;

#[async_trait]
impl StageAdapters for StubAdapters {
    async fn preprocess(&self, input: &Path) -> Result<PathBuf, JobError> {
        let clean = sibling_path(input, "clean.wav");
        fs::copy(input, &clean)
            .await
            .map_err(|e| JobError::stage_failed(crate::job::Stage::Preprocessing, e))?;
        Ok(clean)
    }

    async fn transcribe(&self, clean_audio: &Path) -> Result<PathBuf, JobError> {
        let midi_path = sibling_path(clean_audio, "transcribed.mid");
        let score = single_note_score();
        let bytes = score_to_midi(&score)?;
        fs::write(&midi_path, bytes)
            .await
            .map_err(|e| JobError::stage_failed(crate::job::Stage::Converting, e))?;
        Ok(midi_path)
    }

    async fn synthesize(
        &self,
        midi: &Path,
        output_format: OutputFormat,
    ) -> Result<PathBuf, JobError> {
        let out_path = sibling_path(midi, &format!("rendered.{}", output_format.extension()));
        let magic: &[u8] = match output_format {
            OutputFormat::Wav => b"RIFF",
            OutputFormat::Mp3 => b"ID3\x03",
            OutputFormat::Mid => b"MThd",
        };
        let mut bytes = magic.to_vec();
        bytes.extend(std::iter::repeat(0u8).take(1024));
        fs::write(&out_path, bytes)
            .await
            .map_err(|e| JobError::stage_failed(crate::job::Stage::Synthesizing, e))?;
        Ok(out_path)
    }
}

fn sibling_path(path: &Path, file_name: &str) -> PathBuf {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let unique_prefix = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("stage");
    dir.join(format!("{unique_prefix}-{file_name}"))
}

fn single_note_score() -> Score {
    Score {
        version: 1,
        tempo_bpm: 120.0,
        time_signature: "4/4".to_string(),
        tracks: vec![Track {
            id: None,
            name: "Stub".to_string(),
            program: Some(0),
            channel: Some(0),
            notes: vec![NoteEvent::new(None, 60, 0.0, 0.5, 80).expect("valid stub note")],
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn full_stub_pipeline_produces_readable_files() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("a.wav");
        tokio::fs::write(&input, b"dummy upload").await.unwrap();

        let adapters = StubAdapters;
        let clean = adapters.preprocess(&input).await.unwrap();
        assert!(clean.exists());

        let midi = adapters.transcribe(&clean).await.unwrap();
        let midi_bytes = tokio::fs::read(&midi).await.unwrap();
        assert_eq!(&midi_bytes[0..4], b"MThd");

        let audio = adapters.synthesize(&midi, OutputFormat::Wav).await.unwrap();
        let audio_bytes = tokio::fs::read(&audio).await.unwrap();
        assert_eq!(&audio_bytes[0..4], b"RIFF");
    }
}
