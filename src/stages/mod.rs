//! Stage adapters: the pipeline orchestrator's only dependency on the
//! outside world. Real and stub implementations are interchangeable tagged
//! variants of the same trait, per the "dynamic dispatch over pipeline
//! stages" design note — no runtime module loading.
//!
//! Grounded on the `adaptive_pipeline` `StageExecutor` trait
//! (`async_trait`-based, object-safe) for the shape of the interface, and
//! on `core/generation_service.py`'s `_mock_pipeline_runner` for the stub's
//! deterministic placeholder output.

pub mod stub;
pub mod subprocess;

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::JobError;
use crate::job::OutputFormat;

/// The three external collaborators the orchestrator composes: clean the
/// upload, transcribe it to MIDI, synthesize MIDI into audio.
///
/// A single trait (rather than three) keeps one adapter value in charge of
/// the whole external boundary, matching how the teacher's `AudioEngine`
/// owns one coherent capability rather than being split across types.
#[async_trait]
pub trait StageAdapters: Send + Sync {
    /// Clean/normalize a raw upload, returning the path to clean audio.
    async fn preprocess(&self, input: &std::path::Path) -> Result<PathBuf, JobError>;

    /// Transcribe clean audio into a MIDI file, returning its path.
    async fn transcribe(&self, clean_audio: &std::path::Path) -> Result<PathBuf, JobError>;

    /// Render a MIDI file into audio of the requested format, returning the
    /// rendered file's path.
    async fn synthesize(
        &self,
        midi: &std::path::Path,
        output_format: OutputFormat,
    ) -> Result<PathBuf, JobError>;
}
