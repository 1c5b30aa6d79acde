//! The subprocess-backed adapter: shells out to externally configured
//! binaries for each stage. Used when `Settings::use_stub_converter` is
//! false.
//!
//! Grounded on the teacher's use of external processes at arm's length
//! (`open::that` in `public.rs`) generalized to `tokio::process::Command`,
//! the idiomatic async equivalent used throughout the retrieval pack for
//! subprocess orchestration.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::JobError;
use crate::job::{OutputFormat, Stage};

use super::StageAdapters;

/// Command templates for each stage. Each command receives the input path
/// as its first argument and the output path as its second.
#[derive(Debug, Clone)]
pub struct SubprocessConfig {
    /// Binary invoked to clean/normalize a raw upload.
    pub preprocess_cmd: PathBuf,
    /// Binary invoked to transcribe clean audio into MIDI.
    pub transcribe_cmd: PathBuf,
    /// Binary invoked to render MIDI into audio (receives the requested
    /// format as a third argument).
    pub synthesize_cmd: PathBuf,
}

/// Adapter that runs each stage as a child process.
#[derive(Debug, Clone)]
pub struct SubprocessAdapters {
    config: SubprocessConfig,
}

impl SubprocessAdapters {
    /// Build an adapter from the given command templates.
    pub fn new(config: SubprocessConfig) -> Self {
        SubprocessAdapters { config }
    }

    async fn run(stage: Stage, cmd: &Path, args: &[&std::ffi::OsStr]) -> Result<(), JobError> {
        let output = Command::new(cmd)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| JobError::stage_failed(stage, format!("failed to spawn {}: {e}", cmd.display())))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(JobError::stage_failed(
                stage,
                format!("{} exited with {}: {stderr}", cmd.display(), output.status),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl StageAdapters for SubprocessAdapters {
    async fn preprocess(&self, input: &Path) -> Result<PathBuf, JobError> {
        let output = sibling_path(input, "clean.wav");
        Self::run(
            Stage::Preprocessing,
            &self.config.preprocess_cmd,
            &[input.as_os_str(), output.as_os_str()],
        )
        .await?;
        Ok(output)
    }

    async fn transcribe(&self, clean_audio: &Path) -> Result<PathBuf, JobError> {
        let output = sibling_path(clean_audio, "transcribed.mid");
        Self::run(
            Stage::Converting,
            &self.config.transcribe_cmd,
            &[clean_audio.as_os_str(), output.as_os_str()],
        )
        .await?;
        Ok(output)
    }

    async fn synthesize(
        &self,
        midi: &Path,
        output_format: OutputFormat,
    ) -> Result<PathBuf, JobError> {
        let output = sibling_path(midi, &format!("rendered.{}", output_format.extension()));
        let format_arg = std::ffi::OsString::from(output_format.extension());
        Self::run(
            Stage::Synthesizing,
            &self.config.synthesize_cmd,
            &[midi.as_os_str(), output.as_os_str(), format_arg.as_os_str()],
        )
        .await?;
        Ok(output)
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
