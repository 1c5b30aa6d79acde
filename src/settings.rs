//! Process-wide configuration, loaded once at startup from environment
//! variables and held immutably behind an `Arc` from then on.
//!
//! Grounded on `core/config.py`'s `Settings`/`model_post_init`: the same
//! fields, the same defaults, and the same defensive clamps, translated from
//! a `pydantic-settings` model into a plain Rust value type with a
//! hand-rolled `from_env`.

use std::env;
use std::path::{Path, PathBuf};

/// Deployment environment tag. Only affects logging verbosity defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    /// Local/dev runs: more verbose logging, stub adapters by default.
    Development,
    /// Deployed runs: quieter logging, real adapters by default.
    Production,
}

impl AppEnv {
    fn from_str(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "prod" | "production" => AppEnv::Production,
            _ => AppEnv::Development,
        }
    }
}

/// Immutable, process-wide configuration.
///
/// Constructed once in `main` via [`Settings::from_env`] and shared behind an
/// `Arc` with the job store, orchestrator and HTTP handlers.
#[derive(Debug, Clone)]
pub struct Settings {
    /// `development` or `production`; affects default log verbosity only.
    pub app_env: AppEnv,
    /// Bind address host for the HTTP listener.
    pub host: String,
    /// Bind address port for the HTTP listener.
    pub port: u16,
    /// Directory raw uploads are streamed into before a job claims them.
    pub upload_dir: PathBuf,
    /// Directory completed artifacts are moved into.
    pub output_dir: PathBuf,
    /// Directory the rolling log file is written under.
    pub log_dir: PathBuf,
    /// Ceiling on an individual upload, in megabytes.
    pub max_upload_size_mb: u64,
    /// Ceiling on accepted input audio duration, in seconds, clamped to
    /// `[20, 60]` (or forced to 20 when the raw value is non-positive).
    pub max_audio_seconds: u32,
    /// Sample rate the preprocessor resamples audio to before transcription.
    pub target_sample_rate: u32,
    /// Onset-detection threshold for the transcription stage, clamped to
    /// `[0.05, 0.95]`.
    pub onset_threshold: f64,
    /// Frame-activation threshold for the transcription stage, clamped to
    /// `[0.05, 0.95]`.
    pub frame_threshold: f64,
    /// When true, stage adapters are the deterministic stubs rather than
    /// subprocess-backed real implementations.
    pub use_stub_converter: bool,
    /// Number of jobs the orchestrator will run concurrently.
    pub worker_pool_size: usize,
}

impl Settings {
    /// Upload ceiling in bytes, derived from [`Settings::max_upload_size_mb`].
    pub fn max_upload_size_bytes(&self) -> u64 {
        self.max_upload_size_mb * 1024 * 1024
    }

    /// Load settings from the process environment, applying the same
    /// defensive clamps as the original Python `model_post_init`.
    pub fn from_env() -> Self {
        let base = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

        let app_env = AppEnv::from_str(&env_or("APP_ENV", "development"));
        let host = env_or("HOST", "0.0.0.0");
        let port = env_or("PORT", "8000").parse().unwrap_or(8000);

        let upload_dir = resolve_path(&base, &env_or("UPLOAD_DIR", "uploads"));
        let output_dir = resolve_path(&base, &env_or("OUTPUT_DIR", "outputs"));
        let log_dir = resolve_path(&base, &env_or("LOG_DIR", "logs"));

        let mut max_upload_size_mb: u64 = env_or("MAX_UPLOAD_SIZE_MB", "10").parse().unwrap_or(10);
        if max_upload_size_mb == 0 {
            max_upload_size_mb = 10;
        }

        let raw_max_audio_seconds: i64 = env_or("MAX_AUDIO_SECONDS", "30").parse().unwrap_or(30);
        let max_audio_seconds = clamp_max_audio_seconds(raw_max_audio_seconds);

        let mut target_sample_rate: u32 =
            env_or("TARGET_SAMPLE_RATE", "22050").parse().unwrap_or(22050);
        if target_sample_rate < 8000 {
            target_sample_rate = 22050;
        }

        let onset_threshold = clamp_unit(env_or("ONSET_THRESHOLD", "0.5").parse().unwrap_or(0.5));
        let frame_threshold = clamp_unit(env_or("FRAME_THRESHOLD", "0.3").parse().unwrap_or(0.3));

        let use_stub_converter: bool = env_or("USE_STUB_CONVERTER", "true")
            .parse()
            .unwrap_or(true);

        let worker_pool_size: usize = env_or("WORKER_POOL_SIZE", "4").parse().unwrap_or(4);

        std::fs::create_dir_all(&upload_dir).ok();
        std::fs::create_dir_all(&output_dir).ok();
        std::fs::create_dir_all(&log_dir).ok();

        Settings {
            app_env,
            host,
            port,
            upload_dir,
            output_dir,
            log_dir,
            max_upload_size_mb,
            max_audio_seconds,
            target_sample_rate,
            onset_threshold,
            frame_threshold,
            use_stub_converter,
            worker_pool_size: worker_pool_size.max(1),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn resolve_path(base: &Path, raw: &str) -> PathBuf {
    let p = PathBuf::from(raw);
    if p.is_absolute() {
        p
    } else {
        base.join(p)
    }
}

fn clamp_max_audio_seconds(raw: i64) -> u32 {
    if raw <= 0 {
        20
    } else if raw > 60 {
        60
    } else {
        raw as u32
    }
}

fn clamp_unit(v: f64) -> f64 {
    v.max(0.05).min(0.95)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_audio_seconds_boundary() {
        assert_eq!(clamp_max_audio_seconds(0), 20);
        assert_eq!(clamp_max_audio_seconds(-5), 20);
        assert_eq!(clamp_max_audio_seconds(61), 60);
        assert_eq!(clamp_max_audio_seconds(45), 45);
    }

    #[test]
    fn clamps_thresholds_to_unit_band() {
        assert_eq!(clamp_unit(0.0), 0.05);
        assert_eq!(clamp_unit(1.0), 0.95);
        assert_eq!(clamp_unit(0.5), 0.5);
    }
}
