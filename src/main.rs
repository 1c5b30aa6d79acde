//! Binary entry point: loads settings, sets up logging, assembles the
//! router and serves it with graceful shutdown.
//!
//! Grounded on `harmonia.rs`'s `setup_logging_system` and `main` — a daily
//! rolling log file via `tracing-appender`, an `EnvFilter`-driven console +
//! file layer pair, and `axum::serve(...).with_graceful_shutdown(...)` over
//! ctrl-c/SIGTERM.

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

use hum2song_core::http::{build_router, AppState};
use hum2song_core::job_store::JobStore;
use hum2song_core::orchestrator::Orchestrator;
use hum2song_core::settings::Settings;
use hum2song_core::stages::stub::StubAdapters;
use hum2song_core::stages::subprocess::{SubprocessAdapters, SubprocessConfig};
use hum2song_core::stages::StageAdapters;

fn setup_logging_system(log_dir: &std::path::Path) -> tracing_appender::non_blocking::WorkerGuard {
    let log_file_appender = tracing_appender::rolling::daily(log_dir, "hum2song-core.log");
    let (log_file_appender, guard) = tracing_appender::non_blocking(log_file_appender);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hum2song_core=info,tower_http=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer().and_then(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(log_file_appender),
            ),
        )
        .init();

    guard
}

fn build_stage_adapters(settings: &Settings) -> Arc<dyn StageAdapters> {
    if settings.use_stub_converter {
        Arc::new(StubAdapters)
    } else {
        Arc::new(SubprocessAdapters::new(SubprocessConfig {
            preprocess_cmd: std::env::var("PREPROCESS_CMD")
                .unwrap_or_else(|_| "hum2song-preprocess".to_string())
                .into(),
            transcribe_cmd: std::env::var("TRANSCRIBE_CMD")
                .unwrap_or_else(|_| "hum2song-transcribe".to_string())
                .into(),
            synthesize_cmd: std::env::var("SYNTHESIZE_CMD")
                .unwrap_or_else(|_| "hum2song-synthesize".to_string())
                .into(),
        }))
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    let settings = Settings::from_env();
    let _guard = setup_logging_system(&settings.log_dir);

    tracing::info!(
        app_env = ?settings.app_env,
        use_stub_converter = settings.use_stub_converter,
        worker_pool_size = settings.worker_pool_size,
        "starting up"
    );

    let job_store = Arc::new(JobStore::new());
    let stages = build_stage_adapters(&settings);
    let settings = Arc::new(settings);
    let orchestrator = Orchestrator::new(job_store.clone(), stages.clone(), settings.clone());

    let state = Arc::new(AppState {
        job_store,
        orchestrator,
        settings: settings.clone(),
        stages,
    });

    let app = build_router(state);

    let addr: SocketAddr = match format!("{}:{}", settings.host, settings.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!(error = %e, "invalid HOST/PORT configuration");
            return ExitCode::FAILURE;
        }
    };

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, %addr, "failed to bind HTTP listener");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(%addr, "listening");

    let shutdown = async {
        let ctrl_c = async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install CTRL-C handler")
        };

        #[cfg(unix)]
        let terminate = async {
            use tokio::signal::unix::{signal, SignalKind};
            signal(SignalKind::terminate())
                .expect("failed to install terminate signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    };

    if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown).await {
        tracing::error!(error = %e, "server error");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
