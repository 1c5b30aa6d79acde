//! Shared application state handed to every handler via axum's `State`
//! extractor, mirroring the teacher's `Arc<AppState>` shape in
//! `harmonia.rs`.

use std::sync::Arc;

use crate::job_store::JobStore;
use crate::orchestrator::Orchestrator;
use crate::settings::Settings;
use crate::stages::StageAdapters;

/// Everything a handler needs: the job store, the orchestrator, and the
/// immutable settings snapshot.
#[derive(Clone)]
pub struct AppState {
    /// Single source of truth for job state.
    pub job_store: Arc<JobStore>,
    /// Dispatches and tracks background pipeline runs.
    pub orchestrator: Orchestrator,
    /// Immutable process-wide configuration.
    pub settings: Arc<Settings>,
    /// Stage adapters, used directly by the `render` handler for an
    /// on-demand synthesize without going through the full orchestrator
    /// pipeline.
    pub stages: Arc<dyn StageAdapters>,
}
