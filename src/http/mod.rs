//! The HTTP surface: router assembly and request handlers.
//!
//! Router construction follows `harmonia.rs`'s
//! `Router::new().route(...).layer(TraceLayer::new_for_http()...)
//! .with_state(app_state)` shape, with JSON handlers in place of the
//! teacher's `maud`-rendered HTML.

pub mod error;
pub mod handlers;
pub mod state;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

pub use state::AppState;

/// Build the fully-assembled router for the given application state.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/generate", post(handlers::generate))
        .route("/tasks/:id", get(handlers::get_task))
        .route("/tasks/:id/download", get(handlers::download))
        .route(
            "/tasks/:id/score",
            get(handlers::get_score).put(handlers::put_score),
        )
        .route("/tasks/:id/render", post(handlers::render))
        .route("/export/midi", post(handlers::export_midi))
        .fallback(handlers::not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
