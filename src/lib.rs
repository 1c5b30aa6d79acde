//! Asynchronous job orchestration, canonical score model, and MIDI codec
//! for humming-to-song rendering.
//!
//! The crate is organized around the data flow of one submission: an HTTP
//! handler creates a [`job_store::JobStore`] entry, the
//! [`orchestrator::Orchestrator`] drives it through [`stages`] adapters,
//! and [`score`] provides the canonical, editable representation clients
//! round-trip through `score`/`render` endpoints.

pub mod error;
pub mod http;
pub mod job;
pub mod job_store;
pub mod orchestrator;
pub mod score;
pub mod settings;
pub mod stages;
