//! The canonical score model, its normalizer, optimizer, and MIDI codec.

pub mod codec;
pub mod flatten;
pub mod model;
pub mod normalize;
pub mod optimize;

pub use flatten::{flattened_to_score, FlattenedScore};
pub use model::{NoteEvent, Score, Track};
pub use normalize::normalize;
pub use optimize::{optimize, OptimizeConfig, Preset, QuantizeMode};
pub use codec::{midi_to_score, score_to_midi};
