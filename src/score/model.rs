//! The canonical, seconds-based score types: [`Score`], [`Track`],
//! [`NoteEvent`].
//!
//! Grounded on `core/score_models.py`'s pydantic models — same fields, same
//! defaults, same `duration <= 0` rejection — translated to `serde`.

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A full score: one tempo/time-signature pair and an ordered list of
/// tracks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    /// Schema version; currently always 1.
    #[serde(default = "default_version")]
    pub version: u32,
    /// Tempo in beats per minute; must be positive.
    #[serde(default = "default_tempo_bpm")]
    pub tempo_bpm: f64,
    /// Time signature as `"N/D"`.
    #[serde(default = "default_time_signature")]
    pub time_signature: String,
    /// Ordered tracks.
    #[serde(default)]
    pub tracks: Vec<Track>,
}

fn default_version() -> u32 {
    1
}

fn default_tempo_bpm() -> f64 {
    120.0
}

fn default_time_signature() -> String {
    "4/4".to_string()
}

impl Default for Score {
    fn default() -> Self {
        Score {
            version: default_version(),
            tempo_bpm: default_tempo_bpm(),
            time_signature: default_time_signature(),
            tracks: Vec::new(),
        }
    }
}

/// One instrument line within a [`Score`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// Stable identifier, assigned by the normalizer if absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Human-readable name; accepts a JSON string or number on input and is
    /// coerced to `String`, matching the original's `Union[str, int]`
    /// widening for tolerant editor round-trips.
    #[serde(deserialize_with = "deserialize_name", default = "default_name")]
    pub name: String,
    /// General MIDI program number, `0..=127`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program: Option<u8>,
    /// MIDI channel, `0..=15`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<u8>,
    /// This track's notes.
    #[serde(default)]
    pub notes: Vec<NoteEvent>,
}

fn default_name() -> String {
    String::new()
}

fn deserialize_name<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    struct NameVisitor;

    impl<'de> Visitor<'de> for NameVisitor {
        type Value = String;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a string or a number")
        }

        fn visit_str<E>(self, v: &str) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_string<E>(self, v: String) -> Result<String, E> {
            Ok(v)
        }

        fn visit_i64<E>(self, v: i64) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_u64<E>(self, v: u64) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_f64<E>(self, v: f64) -> Result<String, E> {
            Ok(v.to_string())
        }
    }

    deserializer.deserialize_any(NameVisitor)
}

/// A single note within a [`Track`].
///
/// Deserialization enforces `duration > 0`, `start >= 0`, `pitch <= 127`
/// and `velocity` in `1..=127` up front, so a `NoteEvent` value is, by
/// construction, one that satisfies the invariants spec'd for it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NoteEvent {
    /// Stable identifier, assigned by the normalizer if absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// MIDI pitch, `0..=127`.
    pub pitch: u8,
    /// Onset time in seconds, `>= 0`.
    pub start: f64,
    /// Duration in seconds, `> 0`.
    pub duration: f64,
    /// MIDI velocity, `1..=127`.
    pub velocity: u8,
}

impl NoteEvent {
    /// Build a note, enforcing the same invariants deserialization does.
    pub fn new(
        id: Option<String>,
        pitch: u8,
        start: f64,
        duration: f64,
        velocity: u8,
    ) -> Result<Self, String> {
        if pitch > 127 {
            return Err(format!("pitch {pitch} out of range [0,127]"));
        }
        if start < 0.0 {
            return Err(format!("start {start} must be non-negative"));
        }
        if duration <= 0.0 {
            return Err(format!("duration {duration} must be positive"));
        }
        if !(1..=127).contains(&velocity) {
            return Err(format!("velocity {velocity} out of range [1,127]"));
        }
        Ok(NoteEvent {
            id,
            pitch,
            start,
            duration,
            velocity,
        })
    }
}

#[derive(Deserialize)]
struct RawNoteEvent {
    id: Option<String>,
    pitch: u8,
    start: f64,
    duration: f64,
    #[serde(default = "default_velocity")]
    velocity: u8,
}

fn default_velocity() -> u8 {
    64
}

impl<'de> Deserialize<'de> for NoteEvent {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = RawNoteEvent::deserialize(deserializer)?;
        NoteEvent::new(raw.id, raw.pitch, raw.start, raw.duration, raw.velocity)
            .map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_event_rejects_nonpositive_duration() {
        let err = NoteEvent::new(None, 60, 0.0, 0.0, 64);
        assert!(err.is_err());
    }

    #[test]
    fn note_event_rejects_out_of_range_velocity() {
        assert!(NoteEvent::new(None, 60, 0.0, 1.0, 0).is_err());
        assert!(NoteEvent::new(None, 60, 0.0, 1.0, 128).is_err());
    }

    #[test]
    fn track_name_accepts_numeric_json() {
        let track: Track = serde_json::from_str(r#"{"name": 3, "notes": []}"#).unwrap();
        assert_eq!(track.name, "3");
    }

    #[test]
    fn note_deserialization_defaults_velocity() {
        let note: NoteEvent =
            serde_json::from_str(r#"{"pitch": 60, "start": 0.0, "duration": 1.0}"#).unwrap();
        assert_eq!(note.velocity, 64);
    }

    #[test]
    fn note_deserialization_rejects_zero_duration() {
        let result: Result<NoteEvent, _> =
            serde_json::from_str(r#"{"pitch": 60, "start": 0.0, "duration": 0.0}"#);
        assert!(result.is_err());
    }
}
