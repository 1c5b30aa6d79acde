//! The simplified "flattened" score shape accepted by `/export/midi`,
//! grounded on `routers/export.py`'s flattened-body contract.

use serde::Deserialize;

use crate::error::JobError;

use super::model::{NoteEvent, Score, Track};

/// One note in the flattened wire shape: seconds-based timing, no ids.
#[derive(Debug, Clone, Deserialize)]
pub struct FlattenedNote {
    /// MIDI pitch, `0..=127`.
    pub pitch: u8,
    /// Onset, in seconds.
    #[serde(rename = "startSec")]
    pub start_sec: f64,
    /// Duration, in seconds.
    #[serde(rename = "durationSec")]
    pub duration_sec: f64,
    /// Optional velocity; defaults to 64.
    pub velocity: Option<u8>,
}

/// One track in the flattened wire shape.
#[derive(Debug, Clone, Deserialize)]
pub struct FlattenedTrack {
    /// Optional caller-supplied track identifier, used as the track name.
    #[serde(rename = "trackId")]
    pub track_id: Option<String>,
    /// This track's notes.
    pub notes: Vec<FlattenedNote>,
}

/// The flattened request body accepted by `POST /export/midi`.
#[derive(Debug, Clone, Deserialize)]
pub struct FlattenedScore {
    /// Tempo in beats per minute; must be positive.
    pub bpm: f64,
    /// Tracks, each a flat list of notes.
    pub tracks: Vec<FlattenedTrack>,
}

/// Convert a flattened body into a canonical [`Score`].
///
/// Contract: `bpm > 0`, and every note must carry `pitch`, `startSec`,
/// `durationSec`. Velocity defaults to 64; the produced score's time
/// signature always defaults to `"4/4"` (the flattened shape carries no
/// time signature of its own).
pub fn flattened_to_score(flattened: &FlattenedScore) -> Result<Score, JobError> {
    if flattened.bpm <= 0.0 {
        return Err(JobError::InvalidInput("bpm must be positive".into()));
    }

    let mut tracks = Vec::with_capacity(flattened.tracks.len());
    for (index, track) in flattened.tracks.iter().enumerate() {
        let mut notes = Vec::with_capacity(track.notes.len());
        for note in &track.notes {
            let velocity = note.velocity.unwrap_or(64);
            let note = NoteEvent::new(None, note.pitch, note.start_sec, note.duration_sec, velocity)
                .map_err(JobError::InvalidInput)?;
            notes.push(note);
        }

        tracks.push(Track {
            id: None,
            name: track
                .track_id
                .clone()
                .unwrap_or_else(|| format!("Trackk{index}")),
            program: None,
            channel: None,
            notes,
        });
    }

    Ok(Score {
        version: 1,
        tempo_bpm: flattened.bpm,
        time_signature: "4/4".to_string(),
        tracks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_nonpositive_bpm() {
        let flattened = FlattenedScore {
            bpm: 0.0,
            tracks: vec![],
        };
        assert!(flattened_to_score(&flattened).is_err());
    }

    #[test]
    fn converts_notes_with_default_velocity() {
        let flattened = FlattenedScore {
            bpm: 100.0,
            tracks: vec![FlattenedTrack {
                track_id: Some("lead".into()),
                notes: vec![FlattenedNote {
                    pitch: 60,
                    start_sec: 0.0,
                    duration_sec: 1.0,
                    velocity: None,
                }],
            }],
        };
        let score = flattened_to_score(&flattened).unwrap();
        assert_eq!(score.tracks[0].notes[0].velocity, 64);
        assert_eq!(score.tracks[0].name, "lead");
    }

    #[test]
    fn rejects_invalid_note_durations() {
        let flattened = FlattenedScore {
            bpm: 100.0,
            tracks: vec![FlattenedTrack {
                track_id: None,
                notes: vec![FlattenedNote {
                    pitch: 60,
                    start_sec: 0.0,
                    duration_sec: 0.0,
                    velocity: None,
                }],
            }],
        };
        assert!(flattened_to_score(&flattened).is_err());
    }
}
