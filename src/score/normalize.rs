//! Idempotent score normalization: string-coerced track names, rounded
//! timing, content-hash ids, and a canonical note ordering.
//!
//! Grounded on `core/score_models.py`'s `normalize_score` / `_sha1_short`.

use sha1::{Digest, Sha1};
use std::collections::HashMap;

use super::model::{NoteEvent, Score, Track};

/// Normalize a score in place of returning a fresh one: coerce names,
/// round timing, assign stable ids, and sort notes.
///
/// `normalize(normalize(x)) == normalize(x)` — rounding and id derivation
/// are both pure functions of already-normalized fields, so a second pass
/// is a no-op.
pub fn normalize(score: &Score) -> Score {
    let mut tracks = Vec::with_capacity(score.tracks.len());

    for (index, track) in score.tracks.iter().enumerate() {
        let name = coerce_track_name(&track.name, index);
        let mut seen: HashMap<String, u32> = HashMap::new();

        let mut notes: Vec<NoteEvent> = track
            .notes
            .iter()
            .map(|note| round_note(note))
            .collect();

        for note in notes.iter_mut() {
            let base = note_hash_base(&name, note);
            note.id = Some(stable_id("n_", &base, 12, &mut seen));
        }

        notes.sort_by(|a, b| {
            (a.start, a.pitch, a.duration, a.velocity, a.id.clone()).partial_cmp(&(
                b.start,
                b.pitch,
                b.duration,
                b.velocity,
                b.id.clone(),
            )).unwrap_or(std::cmp::Ordering::Equal)
        });

        let track_hash_base = format!(
            "{name}|{}|{}|{}",
            track.program.map(|p| p.to_string()).unwrap_or_default(),
            track.channel.map(|c| c.to_string()).unwrap_or_default(),
            index
        );
        let mut track_seen: HashMap<String, u32> = HashMap::new();
        let id = Some(stable_id("t_", &track_hash_base, 10, &mut track_seen));

        tracks.push(Track {
            id,
            name,
            program: track.program,
            channel: track.channel,
            notes,
        });
    }

    Score {
        version: score.version,
        tempo_bpm: score.tempo_bpm,
        time_signature: score.time_signature.clone(),
        tracks,
    }
}

fn coerce_track_name(name: &str, index: usize) -> String {
    if name.trim().is_empty() {
        format!("Trackk{index}")
    } else {
        name.to_string()
    }
}

fn round6(v: f64) -> f64 {
    (v * 1_000_000.0).round() / 1_000_000.0
}

fn round_note(note: &NoteEvent) -> NoteEvent {
    NoteEvent {
        id: note.id.clone(),
        pitch: note.pitch,
        start: round6(note.start),
        duration: round6(note.duration),
        velocity: note.velocity,
    }
}

fn note_hash_base(track_name: &str, note: &NoteEvent) -> String {
    format!(
        "{track_name}|{}|{}|{}|{}",
        note.pitch, note.start, note.duration, note.velocity
    )
}

/// A truncated SHA-1 hex digest of `base`, disambiguated with an
/// occurrence counter so within-track collisions still get distinct ids,
/// matching `_sha1_short` + the `seen` dict in the original normalizer.
fn stable_id(prefix: &str, base: &str, len: usize, seen: &mut HashMap<String, u32>) -> String {
    let count = seen.entry(base.to_string()).or_insert(0);
    let disambiguated = if *count == 0 {
        base.to_string()
    } else {
        format!("{base}#{count}")
    };
    *count += 1;

    let mut hasher = Sha1::new();
    hasher.update(disambiguated.as_bytes());
    let digest = hasher.finalize();
    let hex = hex::encode(digest);
    format!("{prefix}{}", &hex[..len.min(hex.len())])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::score::model::NoteEvent as NE;

    fn score_with_one_track() -> Score {
        Score {
            version: 1,
            tempo_bpm: 120.0,
            time_signature: "4/4".into(),
            tracks: vec![Track {
                id: None,
                name: "".into(),
                program: None,
                channel: None,
                notes: vec![
                    NE::new(None, 64, 1.0, 0.5, 90).unwrap(),
                    NE::new(None, 60, 0.0, 0.5, 100).unwrap(),
                ],
            }],
        }
    }

    #[test]
    fn empty_name_falls_back_to_trackk_index() {
        let score = score_with_one_track();
        let normalized = normalize(&score);
        assert_eq!(normalized.tracks[0].name, "Trackk0");
    }

    #[test]
    fn notes_sorted_by_start_then_pitch() {
        let score = score_with_one_track();
        let normalized = normalize(&score);
        let notes = &normalized.tracks[0].notes;
        assert_eq!(notes[0].start, 0.0);
        assert_eq!(notes[1].start, 1.0);
    }

    #[test]
    fn every_track_and_note_gets_an_id() {
        let score = score_with_one_track();
        let normalized = normalize(&score);
        assert!(normalized.tracks[0].id.is_some());
        for note in &normalized.tracks[0].notes {
            assert!(note.id.is_some());
        }
    }

    #[test]
    fn normalize_is_idempotent() {
        let score = score_with_one_track();
        let once = normalize(&score);
        let twice = normalize(&once);
        assert_eq!(
            serde_json::to_string(&once).unwrap(),
            serde_json::to_string(&twice).unwrap()
        );
    }

    #[test]
    fn rounds_timing_to_six_decimals() {
        let mut score = score_with_one_track();
        score.tracks[0].notes[0].start = 1.0000004999;
        let normalized = normalize(&score);
        assert_eq!(normalized.tracks[0].notes[1].start, 1.0);
    }
}
