//! The score optimizer: a `safe` preset that only ever drops invalid notes,
//! and a `strong` preset that quantizes, clamps, merges and reduces to
//! monophony.
//!
//! `core/score_optimize.py` implements the always-on quantize+clamp+merge
//! pipeline this module generalizes; the `safe`/`strong` split, noise-note
//! drop and monophonic reduction are supplemented per this system's
//! optimizer contract, built in the same dataclass-configured style as the
//! original `OptimizeConfig`.

use super::model::{NoteEvent, Score, Track};

/// Which quantization rounding rule to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantizeMode {
    /// Round to the nearest grid line.
    Nearest,
    /// Round down to the grid line at or before the note.
    Floor,
    /// Round up to the grid line at or after the note.
    Ceil,
}

/// Which named behavior bundle to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    /// Never changes ordering or timing, never drops, merges, or
    /// re-velocities notes; only removes notes that violate the
    /// [`NoteEvent`] invariants outright.
    Safe,
    /// Applies every configured transformation.
    Strong,
}

/// The optimizer's tunable knobs. `core/score_optimize.py`'s
/// `OptimizeConfig` is this struct's direct ancestor, supplemented with
/// `noise_min_*` and `make_monophonic`.
#[derive(Debug, Clone)]
pub struct OptimizeConfig {
    /// Which bundle of behaviors to run.
    pub preset: Preset,
    /// Grid subdivisions per beat; `0` disables quantization.
    pub grid_div: u32,
    /// Rounding rule used when quantizing.
    pub quantize_mode: QuantizeMode,
    /// Optional lower pitch clamp.
    pub min_pitch: Option<u8>,
    /// Optional upper pitch clamp.
    pub max_pitch: Option<u8>,
    /// When set, every note's velocity is forced to this value.
    pub velocity_target: Option<u8>,
    /// Notes shorter than this (seconds) are dropped; `0.0` disables.
    pub noise_min_duration: f64,
    /// Notes quieter than this velocity are dropped; `0` disables.
    pub noise_min_velocity: u8,
    /// Merge same-pitch notes that overlap or are within
    /// `merge_gap_tolerance` of each other.
    pub merge_same_pitch_overlaps: bool,
    /// Gap tolerance (seconds) used by the same-pitch merge.
    pub merge_gap_tolerance: f64,
    /// Trim/drop overlaps so each track plays at most one note at a time.
    pub make_monophonic: bool,
}

impl Default for OptimizeConfig {
    fn default() -> Self {
        OptimizeConfig {
            preset: Preset::Safe,
            grid_div: 4,
            quantize_mode: QuantizeMode::Nearest,
            min_pitch: Some(48),
            max_pitch: Some(84),
            velocity_target: None,
            noise_min_duration: 0.0,
            noise_min_velocity: 0,
            merge_same_pitch_overlaps: true,
            merge_gap_tolerance: 0.02,
            make_monophonic: false,
        }
    }
}

/// Run the configured preset against `score`, returning a fresh, optimized
/// score.
pub fn optimize(score: &Score, config: &OptimizeConfig) -> Score {
    let tracks = score
        .tracks
        .iter()
        .map(|track| optimize_track(track, score.tempo_bpm, config))
        .collect();

    Score {
        version: score.version,
        tempo_bpm: score.tempo_bpm,
        time_signature: score.time_signature.clone(),
        tracks,
    }
}

fn optimize_track(track: &Track, tempo_bpm: f64, config: &OptimizeConfig) -> Track {
    let mut notes: Vec<NoteEvent> = track.notes.clone();

    match config.preset {
        Preset::Safe => {
            // Safe never reorders, merges, quantizes, or re-velocities; it
            // only removes notes that are already invalid.
            notes.retain(|n| n.duration > 0.0 && n.start >= 0.0);
        }
        Preset::Strong => {
            if let Some(min_pitch) = config.min_pitch {
                for n in notes.iter_mut() {
                    n.pitch = n.pitch.max(min_pitch);
                }
            }
            if let Some(max_pitch) = config.max_pitch {
                for n in notes.iter_mut() {
                    n.pitch = n.pitch.min(max_pitch);
                }
            }
            if let Some(target) = config.velocity_target {
                for n in notes.iter_mut() {
                    n.velocity = target;
                }
            }

            if config.grid_div > 0 {
                let step = (60.0 / tempo_bpm) / config.grid_div as f64;
                for n in notes.iter_mut() {
                    let start = quantize_time(n.start, step, config.quantize_mode);
                    let mut end = quantize_time(n.start + n.duration, step, config.quantize_mode);
                    if end <= start {
                        end = start + step;
                    }
                    n.start = start;
                    n.duration = end - start;
                }
            }

            if config.noise_min_duration > 0.0 || config.noise_min_velocity > 0 {
                notes.retain(|n| {
                    n.duration >= config.noise_min_duration
                        && n.velocity >= config.noise_min_velocity
                });
            }

            notes.sort_by(|a, b| {
                (a.pitch, a.start, a.duration, a.velocity)
                    .partial_cmp(&(b.pitch, b.start, b.duration, b.velocity))
                    .unwrap_or(std::cmp::Ordering::Equal)
            });

            if config.merge_same_pitch_overlaps {
                notes = merge_same_pitch_overlaps(notes, config.merge_gap_tolerance);
            }

            if config.make_monophonic {
                notes = make_monophonic(notes);
            }
        }
    }

    notes.sort_by(|a, b| {
        (a.start, a.pitch)
            .partial_cmp(&(b.start, b.pitch))
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    Track {
        id: track.id.clone(),
        name: track.name.clone(),
        program: track.program,
        channel: track.channel,
        notes,
    }
}

fn quantize_time(t: f64, step: f64, mode: QuantizeMode) -> f64 {
    if step <= 0.0 {
        return t;
    }
    let units = t / step;
    let rounded = match mode {
        QuantizeMode::Nearest => units.round(),
        QuantizeMode::Floor => units.floor(),
        QuantizeMode::Ceil => units.ceil(),
    };
    rounded * step
}

fn merge_same_pitch_overlaps(notes: Vec<NoteEvent>, gap_tolerance: f64) -> Vec<NoteEvent> {
    let mut by_pitch: std::collections::BTreeMap<u8, Vec<NoteEvent>> =
        std::collections::BTreeMap::new();
    for note in notes {
        by_pitch.entry(note.pitch).or_default().push(note);
    }

    let mut merged = Vec::new();
    for (_, mut group) in by_pitch {
        group.sort_by(|a, b| a.start.partial_cmp(&b.start).unwrap_or(std::cmp::Ordering::Equal));
        let mut current: Option<NoteEvent> = None;
        for note in group {
            match current.take() {
                None => current = Some(note),
                Some(mut acc) => {
                    let acc_end = acc.start + acc.duration;
                    let note_end = note.start + note.duration;
                    if note.start <= acc_end + gap_tolerance {
                        let new_start = acc.start.min(note.start);
                        let new_end = acc_end.max(note_end);
                        acc.start = new_start;
                        acc.duration = new_end - new_start;
                        acc.velocity = acc.velocity.max(note.velocity);
                        acc.id = None;
                        current = Some(acc);
                    } else {
                        merged.push(acc);
                        current = Some(note);
                    }
                }
            }
        }
        if let Some(last) = current {
            merged.push(last);
        }
    }
    merged
}

fn make_monophonic(mut notes: Vec<NoteEvent>) -> Vec<NoteEvent> {
    notes.sort_by(|a, b| {
        (a.start, std::cmp::Reverse(a.velocity))
            .partial_cmp(&(b.start, std::cmp::Reverse(b.velocity)))
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut result = Vec::new();
    let mut last_end = 0.0_f64;
    for mut note in notes {
        let end = note.start + note.duration;
        if end <= last_end {
            continue;
        }
        if note.start < last_end {
            note.duration = end - last_end;
            note.start = last_end;
        }
        last_end = note.start + note.duration;
        result.push(note);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::score::model::NoteEvent as NE;

    fn track_with_notes(notes: Vec<NoteEvent>) -> Track {
        Track {
            id: None,
            name: "t".into(),
            program: None,
            channel: None,
            notes,
        }
    }

    #[test]
    fn safe_preset_preserves_count_and_order_for_valid_notes() {
        let notes = vec![
            NE::new(None, 60, 0.0, 0.5, 64).unwrap(),
            NE::new(None, 62, 0.5, 0.5, 64).unwrap(),
        ];
        let track = track_with_notes(notes.clone());
        let config = OptimizeConfig {
            preset: Preset::Safe,
            ..Default::default()
        };
        let optimized = optimize_track(&track, 120.0, &config);
        assert_eq!(optimized.notes.len(), notes.len());
        assert_eq!(optimized.notes[0].start, 0.0);
        assert_eq!(optimized.notes[1].start, 0.5);
    }

    #[test]
    fn strong_preset_clamps_pitch_range() {
        let notes = vec![NE::new(None, 10, 0.0, 0.5, 64).unwrap()];
        let track = track_with_notes(notes);
        let config = OptimizeConfig {
            preset: Preset::Strong,
            grid_div: 0,
            merge_same_pitch_overlaps: false,
            ..Default::default()
        };
        let optimized = optimize_track(&track, 120.0, &config);
        assert_eq!(optimized.notes[0].pitch, 48);
    }

    #[test]
    fn strong_preset_merges_overlapping_same_pitch_notes() {
        let notes = vec![
            NE::new(None, 60, 0.0, 1.0, 64).unwrap(),
            NE::new(None, 60, 0.5, 1.0, 100).unwrap(),
        ];
        let track = track_with_notes(notes);
        let config = OptimizeConfig {
            preset: Preset::Strong,
            grid_div: 0,
            min_pitch: None,
            max_pitch: None,
            ..Default::default()
        };
        let optimized = optimize_track(&track, 120.0, &config);
        assert_eq!(optimized.notes.len(), 1);
        assert_eq!(optimized.notes[0].start, 0.0);
        assert_eq!(optimized.notes[0].duration, 1.5);
        assert_eq!(optimized.notes[0].velocity, 100);
    }

    #[test]
    fn monophonic_reduction_drops_fully_covered_notes() {
        let notes = vec![
            NE::new(None, 60, 0.0, 2.0, 100).unwrap(),
            NE::new(None, 64, 0.5, 1.0, 90).unwrap(),
        ];
        let reduced = make_monophonic(notes);
        assert_eq!(reduced.len(), 1);
        assert_eq!(reduced[0].pitch, 60);
    }

    #[test]
    fn quantize_nearest_rounds_to_grid() {
        let step = 0.125;
        assert_eq!(quantize_time(0.07, step, QuantizeMode::Nearest), 0.125);
        assert_eq!(quantize_time(0.07, step, QuantizeMode::Floor), 0.0);
        assert_eq!(quantize_time(0.07, step, QuantizeMode::Ceil), 0.125);
    }
}
