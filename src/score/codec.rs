//! MIDI ↔ Score conversion.
//!
//! The MIDI → Score direction is timing-lossless: it builds a piecewise
//! tempo map from every tempo-change event in the file (not just the first)
//! and integrates tick deltas against it, rather than assuming a single
//! tempo the way `core/score_convert.py`'s `music21`-based implementation
//! does. Built directly against `midly` (already a teacher dependency),
//! following the event-matching style of `audio_engine.rs`'s playback loop.

use std::collections::BTreeMap;

use midly::num::{u15, u24, u28, u4, u7};
use midly::{Header, MetaMessage, MidiMessage, Smf, Timing, Track as MidlyTrack, TrackEvent, TrackEventKind};

use crate::error::JobError;

use super::model::{NoteEvent, Score, Track};

const TICKS_PER_QUARTER: u16 = 480;
const DEFAULT_MICROS_PER_QUARTER: u32 = 500_000;

/// Parse raw SMF bytes into a canonical [`Score`].
pub fn midi_to_score(bytes: &[u8]) -> Result<Score, JobError> {
    let smf = Smf::parse(bytes)
        .map_err(|e| JobError::InvalidInput(format!("not a valid MIDI file: {e}")))?;

    let tpqn = match smf.header.timing {
        Timing::Metrical(tpqn) => tpqn.as_int() as u64,
        Timing::Timecode(..) => {
            return Err(JobError::InvalidInput(
                "timecode-based MIDI timing is not supported".into(),
            ))
        }
    };

    let mut tempo_map: Vec<(u64, u32)> = Vec::new();
    let mut time_signature: Option<(u8, u8)> = None;

    use impl_pending::Pending;

    // channel -> pitch -> queue of notes still sounding (FIFO pairing).
    let mut active: BTreeMap<(u8, u8), Vec<Pending>> = BTreeMap::new();
    let mut collected: BTreeMap<u8, Vec<(u64, u64, u8, u8, u64)>> = BTreeMap::new(); // channel -> (start,end,pitch,vel,seq)
    let mut last_program: BTreeMap<u8, u8> = BTreeMap::new();
    let mut program_at: BTreeMap<u8, u64> = BTreeMap::new();
    let mut sequence: u64 = 0;

    for track in smf.tracks.iter() {
        let mut abs_tick: u64 = 0;
        for event in track.iter() {
            abs_tick += event.delta.as_int() as u64;
            sequence += 1;

            match event.kind {
                TrackEventKind::Meta(MetaMessage::Tempo(tempo)) => {
                    tempo_map.push((abs_tick, tempo.as_int()));
                }
                TrackEventKind::Meta(MetaMessage::TimeSignature(num, den, _, _)) => {
                    if time_signature.is_none() {
                        time_signature = Some((num, 1u8 << den));
                    }
                }
                TrackEventKind::Midi { channel, message } => {
                    let channel = channel.as_int();
                    match message {
                        MidiMessage::NoteOn { key, vel } => {
                            let pitch = key.as_int();
                            let vel = vel.as_int();
                            if vel == 0 {
                                close_note(&mut active, &mut collected, channel, pitch, abs_tick);
                            } else {
                                active.entry((channel, pitch)).or_default().push(Pending {
                                    start_tick: abs_tick,
                                    velocity: vel,
                                    sequence,
                                });
                            }
                        }
                        MidiMessage::NoteOff { key, .. } => {
                            close_note(&mut active, &mut collected, channel, key.as_int(), abs_tick);
                        }
                        MidiMessage::ProgramChange { program } => {
                            let entry = program_at.entry(channel).or_insert(0);
                            if abs_tick >= *entry {
                                *entry = abs_tick;
                                last_program.insert(channel, program.as_int());
                            }
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
        }
    }

    if tempo_map.is_empty() {
        tempo_map.push((0, DEFAULT_MICROS_PER_QUARTER));
    }
    if tempo_map[0].0 != 0 {
        tempo_map.insert(0, (0, DEFAULT_MICROS_PER_QUARTER));
    }
    tempo_map.sort_by_key(|(tick, _)| *tick);
    tempo_map.dedup_by_key(|(tick, _)| *tick);

    let tick_to_seconds = |tick: u64| -> f64 { integrate_ticks(&tempo_map, tpqn, tick) };

    let mut tracks = Vec::new();
    let mut earliest_start = f64::MAX;
    let mut per_channel_notes: BTreeMap<u8, Vec<(f64, f64, u8, u8, u64)>> = BTreeMap::new();

    for (channel, notes) in collected {
        let mut converted = Vec::new();
        for (start_tick, end_tick, pitch, vel, seq) in notes {
            if end_tick <= start_tick {
                continue;
            }
            let start = tick_to_seconds(start_tick);
            let end = tick_to_seconds(end_tick);
            if start < earliest_start {
                earliest_start = start;
            }
            converted.push((start, end, pitch, vel, seq));
        }
        if !converted.is_empty() {
            per_channel_notes.insert(channel, converted);
        }
    }

    if earliest_start == f64::MAX {
        earliest_start = 0.0;
    }

    for (channel, notes) in per_channel_notes {
        let mut seq_events: Vec<(u64, NoteEvent)> = notes
            .into_iter()
            .map(|(start, end, pitch, vel, seq)| {
                let note = NoteEvent::new(
                    None,
                    pitch,
                    (start - earliest_start).max(0.0),
                    end - start,
                    vel.max(1),
                )
                .expect("midi-derived note satisfies NoteEvent invariants");
                (seq, note)
            })
            .collect();

        // Ties broken by original sequence: `collected` interleaves notes
        // from different MIDI tracks in track-processing order, not true
        // chronological order, so the retained `seq` is what actually
        // disambiguates equal-start notes.
        seq_events.sort_by(|(seq_a, a), (seq_b, b)| {
            a.start
                .partial_cmp(&b.start)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(seq_a.cmp(seq_b))
        });
        let events: Vec<NoteEvent> = seq_events.into_iter().map(|(_, note)| note).collect();

        tracks.push(Track {
            id: None,
            name: format!("Channel {channel}"),
            program: last_program.get(&channel).copied(),
            channel: Some(channel),
            notes: events,
        });
    }

    let initial_bpm = 60_000_000.0 / tempo_map[0].1 as f64;
    let (num, den) = time_signature.unwrap_or((4, 4));

    Ok(Score {
        version: 1,
        tempo_bpm: initial_bpm,
        time_signature: format!("{num}/{den}"),
        tracks,
    })
}

fn close_note(
    active: &mut BTreeMap<(u8, u8), Vec<impl_pending::Pending>>,
    collected: &mut BTreeMap<u8, Vec<(u64, u64, u8, u8, u64)>>,
    channel: u8,
    pitch: u8,
    end_tick: u64,
) {
    if let Some(queue) = active.get_mut(&(channel, pitch)) {
        if !queue.is_empty() {
            let pending = queue.remove(0);
            collected.entry(channel).or_default().push((
                pending.start_tick,
                end_tick,
                pitch,
                pending.velocity,
                pending.sequence,
            ));
        }
    }
}

mod impl_pending {
    pub struct Pending {
        pub start_tick: u64,
        pub velocity: u8,
        pub sequence: u64,
    }
}

fn integrate_ticks(tempo_map: &[(u64, u32)], tpqn: u64, target_tick: u64) -> f64 {
    let mut seconds = 0.0_f64;
    for window in tempo_map.windows(2) {
        let (tick_a, micros_a) = window[0];
        let (tick_b, _) = window[1];
        if target_tick <= tick_a {
            break;
        }
        let segment_end = target_tick.min(tick_b);
        let ticks = segment_end.saturating_sub(tick_a);
        seconds += ticks as f64 * micros_a as f64 / 1_000_000.0 / tpqn as f64;
        if target_tick <= tick_b {
            return seconds;
        }
    }
    if let Some(&(last_tick, last_micros)) = tempo_map.last() {
        if target_tick > last_tick {
            let ticks = target_tick - last_tick;
            seconds += ticks as f64 * last_micros as f64 / 1_000_000.0 / tpqn as f64;
        }
    }
    seconds
}

/// Write a canonical [`Score`] out as Standard MIDI File bytes.
pub fn score_to_midi(score: &Score) -> Result<Vec<u8>, JobError> {
    if score.tempo_bpm <= 0.0 {
        return Err(JobError::InvalidInput("tempo_bpm must be positive".into()));
    }

    let micros_per_quarter = (60_000_000.0 / score.tempo_bpm).round().clamp(1.0, 16_777_215.0) as u32;
    let (ts_num, ts_den) = parse_time_signature(&score.time_signature)?;

    // A conductor track is always written in addition to the score's own
    // tracks below, so the file always has `1 + score.tracks.len()` `MTrk`
    // chunks; format 0 (single track) is only conformant when that total is
    // exactly one, i.e. when there are no score tracks at all.
    let format = if score.tracks.is_empty() {
        midly::Format::SingleTrack
    } else {
        midly::Format::Parallel
    };

    let header = Header {
        format,
        timing: Timing::Metrical(u15::from(TICKS_PER_QUARTER)),
    };

    let mut tracks: Vec<MidlyTrack> = Vec::new();
    let mut conductor: MidlyTrack = Vec::new();
    conductor.push(TrackEvent {
        delta: u28::from(0),
        kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::from(micros_per_quarter))),
    });
    conductor.push(TrackEvent {
        delta: u28::from(0),
        kind: TrackEventKind::Meta(MetaMessage::TimeSignature(ts_num, ts_den.trailing_zeros() as u8, 24, 8)),
    });
    conductor.push(TrackEvent {
        delta: u28::from(0),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });
    tracks.push(conductor);

    let seconds_per_tick = (60.0 / score.tempo_bpm) / TICKS_PER_QUARTER as f64;

    for (index, track) in score.tracks.iter().enumerate() {
        let channel = u4::from(track.channel.unwrap_or((index % 16) as u8));

        let mut notes = track.notes.clone();
        notes.sort_by(|a, b| {
            (a.start, a.pitch, a.duration)
                .partial_cmp(&(b.start, b.pitch, b.duration))
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        #[derive(Clone, Copy)]
        enum Ev {
            On(u8, u8),
            Off(u8),
        }

        let mut timed: Vec<(u64, u8, Ev)> = Vec::new();
        for note in &notes {
            let start_tick = (note.start / seconds_per_tick).round() as u64;
            let end_tick = ((note.start + note.duration) / seconds_per_tick).round() as u64;
            let end_tick = end_tick.max(start_tick + 1);
            timed.push((start_tick, 0, Ev::On(note.pitch, note.velocity)));
            timed.push((end_tick, 1, Ev::Off(note.pitch)));
        }
        // note-offs sort before note-ons at equal tick (priority 1 vs 0 reversed: we want offs first)
        timed.sort_by_key(|(tick, priority, _)| (*tick, std::cmp::Reverse(*priority)));

        let mut midly_track: MidlyTrack = Vec::new();
        if let Some(program) = track.program {
            midly_track.push(TrackEvent {
                delta: u28::from(0),
                kind: TrackEventKind::Midi {
                    channel,
                    message: MidiMessage::ProgramChange {
                        program: u7::from(program.min(127)),
                    },
                },
            });
        }

        let mut last_tick = 0u64;
        for (tick, _, ev) in timed {
            let delta = tick.saturating_sub(last_tick);
            last_tick = tick;
            let message = match ev {
                Ev::On(pitch, vel) => MidiMessage::NoteOn {
                    key: u7::from(pitch.min(127)),
                    vel: u7::from(vel.clamp(1, 127)),
                },
                Ev::Off(pitch) => MidiMessage::NoteOff {
                    key: u7::from(pitch.min(127)),
                    vel: u7::from(0),
                },
            };
            midly_track.push(TrackEvent {
                delta: u28::from(delta as u32),
                kind: TrackEventKind::Midi { channel, message },
            });
        }
        midly_track.push(TrackEvent {
            delta: u28::from(0),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        });
        tracks.push(midly_track);
    }

    let smf = Smf { header, tracks };
    let mut buf = Vec::new();
    smf.write(&mut buf)
        .map_err(|e| JobError::InvalidInput(format!("failed to write MIDI: {e}")))?;
    Ok(buf)
}

fn parse_time_signature(raw: &str) -> Result<(u8, u8), JobError> {
    let (num, den) = raw
        .split_once('/')
        .ok_or_else(|| JobError::InvalidInput(format!("invalid time signature: {raw}")))?;
    let num: u8 = num
        .trim()
        .parse()
        .map_err(|_| JobError::InvalidInput(format!("invalid time signature: {raw}")))?;
    let den: u8 = den
        .trim()
        .parse()
        .map_err(|_| JobError::InvalidInput(format!("invalid time signature: {raw}")))?;
    if !den.is_power_of_two() || den == 0 {
        return Err(JobError::InvalidInput(format!(
            "time signature denominator must be a power of two: {raw}"
        )));
    }
    Ok((num, den))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::score::model::NoteEvent as NE;

    fn simple_score() -> Score {
        Score {
            version: 1,
            tempo_bpm: 120.0,
            time_signature: "4/4".into(),
            tracks: vec![Track {
                id: None,
                name: "lead".into(),
                program: Some(0),
                channel: Some(0),
                notes: vec![
                    NE::new(None, 60, 0.0, 0.5, 90).unwrap(),
                    NE::new(None, 64, 0.5, 0.5, 90).unwrap(),
                ],
            }],
        }
    }

    #[test]
    fn score_to_midi_starts_with_mthd_header() {
        let bytes = score_to_midi(&simple_score()).unwrap();
        assert_eq!(&bytes[0..4], b"MThd");
    }

    #[test]
    fn single_tempo_round_trip_preserves_notes() {
        let score = simple_score();
        let bytes = score_to_midi(&score).unwrap();
        let round_tripped = midi_to_score(&bytes).unwrap();

        let mut original: Vec<(u8, f64, f64)> = score.tracks[0]
            .notes
            .iter()
            .map(|n| (n.pitch, round3(n.start), round3(n.duration)))
            .collect();
        let mut after: Vec<(u8, f64, f64)> = round_tripped
            .tracks
            .iter()
            .flat_map(|t| t.notes.iter())
            .map(|n| (n.pitch, round3(n.start), round3(n.duration)))
            .collect();
        original.sort_by(|a, b| a.partial_cmp(b).unwrap());
        after.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(original, after);
    }

    fn round3(v: f64) -> f64 {
        (v * 1000.0).round() / 1000.0
    }

    #[test]
    fn rejects_non_midi_bytes() {
        let result = midi_to_score(b"not a midi file");
        assert!(result.is_err());
    }

    #[test]
    fn parse_time_signature_rejects_non_power_of_two() {
        assert!(parse_time_signature("4/3").is_err());
        assert!(parse_time_signature("3/4").is_ok());
    }
}
