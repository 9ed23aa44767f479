// MIDI file decoding: raw SMF bytes -> tracks of timed notes

use std::collections::HashMap;
use std::path::Path;

use crate::melody::clamp_duration;

/// Error type for MIDI import
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid MIDI data: {0}")]
    Malformed(#[from] midly::Error),

    #[error("no playable tracks found")]
    NoTracks,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A decoded note, already converted to buzzer units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Note {
    /// Frequency in Hz (0 would be a rest; the decoder never emits one)
    pub frequency: u16,
    /// Sounding length in milliseconds, clamped to the playable range
    pub duration_ms: u32,
    /// Absolute onset in milliseconds from the start of the file
    pub start_ms: u32,
}

/// One MIDI track with at least one note. Immutable once decoded.
#[derive(Debug, Clone)]
pub struct Track {
    pub name: String,
    pub instrument: String,
    pub channel: u8,
    pub notes: Vec<Note>,
}

impl Track {
    /// End of the last note, in milliseconds (for panel display).
    pub fn total_ms(&self) -> u32 {
        self.notes
            .iter()
            .map(|n| n.start_ms + n.duration_ms)
            .max()
            .unwrap_or(0)
    }
}

/// Result of decoding one MIDI file.
#[derive(Debug, Clone)]
pub struct ImportedFile {
    pub tracks: Vec<Track>,
    pub tempo_bpm: u32,
    pub file_name: String,
}

#[derive(Debug, Clone, Copy)]
struct TempoEvent {
    tick: u64,
    microseconds_per_beat: u32,
}

/// Convert a tick position to milliseconds using the tempo map.
fn tick_to_ms(tick: u64, ticks_per_beat: u16, tempo_map: &[TempoEvent]) -> f64 {
    let tpb = ticks_per_beat as f64;
    let mut ms = 0.0;
    let mut last_tick = 0u64;
    let mut usec_per_beat = 500_000.0; // default 120 BPM

    for te in tempo_map {
        if te.tick >= tick {
            break;
        }
        let delta_ticks = (te.tick - last_tick) as f64;
        ms += (delta_ticks / tpb) * (usec_per_beat / 1_000.0);
        last_tick = te.tick;
        usec_per_beat = te.microseconds_per_beat as f64;
    }

    let delta_ticks = (tick - last_tick) as f64;
    ms + (delta_ticks / tpb) * (usec_per_beat / 1_000.0)
}

/// Equal-tempered frequency for a MIDI pitch number (A4 = 69 = 440 Hz).
pub fn pitch_to_frequency(pitch: u8) -> u16 {
    (440.0 * 2f64.powf((pitch as f64 - 69.0) / 12.0)).round() as u16
}

/// Decode a MIDI file from disk.
pub fn decode_file(path: &Path) -> Result<ImportedFile, DecodeError> {
    let data = std::fs::read(path)?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("melody.mid")
        .to_string();
    decode_bytes(&data, &file_name)
}

/// Decode a raw MIDI byte buffer into per-track note lists.
///
/// Tracks without any notes are dropped. Fails with `NoTracks` when nothing
/// playable remains, so the import flow can abort without partial state.
pub fn decode_bytes(data: &[u8], file_name: &str) -> Result<ImportedFile, DecodeError> {
    let smf = midly::Smf::parse(data)?;

    let mut ticks_per_beat: u16 = 480;
    if let midly::Timing::Metrical(tpb) = smf.header.timing {
        ticks_per_beat = tpb.as_int();
    }

    // First pass: collect the tempo map across all tracks (format 1 files
    // keep tempo in the conductor track).
    let mut tempo_map: Vec<TempoEvent> = Vec::new();
    for track in &smf.tracks {
        let mut current_tick: u64 = 0;
        for event in track {
            current_tick += event.delta.as_int() as u64;
            if let midly::TrackEventKind::Meta(midly::MetaMessage::Tempo(t)) = event.kind {
                tempo_map.push(TempoEvent {
                    tick: current_tick,
                    microseconds_per_beat: t.as_int(),
                });
            }
        }
    }
    tempo_map.sort_by_key(|t| t.tick);
    tempo_map.dedup_by_key(|t| t.tick);

    let tempo_bpm = tempo_map
        .first()
        .map(|t| (60_000_000.0 / t.microseconds_per_beat as f64).round() as u32)
        .unwrap_or(120);

    // Second pass: per-track note on/off pairing.
    let mut tracks: Vec<Track> = Vec::new();

    for (index, track) in smf.tracks.iter().enumerate() {
        let mut current_tick: u64 = 0;
        let mut name = String::new();
        let mut instrument = String::new();
        let mut channel: Option<u8> = None;

        // Active notes: (pitch, channel) -> start_tick
        let mut active: HashMap<(u8, u8), u64> = HashMap::new();
        // (pitch, start_tick, end_tick)
        let mut raw_notes: Vec<(u8, u64, u64)> = Vec::new();

        for event in track {
            current_tick += event.delta.as_int() as u64;

            match event.kind {
                midly::TrackEventKind::Meta(midly::MetaMessage::TrackName(bytes)) => {
                    if name.is_empty() {
                        name = String::from_utf8_lossy(bytes).trim().to_string();
                    }
                }
                midly::TrackEventKind::Meta(midly::MetaMessage::InstrumentName(bytes)) => {
                    if instrument.is_empty() {
                        instrument = String::from_utf8_lossy(bytes).trim().to_string();
                    }
                }
                midly::TrackEventKind::Midi { channel: ch, message } => {
                    let ch = ch.as_int();
                    channel.get_or_insert(ch);

                    match message {
                        midly::MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                            let pitch = key.as_int();
                            // Re-strike: finalize any note already sounding on this key
                            if let Some(start) = active.remove(&(pitch, ch)) {
                                raw_notes.push((pitch, start, current_tick));
                            }
                            active.insert((pitch, ch), current_tick);
                        }
                        midly::MidiMessage::NoteOn { key, .. }
                        | midly::MidiMessage::NoteOff { key, .. } => {
                            let pitch = key.as_int();
                            if let Some(start) = active.remove(&(pitch, ch)) {
                                raw_notes.push((pitch, start, current_tick));
                            }
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
        }

        // Finalize notes left hanging at the end of the track
        for ((pitch, _ch), start) in active.drain() {
            raw_notes.push((pitch, start, current_tick));
        }

        if raw_notes.is_empty() {
            continue;
        }

        raw_notes.sort_by_key(|&(_, start, _)| start);

        let notes: Vec<Note> = raw_notes
            .iter()
            .map(|&(pitch, start_tick, end_tick)| {
                let start_ms = tick_to_ms(start_tick, ticks_per_beat, &tempo_map);
                let end_ms = tick_to_ms(end_tick, ticks_per_beat, &tempo_map);
                Note {
                    frequency: pitch_to_frequency(pitch),
                    duration_ms: clamp_duration((end_ms - start_ms).round() as u32),
                    start_ms: start_ms.round() as u32,
                }
            })
            .collect();

        let channel = channel.unwrap_or(0);
        if name.is_empty() {
            name = format!("Track {}", index + 1);
        }
        if instrument.is_empty() {
            instrument = format!("Channel {}", channel + 1);
        }

        tracks.push(Track { name, instrument, channel, notes });
    }

    if tracks.is_empty() {
        return Err(DecodeError::NoTracks);
    }

    log::debug!(
        "Decoded {}: {} track(s) at {} BPM",
        file_name,
        tracks.len(),
        tempo_bpm
    );

    Ok(ImportedFile {
        tracks,
        tempo_bpm,
        file_name: file_name.to_string(),
    })
}
