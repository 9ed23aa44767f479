// Melody data model and the buzzer wire format

use serde::{Deserialize, Serialize};

/// Maximum number of entries (notes + rests) in a melody.
pub const MAX_MELODY_NOTES: usize = 100;

/// Shortest note the buzzer can articulate, in milliseconds.
pub const MIN_NOTE_MS: u32 = 20;

/// Longest note the buzzer will hold, in milliseconds.
pub const MAX_NOTE_MS: u32 = 2000;

/// One entry of a monophonic melody. `frequency == 0` is a rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MelodyNote {
    pub frequency: u16,
    pub duration_ms: u32,
}

impl MelodyNote {
    pub fn rest(duration_ms: u32) -> Self {
        Self { frequency: 0, duration_ms }
    }

    pub fn is_rest(&self) -> bool {
        self.frequency == 0
    }
}

/// Clamp a sounding length to the buzzer's playable range.
pub fn clamp_duration(ms: u32) -> u32 {
    ms.clamp(MIN_NOTE_MS, MAX_NOTE_MS)
}

/// Total playing time of a melody in milliseconds.
pub fn total_duration_ms(melody: &[MelodyNote]) -> u64 {
    melody.iter().map(|n| n.duration_ms as u64).sum()
}

/// Encode a melody as the device wire string: `"freq,dur;freq,dur;..."`.
pub fn encode_wire(melody: &[MelodyNote]) -> String {
    melody
        .iter()
        .map(|n| format!("{},{}", n.frequency, n.duration_ms))
        .collect::<Vec<_>>()
        .join(";")
}

/// Parse a device wire string back into a melody.
///
/// Tolerant: malformed pairs are skipped with a warning, since the device
/// echoes back whatever it stored and older firmware trims trailing fields.
pub fn parse_wire(data: &str) -> Vec<MelodyNote> {
    let mut melody = Vec::new();

    for pair in data.split(';') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }

        let mut fields = pair.splitn(2, ',');
        let freq = fields.next().and_then(|f| f.trim().parse::<u16>().ok());
        let dur = fields.next().and_then(|d| d.trim().parse::<u32>().ok());

        match (freq, dur) {
            (Some(frequency), Some(duration_ms)) if duration_ms > 0 => {
                melody.push(MelodyNote { frequency, duration_ms });
            }
            _ => {
                log::warn!("Skipping malformed wire pair: {:?}", pair);
            }
        }
    }

    melody
}
