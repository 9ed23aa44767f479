// Monophonic reduction: collapse a polyphonic track into one buzzer voice

use crate::decode::Track;
use crate::melody::{clamp_duration, MelodyNote, MAX_MELODY_NOTES};

/// Reduction parameters
#[derive(Debug, Clone)]
pub struct ReducerParams {
    /// Hard cap on melody entries, rests included
    pub max_notes: usize,
    /// Gaps longer than this become an audible rest
    pub rest_threshold_ms: u32,
    /// Longest rest ever inserted
    pub max_rest_ms: u32,
}

impl Default for ReducerParams {
    fn default() -> Self {
        Self {
            max_notes: MAX_MELODY_NOTES,
            rest_threshold_ms: 15,
            max_rest_ms: 500,
        }
    }
}

/// Reduce one track to a single melodic line.
///
/// Notes are scanned in (onset, frequency-descending) order, so when two
/// notes start together the higher pitch wins as melody. A note is accepted
/// only if it starts at or after the end of the previously accepted one;
/// everything overlapping is discarded.
pub fn reduce_track(track: &Track, params: &ReducerParams) -> Vec<MelodyNote> {
    let mut sorted = track.notes.clone();
    sorted.sort_by(|a, b| {
        a.start_ms
            .cmp(&b.start_ms)
            .then(b.frequency.cmp(&a.frequency))
    });

    let mut melody: Vec<MelodyNote> = Vec::new();
    let mut last_end: u32 = 0;

    for note in &sorted {
        if melody.len() >= params.max_notes {
            break;
        }
        if note.start_ms < last_end {
            continue;
        }

        let gap = note.start_ms - last_end;
        if gap > params.rest_threshold_ms {
            melody.push(MelodyNote::rest(gap.min(params.max_rest_ms)));
            if melody.len() >= params.max_notes {
                break;
            }
        }

        let duration_ms = clamp_duration(note.duration_ms);
        melody.push(MelodyNote { frequency: note.frequency, duration_ms });
        last_end = note.start_ms + duration_ms;
    }

    log::debug!(
        "Reduced track {:?}: {} notes -> {} melody entries",
        track.name,
        track.notes.len(),
        melody.len()
    );

    melody
}
