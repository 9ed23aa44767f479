// Interactive melody editing: crop/speed trims against a committed baseline,
// preview-only pitch shift, single-level reset

use serde::{Deserialize, Serialize};

use crate::melody::{total_duration_ms, MelodyNote};

/// Where the melody being edited came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionSource {
    /// Fresh MIDI import
    Import,
    /// Re-edit of an already stored slot; save targets the same slot
    Slot(u8),
}

/// Readout for the panel: entry counts and playing time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SessionSummary {
    pub note_count: usize,
    pub total_ms: u64,
    pub committed: bool,
}

/// One editing session over a reduced melody.
///
/// Crop and speed are destructive: committing a trim replaces the baseline.
/// Pitch shift is preview-only and never reaches the saved melody. This
/// asymmetry is deliberate and mirrors how the panel behaves.
#[derive(Debug, Clone)]
pub struct EditSession {
    /// Melody as imported; never mutated, `reset()` restores it
    original: Vec<MelodyNote>,
    /// Current committed state; trims replace it
    baseline: Vec<MelodyNote>,
    crop_start: u8,
    crop_end: u8,
    speed_factor: u16,
    pitch_semitones: i8,
    committed: bool,
    source: SessionSource,
}

/// Minimum crop window width, in percent.
const MIN_CROP_WINDOW: u8 = 5;

impl EditSession {
    /// Start a session for a freshly imported melody.
    pub fn from_import(melody: Vec<MelodyNote>) -> Self {
        Self::new(melody, SessionSource::Import)
    }

    /// Start a session re-editing a stored slot's melody.
    pub fn from_slot(slot: u8, melody: Vec<MelodyNote>) -> Self {
        Self::new(melody, SessionSource::Slot(slot))
    }

    fn new(melody: Vec<MelodyNote>, source: SessionSource) -> Self {
        Self {
            original: melody.clone(),
            baseline: melody,
            crop_start: 0,
            crop_end: 100,
            speed_factor: 100,
            pitch_semitones: 0,
            committed: false,
            source,
        }
    }

    pub fn source(&self) -> &SessionSource {
        &self.source
    }

    /// Slot to overwrite on save, if this session re-edits a stored melody.
    pub fn target_slot(&self) -> Option<u8> {
        match self.source {
            SessionSource::Slot(id) => Some(id),
            SessionSource::Import => None,
        }
    }

    pub fn crop(&self) -> (u8, u8) {
        (self.crop_start, self.crop_end)
    }

    pub fn speed_factor(&self) -> u16 {
        self.speed_factor
    }

    pub fn pitch_semitones(&self) -> i8 {
        self.pitch_semitones
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Set the crop window, clamped so that
    /// `0 <= start < end - MIN_CROP_WINDOW <= 100 - MIN_CROP_WINDOW`.
    pub fn set_crop(&mut self, start: u8, end: u8) {
        let end = end.clamp(MIN_CROP_WINDOW, 100);
        let start = start.min(end - MIN_CROP_WINDOW);
        self.crop_start = start;
        self.crop_end = end;
    }

    /// Set the speed factor in percent, clamped to [50, 200].
    pub fn set_speed(&mut self, percent: u16) {
        self.speed_factor = percent.clamp(50, 200);
    }

    /// Set the preview pitch shift, clamped to [-12, 12] semitones.
    pub fn set_pitch(&mut self, semitones: i8) {
        self.pitch_semitones = semitones.clamp(-12, 12);
    }

    /// Note index range the current crop window selects on the baseline:
    /// `[floor(start% * N), ceil(end% * N))`.
    pub fn crop_window_indices(&self) -> (usize, usize) {
        let n = self.baseline.len();
        let start = (self.crop_start as usize * n) / 100;
        let end = (self.crop_end as usize * n).div_ceil(100);
        (start, end.min(n))
    }

    /// Apply the pending crop + speed to the baseline.
    ///
    /// The sliced, retimed melody becomes the new committed state; crop and
    /// speed reset so an immediate second commit is a no-op. Pitch shift is
    /// untouched: it stays preview-only.
    pub fn commit_trim(&mut self) {
        let (start, end) = self.crop_window_indices();
        let speed = self.speed_factor as u64;

        self.baseline = self.baseline[start..end]
            .iter()
            .map(|n| MelodyNote {
                frequency: n.frequency,
                duration_ms: (((n.duration_ms as u64 * 100) + speed / 2) / speed).max(1) as u32,
            })
            .collect();

        self.crop_start = 0;
        self.crop_end = 100;
        self.speed_factor = 100;
        self.committed = true;

        log::debug!(
            "Committed trim: {} entries, {} ms",
            self.baseline.len(),
            total_duration_ms(&self.baseline)
        );
    }

    /// Single-level undo: restore the imported melody and clear all
    /// transform parameters. Intermediate commits are not recoverable.
    pub fn reset(&mut self) {
        self.baseline = self.original.clone();
        self.crop_start = 0;
        self.crop_end = 100;
        self.speed_factor = 100;
        self.pitch_semitones = 0;
        self.committed = false;
    }

    /// Baseline with the preview pitch shift applied. Rests are unaffected.
    pub fn effective_melody(&self) -> Vec<MelodyNote> {
        if self.pitch_semitones == 0 {
            return self.baseline.clone();
        }

        let factor = 2f64.powf(self.pitch_semitones as f64 / 12.0);
        self.baseline
            .iter()
            .map(|n| {
                if n.is_rest() {
                    *n
                } else {
                    MelodyNote {
                        frequency: (n.frequency as f64 * factor).round() as u16,
                        duration_ms: n.duration_ms,
                    }
                }
            })
            .collect()
    }

    /// Melody as it would be persisted: the committed baseline, never the
    /// pitch-shifted preview.
    pub fn melody_for_save(&self) -> &[MelodyNote] {
        &self.baseline
    }

    pub fn original_melody(&self) -> &[MelodyNote] {
        &self.original
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            note_count: self.baseline.len(),
            total_ms: total_duration_ms(&self.baseline),
            committed: self.committed,
        }
    }
}
