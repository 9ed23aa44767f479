// Preview playback: fixed-tick scheduler over a melody with
// play/pause/resume/loop and a continuous playhead

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;

use crate::melody::{total_duration_ms, MelodyNote};

/// Scheduler tick interval in milliseconds. Pause/stop take effect at the
/// next tick boundary, so cancellation latency is at most one tick.
pub const TICK_MS: u64 = 30;

/// Audio emission seam. The panel backs this with the robot's buzzer
/// endpoint; tests back it with a recorder.
pub trait ToneSink: Send + Sync + 'static {
    /// Start sounding a tone. Called exactly once per audible note, at the
    /// note's start. Rests are never emitted.
    fn emit(&self, frequency: u16, duration_ms: u32) -> anyhow::Result<()>;
}

/// Playback state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerStatus {
    Stopped,
    Playing,
    Paused,
}

/// Current playback position, published every tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Playhead {
    /// Position as percent of the melody's total duration
    pub percent: f32,
    /// Elapsed playing time in seconds, cumulative over prior notes
    pub elapsed_secs: f32,
}

impl Playhead {
    fn zero() -> Self {
        Self { percent: 0.0, elapsed_secs: 0.0 }
    }
}

/// What one tick did: which notes were entered, and whether the melody ended.
struct TickOutcome {
    entered: Vec<MelodyNote>,
    finished: bool,
}

struct Shared {
    melody: Vec<MelodyNote>,
    /// Where stop() parks the playhead: start of the current crop view
    home_index: usize,
    note_index: usize,
    elapsed_in_note_ms: u32,
    status: PlayerStatus,
    looping: bool,
}

impl Shared {
    fn empty() -> Self {
        Self {
            melody: Vec::new(),
            home_index: 0,
            note_index: 0,
            elapsed_in_note_ms: 0,
            status: PlayerStatus::Stopped,
            looping: false,
        }
    }

    fn total_ms(&self) -> u64 {
        total_duration_ms(&self.melody)
    }

    /// Elapsed time of all notes before the cursor plus the in-note offset.
    fn cumulative_ms(&self) -> u64 {
        let prior: u64 = self.melody[..self.note_index.min(self.melody.len())]
            .iter()
            .map(|n| n.duration_ms as u64)
            .sum();
        prior + self.elapsed_in_note_ms as u64
    }

    fn playhead(&self) -> Playhead {
        let total = self.total_ms();
        if total == 0 {
            return Playhead::zero();
        }
        let elapsed = self.cumulative_ms();
        Playhead {
            percent: (elapsed as f32 / total as f32) * 100.0,
            elapsed_secs: elapsed as f32 / 1000.0,
        }
    }

    fn park(&mut self) {
        self.note_index = self.home_index.min(self.melody.len().saturating_sub(1));
        self.elapsed_in_note_ms = 0;
        self.status = PlayerStatus::Stopped;
    }

    /// Natural completion resets the cursor to the very start; only
    /// `stop()` parks at the crop-view start.
    fn rewind(&mut self) {
        self.note_index = 0;
        self.elapsed_in_note_ms = 0;
        self.status = PlayerStatus::Stopped;
    }

    /// Advance the cursor by one tick, crossing as many note boundaries as
    /// the tick spans. Notes entered during the tick are returned so the
    /// caller can emit each exactly once.
    fn advance(&mut self, tick_ms: u32) -> TickOutcome {
        let mut entered = Vec::new();

        if self.melody.is_empty() {
            self.park();
            return TickOutcome { entered, finished: true };
        }

        self.elapsed_in_note_ms += tick_ms;

        loop {
            let duration = self.melody[self.note_index].duration_ms;
            if self.elapsed_in_note_ms < duration {
                break;
            }
            self.elapsed_in_note_ms -= duration;
            self.note_index += 1;

            if self.note_index >= self.melody.len() {
                if !self.looping {
                    self.rewind();
                    return TickOutcome { entered, finished: true };
                }
                self.note_index = 0;
                entered.push(self.melody[0]);
                if entered.len() > self.melody.len() {
                    // Tick longer than a full cycle; don't spin
                    self.elapsed_in_note_ms = 0;
                    break;
                }
            } else {
                entered.push(self.melody[self.note_index]);
            }
        }

        TickOutcome { entered, finished: false }
    }
}

/// Cooperative preview player. Exactly one playback runs at a time: starting
/// a new run or loading a new melody aborts the previous one.
///
/// `play()` and the tick task require a tokio runtime.
pub struct Player<S: ToneSink> {
    sink: Arc<S>,
    shared: Arc<Mutex<Shared>>,
    abort: Arc<AtomicBool>,
    playhead_tx: watch::Sender<Playhead>,
}

impl<S: ToneSink> Player<S> {
    pub fn new(sink: S) -> Self {
        let (playhead_tx, _) = watch::channel(Playhead::zero());
        Self {
            sink: Arc::new(sink),
            shared: Arc::new(Mutex::new(Shared::empty())),
            abort: Arc::new(AtomicBool::new(false)),
            playhead_tx,
        }
    }

    /// Replace the melody under preview. `home_index` is the note the
    /// playhead parks at (start of the crop view; 0 for the whole melody).
    /// Any running playback is aborted.
    pub fn load(&mut self, melody: Vec<MelodyNote>, home_index: usize) {
        self.abort.store(true, Ordering::Relaxed);

        let mut shared = self.shared.lock();
        shared.melody = melody;
        shared.home_index = home_index;
        shared.park();
        let playhead = shared.playhead();
        drop(shared);

        let _ = self.playhead_tx.send(playhead);
    }

    pub fn set_loop(&mut self, looping: bool) {
        self.shared.lock().looping = looping;
    }

    pub fn is_looping(&self) -> bool {
        self.shared.lock().looping
    }

    pub fn status(&self) -> PlayerStatus {
        self.shared.lock().status
    }

    /// Captured `(note_index, elapsed_in_note_ms)` position.
    pub fn position(&self) -> (usize, u32) {
        let shared = self.shared.lock();
        (shared.note_index, shared.elapsed_in_note_ms)
    }

    /// Subscribe to per-tick playhead updates.
    pub fn playhead(&self) -> watch::Receiver<Playhead> {
        self.playhead_tx.subscribe()
    }

    /// Toggle: start from the parked position when stopped, pause when
    /// playing, resume from the captured position when paused.
    pub fn play(&mut self) {
        let status = self.shared.lock().status;
        match status {
            PlayerStatus::Playing => self.pause(),
            PlayerStatus::Paused => self.start_run(false),
            PlayerStatus::Stopped => {
                {
                    let mut shared = self.shared.lock();
                    if shared.melody.is_empty() {
                        return;
                    }
                    shared.note_index = shared.home_index.min(shared.melody.len() - 1);
                    shared.elapsed_in_note_ms = 0;
                }
                self.start_run(true);
            }
        }
    }

    /// Capture the current position and suspend the tick task.
    fn pause(&mut self) {
        self.abort.store(true, Ordering::Relaxed);
        let mut shared = self.shared.lock();
        if shared.status == PlayerStatus::Playing {
            shared.status = PlayerStatus::Paused;
        }
    }

    /// Abort playback and park the playhead at the view start.
    pub fn stop(&mut self) {
        self.abort.store(true, Ordering::Relaxed);
        let mut shared = self.shared.lock();
        shared.park();
        let playhead = shared.playhead();
        drop(shared);
        let _ = self.playhead_tx.send(playhead);
    }

    /// Spawn the tick task. `emit_start` emits the note under the cursor
    /// immediately (fresh start); a resume skips it, since that note already
    /// sounded at its own start.
    fn start_run(&mut self, emit_start: bool) {
        // Fresh flag per run; the previous task keeps the old one and exits
        let abort = Arc::new(AtomicBool::new(false));
        self.abort = abort.clone();

        let start_note = {
            let mut shared = self.shared.lock();
            shared.status = PlayerStatus::Playing;
            shared.melody.get(shared.note_index).copied()
        };

        if emit_start {
            if let Some(note) = start_note {
                if !note.is_rest() {
                    if let Err(e) = self.sink.emit(note.frequency, note.duration_ms) {
                        log::error!("Tone emission failed, stopping preview: {e:#}");
                        self.shared.lock().park();
                        return;
                    }
                }
            }
        }

        let shared = self.shared.clone();
        let sink = self.sink.clone();
        let playhead_tx = self.playhead_tx.clone();

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(TICK_MS)).await;

                let (outcome, playhead) = {
                    let mut guard = shared.lock();
                    // Checked under the lock so a pause/stop that already
                    // captured the position is never overwritten
                    if abort.load(Ordering::Relaxed) {
                        return;
                    }
                    let outcome = guard.advance(TICK_MS as u32);
                    (outcome, guard.playhead())
                };

                let _ = playhead_tx.send(playhead);

                for note in &outcome.entered {
                    if note.is_rest() {
                        continue;
                    }
                    if let Err(e) = sink.emit(note.frequency, note.duration_ms) {
                        log::error!("Tone emission failed, stopping preview: {e:#}");
                        let mut guard = shared.lock();
                        guard.park();
                        let stopped = guard.playhead();
                        drop(guard);
                        let _ = playhead_tx.send(stopped);
                        return;
                    }
                }

                if outcome.finished {
                    let _ = playhead_tx.send(shared.lock().playhead());
                    return;
                }
            }
        });
    }
}
