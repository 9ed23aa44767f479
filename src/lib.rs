// Otto Melody - MIDI import and melody editing engine for the Otto robot
// control panel. Main library entry point.

pub mod config;
pub mod decode;
pub mod melody;
pub mod playback;
pub mod reduce;
pub mod session;
pub mod slots;

pub use config::EngineConfig;
pub use decode::{decode_bytes, decode_file, DecodeError, ImportedFile, Note, Track};
pub use melody::{MelodyNote, MAX_MELODY_NOTES, MAX_NOTE_MS, MIN_NOTE_MS};
pub use playback::{Player, PlayerStatus, Playhead, ToneSink, TICK_MS};
pub use reduce::{reduce_track, ReducerParams};
pub use session::{EditSession, SessionSource};
pub use slots::{
    RemoteDevice, RemoteError, RemoteMelody, RemoteSlotEntry, SlotCache, SlotError, SlotStore,
    StoredSlot, SLOT_BASE, SLOT_COUNT,
};
