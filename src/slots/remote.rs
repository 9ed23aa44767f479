// Remote device interface consumed by the slot store.
//
// The actual transport (HTTP to the robot) lives outside this crate; only
// the operation shapes are fixed here.

use serde::{Deserialize, Serialize};

use crate::melody::MelodyNote;

/// Error type for remote slot operations
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("device unreachable: {0}")]
    Unreachable(String),

    #[error("request timed out")]
    Timeout,

    #[error("device rejected the request: {0}")]
    Rejected(String),
}

/// One entry of the device's melody directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSlotEntry {
    pub slot: u8,
    pub name: String,
}

/// Full melody data fetched from a device slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteMelody {
    pub name: String,
    pub notes: Vec<MelodyNote>,
}

/// The robot's melody slot protocol. Melody data travels as the wire string
/// (`"freq,dur;..."`, see [`crate::melody::encode_wire`]).
#[allow(async_fn_in_trait)]
pub trait RemoteDevice: Send + Sync {
    /// Store a melody in a device slot.
    async fn save_melody(&self, slot: u8, name: &str, data: &str) -> Result<(), RemoteError>;

    /// Remove a melody from a device slot.
    async fn delete_melody(&self, slot: u8) -> Result<(), RemoteError>;

    /// Fetch the device's slot directory (ids and names only).
    async fn list_melodies(&self) -> Result<Vec<RemoteSlotEntry>, RemoteError>;

    /// Fetch one slot's full note data.
    async fn fetch_melody(&self, slot: u8) -> Result<RemoteMelody, RemoteError>;
}
