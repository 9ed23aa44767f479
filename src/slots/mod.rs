// Melody slot store: a fixed set of named melodies mirrored between the
// local cache and the robot

pub mod cache;
pub mod remote;

pub use cache::SlotCache;
pub use remote::{RemoteDevice, RemoteError, RemoteMelody, RemoteSlotEntry};

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::melody::{encode_wire, MelodyNote};

/// First custom melody slot id on the device.
pub const SLOT_BASE: u8 = 16;

/// Number of custom melody slots.
pub const SLOT_COUNT: u8 = 5;

/// Longest slot name the device accepts.
pub const MAX_SLOT_NAME_LEN: usize = 20;

/// Default timeout for one remote slot operation.
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(8);

/// Error type for slot operations
#[derive(Debug, thiserror::Error)]
pub enum SlotError {
    #[error("melody is empty")]
    EmptyMelody,

    #[error("all melody slots are in use")]
    NoFreeSlot,

    #[error("slot {0} is outside the custom melody range")]
    OutOfRange(u8),

    #[error("slot {0} is not stored locally")]
    NotFound(u8),

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// One stored melody slot, as kept in memory and in the local snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSlot {
    pub id: u8,
    pub name: String,
    pub notes: Vec<MelodyNote>,
    /// Whether the device has acknowledged this melody
    pub sent_to_remote: bool,
    pub saved_at: DateTime<Utc>,
}

/// Fixed-capacity slot map, mirrored to the local cache on every mutation
/// and best-effort synchronized with the attached device.
///
/// Remote failures never block a save or delete: they degrade to local-only
/// persistence with `sent_to_remote = false`.
pub struct SlotStore<R: RemoteDevice> {
    slots: BTreeMap<u8, StoredSlot>,
    cache: SlotCache,
    device: Option<R>,
    remote_timeout: Duration,
}

impl<R: RemoteDevice> SlotStore<R> {
    /// Open the store, reading the local snapshot once.
    pub fn open(cache: SlotCache) -> Self {
        let slots = cache.load();
        log::info!("Loaded {} melody slot(s) from {:?}", slots.len(), cache.path());
        Self {
            slots,
            cache,
            device: None,
            remote_timeout: DEFAULT_REMOTE_TIMEOUT,
        }
    }

    pub fn with_device(mut self, device: R) -> Self {
        self.device = Some(device);
        self
    }

    /// Attach or detach the robot connection.
    pub fn set_device(&mut self, device: Option<R>) {
        self.device = device;
    }

    pub fn set_remote_timeout(&mut self, timeout: Duration) {
        self.remote_timeout = timeout;
    }

    pub fn get(&self, slot: u8) -> Option<&StoredSlot> {
        self.slots.get(&slot)
    }

    pub fn slots(&self) -> impl Iterator<Item = &StoredSlot> {
        self.slots.values()
    }

    pub fn occupied(&self) -> usize {
        self.slots.len()
    }

    /// First unoccupied id in `[SLOT_BASE, SLOT_BASE + SLOT_COUNT)`.
    pub fn find_free_slot(&self) -> Result<u8, SlotError> {
        (SLOT_BASE..SLOT_BASE + SLOT_COUNT)
            .find(|id| !self.slots.contains_key(id))
            .ok_or(SlotError::NoFreeSlot)
    }

    /// Save a melody into a slot.
    ///
    /// `target` reuses an existing slot (the re-edit flow) and must lie in
    /// `[SLOT_BASE, SLOT_BASE + SLOT_COUNT)`; otherwise the first free slot
    /// is taken. Transmission to the device is attempted when one is
    /// attached, but the local cache is written either way.
    pub async fn save(
        &mut self,
        name: &str,
        melody: &[MelodyNote],
        target: Option<u8>,
    ) -> Result<u8, SlotError> {
        if melody.is_empty() {
            return Err(SlotError::EmptyMelody);
        }

        let id = match target {
            Some(id) => {
                if !(SLOT_BASE..SLOT_BASE + SLOT_COUNT).contains(&id) {
                    return Err(SlotError::OutOfRange(id));
                }
                id
            }
            None => self.find_free_slot()?,
        };

        let name = sanitize_name(name);
        let sent_to_remote = self.transmit(id, &name, melody).await;

        self.slots.insert(
            id,
            StoredSlot {
                id,
                name,
                notes: melody.to_vec(),
                sent_to_remote,
                saved_at: Utc::now(),
            },
        );
        self.persist();

        Ok(id)
    }

    /// Re-attempt transmission of an already stored slot. The sent flag
    /// flips only on success. Returns whether the device accepted it.
    pub async fn send_existing(&mut self, slot: u8) -> Result<bool, SlotError> {
        let stored = self.slots.get(&slot).ok_or(SlotError::NotFound(slot))?;
        let (name, notes) = (stored.name.clone(), stored.notes.clone());

        let sent = self.transmit(slot, &name, &notes).await;
        if sent {
            if let Some(stored) = self.slots.get_mut(&slot) {
                stored.sent_to_remote = true;
            }
            self.persist();
        }

        Ok(sent)
    }

    /// Delete a slot: best-effort on the device, unconditional locally.
    pub async fn delete(&mut self, slot: u8) -> Result<(), SlotError> {
        if !self.slots.contains_key(&slot) {
            return Err(SlotError::NotFound(slot));
        }

        if let Some(device) = &self.device {
            let result = with_timeout(self.remote_timeout, device.delete_melody(slot)).await;
            if let Err(e) = result {
                log::warn!("Remote delete of slot {} failed, removing locally anyway: {}", slot, e);
            }
        }

        self.slots.remove(&slot);
        self.persist();

        Ok(())
    }

    /// Pull the device's slot directory and backfill anything the local
    /// cache is missing. Individual fetch failures skip that slot only.
    /// Returns how many slots were backfilled.
    pub async fn sync_from_remote(&mut self) -> Result<usize, SlotError> {
        let Some(device) = &self.device else {
            log::debug!("No device attached, skipping slot sync");
            return Ok(0);
        };

        let directory = with_timeout(self.remote_timeout, device.list_melodies()).await?;

        let mut backfilled = 0;
        for entry in directory {
            let known = self
                .slots
                .get(&entry.slot)
                .is_some_and(|s| !s.notes.is_empty());
            if known {
                continue;
            }

            match with_timeout(self.remote_timeout, device.fetch_melody(entry.slot)).await {
                Ok(remote) => {
                    self.slots.insert(
                        entry.slot,
                        StoredSlot {
                            id: entry.slot,
                            name: sanitize_name(&remote.name),
                            notes: remote.notes,
                            sent_to_remote: true,
                            saved_at: Utc::now(),
                        },
                    );
                    backfilled += 1;
                }
                Err(e) => {
                    log::warn!("Skipping slot {} during sync: {}", entry.slot, e);
                }
            }
        }

        if backfilled > 0 {
            self.persist();
        }
        log::info!("Slot sync complete, {} slot(s) backfilled", backfilled);

        Ok(backfilled)
    }

    /// Send a melody to the device, if one is attached. Returns whether it
    /// was acknowledged; failures are logged, never propagated.
    async fn transmit(&self, slot: u8, name: &str, melody: &[MelodyNote]) -> bool {
        let Some(device) = &self.device else {
            log::debug!("No device attached, slot {} stays local-only", slot);
            return false;
        };

        let wire = encode_wire(melody);
        match with_timeout(self.remote_timeout, device.save_melody(slot, name, &wire)).await {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Sending slot {} to device failed, keeping local copy: {}", slot, e);
                false
            }
        }
    }

    /// Mirror the in-memory map to the local snapshot. Write failures are
    /// logged only; the in-memory state stands.
    fn persist(&self) {
        if let Err(e) = self.cache.store(&self.slots) {
            log::warn!("Failed to write melody cache: {:#}", e);
        }
    }
}

/// Trim and cap a slot name at the device's limit.
fn sanitize_name(name: &str) -> String {
    name.trim().chars().take(MAX_SLOT_NAME_LEN).collect()
}

/// Cancel a remote call that exceeds the timeout; the request future is
/// dropped, never left pending.
async fn with_timeout<T>(
    timeout: Duration,
    fut: impl std::future::Future<Output = Result<T, RemoteError>>,
) -> Result<T, RemoteError> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(RemoteError::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// In-memory stand-in for the robot's slot protocol.
    #[derive(Default)]
    struct MockDevice {
        stored: Mutex<HashMap<u8, (String, String)>>,
        failing: AtomicBool,
        hang: AtomicBool,
    }

    impl MockDevice {
        fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::Relaxed);
        }

        async fn gate(&self) -> Result<(), RemoteError> {
            if self.hang.load(Ordering::Relaxed) {
                std::future::pending::<()>().await;
            }
            if self.failing.load(Ordering::Relaxed) {
                return Err(RemoteError::Unreachable("connection refused".into()));
            }
            Ok(())
        }
    }

    impl RemoteDevice for &MockDevice {
        async fn save_melody(&self, slot: u8, name: &str, data: &str) -> Result<(), RemoteError> {
            self.gate().await?;
            self.stored.lock().insert(slot, (name.to_string(), data.to_string()));
            Ok(())
        }

        async fn delete_melody(&self, slot: u8) -> Result<(), RemoteError> {
            self.gate().await?;
            self.stored.lock().remove(&slot);
            Ok(())
        }

        async fn list_melodies(&self) -> Result<Vec<RemoteSlotEntry>, RemoteError> {
            self.gate().await?;
            Ok(self
                .stored
                .lock()
                .iter()
                .map(|(&slot, (name, _))| RemoteSlotEntry { slot, name: name.clone() })
                .collect())
        }

        async fn fetch_melody(&self, slot: u8) -> Result<RemoteMelody, RemoteError> {
            self.gate().await?;
            let stored = self.stored.lock();
            let (name, data) = stored
                .get(&slot)
                .ok_or_else(|| RemoteError::Rejected(format!("slot {slot} empty")))?;
            Ok(RemoteMelody {
                name: name.clone(),
                notes: crate::melody::parse_wire(data),
            })
        }
    }

    fn melody() -> Vec<MelodyNote> {
        vec![
            MelodyNote { frequency: 440, duration_ms: 200 },
            MelodyNote { frequency: 494, duration_ms: 200 },
        ]
    }

    fn store_at(dir: &tempfile::TempDir) -> SlotStore<&'static MockDevice> {
        SlotStore::open(SlotCache::new(dir.path().join("melodies.json")))
    }

    fn leaked_device() -> &'static MockDevice {
        Box::leak(Box::new(MockDevice::default()))
    }

    #[tokio::test]
    async fn save_allocates_slots_in_order_until_full() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_at(&dir);

        for i in 0..SLOT_COUNT {
            let id = store.save(&format!("Song {i}"), &melody(), None).await.unwrap();
            assert_eq!(id, SLOT_BASE + i);
        }
        assert_eq!(store.occupied(), 5);

        // Sixth save: capacity error, nothing written
        let before = store_at(&dir).slots.len();
        let err = store.save("One too many", &melody(), None).await.unwrap_err();
        assert!(matches!(err, SlotError::NoFreeSlot));
        assert_eq!(store.occupied(), 5);
        assert_eq!(store_at(&dir).slots.len(), before);
    }

    #[tokio::test]
    async fn freed_slots_are_reused() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_at(&dir);

        for i in 0..3 {
            store.save(&format!("Song {i}"), &melody(), None).await.unwrap();
        }
        store.delete(SLOT_BASE + 1).await.unwrap();

        let id = store.save("Refill", &melody(), None).await.unwrap();
        assert_eq!(id, SLOT_BASE + 1);
    }

    #[tokio::test]
    async fn save_rejects_targets_outside_the_slot_range() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_at(&dir);

        for i in 0..SLOT_COUNT {
            store.save(&format!("Song {i}"), &melody(), None).await.unwrap();
        }

        // A rogue target must not grow the map past its fixed capacity
        let err = store.save("Rogue", &melody(), Some(42)).await.unwrap_err();
        assert!(matches!(err, SlotError::OutOfRange(42)));
        let err = store.save("Rogue", &melody(), Some(SLOT_BASE - 1)).await.unwrap_err();
        assert!(matches!(err, SlotError::OutOfRange(_)));

        assert_eq!(store.occupied(), 5);
        assert!(store
            .slots()
            .all(|s| (SLOT_BASE..SLOT_BASE + SLOT_COUNT).contains(&s.id)));
    }

    #[tokio::test]
    async fn empty_melody_is_rejected_without_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_at(&dir);

        let err = store.save("Silence", &[], None).await.unwrap_err();
        assert!(matches!(err, SlotError::EmptyMelody));
        assert_eq!(store.occupied(), 0);
        assert!(!dir.path().join("melodies.json").exists());
    }

    #[tokio::test]
    async fn offline_save_then_send_existing_flips_sent_flag() {
        let dir = tempfile::tempdir().unwrap();
        let device = leaked_device();
        device.set_failing(true);

        let mut store = store_at(&dir).with_device(device);
        let id = store.save("Parade", &melody(), None).await.unwrap();
        assert!(!store.get(id).unwrap().sent_to_remote);

        // Still local-only after a failed re-send
        assert!(!store.send_existing(id).await.unwrap());
        assert!(!store.get(id).unwrap().sent_to_remote);

        // Connection restored
        device.set_failing(false);
        assert!(store.send_existing(id).await.unwrap());
        assert!(store.get(id).unwrap().sent_to_remote);
        assert!(device.stored.lock().contains_key(&id));

        // Snapshot reflects the flip
        let reloaded = store_at(&dir);
        assert!(reloaded.get(id).unwrap().sent_to_remote);
    }

    #[tokio::test]
    async fn save_transmits_wire_format_and_truncates_name() {
        let dir = tempfile::tempdir().unwrap();
        let device = leaked_device();
        let mut store = store_at(&dir).with_device(device);

        let id = store
            .save("  A name that is far too long for a slot  ", &melody(), None)
            .await
            .unwrap();

        let stored = device.stored.lock();
        let (name, data) = &stored[&id];
        assert_eq!(name.as_str(), "A name that is far t");
        assert_eq!(name.chars().count(), MAX_SLOT_NAME_LEN);
        assert_eq!(data.as_str(), "440,200;494,200");
        drop(stored);

        assert!(store.get(id).unwrap().sent_to_remote);
    }

    #[tokio::test]
    async fn re_edit_save_reuses_the_target_slot() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_at(&dir);

        let id = store.save("Original", &melody(), None).await.unwrap();
        let new_melody = vec![MelodyNote { frequency: 330, duration_ms: 500 }];
        let reused = store.save("Edited", &new_melody, Some(id)).await.unwrap();

        assert_eq!(reused, id);
        assert_eq!(store.occupied(), 1);
        assert_eq!(store.get(id).unwrap().name, "Edited");
        assert_eq!(store.get(id).unwrap().notes, new_melody);
    }

    #[tokio::test]
    async fn delete_proceeds_locally_when_remote_fails() {
        let dir = tempfile::tempdir().unwrap();
        let device = leaked_device();
        let mut store = store_at(&dir).with_device(device);

        let id = store.save("Doomed", &melody(), None).await.unwrap();
        device.set_failing(true);

        store.delete(id).await.unwrap();
        assert!(store.get(id).is_none());
        assert!(store_at(&dir).get(id).is_none());

        // The device still has its copy; only the local side moved on
        assert!(device.stored.lock().contains_key(&id));
    }

    #[tokio::test]
    async fn sync_backfills_missing_slots() {
        let dir = tempfile::tempdir().unwrap();
        let device = leaked_device();
        device
            .stored
            .lock()
            .insert(17, ("Device tune".to_string(), "262,300;330,300".to_string()));

        let mut store = store_at(&dir).with_device(device);
        let backfilled = store.sync_from_remote().await.unwrap();

        assert_eq!(backfilled, 1);
        let slot = store.get(17).unwrap();
        assert_eq!(slot.name, "Device tune");
        assert_eq!(slot.notes.len(), 2);
        assert!(slot.sent_to_remote);

        // A second sync has nothing to do
        assert_eq!(store.sync_from_remote().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_device_times_out_and_save_stays_local() {
        let dir = tempfile::tempdir().unwrap();
        let device = leaked_device();
        device.hang.store(true, Ordering::Relaxed);

        let mut store = store_at(&dir).with_device(device);
        let id = store.save("Patient", &melody(), None).await.unwrap();

        assert!(!store.get(id).unwrap().sent_to_remote);
        assert_eq!(store.get(id).unwrap().name, "Patient");
    }

    #[test]
    fn find_free_slot_scans_the_fixed_range() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(&dir);
        assert_eq!(store.find_free_slot().unwrap(), SLOT_BASE);
    }
}
