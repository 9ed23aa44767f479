// Durable local cache: the whole slot map as one JSON snapshot

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::StoredSlot;

/// On-disk snapshot shape
#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    slots: Vec<StoredSlot>,
}

/// Full-snapshot JSON store for melody slots. Every mutation rewrites the
/// whole file; it is read once at startup.
#[derive(Debug, Clone)]
pub struct SlotCache {
    path: PathBuf,
}

impl SlotCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Default cache location under the platform data directory.
    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("OttoController")
            .join("melodies.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the snapshot, or an empty map if missing or unreadable.
    pub fn load(&self) -> BTreeMap<u8, StoredSlot> {
        if !self.path.exists() {
            return BTreeMap::new();
        }

        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) => {
                log::warn!("Failed to read melody cache {:?}: {}", self.path, e);
                return BTreeMap::new();
            }
        };

        match serde_json::from_str::<Snapshot>(&contents) {
            Ok(snapshot) => snapshot.slots.into_iter().map(|s| (s.id, s)).collect(),
            Err(e) => {
                log::warn!("Failed to parse melody cache {:?}: {}", self.path, e);
                BTreeMap::new()
            }
        }
    }

    /// Write the full snapshot.
    pub fn store(&self, slots: &BTreeMap<u8, StoredSlot>) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let snapshot = Snapshot { slots: slots.values().cloned().collect() };
        let contents = serde_json::to_string_pretty(&snapshot)?;
        std::fs::write(&self.path, contents)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::melody::MelodyNote;
    use chrono::Utc;

    fn slot(id: u8, name: &str) -> StoredSlot {
        StoredSlot {
            id,
            name: name.to_string(),
            notes: vec![MelodyNote { frequency: 440, duration_ms: 100 }],
            sent_to_remote: false,
            saved_at: Utc::now(),
        }
    }

    #[test]
    fn snapshot_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SlotCache::new(dir.path().join("melodies.json"));

        let mut slots = BTreeMap::new();
        slots.insert(16, slot(16, "March"));
        slots.insert(19, slot(19, "Anthem"));

        cache.store(&slots).unwrap();
        let loaded = cache.load();

        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[&16].name, "March");
        assert_eq!(loaded[&19].notes, slots[&19].notes);
    }

    #[test]
    fn missing_or_corrupt_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("melodies.json");

        let cache = SlotCache::new(&path);
        assert!(cache.load().is_empty());

        std::fs::write(&path, "{ not json").unwrap();
        assert!(cache.load().is_empty());
    }
}
