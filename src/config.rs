// Configuration for the melody engine

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::reduce::ReducerParams;

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Path of the local melody-slot snapshot
    #[serde(default = "default_cache_path")]
    pub cache_path: PathBuf,

    /// Timeout for one remote slot operation, in seconds (clamped to 5-10)
    #[serde(default = "default_remote_timeout_secs")]
    pub remote_timeout_secs: u64,

    /// Hard cap on melody entries produced by the reducer
    #[serde(default = "default_max_melody_notes")]
    pub max_melody_notes: usize,

    /// Gaps longer than this become an audible rest, in milliseconds
    #[serde(default = "default_rest_threshold_ms")]
    pub rest_threshold_ms: u32,

    /// Longest rest the reducer ever inserts, in milliseconds
    #[serde(default = "default_max_rest_ms")]
    pub max_rest_ms: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_path: default_cache_path(),
            remote_timeout_secs: default_remote_timeout_secs(),
            max_melody_notes: default_max_melody_notes(),
            rest_threshold_ms: default_rest_threshold_ms(),
            max_rest_ms: default_max_rest_ms(),
        }
    }
}

impl EngineConfig {
    /// Load config from disk or return default
    pub fn load_or_default(path: &std::path::Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(contents) => match toml::from_str(&contents) {
                    Ok(config) => return config,
                    Err(e) => {
                        log::warn!("Failed to parse config: {}", e);
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read config file: {}", e);
                }
            }
        }

        Self::default()
    }

    /// Save config to disk
    pub fn save(&self, path: &std::path::Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;

        Ok(())
    }

    /// Default config file path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("OttoController")
            .join("melody.toml")
    }

    /// Remote timeout, clamped to the supported 5-10 s window.
    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_timeout_secs.clamp(5, 10))
    }

    pub fn reducer_params(&self) -> ReducerParams {
        ReducerParams {
            max_notes: self.max_melody_notes,
            rest_threshold_ms: self.rest_threshold_ms,
            max_rest_ms: self.max_rest_ms,
        }
    }
}

fn default_cache_path() -> PathBuf {
    crate::slots::SlotCache::default_path()
}

fn default_remote_timeout_secs() -> u64 {
    8
}

fn default_max_melody_notes() -> usize {
    crate::melody::MAX_MELODY_NOTES
}

fn default_rest_threshold_ms() -> u32 {
    15
}

fn default_max_rest_ms() -> u32 {
    500
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("melody.toml");

        let config = EngineConfig {
            remote_timeout_secs: 6,
            max_melody_notes: 64,
            ..Default::default()
        };
        config.save(&path).unwrap();

        let loaded = EngineConfig::load_or_default(&path);
        assert_eq!(loaded.remote_timeout_secs, 6);
        assert_eq!(loaded.max_melody_notes, 64);
    }

    #[test]
    fn unparsable_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("melody.toml");
        std::fs::write(&path, "max_melody_notes = \"lots\"").unwrap();

        let config = EngineConfig::load_or_default(&path);
        assert_eq!(config.max_melody_notes, crate::melody::MAX_MELODY_NOTES);
    }

    #[test]
    fn remote_timeout_is_clamped() {
        let mut config = EngineConfig::default();
        config.remote_timeout_secs = 1;
        assert_eq!(config.remote_timeout(), Duration::from_secs(5));
        config.remote_timeout_secs = 60;
        assert_eq!(config.remote_timeout(), Duration::from_secs(10));
        config.remote_timeout_secs = 7;
        assert_eq!(config.remote_timeout(), Duration::from_secs(7));
    }
}
