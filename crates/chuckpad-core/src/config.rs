//! Application configuration management.
//!
//! Holds the settings that outlive a process: which environment was last
//! active, the patch type the host app works with, and cache sizing.
//!
//! Configuration is stored at `~/.config/chuckpad/config.json`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::cache::{CacheConfig, DEFAULT_MAX_ENTRIES, DEFAULT_TTL_SECONDS};
use crate::environment::Environment;
use crate::models::PatchType;

/// Application name used for the config directory path
const APP_NAME: &str = "chuckpad";

/// Config file name
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub environment: Environment,
    pub patch_type: PatchType,
    pub cache_default_ttl_secs: i64,
    /// 0 = unlimited
    pub cache_max_entries: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            patch_type: PatchType::default(),
            cache_default_ttl_secs: DEFAULT_TTL_SECONDS,
            cache_max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config file {}", path.display()))?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            default_ttl: ttl_from_secs(self.cache_default_ttl_secs),
            max_entries: self.cache_max_entries,
        }
    }
}

/// Seconds beyond what `Duration` can hold clamp to its range; negatives mean no caching.
fn ttl_from_secs(secs: i64) -> Duration {
    Duration::try_seconds(secs).unwrap_or(if secs < 0 {
        Duration::zero()
    } else {
        Duration::MAX
    })
}
