//! Storage root resolution.
//!
//! Resolution order for every root (highest to lowest priority):
//! 1. Explicit override (CLI flag)
//! 2. Environment variable (`SHOTKIT_CONFIG_DIR`, `SHOTKIT_DATA_DIR`,
//!    `SHOTKIT_CACHE_DIR`, `SHOTKIT_TOOL_CONFIG_HOME`)
//! 3. XDG base directory (`XDG_CONFIG_HOME`, `XDG_DATA_HOME`, `XDG_CACHE_HOME`)
//! 4. `$HOME` fallback (`~/.config`, `~/.local/share`, `~/.cache`)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Directory name used under each XDG root.
pub const APP_DIR_NAME: &str = "shotkit";

/// Explicit directory overrides, typically from CLI flags.
#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub config_dir: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub tool_config_home: Option<PathBuf>,
}

/// Resolved storage roots for one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorePaths {
    /// shotkit's own settings (`settings.toml`).
    pub config_dir: PathBuf,
    /// Ledger, test history, backups, lock file.
    pub data_dir: PathBuf,
    /// Capability cache and transient test artefacts.
    pub cache_dir: PathBuf,
    /// Root under which wrapped tools keep their configuration
    /// (`<home>/satty/config.toml`, `<home>/swappy/config`).
    pub tool_config_home: PathBuf,
}

impl StorePaths {
    /// Resolve all roots using overrides, environment, then XDG defaults.
    pub fn resolve(overrides: &PathOverrides) -> Self {
        Self::resolve_with(overrides, |key| std::env::var_os(key).map(PathBuf::from))
    }

    /// Resolve with an injectable environment lookup.
    pub fn resolve_with<F>(overrides: &PathOverrides, env: F) -> Self
    where
        F: Fn(&str) -> Option<PathBuf>,
    {
        let home = env("HOME")
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."));

        let xdg_config = env("XDG_CONFIG_HOME").unwrap_or_else(|| home.join(".config"));
        let xdg_data = env("XDG_DATA_HOME").unwrap_or_else(|| home.join(".local").join("share"));
        let xdg_cache = env("XDG_CACHE_HOME").unwrap_or_else(|| home.join(".cache"));

        let pick = |explicit: &Option<PathBuf>, var: &str, fallback: PathBuf| {
            explicit
                .clone()
                .or_else(|| env(var))
                .unwrap_or(fallback)
        };

        StorePaths {
            config_dir: pick(
                &overrides.config_dir,
                "SHOTKIT_CONFIG_DIR",
                xdg_config.join(APP_DIR_NAME),
            ),
            data_dir: pick(
                &overrides.data_dir,
                "SHOTKIT_DATA_DIR",
                xdg_data.join(APP_DIR_NAME),
            ),
            cache_dir: pick(
                &overrides.cache_dir,
                "SHOTKIT_CACHE_DIR",
                xdg_cache.join(APP_DIR_NAME),
            ),
            tool_config_home: pick(
                &overrides.tool_config_home,
                "SHOTKIT_TOOL_CONFIG_HOME",
                xdg_config,
            ),
        }
    }

    /// Lay out every root under a single directory (tests, sandboxes).
    pub fn under(root: &Path) -> Self {
        StorePaths {
            config_dir: root.join("config"),
            data_dir: root.join("data"),
            cache_dir: root.join("cache"),
            tool_config_home: root.join("tool-config"),
        }
    }

    pub fn settings_file(&self) -> PathBuf {
        self.config_dir.join("settings.toml")
    }

    pub fn capability_cache_file(&self) -> PathBuf {
        self.cache_dir.join("capabilities.json")
    }

    pub fn ledger_file(&self) -> PathBuf {
        self.data_dir.join("ledger.json")
    }

    pub fn test_history_file(&self) -> PathBuf {
        self.data_dir.join("test_history.json")
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.data_dir.join("backups")
    }

    pub fn artifact_dir(&self) -> PathBuf {
        self.cache_dir.join("test-artifacts")
    }

    pub fn lock_file(&self) -> PathBuf {
        self.data_dir.join("shotkit.lock")
    }
}
