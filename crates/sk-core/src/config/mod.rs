//! User settings for shotkit.
//!
//! Settings live in `<config>/settings.toml`. Every key is optional; a
//! missing file means built-in defaults. Unknown keys and out-of-range values
//! are rejected so that typos surface instead of silently falling back.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Errors that can occur while loading settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid TOML in settings file {path}: {source}")]
    ParseError {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid setting {key}: {message}")]
    ValidationError { key: &'static str, message: String },

    #[error("I/O error reading {path}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// On-disk encoding of the capability cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheFormat {
    #[default]
    Json,
    /// Line-oriented `key=value` text.
    Lines,
}

/// Which annotation editor the harness and regeneration prefer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationPreference {
    /// First available of satty, swappy.
    #[default]
    Auto,
    Satty,
    Swappy,
}

/// shotkit settings with defaults applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Age after which the capability cache is re-probed.
    pub capability_ttl_hours: u64,
    pub cache_format: CacheFormat,
    /// Migration history entries kept in the ledger.
    pub migration_history_limit: usize,
    /// Test records kept in test history.
    pub test_history_limit: usize,
    pub backup_retention_days: u64,
    pub artifact_retention_days: u64,
    /// Timeout for each `--help`/`--version` probe.
    pub probe_timeout_ms: u64,
    /// Timeout for each compatibility check invocation.
    pub test_timeout_ms: u64,
    pub annotation_tool: AnnotationPreference,
    /// Where the capture workflow saves screenshots (informational).
    pub screenshot_dir: Option<PathBuf>,
    /// Hold the freeze helper while the capture check runs.
    pub freeze_during_capture_test: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            capability_ttl_hours: 24,
            cache_format: CacheFormat::Json,
            migration_history_limit: 50,
            test_history_limit: 20,
            backup_retention_days: 30,
            artifact_retention_days: 7,
            probe_timeout_ms: 5000,
            test_timeout_ms: 15000,
            annotation_tool: AnnotationPreference::Auto,
            screenshot_dir: None,
            freeze_during_capture_test: false,
        }
    }
}

impl Settings {
    /// Semantic validation beyond what serde enforces.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn positive(key: &'static str, value: u64) -> Result<(), ConfigError> {
            if value == 0 {
                return Err(ConfigError::ValidationError {
                    key,
                    message: "must be greater than zero".to_string(),
                });
            }
            Ok(())
        }

        positive("capability_ttl_hours", self.capability_ttl_hours)?;
        positive("migration_history_limit", self.migration_history_limit as u64)?;
        positive("test_history_limit", self.test_history_limit as u64)?;
        positive("probe_timeout_ms", self.probe_timeout_ms)?;
        positive("test_timeout_ms", self.test_timeout_ms)?;

        if self.capability_ttl_hours > 24 * 365 {
            return Err(ConfigError::ValidationError {
                key: "capability_ttl_hours",
                message: format!("{} exceeds one year", self.capability_ttl_hours),
            });
        }
        if let Some(dir) = &self.screenshot_dir {
            if dir.as_os_str().is_empty() {
                return Err(ConfigError::ValidationError {
                    key: "screenshot_dir",
                    message: "must not be empty".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn capability_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.capability_ttl_hours as i64)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn test_timeout(&self) -> Duration {
        Duration::from_millis(self.test_timeout_ms)
    }

    /// Age after which configuration backups are pruned. Saturates
    /// instead of overflowing for absurd day counts.
    pub fn backup_retention(&self) -> Duration {
        days(self.backup_retention_days)
    }

    pub fn artifact_retention(&self) -> Duration {
        days(self.artifact_retention_days)
    }
}

fn days(count: u64) -> Duration {
    Duration::from_secs(count.saturating_mul(86_400))
}

/// Settings plus where they came from.
#[derive(Debug, Clone)]
pub struct LoadedSettings {
    pub settings: Settings,
    /// Settings file path (None if using defaults).
    pub source: Option<PathBuf>,
}

/// Parse and validate settings from TOML text.
pub fn parse_settings(path: &Path, content: &str) -> Result<Settings, ConfigError> {
    let settings: Settings = toml::from_str(content).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        source: e,
    })?;
    settings.validate()?;
    Ok(settings)
}

/// Load settings from `path`, falling back to defaults when it is absent.
pub fn load_settings(path: &Path) -> Result<LoadedSettings, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no settings file, using defaults");
            return Ok(LoadedSettings {
                settings: Settings::default(),
                source: None,
            });
        }
        Err(e) => {
            return Err(ConfigError::IoError {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };
    let settings = parse_settings(path, &content)?;
    debug!(path = %path.display(), "settings loaded");
    Ok(LoadedSettings {
        settings,
        source: Some(path.to_path_buf()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn parse(content: &str) -> Result<Settings, ConfigError> {
        parse_settings(Path::new("settings.toml"), content)
    }

    #[test]
    fn empty_file_is_all_defaults() {
        assert_eq!(parse("").unwrap(), Settings::default());
    }

    #[test]
    fn partial_file_overrides_only_named_keys() {
        let settings = parse(
            "capability_ttl_hours = 6\ncache_format = \"lines\"\nannotation_tool = \"swappy\"\n",
        )
        .unwrap();
        assert_eq!(settings.capability_ttl_hours, 6);
        assert_eq!(settings.cache_format, CacheFormat::Lines);
        assert_eq!(settings.annotation_tool, AnnotationPreference::Swappy);
        assert_eq!(settings.test_history_limit, 20);
        assert_eq!(settings.migration_history_limit, 50);
    }

    #[test]
    fn unknown_key_is_parse_error() {
        let err = parse("capabilty_ttl_hours = 6\n").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn bad_enum_value_is_parse_error() {
        assert!(matches!(
            parse("cache_format = \"yaml\"\n"),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn zero_limits_are_rejected() {
        let err = parse("test_history_limit = 0\n").unwrap_err();
        match err {
            ConfigError::ValidationError { key, .. } => assert_eq!(key, "test_history_limit"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let loaded = load_settings(&dir.path().join("settings.toml")).unwrap();
        assert!(loaded.source.is_none());
        assert_eq!(loaded.settings, Settings::default());
    }

    #[test]
    fn file_on_disk_is_loaded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "probe_timeout_ms = 750\n").unwrap();
        let loaded = load_settings(&path).unwrap();
        assert_eq!(loaded.source.as_deref(), Some(path.as_path()));
        assert_eq!(loaded.settings.probe_timeout(), Duration::from_millis(750));
    }

    #[test]
    fn durations_follow_settings() {
        let settings = Settings::default();
        assert_eq!(settings.capability_ttl(), chrono::Duration::hours(24));
        assert_eq!(settings.backup_retention(), Duration::from_secs(30 * 86_400));
        assert_eq!(settings.test_timeout(), Duration::from_secs(15));
    }
}
