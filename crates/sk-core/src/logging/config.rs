//! Resolution of log level, format and filter directive.
//!
//! Precedence, lowest first: built-in default (`warn`, human), `RUST_LOG`
//! (kept verbatim as a filter directive), `SHOTKIT_LOG` / `SHOTKIT_LOG_FORMAT`,
//! then the CLI (`-v`/`-q`, `--format json`).

use serde::{Deserialize, Serialize};

/// Where log lines go and how they look. Always stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Human,
    /// One JSON object per line, paired with `--format json` payloads.
    Jsonl,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "human" | "text" => Ok(LogFormat::Human),
            "json" | "jsonl" => Ok(LogFormat::Jsonl),
            other => Err(format!("unknown log format {:?} (expected human or json)", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    /// shotkit usually runs from a hotkey; only problems should surface.
    #[default]
    Warn,
    Error,
    Off,
}

const LEVEL_NAMES: &[(&str, LogLevel)] = &[
    ("trace", LogLevel::Trace),
    ("debug", LogLevel::Debug),
    ("info", LogLevel::Info),
    ("warn", LogLevel::Warn),
    ("warning", LogLevel::Warn),
    ("error", LogLevel::Error),
    ("off", LogLevel::Off),
];

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        LEVEL_NAMES
            .iter()
            .find(|(_, level)| *level == self)
            .map(|(name, _)| *name)
            .unwrap_or("warn")
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        LEVEL_NAMES
            .iter()
            .find(|(name, _)| *name == wanted)
            .map(|(_, level)| *level)
            .ok_or_else(|| format!("unknown log level {:?}", s))
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LogConfig {
    pub format: LogFormat,
    pub level: LogLevel,
    /// Raw `RUST_LOG` directive; used instead of `level` when present.
    pub directive: Option<String>,
}

impl LogConfig {
    /// Resolve against the process environment.
    pub fn from_env(cli_level: Option<LogLevel>, cli_format: Option<LogFormat>) -> Self {
        Self::from_lookup(cli_level, cli_format, |key| std::env::var(key).ok())
    }

    /// Resolve against an arbitrary environment lookup.
    pub fn from_lookup<F>(cli_level: Option<LogLevel>, cli_format: Option<LogFormat>, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = LogConfig {
            directive: env("RUST_LOG").filter(|d| !d.trim().is_empty()),
            ..LogConfig::default()
        };

        if let Some(level) = env("SHOTKIT_LOG").and_then(|v| v.parse().ok()) {
            config.level = level;
            config.directive = None;
        }
        if let Some(format) = env("SHOTKIT_LOG_FORMAT").and_then(|v| v.parse().ok()) {
            config.format = format;
        }

        if let Some(level) = cli_level {
            config.level = level;
            config.directive = None;
        }
        if let Some(format) = cli_format {
            config.format = format;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_of(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn parses_names_case_insensitively() {
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Jsonl));
        assert_eq!("Warning".parse::<LogLevel>(), Ok(LogLevel::Warn));
        assert!("xml".parse::<LogFormat>().is_err());
        assert!("loud".parse::<LogLevel>().is_err());
        assert_eq!(LogLevel::Warn.to_string(), "warn");
    }

    #[test]
    fn quiet_by_default() {
        let config = LogConfig::from_lookup(None, None, env_of(&[]));
        assert_eq!(config, LogConfig::default());
        assert_eq!(config.level, LogLevel::Warn);
    }

    #[test]
    fn rust_log_is_kept_as_directive() {
        let config = LogConfig::from_lookup(None, None, env_of(&[("RUST_LOG", "sk_core::migrate=trace")]));
        assert_eq!(config.directive.as_deref(), Some("sk_core::migrate=trace"));
    }

    #[test]
    fn shotkit_log_replaces_rust_log() {
        let config = LogConfig::from_lookup(
            None,
            None,
            env_of(&[("SHOTKIT_LOG", "error"), ("RUST_LOG", "trace")]),
        );
        assert_eq!(config.level, LogLevel::Error);
        assert_eq!(config.directive, None);
    }

    #[test]
    fn cli_wins_over_environment() {
        let config = LogConfig::from_lookup(
            Some(LogLevel::Debug),
            Some(LogFormat::Jsonl),
            env_of(&[("SHOTKIT_LOG", "error"), ("SHOTKIT_LOG_FORMAT", "human"), ("RUST_LOG", "info")]),
        );
        assert_eq!(config.level, LogLevel::Debug);
        assert_eq!(config.format, LogFormat::Jsonl);
        assert_eq!(config.directive, None);
    }

    #[test]
    fn unparsable_env_values_are_ignored() {
        let config = LogConfig::from_lookup(
            None,
            None,
            env_of(&[("SHOTKIT_LOG", "chatty"), ("SHOTKIT_LOG_FORMAT", "xml")]),
        );
        assert_eq!(config.level, LogLevel::Warn);
        assert_eq!(config.format, LogFormat::Human);
    }
}
