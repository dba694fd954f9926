//! Capability records and snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// What one probe cycle learned about one tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityRecord {
    /// Tool identifier (registry key, not necessarily the binary name).
    pub tool: String,

    /// Whether a binary was found.
    pub available: bool,

    /// Freeform version string; empty when unknown.
    #[serde(default)]
    pub version: String,

    /// Resolved executable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Named boolean feature flags.
    #[serde(default)]
    pub features: BTreeMap<String, bool>,
}

impl CapabilityRecord {
    /// A tool that is not installed: every known flag is false.
    pub fn unavailable<I, S>(tool: impl Into<String>, feature_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tool: tool.into(),
            available: false,
            version: String::new(),
            path: None,
            features: feature_names
                .into_iter()
                .map(|name| (name.into(), false))
                .collect(),
        }
    }

    /// An installed tool.
    pub fn available(
        tool: impl Into<String>,
        path: PathBuf,
        version: impl Into<String>,
        features: BTreeMap<String, bool>,
    ) -> Self {
        Self {
            tool: tool.into(),
            available: true,
            version: version.into(),
            path: Some(path),
            features,
        }
    }

    /// Feature flag value; always false for an unavailable tool.
    pub fn has(&self, flag: &str) -> bool {
        self.available && self.features.get(flag).copied().unwrap_or(false)
    }

    /// Version if known.
    pub fn known_version(&self) -> Option<&str> {
        (!self.version.is_empty()).then_some(self.version.as_str())
    }

    /// Binary name to invoke, derived from the resolved path.
    pub fn program(&self) -> Option<String> {
        self.path
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|name| name.to_string_lossy().to_string())
    }

    /// Enforce `available = false` ⇒ no feature flag is true.
    pub(crate) fn normalized(mut self) -> Self {
        if !self.available {
            for value in self.features.values_mut() {
                *value = false;
            }
            self.path = None;
        }
        self
    }
}

/// Immutable result of one probe cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySnapshot {
    pub probed_at: DateTime<Utc>,
    pub tools: BTreeMap<String, CapabilityRecord>,
}

impl CapabilitySnapshot {
    pub fn new(probed_at: DateTime<Utc>, records: impl IntoIterator<Item = CapabilityRecord>) -> Self {
        Self {
            probed_at,
            tools: records
                .into_iter()
                .map(|r| {
                    let r = r.normalized();
                    (r.tool.clone(), r)
                })
                .collect(),
        }
    }

    pub fn get(&self, tool: &str) -> Option<&CapabilityRecord> {
        self.tools.get(tool)
    }

    pub fn is_available(&self, tool: &str) -> bool {
        self.get(tool).map(|r| r.available).unwrap_or(false)
    }

    pub fn has_feature(&self, tool: &str, flag: &str) -> bool {
        self.get(tool).map(|r| r.has(flag)).unwrap_or(false)
    }

    pub fn version(&self, tool: &str) -> Option<&str> {
        self.get(tool).and_then(CapabilityRecord::known_version)
    }

    /// Versions of available tools whose version is known.
    pub fn versions(&self) -> BTreeMap<String, String> {
        self.tools
            .values()
            .filter(|r| r.available)
            .filter_map(|r| r.known_version().map(|v| (r.tool.clone(), v.to_string())))
            .collect()
    }

    pub fn available_count(&self) -> usize {
        self.tools.values().filter(|r| r.available).count()
    }

    /// Whether the snapshot is younger than `ttl` at `now`.
    ///
    /// A snapshot dated in the future (clock moved backwards) is stale.
    pub fn is_fresh(&self, ttl: chrono::Duration, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.probed_at);
        age >= chrono::Duration::zero() && age < ttl
    }
}
