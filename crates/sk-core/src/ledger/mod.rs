//! Version ledger.
//!
//! Durable record of the last version seen for each tool, plus a capped
//! history of migration attempts. Only the migration cycle mutates it.

use crate::capabilities::CapabilitySnapshot;
use crate::storage::{self, StorageError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sk_common::DOCUMENT_SCHEMA_VERSION;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Default number of migration records kept.
pub const DEFAULT_MIGRATION_HISTORY_LIMIT: usize = 50;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("ledger {path} has schema version {found}, this build supports up to {supported}")]
    UnsupportedSchema {
        path: PathBuf,
        found: u32,
        supported: u32,
    },
}

/// Outcome of one migration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationStatus {
    Success,
    Failed,
}

impl std::fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationStatus::Success => write!(f, "success"),
            MigrationStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One entry of the migration history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub tool: String,
    pub old_version: String,
    pub new_version: String,
    pub timestamp: DateTime<Utc>,
    pub status: MigrationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup: Option<PathBuf>,
}

/// A tool whose probed version differs from the recorded one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionChange {
    pub tool: String,
    /// None when the tool has never been recorded.
    pub previous: Option<String>,
    pub current: String,
}

impl VersionChange {
    pub fn is_first_sight(&self) -> bool {
        self.previous.is_none()
    }
}

/// Differences between a snapshot and the ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ChangeSet {
    pub changes: Vec<VersionChange>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Real version moves (previous version known).
    pub fn transitions(&self) -> impl Iterator<Item = &VersionChange> {
        self.changes.iter().filter(|c| !c.is_first_sight())
    }

    pub fn iter(&self) -> impl Iterator<Item = &VersionChange> {
        self.changes.iter()
    }
}

/// The persisted ledger document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionLedger {
    pub schema_version: u32,
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub last_check: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tool_versions: BTreeMap<String, String>,
    #[serde(default)]
    pub migration_history: Vec<MigrationRecord>,
}

impl VersionLedger {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            schema_version: DOCUMENT_SCHEMA_VERSION,
            created: now,
            last_check: None,
            tool_versions: BTreeMap::new(),
            migration_history: Vec::new(),
        }
    }

    /// Recorded version; an empty value counts as none.
    pub fn recorded_version(&self, tool: &str) -> Option<&str> {
        self.tool_versions
            .get(tool)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Tools whose known probed version differs from the ledger.
    ///
    /// Tools without a known version in the snapshot are not compared: an
    /// uninstalled tool keeps its last recorded version.
    pub fn compare(&self, snapshot: &CapabilitySnapshot) -> ChangeSet {
        let changes = snapshot
            .versions()
            .into_iter()
            .filter_map(|(tool, current)| {
                let previous = self.recorded_version(&tool).map(str::to_string);
                if previous.as_deref() == Some(current.as_str()) {
                    return None;
                }
                Some(VersionChange {
                    tool,
                    previous,
                    current,
                })
            })
            .collect();
        ChangeSet { changes }
    }

    /// Store the probed version of every installed tool and stamp
    /// `last_check`.
    ///
    /// An installed tool whose version could not be read is recorded as
    /// empty, so the next readable version is first sight rather than a
    /// transition from a stale value. Uninstalled tools are left alone.
    pub fn record_versions(&mut self, snapshot: &CapabilitySnapshot, now: DateTime<Utc>) {
        for record in snapshot.tools.values().filter(|r| r.available) {
            self.tool_versions
                .insert(record.tool.clone(), record.version.clone());
        }
        self.last_check = Some(now);
    }

    /// Append a migration record, keeping the newest `limit` by timestamp.
    pub fn push_migration(&mut self, record: MigrationRecord, limit: usize) {
        self.migration_history.push(record);
        self.migration_history.sort_by_key(|r| r.timestamp);
        if self.migration_history.len() > limit {
            let excess = self.migration_history.len() - limit;
            self.migration_history.drain(..excess);
        }
    }

    /// Trim history to `limit` without adding anything.
    pub fn trim_history(&mut self, limit: usize) -> usize {
        self.migration_history.sort_by_key(|r| r.timestamp);
        let excess = self.migration_history.len().saturating_sub(limit);
        self.migration_history.drain(..excess);
        excess
    }
}

/// File-backed ledger.
#[derive(Debug, Clone)]
pub struct LedgerStore {
    path: PathBuf,
}

impl LedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the ledger, or a fresh one when the file does not exist yet.
    pub fn load(&self) -> Result<VersionLedger, LedgerError> {
        match storage::read_json::<VersionLedger>(&self.path)? {
            Some(ledger) if ledger.schema_version > DOCUMENT_SCHEMA_VERSION => {
                Err(LedgerError::UnsupportedSchema {
                    path: self.path.clone(),
                    found: ledger.schema_version,
                    supported: DOCUMENT_SCHEMA_VERSION,
                })
            }
            Some(ledger) => Ok(ledger),
            None => {
                debug!(path = %self.path.display(), "no ledger yet");
                Ok(VersionLedger::new(Utc::now()))
            }
        }
    }

    pub fn save(&self, ledger: &VersionLedger) -> Result<(), LedgerError> {
        storage::write_json_atomic(&self.path, ledger)?;
        Ok(())
    }
}
