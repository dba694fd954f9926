//! Configuration migration.
//!
//! When the ledger sees a tool move from one recorded version to another,
//! the tool's rule table decides whether its configuration file needs work:
//!
//! - Targeted: idempotent textual edits on the existing file
//! - Regenerate: replace the file with the rendered template
//!
//! Either way the current file is backed up before it is touched, candidate
//! content is validated before it is written, and the write is atomic.
//! Failures are recorded per tool and never stop the cycle.

pub mod backup;
pub mod edit;
pub mod rules;
pub mod templates;

pub use backup::BackupStore;
pub use edit::ConfigDocument;
pub use rules::{
    version_matches, ConfigDialect, ConfigEdit, MigrationProfile, MigrationRule,
};

use crate::capabilities::{CapabilitySnapshot, ToolRegistry};
use crate::ledger::{ChangeSet, MigrationRecord, MigrationStatus, VersionLedger};
use crate::storage::{self, StorageError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, instrument, warn};

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to back up {path}: {source}")]
    Backup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("migrated config for {tool} is invalid: {message}")]
    Invalid { tool: String, message: String },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// What happened to a configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationAction {
    /// Targeted edits were applied.
    Edited { edits_applied: usize },
    /// The file already satisfied every edit.
    Unchanged,
    /// The file was replaced from the template.
    Regenerated,
    /// No file existed; the template was written.
    Created,
}

impl std::fmt::Display for MigrationAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationAction::Edited { edits_applied } => {
                write!(f, "applied {} targeted edit(s)", edits_applied)
            }
            MigrationAction::Unchanged => write!(f, "config already up to date"),
            MigrationAction::Regenerated => write!(f, "regenerated from template"),
            MigrationAction::Created => write!(f, "created from template"),
        }
    }
}

/// Successful outcome for one tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationOutcome {
    pub tool: String,
    pub config_path: PathBuf,
    pub action: MigrationAction,
    pub backup: Option<PathBuf>,
}

/// Result of one change-detection and migration cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    /// Some tool moved from one recorded version to another.
    pub changed: bool,
    /// At least one migration was attempted.
    pub migrated: bool,
    /// No attempted migration failed.
    pub all_succeeded: bool,
    pub changes: ChangeSet,
    /// Records appended to the ledger during this cycle.
    pub records: Vec<MigrationRecord>,
}

/// Applies migration profiles to files under a tool config home.
#[derive(Debug, Clone)]
pub struct MigrationEngine {
    tool_config_home: PathBuf,
    backups: BackupStore,
    screenshot_dir: Option<PathBuf>,
}

impl MigrationEngine {
    pub fn new(tool_config_home: impl Into<PathBuf>, backups: BackupStore) -> Self {
        Self {
            tool_config_home: tool_config_home.into(),
            backups,
            screenshot_dir: None,
        }
    }

    /// Directory substituted into rendered templates.
    pub fn with_screenshot_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.screenshot_dir = dir;
        self
    }

    pub fn config_path(&self, profile: &MigrationProfile) -> PathBuf {
        self.tool_config_home.join(profile.config_file)
    }

    pub fn render_template(&self, profile: &MigrationProfile) -> String {
        templates::render(profile.template, self.screenshot_dir.as_deref())
    }

    /// Migrate `tool` for the transition `old → new`.
    ///
    /// `Ok(None)` means the rule table asks for nothing.
    pub fn migrate(
        &self,
        tool: &str,
        profile: &MigrationProfile,
        old: &str,
        new: &str,
    ) -> Result<Option<MigrationOutcome>, MigrationError> {
        match profile.find_rule(old, new) {
            Some(rule) if rule.requires_migration => {
                if rule.regenerates() {
                    self.regenerate(tool, profile).map(Some)
                } else {
                    self.apply_edits(tool, profile, rule.edits).map(Some)
                }
            }
            _ => Ok(None),
        }
    }

    /// Apply targeted edits; a missing file gets the template instead.
    pub fn apply_edits(
        &self,
        tool: &str,
        profile: &MigrationProfile,
        edits: &[ConfigEdit],
    ) -> Result<MigrationOutcome, MigrationError> {
        let path = self.config_path(profile);
        let current = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let content = self.render_template(profile);
                validate(tool, profile, &content)?;
                storage::write_atomic(&path, content.as_bytes())?;
                return Ok(MigrationOutcome {
                    tool: tool.to_string(),
                    config_path: path,
                    action: MigrationAction::Created,
                    backup: None,
                });
            }
            Err(e) => return Err(MigrationError::Read { path, source: e }),
        };

        let mut doc = ConfigDocument::parse(&current, profile.dialect);
        let applied = doc.apply_all(edits);
        if applied == 0 {
            return Ok(MigrationOutcome {
                tool: tool.to_string(),
                config_path: path,
                action: MigrationAction::Unchanged,
                backup: None,
            });
        }

        let candidate = doc.render();
        validate(tool, profile, &candidate)?;
        let backup = self.backup(tool, &path)?;
        storage::write_atomic(&path, candidate.as_bytes())?;
        Ok(MigrationOutcome {
            tool: tool.to_string(),
            config_path: path,
            action: MigrationAction::Edited {
                edits_applied: applied,
            },
            backup: Some(backup),
        })
    }

    /// Replace the config with the rendered template, backing up any
    /// existing file first.
    pub fn regenerate(
        &self,
        tool: &str,
        profile: &MigrationProfile,
    ) -> Result<MigrationOutcome, MigrationError> {
        let path = self.config_path(profile);
        let content = self.render_template(profile);
        validate(tool, profile, &content)?;

        let (backup, action) = if path.exists() {
            (Some(self.backup(tool, &path)?), MigrationAction::Regenerated)
        } else {
            (None, MigrationAction::Created)
        };
        storage::write_atomic(&path, content.as_bytes())?;
        Ok(MigrationOutcome {
            tool: tool.to_string(),
            config_path: path,
            action,
            backup,
        })
    }

    fn backup(&self, tool: &str, path: &Path) -> Result<PathBuf, MigrationError> {
        self.backups
            .create(tool, path)
            .map_err(|e| MigrationError::Backup {
                path: path.to_path_buf(),
                source: e,
            })
    }

    /// Compare the snapshot against the ledger, migrate what the rules ask
    /// for, record every attempt and store the probed versions.
    ///
    /// The caller persists the ledger.
    #[instrument(skip_all)]
    pub fn run_cycle(
        &self,
        registry: &ToolRegistry,
        ledger: &mut VersionLedger,
        snapshot: &CapabilitySnapshot,
        history_limit: usize,
        now: DateTime<Utc>,
    ) -> CycleReport {
        let changes = ledger.compare(snapshot);
        let mut records = Vec::new();

        for change in changes.transitions() {
            let old = change.previous.as_deref().unwrap_or_default();
            let Some(profile) = registry.get(&change.tool).and_then(|spec| spec.migration) else {
                info!(tool = %change.tool, old, new = %change.current, "version changed, no migration profile");
                continue;
            };

            let (status, detail, backup) =
                match self.migrate(&change.tool, profile, old, &change.current) {
                    Ok(None) => {
                        info!(tool = %change.tool, old, new = %change.current, "version changed, no migration required");
                        continue;
                    }
                    Ok(Some(outcome)) => {
                        info!(
                            tool = %change.tool,
                            old,
                            new = %change.current,
                            action = %outcome.action,
                            "migration succeeded"
                        );
                        (
                            MigrationStatus::Success,
                            outcome.action.to_string(),
                            outcome.backup,
                        )
                    }
                    Err(e) => {
                        warn!(tool = %change.tool, old, new = %change.current, error = %e, "migration failed");
                        (MigrationStatus::Failed, e.to_string(), None)
                    }
                };

            let record = MigrationRecord {
                tool: change.tool.clone(),
                old_version: old.to_string(),
                new_version: change.current.clone(),
                timestamp: now,
                status,
                detail: Some(detail),
                backup,
            };
            ledger.push_migration(record.clone(), history_limit);
            records.push(record);
        }

        ledger.record_versions(snapshot, now);

        let changed = changes.transitions().next().is_some();
        CycleReport {
            changed,
            migrated: !records.is_empty(),
            all_succeeded: records.iter().all(|r| r.status == MigrationStatus::Success),
            changes,
            records,
        }
    }

    /// Regenerate every configurable tool's file.
    ///
    /// Returns one result per tool; a failure for one tool does not stop
    /// the others.
    pub fn regenerate_all(
        &self,
        registry: &ToolRegistry,
    ) -> Vec<(String, Result<MigrationOutcome, MigrationError>)> {
        registry
            .configurable()
            .map(|(spec, profile)| (spec.name.to_string(), self.regenerate(spec.name, profile)))
            .collect()
    }
}

/// Reject candidate content that the tool would not accept.
pub fn validate(tool: &str, profile: &MigrationProfile, content: &str) -> Result<(), MigrationError> {
    let invalid = |message: String| MigrationError::Invalid {
        tool: tool.to_string(),
        message,
    };
    if profile.dialect == ConfigDialect::Toml {
        toml::from_str::<toml::Table>(content).map_err(|e| invalid(e.to_string()))?;
    }
    if let Some(section) = profile.required_section {
        let doc = ConfigDocument::parse(content, profile.dialect);
        if !doc.has_section(section) {
            return Err(invalid(format!("missing [{}] section", section)));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::CapabilityRecord;
    use rules::{SATTY_PROFILE, SWAPPY_PROFILE};
    use std::collections::BTreeMap;
    use tempfile::{tempdir, TempDir};

    fn engine(dir: &TempDir) -> MigrationEngine {
        MigrationEngine::new(
            dir.path().join("home"),
            BackupStore::new(dir.path().join("backups")),
        )
    }

    fn write_config(engine: &MigrationEngine, profile: &MigrationProfile, content: &str) -> PathBuf {
        let path = engine.config_path(profile);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).unwrap();
        path
    }

    fn snapshot(versions: &[(&str, &str)]) -> CapabilitySnapshot {
        CapabilitySnapshot::new(
            Utc::now(),
            versions.iter().map(|(tool, version)| {
                CapabilityRecord::available(
                    *tool,
                    PathBuf::from("/usr/bin").join(tool),
                    *version,
                    BTreeMap::new(),
                )
            }),
        )
    }

    #[test]
    fn targeted_migration_edits_and_backs_up() {
        let dir = tempdir().unwrap();
        let engine = engine(&dir);
        let original = "[general]\ninit-tool = \"arrow\"\n";
        let path = write_config(&engine, &SATTY_PROFILE, original);

        let outcome = engine
            .migrate("satty", &SATTY_PROFILE, "1.0.5", "1.1.0")
            .unwrap()
            .unwrap();
        assert_eq!(outcome.action, MigrationAction::Edited { edits_applied: 3 });
        let backup = outcome.backup.unwrap();
        assert_eq!(std::fs::read_to_string(backup).unwrap(), original);

        let migrated = std::fs::read_to_string(&path).unwrap();
        assert!(migrated.contains("initial-tool = \"arrow\""));
        assert!(!migrated.contains("init-tool ="));
        assert!(migrated.contains("actions-on-enter = [\"save-to-clipboard\"]"));
    }

    #[test]
    fn no_rule_means_no_outcome_and_no_write() {
        let dir = tempdir().unwrap();
        let engine = engine(&dir);
        let path = write_config(&engine, &SATTY_PROFILE, "[general]\n");
        assert!(engine
            .migrate("satty", &SATTY_PROFILE, "1.1.0", "1.2.0")
            .unwrap()
            .is_none());
        assert_eq!(std::fs::read_to_string(path).unwrap(), "[general]\n");
        assert!(!dir.path().join("backups").exists());
    }

    #[test]
    fn targeted_on_missing_file_writes_template() {
        let dir = tempdir().unwrap();
        let engine = engine(&dir);
        let outcome = engine
            .apply_edits("swappy", &SWAPPY_PROFILE, rules::SWAPPY_RULES[0].edits)
            .unwrap();
        assert_eq!(outcome.action, MigrationAction::Created);
        assert!(outcome.backup.is_none());
        let content = std::fs::read_to_string(engine.config_path(&SWAPPY_PROFILE)).unwrap();
        assert!(content.starts_with("[Default]\n"));
    }

    #[test]
    fn invalid_candidate_leaves_file_untouched() {
        let dir = tempdir().unwrap();
        let engine = engine(&dir);
        // Unterminated string: edits apply textually, TOML validation fails.
        let broken = "[general]\ninit-tool = \"arrow\nfullscreen = true\n";
        let path = write_config(&engine, &SATTY_PROFILE, broken);

        let err = engine
            .migrate("satty", &SATTY_PROFILE, "1.0.0", "1.1.0")
            .unwrap_err();
        assert!(matches!(err, MigrationError::Invalid { .. }));
        assert_eq!(std::fs::read_to_string(path).unwrap(), broken);
        assert!(!dir.path().join("backups").exists());
    }

    #[test]
    fn regenerate_backs_up_existing() {
        let dir = tempdir().unwrap();
        let engine = engine(&dir).with_screenshot_dir(Some(PathBuf::from("/shots")));
        write_config(&engine, &SATTY_PROFILE, "old = true\n");
        let outcome = engine
            .migrate("satty", &SATTY_PROFILE, "0.13.0", "1.0.0")
            .unwrap()
            .unwrap();
        assert_eq!(outcome.action, MigrationAction::Regenerated);
        assert!(outcome.backup.is_some());
        let content = std::fs::read_to_string(outcome.config_path).unwrap();
        assert!(content.contains("output-filename = \"/shots/satty-"));
    }

    #[test]
    fn swappy_validation_requires_default_section() {
        assert!(validate("swappy", &SWAPPY_PROFILE, "[Default]\nx=1\n").is_ok());
        assert!(matches!(
            validate("swappy", &SWAPPY_PROFILE, "[Other]\nx=1\n"),
            Err(MigrationError::Invalid { .. })
        ));
    }

    #[test]
    fn cycle_records_success_and_updates_versions() {
        let dir = tempdir().unwrap();
        let engine = engine(&dir);
        write_config(&engine, &SATTY_PROFILE, "[general]\ninit-tool = \"arrow\"\n");
        let registry = ToolRegistry::builtin();
        let mut ledger = VersionLedger::new(Utc::now());
        ledger.record_versions(&snapshot(&[("satty", "1.0.5"), ("grim", "1.4.1")]), Utc::now());

        let report = engine.run_cycle(
            &registry,
            &mut ledger,
            &snapshot(&[("satty", "1.1.0"), ("grim", "1.4.1")]),
            50,
            Utc::now(),
        );
        assert!(report.changed);
        assert!(report.migrated);
        assert!(report.all_succeeded);
        assert_eq!(report.records.len(), 1);
        assert_eq!(ledger.migration_history.len(), 1);
        assert_eq!(ledger.recorded_version("satty"), Some("1.1.0"));
    }

    #[test]
    fn cycle_failure_is_recorded_and_versions_still_advance() {
        let dir = tempdir().unwrap();
        let engine = engine(&dir);
        write_config(&engine, &SATTY_PROFILE, "[general]\ninit-tool = \"arrow\n");
        let registry = ToolRegistry::builtin();
        let mut ledger = VersionLedger::new(Utc::now());
        ledger.record_versions(&snapshot(&[("satty", "1.0.5")]), Utc::now());

        let report = engine.run_cycle(&registry, &mut ledger, &snapshot(&[("satty", "1.1.0")]), 50, Utc::now());
        assert!(report.migrated);
        assert!(!report.all_succeeded);
        assert_eq!(report.records[0].status, MigrationStatus::Failed);
        assert!(report.records[0].detail.as_deref().unwrap().contains("invalid"));
        assert_eq!(ledger.recorded_version("satty"), Some("1.1.0"));
    }

    #[test]
    fn first_sight_is_not_a_change() {
        let dir = tempdir().unwrap();
        let engine = engine(&dir);
        let registry = ToolRegistry::builtin();
        let mut ledger = VersionLedger::new(Utc::now());
        let report = engine.run_cycle(&registry, &mut ledger, &snapshot(&[("satty", "1.1.0")]), 50, Utc::now());
        assert!(!report.changed);
        assert!(!report.migrated);
        assert!(report.all_succeeded);
        assert_eq!(report.changes.len(), 1);
        assert!(ledger.migration_history.is_empty());
        assert!(!engine.config_path(&SATTY_PROFILE).exists());
    }

    #[test]
    fn regenerate_all_covers_every_configurable_tool() {
        let dir = tempdir().unwrap();
        let engine = engine(&dir);
        let results = engine.regenerate_all(&ToolRegistry::builtin());
        let names: Vec<_> = results.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["satty", "swappy"]);
        assert!(results.iter().all(|(_, r)| r.is_ok()));
        assert!(engine.config_path(&SWAPPY_PROFILE).exists());
    }
}
