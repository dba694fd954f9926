//! The collaborator interface.
//!
//! [`CompatContext`] owns everything one invocation needs (runner, tool
//! registry, resolved paths, settings) and exposes the operations a capture
//! front end calls: initialise storage, detect capabilities, migrate after
//! version changes, run the compatibility battery, report, clean up and
//! regenerate tool configs.
//!
//! The context never takes the invocation lock itself; the caller holds an
//! [`InvocationLock`] for as long as the context is in use.

use crate::capabilities::{
    CacheError, CacheLoad, CapabilityCache, CapabilityProbe, CapabilitySnapshot, ToolRegistry,
};
use crate::config::{load_settings, ConfigError, Settings};
use crate::exit_codes::ExitCode;
use crate::harness::{CompatHarness, HarnessOptions, HistoryError, TestHistoryStore, TestRecord};
use crate::ledger::{LedgerError, LedgerStore};
use crate::migrate::{BackupStore, CycleReport, MigrationAction, MigrationEngine};
use crate::report::CompatReport;
use crate::retention::{self, PrunedItem, RetentionPolicy};
use crate::runner::CommandRunner;
use crate::storage::{self, InvocationLock, LockError, StorageError};
use chrono::Utc;
use serde::Serialize;
use sk_common::{RunId, StorePaths};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Error)]
pub enum ContextError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    History(#[from] HistoryError),

    #[error("failed to serialize report: {0}")]
    Report(#[from] serde_json::Error),
}

impl ContextError {
    /// Stable process exit code for this failure.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            ContextError::Config(_) => ExitCode::ConfigError,
            ContextError::Lock(LockError::Busy(_)) => ExitCode::LockError,
            ContextError::Report(_) => ExitCode::InternalError,
            ContextError::Lock(_)
            | ContextError::Storage(_)
            | ContextError::Cache(_)
            | ContextError::Ledger(_)
            | ContextError::History(_) => ExitCode::IoError,
        }
    }
}

/// What `init` created or cleaned.
#[derive(Debug, Clone, Default, Serialize)]
pub struct InitReport {
    /// Directories and documents that did not exist before.
    pub created: Vec<PathBuf>,
    pub swept_temp_files: Vec<PathBuf>,
}

/// What `clean_old_data` removed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanReport {
    pub migrations_trimmed: usize,
    pub tests_trimmed: usize,
    pub pruned: Vec<PrunedItem>,
}

impl CleanReport {
    pub fn is_empty(&self) -> bool {
        self.migrations_trimmed == 0 && self.tests_trimmed == 0 && self.pruned.is_empty()
    }
}

/// Result of regenerating one tool's config.
#[derive(Debug, Clone, Serialize)]
pub struct RegenerationEntry {
    pub tool: String,
    pub config_path: Option<PathBuf>,
    pub action: Option<MigrationAction>,
    pub backup: Option<PathBuf>,
    pub error: Option<String>,
}

impl RegenerationEntry {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// One invocation's view of shotkit state.
pub struct CompatContext<R: CommandRunner> {
    runner: R,
    registry: ToolRegistry,
    paths: StorePaths,
    settings: Settings,
    /// Settings file the settings were read from; None for defaults.
    settings_source: Option<PathBuf>,
    run_id: RunId,
    snapshot: Option<CapabilitySnapshot>,
}

impl<R: CommandRunner> CompatContext<R> {
    pub fn new(runner: R, paths: StorePaths, settings: Settings) -> Self {
        Self {
            runner,
            registry: ToolRegistry::builtin(),
            paths,
            settings,
            settings_source: None,
            run_id: RunId::new(),
            snapshot: None,
        }
    }

    /// Build a context with settings read from `<config>/settings.toml`.
    pub fn load(runner: R, paths: StorePaths) -> Result<Self, ContextError> {
        let loaded = load_settings(&paths.settings_file())?;
        let mut ctx = Self::new(runner, paths, loaded.settings);
        ctx.settings_source = loaded.source;
        Ok(ctx)
    }

    pub fn with_registry(mut self, registry: ToolRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn paths(&self) -> &StorePaths {
        &self.paths
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn settings_source(&self) -> Option<&Path> {
        self.settings_source.as_deref()
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Take the per-user invocation lock.
    pub fn lock(&self) -> Result<InvocationLock, ContextError> {
        Ok(InvocationLock::acquire(&self.paths.lock_file())?)
    }

    fn cache(&self) -> CapabilityCache {
        CapabilityCache::new(
            self.paths.capability_cache_file(),
            self.settings.capability_ttl(),
            self.settings.cache_format,
        )
    }

    fn ledger_store(&self) -> LedgerStore {
        LedgerStore::new(self.paths.ledger_file())
    }

    fn history_store(&self) -> TestHistoryStore {
        TestHistoryStore::new(self.paths.test_history_file())
    }

    fn engine(&self) -> MigrationEngine {
        MigrationEngine::new(
            &self.paths.tool_config_home,
            BackupStore::new(self.paths.backup_dir()),
        )
        .with_screenshot_dir(self.settings.screenshot_dir.clone())
    }

    /// Ensure storage directories and the ledger and test history documents
    /// exist, and sweep temp files left by interrupted writes.
    #[instrument(skip(self))]
    pub fn init(&mut self) -> Result<InitReport, ContextError> {
        let mut report = InitReport::default();
        for dir in [
            &self.paths.config_dir,
            &self.paths.data_dir,
            &self.paths.cache_dir,
        ] {
            if !dir.exists() {
                storage::ensure_dir(dir)?;
                report.created.push(dir.clone());
            }
        }

        let ledger = self.ledger_store();
        if !ledger.exists() {
            ledger.save(&ledger.load()?)?;
            report.created.push(ledger.path().to_path_buf());
        }
        let history = self.history_store();
        if !history.path().exists() {
            history.save(&history.load()?)?;
            report.created.push(history.path().to_path_buf());
        }

        report.swept_temp_files = self
            .sweep_dirs()
            .into_iter()
            .map(|dir| storage::sweep_temp_files(&dir))
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .flatten()
            .collect();

        info!(
            created = report.created.len(),
            swept = report.swept_temp_files.len(),
            "storage initialised"
        );
        Ok(report)
    }

    fn sweep_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = vec![
            self.paths.config_dir.clone(),
            self.paths.data_dir.clone(),
            self.paths.cache_dir.clone(),
        ];
        for (_, profile) in self.registry.configurable() {
            if let Some(parent) = self.paths.tool_config_home.join(profile.config_file).parent() {
                dirs.push(parent.to_path_buf());
            }
        }
        dirs
    }

    /// Capability snapshot, from the cache when fresh unless `force_refresh`.
    #[instrument(skip(self))]
    pub fn detect_capabilities(&mut self, force_refresh: bool) -> Result<CacheLoad, ContextError> {
        let probe = CapabilityProbe::new(&self.runner, &self.registry)
            .with_timeout(self.settings.probe_timeout());
        let load = self.cache().load(&probe, force_refresh)?;
        debug!(
            from_cache = load.from_cache,
            available = load.snapshot.available_count(),
            "capabilities detected"
        );
        self.snapshot = Some(load.snapshot.clone());
        Ok(load)
    }

    /// The snapshot for this invocation, detecting on first use.
    pub fn snapshot(&mut self) -> Result<&CapabilitySnapshot, ContextError> {
        let snapshot = match self.snapshot.take() {
            Some(snapshot) => snapshot,
            None => self.detect_capabilities(false)?.snapshot,
        };
        Ok(self.snapshot.insert(snapshot))
    }

    /// Compare probed versions with the ledger, migrate tool configs where
    /// the rules require it, and persist the updated ledger.
    #[instrument(skip(self))]
    pub fn check_for_changes_and_migrate(&mut self) -> Result<CycleReport, ContextError> {
        let snapshot = self.snapshot()?.clone();
        let store = self.ledger_store();
        let mut ledger = store.load()?;
        let cycle = self.engine().run_cycle(
            &self.registry,
            &mut ledger,
            &snapshot,
            self.settings.migration_history_limit,
            Utc::now(),
        );
        store.save(&ledger)?;
        info!(
            changed = cycle.changed,
            migrated = cycle.migrated,
            all_succeeded = cycle.all_succeeded,
            "version check complete"
        );
        Ok(cycle)
    }

    /// Run the check battery and append the record to test history.
    #[instrument(skip(self))]
    pub fn run_compatibility_tests(&mut self) -> Result<TestRecord, ContextError> {
        let snapshot = self.snapshot()?.clone();
        let options = HarnessOptions {
            timeout: self.settings.test_timeout(),
            annotation: self.settings.annotation_tool,
            freeze_during_capture: self.settings.freeze_during_capture_test,
        };
        let record = CompatHarness::new(&self.runner, &snapshot, self.paths.artifact_dir())
            .with_options(options)
            .run(self.run_id.as_str())?;
        self.history_store()
            .append(record.clone(), self.settings.test_history_limit)?;
        Ok(record)
    }

    /// Combine capabilities, ledger and test history into one report,
    /// optionally writing it to `destination` (JSON for a `.json` path,
    /// markdown otherwise).
    #[instrument(skip(self))]
    pub fn generate_report(&mut self, destination: Option<&Path>) -> Result<CompatReport, ContextError> {
        let snapshot = self.snapshot()?.clone();
        let ledger = self.ledger_store().load()?;
        let history = self.history_store().load()?;
        let report = CompatReport::build(self.run_id.to_string(), &snapshot, &ledger, &history, Utc::now());

        if let Some(path) = destination {
            let is_json = path.extension().and_then(|e| e.to_str()) == Some("json");
            if is_json {
                storage::write_json_atomic(path, &report)?;
            } else {
                storage::write_atomic(path, report.to_markdown().as_bytes())?;
            }
            info!(path = %path.display(), "report written");
        }
        Ok(report)
    }

    /// Trim histories to their limits, prune old backups and test
    /// artefacts, and sweep orphaned temp files.
    #[instrument(skip(self))]
    pub fn clean_old_data(&mut self) -> Result<CleanReport, ContextError> {
        let mut report = CleanReport::default();

        let ledger_store = self.ledger_store();
        if ledger_store.exists() {
            let mut ledger = ledger_store.load()?;
            report.migrations_trimmed = ledger.trim_history(self.settings.migration_history_limit);
            if report.migrations_trimmed > 0 {
                ledger_store.save(&ledger)?;
            }
        }
        let history_store = self.history_store();
        if history_store.path().exists() {
            let mut history = history_store.load()?;
            report.tests_trimmed = history.trim(self.settings.test_history_limit);
            if report.tests_trimmed > 0 {
                history_store.save(&history)?;
            }
        }

        let policy = RetentionPolicy::from_settings(&self.settings);
        report.pruned = retention::enforce(
            &policy,
            &self.paths.backup_dir(),
            &self.paths.artifact_dir(),
            SystemTime::now(),
        )?;
        let sweep_dirs = self.sweep_dirs();
        report
            .pruned
            .extend(retention::sweep_orphans(sweep_dirs.iter().map(PathBuf::as_path))?);

        info!(
            migrations_trimmed = report.migrations_trimmed,
            tests_trimmed = report.tests_trimmed,
            files_removed = report.pruned.len(),
            "old data cleaned"
        );
        Ok(report)
    }

    /// Back up and regenerate every configurable tool's config from its
    /// template, regardless of recorded versions.
    #[instrument(skip(self))]
    pub fn force_regenerate_all_configs(&mut self) -> Vec<RegenerationEntry> {
        self.engine()
            .regenerate_all(&self.registry)
            .into_iter()
            .map(|(tool, result)| match result {
                Ok(outcome) => {
                    info!(tool = %tool, action = %outcome.action, "config regenerated");
                    RegenerationEntry {
                        tool,
                        config_path: Some(outcome.config_path),
                        action: Some(outcome.action),
                        backup: outcome.backup,
                        error: None,
                    }
                }
                Err(e) => {
                    warn!(tool = %tool, error = %e, "config regeneration failed");
                    RegenerationEntry {
                        tool,
                        config_path: None,
                        action: None,
                        backup: None,
                        error: Some(e.to_string()),
                    }
                }
            })
            .collect()
    }
}
