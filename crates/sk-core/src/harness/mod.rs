//! Compatibility test harness.
//!
//! Runs a fixed battery of functional checks against the wrapped tools and
//! folds the results into one verdict. Every run produces exactly one
//! [`TestRecord`]; the caller appends it to [`TestHistory`].
//!
//! Checks never propagate tool failures: an absent tool is `skip`, a tool
//! that misbehaves is `fail` (or `warn`). Only structural problems, such as
//! not being able to create the artefact directory, abort a run.

pub mod checks;
pub mod history;

pub use checks::{detect_image_format, ImageFormat, CLIPBOARD_TOKEN_PREFIX, OCR_TEXT};
pub use history::{HistoryError, TestHistory, TestHistoryStore, DEFAULT_TEST_HISTORY_LIMIT};

use crate::capabilities::CapabilitySnapshot;
use crate::config::AnnotationPreference;
use crate::runner::CommandRunner;
use crate::storage::{self, StorageError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, info_span, warn};

/// Result of a single check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Fail,
    Skip,
    Warn,
}

impl std::fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckStatus::Pass => write!(f, "pass"),
            CheckStatus::Fail => write!(f, "fail"),
            CheckStatus::Skip => write!(f, "skip"),
            CheckStatus::Warn => write!(f, "warn"),
        }
    }
}

/// Verdict for a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallResult {
    Pass,
    Warn,
    Fail,
}

impl std::fmt::Display for OverallResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverallResult::Pass => write!(f, "pass"),
            OverallResult::Warn => write!(f, "warn"),
            OverallResult::Fail => write!(f, "fail"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentResult {
    pub component: String,
    pub status: CheckStatus,
    /// Whether a failure here fails the whole run.
    pub critical: bool,
    pub detail: String,
}

impl ComponentResult {
    pub fn new(
        component: impl Into<String>,
        critical: bool,
        status: CheckStatus,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            component: component.into(),
            status,
            critical,
            detail: detail.into(),
        }
    }

    pub fn is_critical_failure(&self) -> bool {
        self.critical && self.status == CheckStatus::Fail
    }
}

/// One harness run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRecord {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: u64,
    pub overall_result: OverallResult,
    pub component_results: Vec<ComponentResult>,
    /// Tool versions the run was made against.
    #[serde(default)]
    pub tool_versions: BTreeMap<String, String>,
}

impl TestRecord {
    pub fn count(&self, status: CheckStatus) -> usize {
        self.component_results
            .iter()
            .filter(|r| r.status == status)
            .count()
    }

    pub fn critical_failures(&self) -> impl Iterator<Item = &ComponentResult> {
        self.component_results
            .iter()
            .filter(|r| r.is_critical_failure())
    }
}

/// Fold component results into a verdict.
///
/// `fail` if any critical component failed; otherwise `warn` if anything
/// failed, warned or was skipped; otherwise `pass`.
pub fn aggregate(results: &[ComponentResult]) -> OverallResult {
    if results.iter().any(ComponentResult::is_critical_failure) {
        OverallResult::Fail
    } else if results.iter().any(|r| r.status != CheckStatus::Pass) {
        OverallResult::Warn
    } else {
        OverallResult::Pass
    }
}

/// Knobs for one harness run.
#[derive(Debug, Clone)]
pub struct HarnessOptions {
    /// Timeout for each tool invocation.
    pub timeout: Duration,
    pub annotation: AnnotationPreference,
    /// Hold the freeze helper while the capture check runs.
    pub freeze_during_capture: bool,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(15_000),
            annotation: AnnotationPreference::Auto,
            freeze_during_capture: false,
        }
    }
}

/// Runs the check battery against one capability snapshot.
pub struct CompatHarness<'a, R: CommandRunner + 'a> {
    runner: &'a R,
    snapshot: &'a CapabilitySnapshot,
    artifact_root: PathBuf,
    options: HarnessOptions,
}

impl<'a, R: CommandRunner> CompatHarness<'a, R> {
    pub fn new(
        runner: &'a R,
        snapshot: &'a CapabilitySnapshot,
        artifact_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runner,
            snapshot,
            artifact_root: artifact_root.into(),
            options: HarnessOptions::default(),
        }
    }

    pub fn with_options(mut self, options: HarnessOptions) -> Self {
        self.options = options;
        self
    }

    /// Run every check in order and build the record.
    ///
    /// Artefacts live in `<artifact_root>/<run_id>/` and are removed before
    /// returning.
    pub fn run(&self, run_id: &str) -> Result<TestRecord, StorageError> {
        let span = info_span!("compat_tests", run_id);
        let _enter = span.enter();

        let start_time = Utc::now();
        let started = std::time::Instant::now();
        let artifacts = self.artifact_root.join(run_id);
        storage::ensure_dir(&artifacts)?;

        let ctx = checks::CheckContext {
            runner: self.runner,
            snapshot: self.snapshot,
            artifacts: &artifacts,
            options: &self.options,
        };
        let component_results: Vec<ComponentResult> = checks::BATTERY
            .iter()
            .map(|check| {
                let outcome = (check.run)(&ctx);
                let result =
                    ComponentResult::new(check.component, check.critical, outcome.status, outcome.detail);
                debug!(
                    component = %result.component,
                    status = %result.status,
                    detail = %result.detail,
                    "check finished"
                );
                result
            })
            .collect();

        remove_artifacts(&artifacts);

        let overall_result = aggregate(&component_results);
        let record = TestRecord {
            start_time,
            end_time: Utc::now(),
            duration_ms: started.elapsed().as_millis() as u64,
            overall_result,
            component_results,
            tool_versions: self.snapshot.versions(),
        };
        info!(
            overall = %record.overall_result,
            passed = record.count(CheckStatus::Pass),
            failed = record.count(CheckStatus::Fail),
            skipped = record.count(CheckStatus::Skip),
            duration_ms = record.duration_ms,
            "compatibility tests complete"
        );
        Ok(record)
    }
}

fn remove_artifacts(dir: &Path) {
    if let Err(e) = std::fs::remove_dir_all(dir) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %dir.display(), error = %e, "failed to remove test artefacts");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(component: &str, critical: bool, status: CheckStatus) -> ComponentResult {
        ComponentResult::new(component, critical, status, "")
    }

    #[test]
    fn all_pass_is_pass() {
        let results = vec![result("a", true, CheckStatus::Pass), result("b", false, CheckStatus::Pass)];
        assert_eq!(aggregate(&results), OverallResult::Pass);
    }

    #[test]
    fn critical_failure_is_fail() {
        let results = vec![result("a", true, CheckStatus::Fail), result("b", false, CheckStatus::Pass)];
        assert_eq!(aggregate(&results), OverallResult::Fail);
    }

    #[test]
    fn non_critical_failure_is_warn() {
        let results = vec![result("a", true, CheckStatus::Pass), result("b", false, CheckStatus::Fail)];
        assert_eq!(aggregate(&results), OverallResult::Warn);
    }

    #[test]
    fn skip_degrades_to_warn_even_when_critical() {
        let results = vec![result("a", true, CheckStatus::Skip)];
        assert_eq!(aggregate(&results), OverallResult::Warn);
    }

    #[test]
    fn empty_battery_passes() {
        assert_eq!(aggregate(&[]), OverallResult::Pass);
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&result("capture", true, CheckStatus::Skip)).unwrap();
        assert!(json.contains("\"status\":\"skip\""));
        assert_eq!(serde_json::to_string(&OverallResult::Warn).unwrap(), "\"warn\"");
    }
}
