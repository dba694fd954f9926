//! Human and machine renderings of shotkit state.
//!
//! [`CompatReport`] gathers the capability snapshot, ledger and test history
//! into one document. The markdown renderers here are also used by the CLI
//! for the individual commands.

use crate::capabilities::CapabilitySnapshot;
use crate::harness::{CheckStatus, OverallResult, TestHistory, TestRecord};
use crate::ledger::{MigrationRecord, MigrationStatus, VersionLedger};
use crate::migrate::CycleReport;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sk_common::SCHEMA_VERSION;
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Migration records included in a report.
pub const REPORT_MIGRATION_LIMIT: usize = 10;

/// Outcome counts across the stored test history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TestSummary {
    pub runs: usize,
    pub pass: usize,
    pub warn: usize,
    pub fail: usize,
}

impl TestSummary {
    pub fn from_history(history: &TestHistory) -> Self {
        history
            .test_history
            .iter()
            .fold(TestSummary::default(), |mut acc, record| {
                acc.runs += 1;
                match record.overall_result {
                    OverallResult::Pass => acc.pass += 1,
                    OverallResult::Warn => acc.warn += 1,
                    OverallResult::Fail => acc.fail += 1,
                }
                acc
            })
    }
}

/// Full compatibility report.
#[derive(Debug, Clone, Serialize)]
pub struct CompatReport {
    pub schema_version: &'static str,
    pub generated_at: DateTime<Utc>,
    pub run_id: String,
    pub capabilities: CapabilitySnapshot,
    pub recorded_versions: BTreeMap<String, String>,
    pub last_check: Option<DateTime<Utc>>,
    /// Most recent first.
    pub recent_migrations: Vec<MigrationRecord>,
    pub last_test: Option<TestRecord>,
    pub test_summary: TestSummary,
}

impl CompatReport {
    pub fn build(
        run_id: impl Into<String>,
        snapshot: &CapabilitySnapshot,
        ledger: &VersionLedger,
        history: &TestHistory,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            generated_at: now,
            run_id: run_id.into(),
            capabilities: snapshot.clone(),
            recorded_versions: ledger.tool_versions.clone(),
            last_check: ledger.last_check,
            recent_migrations: ledger
                .migration_history
                .iter()
                .rev()
                .take(REPORT_MIGRATION_LIMIT)
                .cloned()
                .collect(),
            last_test: history.latest().cloned(),
            test_summary: TestSummary::from_history(history),
        }
    }

    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# shotkit compatibility report");
        let _ = writeln!(out);
        let _ = writeln!(out, "Generated: {}", self.generated_at.to_rfc3339());
        let _ = writeln!(out, "Run: {}", self.run_id);
        if let Some(last_check) = self.last_check {
            let _ = writeln!(out, "Last version check: {}", last_check.to_rfc3339());
        }
        let _ = writeln!(out);

        out.push_str(&render_capabilities(&self.capabilities));
        let _ = writeln!(out);

        let _ = writeln!(out, "## Migrations");
        let _ = writeln!(out);
        if self.recent_migrations.is_empty() {
            let _ = writeln!(out, "No migrations recorded.");
        } else {
            let _ = writeln!(out, "| When | Tool | From | To | Status | Detail |");
            let _ = writeln!(out, "|------|------|------|----|--------|--------|");
            for record in &self.recent_migrations {
                let _ = writeln!(
                    out,
                    "| {} | {} | {} | {} | {} | {} |",
                    record.timestamp.format("%Y-%m-%d %H:%M"),
                    record.tool,
                    record.old_version,
                    record.new_version,
                    record.status,
                    record.detail.as_deref().unwrap_or("")
                );
            }
        }
        let _ = writeln!(out);

        let _ = writeln!(out, "## Compatibility tests");
        let _ = writeln!(out);
        let summary = &self.test_summary;
        let _ = writeln!(
            out,
            "{} run(s) on record: {} pass, {} warn, {} fail",
            summary.runs, summary.pass, summary.warn, summary.fail
        );
        if let Some(record) = &self.last_test {
            let _ = writeln!(out);
            out.push_str(&render_test_table(record));
        }
        out
    }

    pub fn summary_line(&self) -> String {
        let last = self
            .last_test
            .as_ref()
            .map(|r| r.overall_result.to_string())
            .unwrap_or_else(|| "never".to_string());
        format!(
            "{}/{} tools available, {} migration(s) on record, last test: {}",
            self.capabilities.available_count(),
            self.capabilities.tools.len(),
            self.recent_migrations.len(),
            last
        )
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

/// Markdown table of tools and their enabled feature flags.
pub fn render_capabilities(snapshot: &CapabilitySnapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "## Capabilities");
    let _ = writeln!(out);
    let _ = writeln!(out, "Probed: {}", snapshot.probed_at.to_rfc3339());
    let _ = writeln!(out);
    let _ = writeln!(out, "| Tool | Available | Version | Features |");
    let _ = writeln!(out, "|------|-----------|---------|----------|");
    for record in snapshot.tools.values() {
        let features: Vec<&str> = record
            .features
            .iter()
            .filter(|(_, on)| **on)
            .map(|(name, _)| name.as_str())
            .collect();
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} |",
            record.tool,
            yes_no(record.available),
            if record.version.is_empty() { "-" } else { record.version.as_str() },
            if features.is_empty() { "-".to_string() } else { features.join(", ") }
        );
    }
    out
}

pub fn capabilities_summary(snapshot: &CapabilitySnapshot) -> String {
    let missing: Vec<&str> = snapshot
        .tools
        .values()
        .filter(|r| !r.available)
        .map(|r| r.tool.as_str())
        .collect();
    let mut line = format!(
        "{}/{} tools available",
        snapshot.available_count(),
        snapshot.tools.len()
    );
    if !missing.is_empty() {
        let _ = write!(line, " (missing: {})", missing.join(", "));
    }
    line
}

fn status_marker(status: CheckStatus) -> &'static str {
    match status {
        CheckStatus::Pass => "PASS",
        CheckStatus::Fail => "FAIL",
        CheckStatus::Skip => "SKIP",
        CheckStatus::Warn => "WARN",
    }
}

fn render_test_table(record: &TestRecord) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Last run {} ({} ms): **{}**",
        record.start_time.to_rfc3339(),
        record.duration_ms,
        record.overall_result
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "| Component | Critical | Status | Detail |");
    let _ = writeln!(out, "|-----------|----------|--------|--------|");
    for result in &record.component_results {
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} |",
            result.component,
            yes_no(result.critical),
            status_marker(result.status),
            result.detail
        );
    }
    out
}

/// Human rendering of one harness run.
pub fn render_test_record(record: &TestRecord) -> String {
    let mut out = String::from("# Compatibility tests\n\n");
    out.push_str(&render_test_table(record));
    let critical: Vec<&str> = record
        .critical_failures()
        .map(|r| r.component.as_str())
        .collect();
    if !critical.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Critical failures: {}", critical.join(", "));
    }
    out
}

pub fn test_summary_line(record: &TestRecord) -> String {
    format!(
        "tests {}: {} pass, {} warn, {} fail, {} skip",
        record.overall_result,
        record.count(CheckStatus::Pass),
        record.count(CheckStatus::Warn),
        record.count(CheckStatus::Fail),
        record.count(CheckStatus::Skip)
    )
}

/// Human rendering of a migration cycle.
pub fn render_cycle(cycle: &CycleReport) -> String {
    let mut out = String::from("# Version check\n\n");
    if cycle.changes.is_empty() {
        out.push_str("No version changes.\n");
        return out;
    }
    for change in cycle.changes.iter() {
        match &change.previous {
            Some(previous) => {
                let _ = writeln!(out, "- {}: {} -> {}", change.tool, previous, change.current);
            }
            None => {
                let _ = writeln!(out, "- {}: first seen at {}", change.tool, change.current);
            }
        }
    }
    if cycle.records.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "No migrations required.");
    } else {
        let _ = writeln!(out);
        let _ = writeln!(out, "## Migrations");
        let _ = writeln!(out);
        for record in &cycle.records {
            let marker = match record.status {
                MigrationStatus::Success => "ok",
                MigrationStatus::Failed => "FAILED",
            };
            let _ = writeln!(
                out,
                "- [{}] {} {} -> {}: {}",
                marker,
                record.tool,
                record.old_version,
                record.new_version,
                record.detail.as_deref().unwrap_or("")
            );
        }
    }
    out
}

pub fn cycle_summary_line(cycle: &CycleReport) -> String {
    if !cycle.changed {
        return "no version changes".to_string();
    }
    let failed = cycle
        .records
        .iter()
        .filter(|r| r.status == MigrationStatus::Failed)
        .count();
    format!(
        "{} version change(s), {} migration(s), {} failed",
        cycle.changes.transitions().count(),
        cycle.records.len(),
        failed
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::CapabilityRecord;
    use crate::harness::ComponentResult;
    use chrono::TimeZone;

    fn snapshot() -> CapabilitySnapshot {
        let mut features = BTreeMap::new();
        features.insert("supports-geometry-flag".to_string(), true);
        features.insert("supports-jpeg".to_string(), false);
        CapabilitySnapshot::new(
            Utc.with_ymd_and_hms(2026, 1, 15, 14, 30, 22).unwrap(),
            [
                CapabilityRecord::available("grim", "/usr/bin/grim".into(), "1.4.1", features),
                CapabilityRecord::unavailable("tesseract", ["supports-stdout"]),
            ],
        )
    }

    fn record(overall: OverallResult) -> TestRecord {
        let start = Utc.with_ymd_and_hms(2026, 1, 15, 15, 0, 0).unwrap();
        TestRecord {
            start_time: start,
            end_time: start,
            duration_ms: 120,
            overall_result: overall,
            component_results: vec![
                ComponentResult::new("capture", true, CheckStatus::Fail, "exit 1: no output"),
                ComponentResult::new("ocr", false, CheckStatus::Skip, "tesseract not installed"),
            ],
            tool_versions: BTreeMap::new(),
        }
    }

    #[test]
    fn capabilities_table_lists_enabled_flags_only() {
        let md = render_capabilities(&snapshot());
        assert!(md.contains("| grim | yes | 1.4.1 | supports-geometry-flag |"));
        assert!(md.contains("| tesseract | no | - | - |"));
    }

    #[test]
    fn capability_summary_names_missing_tools() {
        assert_eq!(
            capabilities_summary(&snapshot()),
            "1/2 tools available (missing: tesseract)"
        );
    }

    #[test]
    fn test_record_rendering_calls_out_critical_failures() {
        let md = render_test_record(&record(OverallResult::Fail));
        assert!(md.contains("| capture | yes | FAIL | exit 1: no output |"));
        assert!(md.contains("Critical failures: capture"));
        assert_eq!(
            test_summary_line(&record(OverallResult::Fail)),
            "tests fail: 0 pass, 0 warn, 1 fail, 1 skip"
        );
    }

    #[test]
    fn report_counts_history() {
        let mut history = TestHistory::new(Utc::now());
        history.push(record(OverallResult::Fail), 20);
        let mut later = record(OverallResult::Pass);
        later.start_time += chrono::Duration::hours(1);
        history.push(later, 20);

        let ledger = VersionLedger::new(Utc::now());
        let report = CompatReport::build("sk-test", &snapshot(), &ledger, &history, Utc::now());
        assert_eq!(
            report.test_summary,
            TestSummary { runs: 2, pass: 1, warn: 0, fail: 1 }
        );
        assert_eq!(report.last_test.as_ref().unwrap().overall_result, OverallResult::Pass);
        let md = report.to_markdown();
        assert!(md.contains("No migrations recorded."));
        assert!(md.contains("2 run(s) on record"));
        assert!(report.summary_line().ends_with("last test: pass"));
    }
}
