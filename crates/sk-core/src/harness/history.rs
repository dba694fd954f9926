//! Test history store.

use super::TestRecord;
use crate::storage::{self, StorageError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sk_common::DOCUMENT_SCHEMA_VERSION;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Default number of test records kept.
pub const DEFAULT_TEST_HISTORY_LIMIT: usize = 20;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("test history {path} has schema version {found}, this build supports up to {supported}")]
    UnsupportedSchema {
        path: PathBuf,
        found: u32,
        supported: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestHistory {
    pub schema_version: u32,
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub last_test: Option<DateTime<Utc>>,
    #[serde(default)]
    pub test_history: Vec<TestRecord>,
}

impl TestHistory {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            schema_version: DOCUMENT_SCHEMA_VERSION,
            created: now,
            last_test: None,
            test_history: Vec::new(),
        }
    }

    /// Append a record and keep the `limit` most recent by start time.
    pub fn push(&mut self, record: TestRecord, limit: usize) {
        self.last_test = Some(record.end_time);
        self.test_history.push(record);
        self.trim(limit);
    }

    /// Drop the oldest records beyond `limit`; returns how many went.
    pub fn trim(&mut self, limit: usize) -> usize {
        self.test_history.sort_by_key(|r| r.start_time);
        let excess = self.test_history.len().saturating_sub(limit);
        self.test_history.drain(..excess);
        excess
    }

    pub fn latest(&self) -> Option<&TestRecord> {
        self.test_history.last()
    }
}

#[derive(Debug, Clone)]
pub struct TestHistoryStore {
    path: PathBuf,
}

impl TestHistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<TestHistory, HistoryError> {
        match storage::read_json::<TestHistory>(&self.path)? {
            Some(history) if history.schema_version > DOCUMENT_SCHEMA_VERSION => {
                Err(HistoryError::UnsupportedSchema {
                    path: self.path.clone(),
                    found: history.schema_version,
                    supported: DOCUMENT_SCHEMA_VERSION,
                })
            }
            Some(history) => Ok(history),
            None => {
                debug!(path = %self.path.display(), "no test history yet");
                Ok(TestHistory::new(Utc::now()))
            }
        }
    }

    pub fn save(&self, history: &TestHistory) -> Result<(), HistoryError> {
        storage::write_json_atomic(&self.path, history)?;
        Ok(())
    }

    /// Load, append, trim and save in one step.
    pub fn append(&self, record: TestRecord, limit: usize) -> Result<TestHistory, HistoryError> {
        let mut history = self.load()?;
        history.push(record, limit);
        self.save(&history)?;
        Ok(history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::OverallResult;
    use chrono::Duration;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn record(start: DateTime<Utc>) -> TestRecord {
        TestRecord {
            start_time: start,
            end_time: start + Duration::seconds(2),
            duration_ms: 2000,
            overall_result: OverallResult::Pass,
            component_results: Vec::new(),
            tool_versions: BTreeMap::new(),
        }
    }

    #[test]
    fn push_keeps_most_recent() {
        let base = Utc::now();
        let mut history = TestHistory::new(base);
        for i in 0..25 {
            history.push(record(base + Duration::minutes(i)), DEFAULT_TEST_HISTORY_LIMIT);
        }
        assert_eq!(history.test_history.len(), 20);
        assert_eq!(history.test_history[0].start_time, base + Duration::minutes(5));
        assert_eq!(history.latest().unwrap().start_time, base + Duration::minutes(24));
    }

    #[test]
    fn trim_orders_by_start_time() {
        let base = Utc::now();
        let mut history = TestHistory::new(base);
        history.test_history = vec![
            record(base + Duration::minutes(3)),
            record(base),
            record(base + Duration::minutes(1)),
        ];
        assert_eq!(history.trim(2), 1);
        assert_eq!(history.test_history[0].start_time, base + Duration::minutes(1));
    }

    #[test]
    fn store_append_round_trips() {
        let dir = tempdir().unwrap();
        let store = TestHistoryStore::new(dir.path().join("test_history.json"));
        let start = Utc::now();
        store.append(record(start), 20).unwrap();
        store.append(record(start + Duration::minutes(1)), 20).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded.test_history.len(), 2);
        assert_eq!(loaded.last_test, Some(start + Duration::minutes(1) + Duration::seconds(2)));
    }

    #[test]
    fn newer_schema_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test_history.json");
        std::fs::write(
            &path,
            r#"{"schema_version": 99, "created": "2026-01-15T14:30:22Z", "test_history": []}"#,
        )
        .unwrap();
        let err = TestHistoryStore::new(&path).load().unwrap_err();
        assert!(matches!(err, HistoryError::UnsupportedSchema { found: 99, .. }));
    }
}
