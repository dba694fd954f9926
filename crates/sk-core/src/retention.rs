//! Age-based pruning of configuration backups and test artefacts.
//!
//! Ages come from file modification times. Removal failures are logged and
//! skipped; a half-cleaned directory is not an error.

use crate::config::Settings;
use crate::storage::{self, StorageError};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// What kind of thing was removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PruneKind {
    Backup,
    Artifact,
    TempFile,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrunedItem {
    pub path: PathBuf,
    pub kind: PruneKind,
    /// Whole days since last modification; zero for temp files.
    pub age_days: u64,
}

/// Maximum ages before removal.
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    pub backup_max_age: Duration,
    pub artifact_max_age: Duration,
}

impl RetentionPolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            backup_max_age: settings.backup_retention(),
            artifact_max_age: settings.artifact_retention(),
        }
    }
}

fn age_of(path: &Path, now: SystemTime) -> Option<Duration> {
    let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
    Some(now.duration_since(modified).unwrap_or_default())
}

fn read_dir_paths(dir: &Path) -> Result<Vec<PathBuf>, StorageError> {
    match fs::read_dir(dir) {
        Ok(entries) => Ok(entries.filter_map(|e| e.ok()).map(|e| e.path()).collect()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(StorageError::io(dir, e)),
    }
}

/// Remove `<root>/<tool>/*.bak` files older than `max_age`.
pub fn prune_backups(
    root: &Path,
    max_age: Duration,
    now: SystemTime,
) -> Result<Vec<PrunedItem>, StorageError> {
    let mut pruned = Vec::new();
    for tool_dir in read_dir_paths(root)?.into_iter().filter(|p| p.is_dir()) {
        for path in read_dir_paths(&tool_dir)? {
            if path.extension().and_then(|ext| ext.to_str()) != Some("bak") {
                continue;
            }
            let Some(age) = age_of(&path, now) else {
                continue;
            };
            if age <= max_age {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => {
                    debug!(path = %path.display(), age_days = age.as_secs() / 86_400, "backup pruned");
                    pruned.push(PrunedItem {
                        path,
                        kind: PruneKind::Backup,
                        age_days: age.as_secs() / 86_400,
                    });
                }
                Err(e) => warn!(path = %path.display(), error = %e, "failed to prune backup"),
            }
        }
    }
    Ok(pruned)
}

/// Remove per-run artefact directories (and stray files) older than
/// `max_age` under `root`.
pub fn prune_artifacts(
    root: &Path,
    max_age: Duration,
    now: SystemTime,
) -> Result<Vec<PrunedItem>, StorageError> {
    let mut pruned = Vec::new();
    for path in read_dir_paths(root)? {
        let Some(age) = age_of(&path, now) else {
            continue;
        };
        if age <= max_age {
            continue;
        }
        let removed = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        match removed {
            Ok(()) => pruned.push(PrunedItem {
                path,
                kind: PruneKind::Artifact,
                age_days: age.as_secs() / 86_400,
            }),
            Err(e) => warn!(path = %path.display(), error = %e, "failed to prune artefact"),
        }
    }
    Ok(pruned)
}

/// Sweep orphaned temp files from each directory.
pub fn sweep_orphans<'a>(dirs: impl IntoIterator<Item = &'a Path>) -> Result<Vec<PrunedItem>, StorageError> {
    let mut pruned = Vec::new();
    for dir in dirs {
        pruned.extend(storage::sweep_temp_files(dir)?.into_iter().map(|path| PrunedItem {
            path,
            kind: PruneKind::TempFile,
            age_days: 0,
        }));
    }
    Ok(pruned)
}

/// Backups and artefacts past the policy, in one pass.
pub fn enforce(
    policy: &RetentionPolicy,
    backup_root: &Path,
    artifact_root: &Path,
    now: SystemTime,
) -> Result<Vec<PrunedItem>, StorageError> {
    let mut pruned = prune_backups(backup_root, policy.backup_max_age, now)?;
    pruned.extend(prune_artifacts(artifact_root, policy.artifact_max_age, now)?);
    if !pruned.is_empty() {
        info!(count = pruned.len(), "retention pruned old files");
    }
    Ok(pruned)
}
