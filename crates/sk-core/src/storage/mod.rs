//! Durable document storage.
//!
//! Every persisted mutation goes through [`write_atomic`]: content is written
//! to `<name>.tmp.<pid>` beside the target, synced, then renamed over it. A
//! crash leaves either the previous document or the new one, plus at worst an
//! orphaned temp file that [`sweep_temp_files`] removes later.

mod lock;

pub use lock::{InvocationLock, LockError};

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors from document storage.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StorageError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Create a directory and its parents.
pub fn ensure_dir(dir: &Path) -> Result<(), StorageError> {
    std::fs::create_dir_all(dir).map_err(|e| StorageError::io(dir, e))
}

/// Atomically replace `path` with `content`.
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<(), StorageError> {
    write_atomic_with(path, |file| file.write_all(content))?;
    debug!(path = %path.display(), bytes = content.len(), "document written");
    Ok(())
}

/// Fill a sibling temp file with `fill`, then rename it over `path`.
///
/// The temp file never outlives a failed call.
fn write_atomic_with<F>(path: &Path, fill: F) -> Result<(), StorageError>
where
    F: FnOnce(&mut std::fs::File) -> std::io::Result<()>,
{
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let file_name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("document");
    let tmp_path = path.with_file_name(format!("{}.tmp.{}", file_name, std::process::id()));

    let mut file = std::fs::File::create(&tmp_path).map_err(|e| StorageError::io(&tmp_path, e))?;
    let filled = fill(&mut file);
    if filled.is_ok() {
        let _ = file.sync_all();
    }
    drop(file);
    if let Err(e) = filled {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(StorageError::io(&tmp_path, e));
    }

    if let Err(e) = std::fs::rename(&tmp_path, path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(StorageError::io(path, e));
    }
    Ok(())
}

/// Atomically write `value` as pretty JSON.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    let mut content = serde_json::to_vec_pretty(value).map_err(|e| StorageError::Json {
        path: path.to_path_buf(),
        source: e,
    })?;
    content.push(b'\n');
    write_atomic(path, &content)
}

/// Read a JSON document. A missing file is `Ok(None)`.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StorageError> {
    let content = match std::fs::read(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StorageError::io(path, e)),
    };
    serde_json::from_slice(&content)
        .map(Some)
        .map_err(|e| StorageError::Json {
            path: path.to_path_buf(),
            source: e,
        })
}

/// Whether a file name looks like a temp file left by [`write_atomic`].
pub fn is_temp_file_name(name: &str) -> bool {
    match name.rsplit_once(".tmp.") {
        Some((stem, pid)) => {
            !stem.is_empty() && !pid.is_empty() && pid.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}

/// Remove orphaned temp files directly inside `dir`.
///
/// Files owned by the current process are left alone. Returns the paths
/// removed; a missing directory yields an empty list.
pub fn sweep_temp_files(dir: &Path) -> Result<Vec<PathBuf>, StorageError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StorageError::io(dir, e)),
    };
    let own_suffix = format!(".tmp.{}", std::process::id());
    let mut removed = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| StorageError::io(dir, e))?;
        let name = entry.file_name().to_string_lossy().to_string();
        if !is_temp_file_name(&name) || name.ends_with(&own_suffix) {
            continue;
        }
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "removed orphaned temp file");
                removed.push(path);
            }
            Err(e) => warn!(path = %path.display(), error = %e, "failed to remove temp file"),
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Doc {
        name: String,
        count: u32,
    }

    #[test]
    fn write_then_read_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("doc.json");
        let doc = Doc {
            name: "grim".to_string(),
            count: 3,
        };
        write_json_atomic(&path, &doc).unwrap();
        let back: Option<Doc> = read_json(&path).unwrap();
        assert_eq!(back, Some(doc));
    }

    #[test]
    fn read_missing_is_none() {
        let dir = tempdir().unwrap();
        let back: Option<Doc> = read_json(&dir.path().join("absent.json")).unwrap();
        assert!(back.is_none());
    }

    #[test]
    fn read_corrupt_is_json_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = read_json::<Doc>(&path).unwrap_err();
        assert!(matches!(err, StorageError::Json { .. }));
    }

    #[test]
    fn write_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc.json");
        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["doc.json".to_string()]);
        assert_eq!(std::fs::read(&path).unwrap(), b"two");
    }

    #[test]
    fn failed_write_removes_temp_and_keeps_document() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        write_atomic(&path, b"old").unwrap();

        let err = write_atomic_with(&path, |file| {
            file.write_all(b"half")?;
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full"))
        })
        .unwrap_err();
        assert!(matches!(err, StorageError::Io { .. }));

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["ledger.json".to_string()]);
        assert_eq!(std::fs::read(&path).unwrap(), b"old");
    }

    #[test]
    fn orphaned_temp_never_replaces_document() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        write_atomic(&path, b"{\"good\":true}").unwrap();
        // Simulate a crash between write and rename in another process.
        std::fs::write(dir.path().join("ledger.json.tmp.999999"), b"{\"partial\":").unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"{\"good\":true}");
        let removed = sweep_temp_files(dir.path()).unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(std::fs::read(&path).unwrap(), b"{\"good\":true}");
        assert!(!dir.path().join("ledger.json.tmp.999999").exists());
    }

    #[test]
    fn temp_file_name_detection() {
        assert!(is_temp_file_name("ledger.json.tmp.1234"));
        assert!(!is_temp_file_name("ledger.json"));
        assert!(!is_temp_file_name("ledger.json.tmp."));
        assert!(!is_temp_file_name("notes.tmp.txt"));
    }

    #[test]
    fn sweep_missing_dir_is_empty() {
        let dir = tempdir().unwrap();
        assert!(sweep_temp_files(&dir.path().join("nope")).unwrap().is_empty());
    }
}
