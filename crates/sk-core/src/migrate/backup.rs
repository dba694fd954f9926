//! Timestamped configuration backups.
//!
//! Layout: `<data>/backups/<tool>/<file>.<YYYYmmdd_HHMMSS_micro>.bak`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Per-tool backup directories under one root.
#[derive(Debug, Clone)]
pub struct BackupStore {
    root: PathBuf,
}

impl BackupStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn tool_dir(&self, tool: &str) -> PathBuf {
        self.root.join(tool)
    }

    /// Copy `source` into the tool's backup directory.
    pub fn create(&self, tool: &str, source: &Path) -> io::Result<PathBuf> {
        let dir = self.tool_dir(tool);
        fs::create_dir_all(&dir)?;

        // Sub-second precision keeps two backups in the same second apart.
        let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S_%6f").to_string();
        let file_name = source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "config".to_string());
        let mut attempt = 0u32;
        let backup_path = loop {
            let suffix = if attempt == 0 {
                timestamp.clone()
            } else {
                format!("{}_{}", timestamp, attempt)
            };
            let candidate = dir.join(format!("{}.{}.bak", file_name, suffix));
            if !candidate.exists() {
                break candidate;
            }
            attempt = attempt.saturating_add(1);
        };

        fs::copy(source, &backup_path)?;
        debug!(original = %source.display(), backup = %backup_path.display(), "created backup");
        Ok(backup_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn backup_copies_file_under_tool_dir() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("config.toml");
        fs::write(&source, "[general]\n").unwrap();
        let store = BackupStore::new(dir.path().join("backups"));

        let backup = store.create("satty", &source).unwrap();
        assert_eq!(backup.parent().unwrap(), store.tool_dir("satty"));
        let name = backup.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("config.toml."));
        assert!(name.ends_with(".bak"));
        assert_eq!(fs::read_to_string(&backup).unwrap(), "[general]\n");
    }

    #[test]
    fn rapid_backups_get_unique_paths() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("config");
        fs::write(&source, "[Default]\n").unwrap();
        let store = BackupStore::new(dir.path().join("backups"));

        let paths: Vec<_> = (0..5).map(|_| store.create("swappy", &source).unwrap()).collect();
        let mut unique = paths.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 5);
        assert_eq!(fs::read_dir(store.tool_dir("swappy")).unwrap().count(), 5);
    }
}
