//! Capability cache with TTL.
//!
//! Two encodings share one file and are told apart on read:
//!
//! - JSON: `{probed_at, capabilities, versions, paths}` where each entry of
//!   `capabilities` is either a flag map (including `available`) or, for a
//!   tool without feature flags, a bare boolean.
//! - Lines: `key=value` text (`probed_at=…`, `<tool>.available=…`,
//!   `<tool>.version=…`, `<tool>.path=…`, `<tool>.feature.<flag>=…`), used
//!   when configured or when structured serialization fails.

use super::probe::CapabilityProbe;
use super::record::{CapabilityRecord, CapabilitySnapshot};
use crate::config::CacheFormat;
use crate::runner::CommandRunner;
use crate::storage::{self, StorageError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Default cache TTL (24 hours).
pub const DEFAULT_CACHE_TTL_SECS: i64 = 24 * 60 * 60;

const LINES_HEADER: &str = "# shotkit capability cache";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("corrupt capability cache {path}: {message}")]
    Corrupt { path: PathBuf, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
enum ToolFlags {
    Bare(bool),
    Flags(BTreeMap<String, bool>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheDocument {
    probed_at: DateTime<Utc>,
    capabilities: BTreeMap<String, ToolFlags>,
    #[serde(default)]
    versions: BTreeMap<String, String>,
    #[serde(default)]
    paths: BTreeMap<String, PathBuf>,
}

impl CacheDocument {
    fn from_snapshot(snapshot: &CapabilitySnapshot) -> Self {
        let mut doc = CacheDocument {
            probed_at: snapshot.probed_at,
            capabilities: BTreeMap::new(),
            versions: BTreeMap::new(),
            paths: BTreeMap::new(),
        };
        for (tool, record) in &snapshot.tools {
            let flags = if record.features.is_empty() {
                ToolFlags::Bare(record.available)
            } else {
                let mut map = record.features.clone();
                map.insert("available".to_string(), record.available);
                ToolFlags::Flags(map)
            };
            doc.capabilities.insert(tool.clone(), flags);
            if !record.version.is_empty() {
                doc.versions.insert(tool.clone(), record.version.clone());
            }
            if let Some(path) = &record.path {
                doc.paths.insert(tool.clone(), path.clone());
            }
        }
        doc
    }

    fn into_snapshot(mut self) -> CapabilitySnapshot {
        let records: Vec<_> = std::mem::take(&mut self.capabilities)
            .into_iter()
            .map(|(tool, flags)| {
                let (available, features) = match flags {
                    ToolFlags::Bare(available) => (available, BTreeMap::new()),
                    ToolFlags::Flags(mut map) => {
                        let available = map.remove("available").unwrap_or(false);
                        (available, map)
                    }
                };
                CapabilityRecord {
                    version: self.versions.remove(&tool).unwrap_or_default(),
                    path: self.paths.remove(&tool),
                    tool,
                    available,
                    features,
                }
            })
            .collect();
        CapabilitySnapshot::new(self.probed_at, records)
    }
}

/// Serialize a snapshot in the requested encoding.
///
/// A JSON serialization failure falls back to the line encoding.
pub fn encode(snapshot: &CapabilitySnapshot, format: CacheFormat) -> Vec<u8> {
    match format {
        CacheFormat::Lines => encode_lines(snapshot).into_bytes(),
        CacheFormat::Json => {
            match serde_json::to_vec_pretty(&CacheDocument::from_snapshot(snapshot)) {
                Ok(mut bytes) => {
                    bytes.push(b'\n');
                    bytes
                }
                Err(e) => {
                    warn!(error = %e, "structured cache encoding failed, using line format");
                    encode_lines(snapshot).into_bytes()
                }
            }
        }
    }
}

fn encode_lines(snapshot: &CapabilitySnapshot) -> String {
    let mut out = String::new();
    out.push_str(LINES_HEADER);
    out.push('\n');
    out.push_str(&format!("probed_at={}\n", snapshot.probed_at.to_rfc3339()));
    for (tool, record) in &snapshot.tools {
        out.push_str(&format!("{}.available={}\n", tool, record.available));
        if !record.version.is_empty() {
            out.push_str(&format!("{}.version={}\n", tool, record.version));
        }
        if let Some(path) = &record.path {
            out.push_str(&format!("{}.path={}\n", tool, path.display()));
        }
        for (flag, value) in &record.features {
            out.push_str(&format!("{}.feature.{}={}\n", tool, flag, value));
        }
    }
    out
}

/// Parse either encoding.
pub fn decode(content: &str) -> Result<CapabilitySnapshot, String> {
    if content.trim_start().starts_with('{') {
        let doc: CacheDocument = serde_json::from_str(content).map_err(|e| e.to_string())?;
        return Ok(doc.into_snapshot());
    }
    decode_lines(content)
}

fn decode_lines(content: &str) -> Result<CapabilitySnapshot, String> {
    let mut probed_at = None;
    let mut records: BTreeMap<String, CapabilityRecord> = BTreeMap::new();

    for (idx, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let lineno = idx + 1;
        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| format!("line {}: expected key=value", lineno))?;
        if key == "probed_at" {
            let ts = DateTime::parse_from_rfc3339(value)
                .map_err(|e| format!("line {}: bad probed_at: {}", lineno, e))?;
            probed_at = Some(ts.with_timezone(&Utc));
            continue;
        }
        let (tool, field) = key
            .split_once('.')
            .ok_or_else(|| format!("line {}: unknown key {}", lineno, key))?;
        let record = records
            .entry(tool.to_string())
            .or_insert_with(|| CapabilityRecord::unavailable(tool, Vec::<String>::new()));
        match field {
            "available" => record.available = parse_bool(value, lineno)?,
            "version" => record.version = value.to_string(),
            "path" => record.path = Some(PathBuf::from(value)),
            other => match other.strip_prefix("feature.") {
                Some(flag) if !flag.is_empty() => {
                    record
                        .features
                        .insert(flag.to_string(), parse_bool(value, lineno)?);
                }
                _ => return Err(format!("line {}: unknown field {}", lineno, other)),
            },
        }
    }

    let probed_at = probed_at.ok_or_else(|| "missing probed_at".to_string())?;
    Ok(CapabilitySnapshot::new(probed_at, records.into_values()))
}

fn parse_bool(value: &str, lineno: usize) -> Result<bool, String> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(format!("line {}: expected true/false, got {}", lineno, other)),
    }
}

/// Result of a cache load.
#[derive(Debug, Clone)]
pub struct CacheLoad {
    pub snapshot: CapabilitySnapshot,
    /// Whether the snapshot came from disk rather than a fresh probe.
    pub from_cache: bool,
}

/// File-backed capability cache.
#[derive(Debug, Clone)]
pub struct CapabilityCache {
    path: PathBuf,
    ttl: chrono::Duration,
    format: CacheFormat,
}

impl CapabilityCache {
    pub fn new(path: impl Into<PathBuf>, ttl: chrono::Duration, format: CacheFormat) -> Self {
        Self {
            path: path.into(),
            ttl,
            format,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the cached snapshot regardless of age.
    pub fn read(&self) -> Result<Option<CapabilitySnapshot>, CacheError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(CacheError::Storage(StorageError::Io {
                    path: self.path.clone(),
                    source: e,
                }))
            }
        };
        decode(&content).map(Some).map_err(|message| CacheError::Corrupt {
            path: self.path.clone(),
            message,
        })
    }

    /// Persist a snapshot atomically.
    pub fn write(&self, snapshot: &CapabilitySnapshot) -> Result<(), CacheError> {
        storage::write_atomic(&self.path, &encode(snapshot, self.format))?;
        debug!(path = %self.path.display(), format = ?self.format, "capability cache written");
        Ok(())
    }

    /// Cached snapshot if present, readable and within the TTL.
    pub fn load_fresh(&self, now: DateTime<Utc>) -> Option<CapabilitySnapshot> {
        match self.read() {
            Ok(Some(snapshot)) if snapshot.is_fresh(self.ttl, now) => Some(snapshot),
            Ok(Some(snapshot)) => {
                debug!(probed_at = %snapshot.probed_at, "capability cache stale");
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "ignoring unreadable capability cache");
                None
            }
        }
    }

    /// Return the cached snapshot, or probe and persist a new one.
    pub fn load<R: CommandRunner>(
        &self,
        probe: &CapabilityProbe<'_, R>,
        force: bool,
    ) -> Result<CacheLoad, CacheError> {
        if !force {
            if let Some(snapshot) = self.load_fresh(Utc::now()) {
                debug!(probed_at = %snapshot.probed_at, "capability cache hit");
                return Ok(CacheLoad {
                    snapshot,
                    from_cache: true,
                });
            }
        }
        let snapshot = probe.probe_all();
        self.write(&snapshot)?;
        info!(path = %self.path.display(), force, "capability cache refreshed");
        Ok(CacheLoad {
            snapshot,
            from_cache: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::registry::ToolRegistry;
    use crate::runner::{ScriptedReply, ScriptedRunner};
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn sample() -> CapabilitySnapshot {
        let probed_at = Utc.with_ymd_and_hms(2026, 1, 15, 14, 30, 22).unwrap();
        let mut features = BTreeMap::new();
        features.insert("supports-geometry-flag".to_string(), true);
        features.insert("supports-output-selection".to_string(), false);
        CapabilitySnapshot::new(
            probed_at,
            [
                CapabilityRecord::available("grim", "/usr/bin/grim".into(), "1.4.1", features),
                CapabilityRecord::available("plain", "/usr/bin/plain".into(), "", BTreeMap::new()),
                CapabilityRecord::unavailable("swappy", ["supports-file-flag"]),
            ],
        )
    }

    #[test]
    fn json_document_shape() {
        let bytes = encode(&sample(), CacheFormat::Json);
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["capabilities"]["grim"]["available"], true);
        assert_eq!(value["capabilities"]["grim"]["supports-geometry-flag"], true);
        assert_eq!(value["capabilities"]["plain"], true);
        assert_eq!(value["capabilities"]["swappy"]["available"], false);
        assert_eq!(value["versions"]["grim"], "1.4.1");
        assert!(value["versions"].get("plain").is_none());
        assert_eq!(value["paths"]["grim"], "/usr/bin/grim");
    }

    #[test]
    fn both_encodings_decode_to_same_snapshot() {
        let snapshot = sample();
        for format in [CacheFormat::Json, CacheFormat::Lines] {
            let bytes = encode(&snapshot, format);
            let back = decode(std::str::from_utf8(&bytes).unwrap()).unwrap();
            assert_eq!(back, snapshot, "{format:?}");
        }
    }

    #[test]
    fn lines_encoding_keys() {
        let text = String::from_utf8(encode(&sample(), CacheFormat::Lines)).unwrap();
        assert!(text.contains("probed_at=2026-01-15T14:30:22+00:00\n"));
        assert!(text.contains("grim.available=true\n"));
        assert!(text.contains("grim.version=1.4.1\n"));
        assert!(text.contains("grim.path=/usr/bin/grim\n"));
        assert!(text.contains("grim.feature.supports-geometry-flag=true\n"));
        assert!(text.contains("swappy.available=false\n"));
    }

    #[test]
    fn corrupt_lines_are_rejected() {
        assert!(decode("probed_at=yesterday\n").is_err());
        assert!(decode("grim.available=maybe\n").is_err());
        assert!(decode("grim.available=true\n").is_err());
        assert!(decode("{\"probed_at\": 1").is_err());
    }

    #[test]
    fn decoded_unavailable_tools_never_carry_true_flags() {
        let text = "probed_at=2026-01-15T14:30:22+00:00\ngrim.available=false\ngrim.feature.supports-geometry-flag=true\n";
        let snapshot = decode(text).unwrap();
        assert!(!snapshot.has_feature("grim", "supports-geometry-flag"));
        assert_eq!(
            snapshot.get("grim").unwrap().features.get("supports-geometry-flag"),
            Some(&false)
        );
    }

    fn scripted() -> ScriptedRunner {
        ScriptedRunner::new()
            .install("grim")
            .respond("grim", &["-v"], ScriptedReply::ok("grim 1.4.1"))
    }

    #[test]
    fn fresh_cache_is_served_without_probing() {
        let dir = tempdir().unwrap();
        let cache = CapabilityCache::new(
            dir.path().join("capabilities.json"),
            chrono::Duration::hours(24),
            CacheFormat::Json,
        );
        let registry = ToolRegistry::builtin();

        let first_runner = scripted();
        let first = cache
            .load(&CapabilityProbe::new(&first_runner, &registry), false)
            .unwrap();
        assert!(!first.from_cache);
        assert!(!first_runner.calls().is_empty());

        let second_runner = scripted();
        let second = cache
            .load(&CapabilityProbe::new(&second_runner, &registry), false)
            .unwrap();
        assert!(second.from_cache);
        assert!(second_runner.calls().is_empty());
        assert_eq!(second.snapshot.version("grim"), Some("1.4.1"));
    }

    #[test]
    fn force_and_stale_trigger_probe() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("capabilities.json");
        let registry = ToolRegistry::builtin();
        let stale = CapabilitySnapshot::new(Utc::now() - chrono::Duration::hours(48), Vec::new());
        let cache = CapabilityCache::new(&path, chrono::Duration::hours(24), CacheFormat::Json);
        cache.write(&stale).unwrap();

        let runner = scripted();
        let load = cache.load(&CapabilityProbe::new(&runner, &registry), false).unwrap();
        assert!(!load.from_cache);

        let runner = scripted();
        let load = cache.load(&CapabilityProbe::new(&runner, &registry), true).unwrap();
        assert!(!load.from_cache);
        assert!(!runner.calls().is_empty());
    }

    #[test]
    fn corrupt_cache_is_a_miss() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("capabilities.json");
        std::fs::write(&path, "{ garbage").unwrap();
        let cache = CapabilityCache::new(&path, chrono::Duration::hours(24), CacheFormat::Json);
        assert!(cache.load_fresh(Utc::now()).is_none());

        let registry = ToolRegistry::builtin();
        let runner = scripted();
        let load = cache.load(&CapabilityProbe::new(&runner, &registry), false).unwrap();
        assert!(!load.from_cache);
        assert!(cache.read().unwrap().is_some());
    }

    #[test]
    fn line_format_cache_is_read_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("capabilities.json");
        let cache = CapabilityCache::new(&path, chrono::Duration::hours(24), CacheFormat::Lines);
        let snapshot = CapabilitySnapshot::new(Utc::now(), sample().tools.into_values());
        cache.write(&snapshot).unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().starts_with(LINES_HEADER));
        assert_eq!(cache.load_fresh(Utc::now()), Some(snapshot));
    }
}
