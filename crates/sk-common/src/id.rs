//! Run identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one shotkit invocation in logs, JSON envelopes, reports and
/// the per-run test artefact directory, so it must stay a safe file name.
///
/// Format: `sk-<UTC timestamp>-<8 hex>`, e.g. `sk-20261019T143022Z-5f0c2a91`.
/// Sorting run ids lexically sorts them by start time (to the second).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%SZ");
        let entropy = uuid::Uuid::new_v4().simple().to_string();
        RunId(format!("sk-{}-{}", stamp, &entropy[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
