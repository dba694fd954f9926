//! Schema versions.

/// Version of the CLI JSON output contract.
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Version stamped into persisted documents (ledger, test history).
///
/// Bump when a persisted field changes meaning; additive fields with serde
/// defaults do not require a bump.
pub const DOCUMENT_SCHEMA_VERSION: u32 = 1;
