//! shotkit common types.
//!
//! This crate provides foundational types shared across sk-core modules:
//! - Run identifiers for log and output correlation
//! - Schema versioning for persisted documents
//! - Output formats
//! - Storage root resolution (config, data, cache, tool config home)

pub mod id;
pub mod output;
pub mod paths;
pub mod schema;

pub use id::RunId;
pub use output::OutputFormat;
pub use paths::{PathOverrides, StorePaths};
pub use schema::{DOCUMENT_SCHEMA_VERSION, SCHEMA_VERSION};
