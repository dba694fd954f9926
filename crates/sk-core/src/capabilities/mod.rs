//! Tool capability detection and caching.
//!
//! This module provides:
//! - A registry describing each wrapped tool (binaries, introspection, flags)
//! - Probing of installed tools for versions and feature flags
//! - Immutable snapshots threaded through the rest of the pipeline
//!
//! Results are cached with a configurable TTL (default 24h).

pub mod cache;
pub mod probe;
pub mod record;
pub mod registry;

pub use cache::{CacheError, CacheLoad, CapabilityCache, DEFAULT_CACHE_TTL_SECS};
pub use probe::{extract_version, CapabilityProbe, DEFAULT_PROBE_TIMEOUT};
pub use record::{CapabilityRecord, CapabilitySnapshot};
pub use registry::{FeatureProbe, FeatureSource, ToolRegistry, ToolRole, ToolSpec};
