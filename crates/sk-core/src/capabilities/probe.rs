//! Capability probing.
//!
//! Only read-only introspection is used (`--version`, `--help` style
//! invocations). A tool that is missing, times out or fails to spawn
//! degrades to "unavailable" or "no flags", never to an error.

use super::record::{CapabilityRecord, CapabilitySnapshot};
use super::registry::{FeatureSource, ToolRegistry, ToolSpec};
use crate::runner::{CommandRunner, Invocation};
use chrono::Utc;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Default timeout for each introspection invocation.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(5000);

static VERSION_RE: OnceLock<Regex> = OnceLock::new();

fn version_regex() -> &'static Regex {
    VERSION_RE.get_or_init(|| {
        Regex::new(r"\d+\.\d+(?:\.\d+)?(?:-[0-9A-Za-z][0-9A-Za-z.]*)?")
            .expect("version pattern is a valid regex")
    })
}

/// Pull the first version-looking token out of tool output.
pub fn extract_version(text: &str) -> Option<String> {
    version_regex().find(text).map(|m| m.as_str().to_string())
}

/// Runs introspection for every registered tool.
pub struct CapabilityProbe<'a, R: CommandRunner> {
    runner: &'a R,
    registry: &'a ToolRegistry,
    timeout: Duration,
}

impl<'a, R: CommandRunner> CapabilityProbe<'a, R> {
    pub fn new(runner: &'a R, registry: &'a ToolRegistry) -> Self {
        Self {
            runner,
            registry,
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Probe every tool and stamp the snapshot with the current time.
    #[instrument(skip(self), fields(tools = self.registry.len()))]
    pub fn probe_all(&self) -> CapabilitySnapshot {
        let records: Vec<_> = self.registry.iter().map(|spec| self.probe_tool(spec)).collect();
        let snapshot = CapabilitySnapshot::new(Utc::now(), records);
        info!(
            available = snapshot.available_count(),
            total = snapshot.tools.len(),
            "capability probe complete"
        );
        snapshot
    }

    /// Probe a single tool.
    pub fn probe_tool(&self, spec: &ToolSpec) -> CapabilityRecord {
        let Some((binary, path)) = spec
            .binaries
            .iter()
            .find_map(|bin| self.runner.resolve(bin).map(|p| (*bin, p)))
        else {
            debug!(tool = spec.name, "tool not found");
            return CapabilityRecord::unavailable(spec.name, spec.feature_names());
        };

        let version_text = self.introspect(binary, spec.version_args);
        let help_text = self.introspect(binary, spec.help_args);
        let version = extract_version(&version_text)
            .or_else(|| extract_version(first_line(&help_text)))
            .unwrap_or_default();

        let features: BTreeMap<String, bool> = spec
            .features
            .iter()
            .map(|probe| {
                let present = match probe.source {
                    FeatureSource::Help => probe.needles.iter().any(|n| help_text.contains(n)),
                    FeatureSource::Companion(companion) => self.runner.resolve(companion).is_some(),
                };
                (probe.name.to_string(), present)
            })
            .collect();

        debug!(
            tool = spec.name,
            binary,
            version = %version,
            flags = features.values().filter(|v| **v).count(),
            "tool probed"
        );
        CapabilityRecord::available(spec.name, path, version, features)
    }

    /// Combined output of an introspection call; empty on any failure.
    fn introspect(&self, binary: &str, args: &[&str]) -> String {
        if args.is_empty() {
            return String::new();
        }
        let invocation = Invocation::new(binary, args.iter().copied()).with_timeout(self.timeout);
        match self.runner.run(&invocation) {
            Ok(output) if output.timed_out => {
                warn!(command = %invocation.display(), "introspection timed out");
                String::new()
            }
            Ok(output) => output.combined_text(),
            Err(e) => {
                warn!(command = %invocation.display(), error = %e, "introspection failed");
                String::new()
            }
        }
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}
