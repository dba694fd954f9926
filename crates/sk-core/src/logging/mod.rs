//! Tracing setup for the `shotkit` binary.
//!
//! stdout carries command payloads only; every log line goes to stderr,
//! either human-readable or as JSON lines. The binary opens one root span
//! per invocation carrying the run id, so JSON lines can be correlated with
//! the `run_id` in the output envelope.

pub mod config;

pub use config::{LogConfig, LogFormat, LogLevel};

use std::io::IsTerminal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Targets enabled by the level-based filter: the library and the binary.
const LOG_TARGETS: [&str; 2] = ["sk_core", "shotkit"];

/// Filter directive enabling shotkit's own targets at `level`.
pub fn default_directive(level: LogLevel) -> String {
    LOG_TARGETS
        .iter()
        .map(|target| format!("{}={}", target, level))
        .collect::<Vec<_>>()
        .join(",")
}

fn build_filter(config: &LogConfig) -> EnvFilter {
    config
        .directive
        .as_deref()
        .and_then(|directive| EnvFilter::try_new(directive).ok())
        .unwrap_or_else(|| EnvFilter::new(default_directive(config.level)))
}

/// Install the global subscriber. Later calls leave the first one in place.
pub fn init_logging(config: &LogConfig) {
    let human = (config.format == LogFormat::Human).then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_ansi(std::io::stderr().is_terminal())
            .without_time()
    });
    let jsonl = (config.format == LogFormat::Jsonl).then(|| {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(true)
            .with_span_list(false)
    });

    let installed = tracing_subscriber::registry()
        .with(build_filter(config))
        .with(human)
        .with(jsonl)
        .try_init();
    if let Err(e) = installed {
        tracing::debug!(error = %e, "subscriber already installed");
    }
}
