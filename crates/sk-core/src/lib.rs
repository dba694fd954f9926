//! shotkit core library
//!
//! Capability detection and compatibility adaptation for screenshot tool
//! chains:
//! - Capability probing of external tools, cached with a TTL
//! - A version ledger with migration history
//! - Rule-driven migration of tool configuration files
//! - A compatibility test harness with persisted history
//! - The [`context::CompatContext`] collaborator API used by front ends
//!
//! The binary entry point is in `main.rs`.

pub mod capabilities;
pub mod config;
pub mod context;
pub mod exit_codes;
pub mod harness;
pub mod ledger;
pub mod logging;
pub mod migrate;
pub mod report;
pub mod retention;
pub mod runner;
pub mod storage;
