//! shotkit - capability-adaptive screenshot tool orchestration
//!
//! The entry point handles:
//! - Storage initialisation and capability detection
//! - Version checks and configuration migration
//! - Compatibility self-tests and reports
//! - Housekeeping (retention, config regeneration)

use clap::{Args, Parser, Subcommand};
use serde_json::json;
use sk_common::{OutputFormat, PathOverrides, RunId, StorePaths, SCHEMA_VERSION};
use sk_core::context::{CompatContext, ContextError};
use sk_core::exit_codes::ExitCode;
use sk_core::harness::OverallResult;
use sk_core::logging::{init_logging, LogConfig, LogFormat, LogLevel};
use sk_core::report::{
    capabilities_summary, cycle_summary_line, render_capabilities, render_cycle,
    render_test_record, test_summary_line,
};
use sk_core::runner::SystemRunner;
use std::path::PathBuf;
use tracing::{debug, error, info_span};

/// shotkit - keep screenshot tool chains working across upstream changes
#[derive(Parser)]
#[command(name = "shotkit")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOpts,
}

/// Global options available to all commands
#[derive(Args, Debug)]
struct GlobalOpts {
    /// Output format
    #[arg(long, short = 'f', global = true, default_value = "md")]
    format: OutputFormat,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only report errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Override the shotkit config directory
    #[arg(long, global = true, env = "SHOTKIT_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Override the data directory (ledger, test history, backups)
    #[arg(long, global = true, env = "SHOTKIT_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Override the cache directory (capabilities, test artefacts)
    #[arg(long, global = true, env = "SHOTKIT_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Override where tool configs live (default: XDG config home)
    #[arg(long, global = true, env = "SHOTKIT_TOOL_CONFIG_HOME")]
    tool_config_home: Option<PathBuf>,
}

impl GlobalOpts {
    fn overrides(&self) -> PathOverrides {
        PathOverrides {
            config_dir: self.config_dir.clone(),
            data_dir: self.data_dir.clone(),
            cache_dir: self.cache_dir.clone(),
            tool_config_home: self.tool_config_home.clone(),
        }
    }

    fn log_level(&self) -> Option<LogLevel> {
        if self.quiet {
            return Some(LogLevel::Error);
        }
        match self.verbose {
            0 => None,
            1 => Some(LogLevel::Info),
            2 => Some(LogLevel::Debug),
            _ => Some(LogLevel::Trace),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create storage directories and documents, sweep interrupted writes
    Init,

    /// Show detected tool capabilities
    Capabilities(CapabilitiesArgs),

    /// Check for tool version changes and migrate configs
    Update,

    /// Run the compatibility test battery
    Test,

    /// Combined capability, migration and test report
    Report(ReportArgs),

    /// Trim histories and prune old backups and test artefacts
    Clean,

    /// Back up and regenerate every tool config from its template
    RegenerateConfigs,

    /// Settings management
    Config(ConfigArgs),

    /// Print version information
    Version,
}

#[derive(Args, Debug)]
struct CapabilitiesArgs {
    /// Ignore the cache and probe every tool
    #[arg(long)]
    refresh: bool,
}

#[derive(Args, Debug)]
struct ReportArgs {
    /// Also write the report here (.json for JSON, markdown otherwise)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Print effective settings and storage paths
    Show,
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Init => "init",
            Commands::Capabilities(_) => "capabilities",
            Commands::Update => "update",
            Commands::Test => "test",
            Commands::Report(_) => "report",
            Commands::Clean => "clean",
            Commands::RegenerateConfigs => "regenerate-configs",
            Commands::Config(_) => "config",
            Commands::Version => "version",
        }
    }

    /// Commands that mutate shared state take the invocation lock.
    fn needs_lock(&self) -> bool {
        !matches!(self, Commands::Config(_) | Commands::Version)
    }
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() {
                ExitCode::ArgsError
            } else {
                ExitCode::Clean
            };
            let _ = e.print();
            std::process::exit(code.as_i32());
        }
    };

    // JSON payloads on stdout pair with JSON lines on stderr
    let log_format = cli.global.format.is_machine().then_some(LogFormat::Jsonl);
    init_logging(&LogConfig::from_env(cli.global.log_level(), log_format));

    let run_id = RunId::new();
    let exit_code = {
        let span = info_span!("shotkit", run_id = %run_id, command = cli.command.name());
        let _enter = span.enter();
        run(&cli, run_id.clone())
    };
    std::process::exit(exit_code.as_i32());
}

fn run(cli: &Cli, run_id: RunId) -> ExitCode {
    let global = &cli.global;
    let command = cli.command.name();
    if let Commands::Version = cli.command {
        print_version(global);
        return ExitCode::Clean;
    }

    let paths = StorePaths::resolve(&global.overrides());
    let mut ctx = match CompatContext::load(SystemRunner::default(), paths) {
        Ok(ctx) => ctx.with_run_id(run_id),
        Err(e) => return output_error(global, &run_id, command, &e),
    };

    let _lock = if cli.command.needs_lock() {
        match ctx.lock() {
            Ok(lock) => Some(lock),
            Err(e) => return output_error(global, ctx.run_id(), command, &e),
        }
    } else {
        None
    };

    let result = match &cli.command {
        Commands::Init => run_init(global, &mut ctx),
        Commands::Capabilities(args) => run_capabilities(global, &mut ctx, args),
        Commands::Update => run_update(global, &mut ctx),
        Commands::Test => run_test(global, &mut ctx),
        Commands::Report(args) => run_report(global, &mut ctx, args),
        Commands::Clean => run_clean(global, &mut ctx),
        Commands::RegenerateConfigs => Ok(run_regenerate(global, &mut ctx)),
        Commands::Config(ConfigArgs {
            command: ConfigCommands::Show,
        }) => run_config_show(global, &ctx),
        Commands::Version => Ok(ExitCode::Clean),
    };
    match result {
        Ok(code) => code,
        Err(e) => output_error(global, ctx.run_id(), command, &e),
    }
}

// ============================================================================
// Output helpers
// ============================================================================

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => error!(error = %e, "failed to render JSON output"),
    }
}

fn envelope(run_id: &RunId, command: &str, code: ExitCode, result: serde_json::Value) -> serde_json::Value {
    json!({
        "schema_version": SCHEMA_VERSION,
        "run_id": run_id.as_str(),
        "generated_at": chrono::Utc::now().to_rfc3339(),
        "command": command,
        "outcome": code.code_name(),
        "ok": code.is_success(),
        "result": result,
    })
}

/// Emit a payload in the selected format.
fn emit(
    global: &GlobalOpts,
    run_id: &RunId,
    command: &str,
    code: ExitCode,
    json: impl FnOnce() -> serde_json::Value,
    summary: impl FnOnce() -> String,
    markdown: impl FnOnce() -> String,
) -> ExitCode {
    match global.format {
        OutputFormat::Json => print_json(&envelope(run_id, command, code, json())),
        OutputFormat::Summary => println!("{}", summary()),
        OutputFormat::Exitcode => {}
        OutputFormat::Md => print!("{}", markdown()),
    }
    code
}

fn output_error(global: &GlobalOpts, run_id: &RunId, command: &str, err: &ContextError) -> ExitCode {
    let code = err.exit_code();
    debug!(error = %err, outcome = %code, "{} failed", command);
    match global.format {
        OutputFormat::Json => print_json(&json!({
            "schema_version": SCHEMA_VERSION,
            "run_id": run_id.as_str(),
            "command": command,
            "outcome": code.code_name(),
            "ok": false,
            "error": err.to_string(),
        })),
        OutputFormat::Exitcode => {}
        _ => eprintln!("shotkit {}: {}", command, err),
    }
    code
}

fn to_value<T: serde::Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or_else(|e| json!({ "serialization_error": e.to_string() }))
}

// ============================================================================
// Commands
// ============================================================================

fn run_init(global: &GlobalOpts, ctx: &mut CompatContext<SystemRunner>) -> Result<ExitCode, ContextError> {
    let report = ctx.init()?;
    let code = if report.created.is_empty() && report.swept_temp_files.is_empty() {
        ExitCode::Clean
    } else {
        ExitCode::Applied
    };
    Ok(emit(
        global,
        ctx.run_id(),
        "init",
        code,
        || to_value(&report),
        || {
            format!(
                "initialised: {} created, {} temp file(s) swept",
                report.created.len(),
                report.swept_temp_files.len()
            )
        },
        || {
            let mut out = String::from("# shotkit init\n\n");
            if report.created.is_empty() {
                out.push_str("Storage already initialised.\n");
            }
            for path in &report.created {
                out.push_str(&format!("- created {}\n", path.display()));
            }
            for path in &report.swept_temp_files {
                out.push_str(&format!("- removed orphaned {}\n", path.display()));
            }
            out
        },
    ))
}

fn run_capabilities(
    global: &GlobalOpts,
    ctx: &mut CompatContext<SystemRunner>,
    args: &CapabilitiesArgs,
) -> Result<ExitCode, ContextError> {
    let load = ctx.detect_capabilities(args.refresh)?;
    Ok(emit(
        global,
        ctx.run_id(),
        "capabilities",
        ExitCode::Clean,
        || {
            json!({
                "from_cache": load.from_cache,
                "capabilities": to_value(&load.snapshot),
            })
        },
        || capabilities_summary(&load.snapshot),
        || {
            let source = if load.from_cache { "cache" } else { "fresh probe" };
            format!("{}\nSource: {}\n", render_capabilities(&load.snapshot), source)
        },
    ))
}

fn run_update(global: &GlobalOpts, ctx: &mut CompatContext<SystemRunner>) -> Result<ExitCode, ContextError> {
    let cycle = ctx.check_for_changes_and_migrate()?;
    let code = match (cycle.migrated, cycle.all_succeeded) {
        (false, _) => ExitCode::Clean,
        (true, true) => ExitCode::Applied,
        (true, false) => ExitCode::PartialFail,
    };
    Ok(emit(
        global,
        ctx.run_id(),
        "update",
        code,
        || to_value(&cycle),
        || cycle_summary_line(&cycle),
        || render_cycle(&cycle),
    ))
}

fn run_test(global: &GlobalOpts, ctx: &mut CompatContext<SystemRunner>) -> Result<ExitCode, ContextError> {
    let record = ctx.run_compatibility_tests()?;
    let code = match record.overall_result {
        OverallResult::Pass => ExitCode::Clean,
        OverallResult::Warn => ExitCode::Degraded,
        OverallResult::Fail => ExitCode::TestsFailed,
    };
    Ok(emit(
        global,
        ctx.run_id(),
        "test",
        code,
        || to_value(&record),
        || test_summary_line(&record),
        || render_test_record(&record),
    ))
}

fn run_report(
    global: &GlobalOpts,
    ctx: &mut CompatContext<SystemRunner>,
    args: &ReportArgs,
) -> Result<ExitCode, ContextError> {
    let report = ctx.generate_report(args.output.as_deref())?;
    Ok(emit(
        global,
        ctx.run_id(),
        "report",
        ExitCode::Clean,
        || to_value(&report),
        || report.summary_line(),
        || match &args.output {
            Some(path) => format!("Report written to {}\n", path.display()),
            None => report.to_markdown(),
        },
    ))
}

fn run_clean(global: &GlobalOpts, ctx: &mut CompatContext<SystemRunner>) -> Result<ExitCode, ContextError> {
    let report = ctx.clean_old_data()?;
    let code = if report.is_empty() {
        ExitCode::Clean
    } else {
        ExitCode::Applied
    };
    Ok(emit(
        global,
        ctx.run_id(),
        "clean",
        code,
        || to_value(&report),
        || {
            format!(
                "cleaned: {} migration record(s), {} test record(s), {} file(s)",
                report.migrations_trimmed,
                report.tests_trimmed,
                report.pruned.len()
            )
        },
        || {
            let mut out = String::from("# shotkit clean\n\n");
            if report.is_empty() {
                out.push_str("Nothing to clean.\n");
                return out;
            }
            out.push_str(&format!(
                "Trimmed {} migration record(s) and {} test record(s).\n",
                report.migrations_trimmed, report.tests_trimmed
            ));
            for item in &report.pruned {
                out.push_str(&format!("- removed {}\n", item.path.display()));
            }
            out
        },
    ))
}

fn run_regenerate(global: &GlobalOpts, ctx: &mut CompatContext<SystemRunner>) -> ExitCode {
    let entries = ctx.force_regenerate_all_configs();
    let failed = entries.iter().filter(|e| !e.succeeded()).count();
    let code = if failed == 0 {
        ExitCode::Applied
    } else {
        ExitCode::PartialFail
    };
    emit(
        global,
        ctx.run_id(),
        "regenerate-configs",
        code,
        || to_value(&entries),
        || format!("{} config(s) regenerated, {} failed", entries.len() - failed, failed),
        || {
            let mut out = String::from("# Regenerated configs\n\n");
            for entry in &entries {
                match (&entry.config_path, &entry.error) {
                    (_, Some(err)) => out.push_str(&format!("- [FAILED] {}: {}\n", entry.tool, err)),
                    (Some(path), None) => {
                        out.push_str(&format!("- [ok] {}: {}", entry.tool, path.display()));
                        if let Some(backup) = &entry.backup {
                            out.push_str(&format!(" (backup: {})", backup.display()));
                        }
                        out.push('\n');
                    }
                    (None, None) => out.push_str(&format!("- [ok] {}\n", entry.tool)),
                }
            }
            out
        },
    )
}

fn run_config_show(global: &GlobalOpts, ctx: &CompatContext<SystemRunner>) -> Result<ExitCode, ContextError> {
    let paths = ctx.paths();
    let settings_file = paths.settings_file();
    let from_file = ctx.settings_source().is_some();
    Ok(emit(
        global,
        ctx.run_id(),
        "config",
        ExitCode::Clean,
        || {
            json!({
                "settings_file": settings_file,
                "settings_file_present": from_file,
                "settings": to_value(ctx.settings()),
                "paths": to_value(paths),
            })
        },
        || {
            let source = if from_file { "file" } else { "defaults" };
            format!("settings from {} ({})", settings_file.display(), source)
        },
        || {
            let settings = toml::to_string_pretty(ctx.settings())
                .unwrap_or_else(|e| format!("# failed to render settings: {}\n", e));
            format!(
                "# shotkit settings\n\nSource: {}{}\n\n```toml\n{}```\n\n## Paths\n\n- config: {}\n- data: {}\n- cache: {}\n- tool configs: {}\n",
                settings_file.display(),
                if from_file { "" } else { " (not present, defaults)" },
                settings,
                paths.config_dir.display(),
                paths.data_dir.display(),
                paths.cache_dir.display(),
                paths.tool_config_home.display(),
            )
        },
    ))
}

fn print_version(global: &GlobalOpts) {
    let version_info = json!({
        "schema_version": SCHEMA_VERSION,
        "shotkit_version": env!("CARGO_PKG_VERSION"),
        "rust_version": env!("CARGO_PKG_RUST_VERSION"),
    });

    match global.format {
        OutputFormat::Json => print_json(&version_info),
        OutputFormat::Exitcode => {}
        _ => {
            println!("shotkit {}", env!("CARGO_PKG_VERSION"));
            println!("schema version: {}", SCHEMA_VERSION);
        }
    }
}
