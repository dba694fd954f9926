//! Version-change detection and migration through the collaborator API.

use chrono::{Duration, Utc};
use sk_common::StorePaths;
use sk_core::capabilities::{ToolRegistry, ToolRole, ToolSpec};
use sk_core::config::Settings;
use sk_core::context::CompatContext;
use sk_core::ledger::{LedgerStore, MigrationRecord, MigrationStatus, VersionLedger};
use sk_core::migrate::{ConfigDialect, MigrationProfile, MigrationRule};
use sk_core::runner::{ScriptedReply, ScriptedRunner};
use std::path::Path;
use tempfile::tempdir;

fn seed_ledger(paths: &StorePaths, versions: &[(&str, &str)]) {
    let mut ledger = VersionLedger::new(Utc::now() - Duration::days(3));
    for (tool, version) in versions {
        ledger.tool_versions.insert(tool.to_string(), version.to_string());
    }
    LedgerStore::new(paths.ledger_file()).save(&ledger).unwrap();
}

fn load_ledger(paths: &StorePaths) -> VersionLedger {
    LedgerStore::new(paths.ledger_file()).load().unwrap()
}

fn write_tool_config(paths: &StorePaths, relative: &str, content: &str) {
    let path = paths.tool_config_home.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn satty_at(version: &str) -> ScriptedRunner {
    ScriptedRunner::new()
        .install("satty")
        .respond("satty", &["--version"], ScriptedReply::ok(format!("satty {}\n", version)))
}

fn context(root: &Path, runner: ScriptedRunner) -> CompatContext<ScriptedRunner> {
    CompatContext::new(runner, StorePaths::under(root), Settings::default())
}

#[test]
fn satty_bump_with_known_rule_migrates_and_backs_up() {
    let dir = tempdir().unwrap();
    let mut ctx = context(dir.path(), satty_at("1.1.0"));
    let paths = ctx.paths().clone();
    seed_ledger(&paths, &[("satty", "1.0.5")]);
    write_tool_config(&paths, "satty/config.toml", "[general]\ninit-tool = \"arrow\"\n");

    let cycle = ctx.check_for_changes_and_migrate().unwrap();
    assert!(cycle.changed);
    assert!(cycle.migrated);
    assert!(cycle.all_succeeded);

    let backups: Vec<_> = std::fs::read_dir(paths.backup_dir().join("satty"))
        .unwrap()
        .filter_map(|e| e.ok())
        .collect();
    assert_eq!(backups.len(), 1);

    let ledger = load_ledger(&paths);
    assert_eq!(ledger.migration_history.len(), 1);
    let record = &ledger.migration_history[0];
    assert_eq!(
        (record.tool.as_str(), record.old_version.as_str(), record.new_version.as_str()),
        ("satty", "1.0.5", "1.1.0")
    );
    assert_eq!(record.status, MigrationStatus::Success);
    assert_eq!(ledger.recorded_version("satty"), Some("1.1.0"));

    let migrated = std::fs::read_to_string(paths.tool_config_home.join("satty/config.toml")).unwrap();
    assert!(migrated.contains("initial-tool = \"arrow\""));
}

#[test]
fn satty_configs_with_multiline_values_and_commented_headers_migrate() {
    let inputs = [
        "[general]\ninit-tool = \"arrow\"\nactions-on-enter = [\n  \"save-to-clipboard\",\n]\n",
        "[general] # main options\ninit-tool = \"arrow\"\n",
    ];
    for input in inputs {
        assert!(input.parse::<toml::Table>().is_ok(), "{input}");

        let dir = tempdir().unwrap();
        let mut ctx = context(dir.path(), satty_at("1.1.0"));
        let paths = ctx.paths().clone();
        seed_ledger(&paths, &[("satty", "1.0.5")]);
        write_tool_config(&paths, "satty/config.toml", input);

        let cycle = ctx.check_for_changes_and_migrate().unwrap();
        assert!(cycle.all_succeeded, "{input}: {:?}", cycle.records);

        let migrated = std::fs::read_to_string(paths.tool_config_home.join("satty/config.toml")).unwrap();
        let table: toml::Table = migrated.parse().unwrap();
        let general = table["general"].as_table().unwrap();
        assert_eq!(general["initial-tool"].as_str(), Some("arrow"));
        assert_eq!(general["no-window-decoration"].as_bool(), Some(false));
        assert_eq!(general["actions-on-enter"].as_array().map(Vec::len), Some(1));
    }
}

const TOOLX_RULES: &[MigrationRule] = &[MigrationRule {
    from: &["1"],
    to: &["2"],
    requires_migration: true,
    edits: &[],
}];

const TOOLX_PROFILE: MigrationProfile = MigrationProfile {
    config_file: "toolx/config",
    dialect: ConfigDialect::Ini,
    template: "[Default]\nmode=basic\n",
    required_section: Some("Default"),
    rules: TOOLX_RULES,
};

const TOOLX: ToolSpec = ToolSpec {
    name: "toolx",
    role: ToolRole::Annotation,
    binaries: &["toolx"],
    version_args: &["--version"],
    help_args: &["--help"],
    features: &[],
    migration: Some(&TOOLX_PROFILE),
};

#[test]
fn bump_with_no_matching_rule_does_nothing() {
    assert!(!TOOLX_PROFILE.requires_migration("2.0.0", "9.9.9"));

    let dir = tempdir().unwrap();
    let runner = ScriptedRunner::new()
        .install("toolx")
        .respond("toolx", &["--version"], ScriptedReply::ok("toolx 9.9.9"));
    let mut ctx = context(dir.path(), runner).with_registry(ToolRegistry::from_specs(vec![TOOLX]));
    let paths = ctx.paths().clone();
    seed_ledger(&paths, &[("toolx", "2.0.0")]);

    let cycle = ctx.check_for_changes_and_migrate().unwrap();
    assert!(cycle.changed);
    assert!(!cycle.migrated);
    assert!(cycle.all_succeeded);

    let ledger = load_ledger(&paths);
    assert!(ledger.migration_history.is_empty());
    assert_eq!(ledger.recorded_version("toolx"), Some("9.9.9"));
    assert!(!paths.tool_config_home.join("toolx/config").exists());
    assert!(!paths.backup_dir().exists());
}

#[test]
fn first_sight_never_migrates() {
    let dir = tempdir().unwrap();
    let mut ctx = context(dir.path(), satty_at("1.1.0"));
    let paths = ctx.paths().clone();
    write_tool_config(&paths, "satty/config.toml", "[general]\ninit-tool = \"arrow\"\n");

    let cycle = ctx.check_for_changes_and_migrate().unwrap();
    assert!(!cycle.changed);
    assert!(!cycle.migrated);

    let ledger = load_ledger(&paths);
    assert!(ledger.migration_history.is_empty());
    assert_eq!(ledger.recorded_version("satty"), Some("1.1.0"));
    let untouched = std::fs::read_to_string(paths.tool_config_home.join("satty/config.toml")).unwrap();
    assert_eq!(untouched, "[general]\ninit-tool = \"arrow\"\n");
}

#[test]
fn ledger_tracks_probe_even_when_migration_fails() {
    let dir = tempdir().unwrap();
    let runner = satty_at("1.1.0")
        .install("swappy")
        .respond("swappy", &["--version"], ScriptedReply::ok("swappy version 1.5.1"));
    let mut ctx = context(dir.path(), runner);
    let paths = ctx.paths().clone();
    seed_ledger(&paths, &[("satty", "1.0.5"), ("swappy", "1.4.0")]);
    // Unterminated string: satty's migrated candidate fails TOML validation.
    write_tool_config(&paths, "satty/config.toml", "[general]\ninit-tool = \"arrow\n");
    write_tool_config(&paths, "swappy/config", "[Default]\nline_size=5\n");

    let cycle = ctx.check_for_changes_and_migrate().unwrap();
    assert!(cycle.migrated);
    assert!(!cycle.all_succeeded);

    let ledger = load_ledger(&paths);
    let statuses: Vec<_> = ledger
        .migration_history
        .iter()
        .map(|r| (r.tool.as_str(), r.status))
        .collect();
    assert!(statuses.contains(&("satty", MigrationStatus::Failed)));
    assert!(statuses.contains(&("swappy", MigrationStatus::Success)));
    assert_eq!(ledger.recorded_version("satty"), Some("1.1.0"));
    assert_eq!(ledger.recorded_version("swappy"), Some("1.5.1"));

    let swappy = std::fs::read_to_string(paths.tool_config_home.join("swappy/config")).unwrap();
    assert!(swappy.contains("auto_save=false"));
}

#[test]
fn uninstalled_tool_keeps_recorded_version() {
    let dir = tempdir().unwrap();
    let mut ctx = context(dir.path(), ScriptedRunner::new());
    let paths = ctx.paths().clone();
    seed_ledger(&paths, &[("satty", "1.0.5")]);

    let cycle = ctx.check_for_changes_and_migrate().unwrap();
    assert!(cycle.changes.is_empty());
    assert_eq!(load_ledger(&paths).recorded_version("satty"), Some("1.0.5"));
}

#[test]
fn migration_history_is_capped_oldest_first() {
    let mut ledger = VersionLedger::new(Utc::now());
    let base = Utc::now() - Duration::days(100);
    for i in 0..60 {
        ledger.push_migration(
            MigrationRecord {
                tool: "satty".to_string(),
                old_version: format!("1.0.{}", i),
                new_version: format!("1.0.{}", i + 1),
                timestamp: base + Duration::hours(i),
                status: MigrationStatus::Success,
                detail: None,
                backup: None,
            },
            50,
        );
    }
    assert_eq!(ledger.migration_history.len(), 50);
    assert_eq!(ledger.migration_history[0].old_version, "1.0.10");
    assert!(ledger
        .migration_history
        .windows(2)
        .all(|w| w[0].timestamp <= w[1].timestamp));
}
