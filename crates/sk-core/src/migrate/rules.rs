//! Declarative migration rules.
//!
//! Each tool that owns a configuration file carries a [`MigrationProfile`]:
//! where the file lives, how it is written, the template it is regenerated
//! from, and an ordered rule table. Rules are literal data; the first rule
//! whose `from` and `to` patterns match a transition decides it.
//!
//! Version patterns use component-boundary prefix matching:
//!
//! | pattern | matches | does not match |
//! |---------|---------|----------------|
//! | `1.1`   | `1.1`, `1.1.0`, `1.1-rc1` | `1.10.0`, `11.1` |
//! | `1.1.*` | same as `1.1` | |
//! | `*`     | any non-empty version | empty |

use super::templates;
use serde::Serialize;

/// Syntax of a tool's configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigDialect {
    /// `key = value`, `[section]`, values are TOML literals.
    Toml,
    /// `key=value`, `[Section]`, values are raw strings.
    Ini,
}

/// One idempotent textual edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ConfigEdit {
    /// Insert `key = value` under `section` if the key is absent there.
    /// An empty section names the preamble before the first header.
    EnsureKey {
        section: &'static str,
        key: &'static str,
        value: &'static str,
    },
    /// Rename a deprecated key wherever it appears.
    RenameKey {
        from: &'static str,
        to: &'static str,
    },
    /// Drop a key wherever it appears.
    RemoveKey { key: &'static str },
}

/// Transition rule for one tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationRule {
    pub from: &'static [&'static str],
    pub to: &'static [&'static str],
    pub requires_migration: bool,
    /// Targeted edits; empty with `requires_migration` means regenerate.
    pub edits: &'static [ConfigEdit],
}

impl MigrationRule {
    pub fn matches(&self, old: &str, new: &str) -> bool {
        self.from.iter().any(|p| version_matches(p, old))
            && self.to.iter().any(|p| version_matches(p, new))
    }

    /// Whether this rule falls back to full regeneration.
    pub fn regenerates(&self) -> bool {
        self.requires_migration && self.edits.is_empty()
    }
}

/// Everything the migration engine needs to know about one tool's config.
#[derive(Debug, Clone, Copy)]
pub struct MigrationProfile {
    /// Path relative to the tool config home.
    pub config_file: &'static str,
    pub dialect: ConfigDialect,
    pub template: &'static str,
    /// Section that must survive any edit (validation).
    pub required_section: Option<&'static str>,
    pub rules: &'static [MigrationRule],
}

impl MigrationProfile {
    /// First rule matching the transition. A missing old version never
    /// matches: first sight of a tool is not a migration.
    pub fn find_rule(&self, old: &str, new: &str) -> Option<&MigrationRule> {
        if old.trim().is_empty() || new.trim().is_empty() {
            return None;
        }
        self.rules.iter().find(|rule| rule.matches(old, new))
    }

    pub fn requires_migration(&self, old: &str, new: &str) -> bool {
        self.find_rule(old, new)
            .map(|rule| rule.requires_migration)
            .unwrap_or(false)
    }
}

/// Component-boundary prefix match of a version against a pattern.
pub fn version_matches(pattern: &str, version: &str) -> bool {
    let version = version.trim();
    if version.is_empty() {
        return false;
    }
    let pattern = pattern.trim();
    if pattern == "*" {
        return true;
    }
    let pattern = pattern.strip_suffix(".*").unwrap_or(pattern);
    if pattern.is_empty() {
        return false;
    }
    match version.strip_prefix(pattern) {
        Some("") => true,
        Some(rest) => rest.starts_with(['.', '-', '+']),
        None => false,
    }
}

// ============================================================================
// Rule tables
// ============================================================================

const SATTY_1_0_TO_1_1_EDITS: &[ConfigEdit] = &[
    ConfigEdit::RenameKey {
        from: "init-tool",
        to: "initial-tool",
    },
    ConfigEdit::EnsureKey {
        section: "general",
        key: "actions-on-enter",
        value: "[\"save-to-clipboard\"]",
    },
    ConfigEdit::EnsureKey {
        section: "general",
        key: "no-window-decoration",
        value: "false",
    },
];

pub const SATTY_RULES: &[MigrationRule] = &[
    MigrationRule {
        from: &["1.0"],
        to: &["1.1", "1.2", "1.3"],
        requires_migration: true,
        edits: SATTY_1_0_TO_1_1_EDITS,
    },
    MigrationRule {
        from: &["1.1"],
        to: &["1.2", "1.3"],
        requires_migration: false,
        edits: &[],
    },
    MigrationRule {
        from: &["0"],
        to: &["1"],
        requires_migration: true,
        edits: &[],
    },
];

const SWAPPY_1_5_EDITS: &[ConfigEdit] = &[
    ConfigEdit::EnsureKey {
        section: "Default",
        key: "auto_save",
        value: "false",
    },
    ConfigEdit::EnsureKey {
        section: "Default",
        key: "early_exit",
        value: "false",
    },
    ConfigEdit::EnsureKey {
        section: "Default",
        key: "fill_shape",
        value: "false",
    },
];

const SWAPPY_1_6_EDITS: &[ConfigEdit] = &[
    ConfigEdit::EnsureKey {
        section: "Default",
        key: "transparent",
        value: "false",
    },
    ConfigEdit::EnsureKey {
        section: "Default",
        key: "transparency",
        value: "50",
    },
];

const SWAPPY_1_4_TO_1_6_EDITS: &[ConfigEdit] = &[
    SWAPPY_1_5_EDITS[0],
    SWAPPY_1_5_EDITS[1],
    SWAPPY_1_5_EDITS[2],
    SWAPPY_1_6_EDITS[0],
    SWAPPY_1_6_EDITS[1],
];

pub const SWAPPY_RULES: &[MigrationRule] = &[
    MigrationRule {
        from: &["1.4"],
        to: &["1.5"],
        requires_migration: true,
        edits: SWAPPY_1_5_EDITS,
    },
    MigrationRule {
        from: &["1.4"],
        to: &["1.6"],
        requires_migration: true,
        edits: SWAPPY_1_4_TO_1_6_EDITS,
    },
    MigrationRule {
        from: &["1.5"],
        to: &["1.6"],
        requires_migration: true,
        edits: SWAPPY_1_6_EDITS,
    },
];

pub const SATTY_PROFILE: MigrationProfile = MigrationProfile {
    config_file: "satty/config.toml",
    dialect: ConfigDialect::Toml,
    template: templates::SATTY_TEMPLATE,
    required_section: Some("general"),
    rules: SATTY_RULES,
};

pub const SWAPPY_PROFILE: MigrationProfile = MigrationProfile {
    config_file: "swappy/config",
    dialect: ConfigDialect::Ini,
    template: templates::SWAPPY_TEMPLATE,
    required_section: Some("Default"),
    rules: SWAPPY_RULES,
};
