//! Registry of wrapped tools.
//!
//! Each tool is described by a static [`ToolSpec`]: which binaries provide
//! it, how to ask it for its version and help text, which feature flags to
//! derive, and (for tools with a configuration file) its migration profile.
//! Adding a tool means adding a table entry, not a new code path.

use crate::migrate::rules::{MigrationProfile, SATTY_PROFILE, SWAPPY_PROFILE};
use serde::Serialize;

/// What a tool is used for in the capture workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolRole {
    Capture,
    AreaSelection,
    Annotation,
    Clipboard,
    Ocr,
    ImageProcessing,
    Freeze,
}

/// Where a feature flag's evidence comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureSource {
    /// Any needle occurs in the tool's help text.
    Help,
    /// The named companion binary is resolvable.
    Companion(&'static str),
}

/// Rule deriving one boolean feature flag.
#[derive(Debug, Clone, Copy)]
pub struct FeatureProbe {
    pub name: &'static str,
    pub needles: &'static [&'static str],
    pub source: FeatureSource,
}

const fn help(name: &'static str, needles: &'static [&'static str]) -> FeatureProbe {
    FeatureProbe {
        name,
        needles,
        source: FeatureSource::Help,
    }
}

/// Static description of one wrapped tool.
#[derive(Debug, Clone, Copy)]
pub struct ToolSpec {
    /// Stable identifier used in the cache, ledger and reports.
    pub name: &'static str,
    pub role: ToolRole,
    /// Candidate binaries, first resolvable wins.
    pub binaries: &'static [&'static str],
    pub version_args: &'static [&'static str],
    pub help_args: &'static [&'static str],
    pub features: &'static [FeatureProbe],
    pub migration: Option<&'static MigrationProfile>,
}

impl ToolSpec {
    pub fn feature_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.features.iter().map(|f| f.name)
    }
}

pub const GRIM: ToolSpec = ToolSpec {
    name: "grim",
    role: ToolRole::Capture,
    binaries: &["grim"],
    version_args: &["-v"],
    help_args: &["-h"],
    features: &[
        help("supports-geometry-flag", &["-g <geometry>", "-g "]),
        help("supports-output-selection", &["-o <output>", "-o "]),
        help("supports-cursor", &["-c "]),
        help("supports-scale", &["-s <factor>", "-s "]),
        help("supports-jpeg", &["jpeg"]),
    ],
    migration: None,
};

pub const SLURP: ToolSpec = ToolSpec {
    name: "slurp",
    role: ToolRole::AreaSelection,
    binaries: &["slurp"],
    version_args: &["-v"],
    help_args: &["-h"],
    features: &[
        help("supports-output-boxes", &["-o "]),
        help("supports-point-selection", &["-p "]),
        help("supports-format-string", &["-f <format>", "-f "]),
        help("supports-aspect-ratio", &["-a "]),
    ],
    migration: None,
};

pub const SATTY: ToolSpec = ToolSpec {
    name: "satty",
    role: ToolRole::Annotation,
    binaries: &["satty"],
    version_args: &["--version"],
    help_args: &["--help"],
    features: &[
        help("supports-filename-flag", &["--filename"]),
        help("supports-output-filename", &["--output-filename"]),
        help("supports-early-exit", &["--early-exit"]),
        help("supports-copy-command", &["--copy-command"]),
        help("supports-initial-tool", &["--initial-tool", "--init-tool"]),
        help("supports-fullscreen", &["--fullscreen"]),
    ],
    migration: Some(&SATTY_PROFILE),
};

pub const SWAPPY: ToolSpec = ToolSpec {
    name: "swappy",
    role: ToolRole::Annotation,
    binaries: &["swappy"],
    version_args: &["--version"],
    help_args: &["--help"],
    features: &[
        help("supports-file-flag", &["--file", "-f "]),
        help("supports-output-file", &["--output-file", "-o "]),
    ],
    migration: Some(&SWAPPY_PROFILE),
};

pub const WL_COPY: ToolSpec = ToolSpec {
    name: "wl-copy",
    role: ToolRole::Clipboard,
    binaries: &["wl-copy"],
    version_args: &["--version"],
    help_args: &["--help"],
    features: &[
        help("supports-type-flag", &["--type"]),
        help("supports-paste-once", &["--paste-once"]),
        help("supports-primary", &["--primary"]),
        FeatureProbe {
            name: "supports-read-back",
            needles: &[],
            source: FeatureSource::Companion("wl-paste"),
        },
    ],
    migration: None,
};

pub const TESSERACT: ToolSpec = ToolSpec {
    name: "tesseract",
    role: ToolRole::Ocr,
    binaries: &["tesseract"],
    version_args: &["--version"],
    help_args: &["--help"],
    features: &[
        help("supports-stdout", &["stdout"]),
        help("supports-psm", &["--psm"]),
        help("supports-list-langs", &["--list-langs"]),
    ],
    migration: None,
};

pub const IMAGEMAGICK: ToolSpec = ToolSpec {
    name: "imagemagick",
    role: ToolRole::ImageProcessing,
    binaries: &["magick", "convert"],
    version_args: &["-version"],
    help_args: &["-help"],
    features: &[
        help("supports-annotate", &["-annotate"]),
        help("supports-label", &["label", "-pointsize"]),
    ],
    migration: None,
};

pub const HYPRPICKER: ToolSpec = ToolSpec {
    name: "hyprpicker",
    role: ToolRole::Freeze,
    binaries: &["hyprpicker"],
    version_args: &["--version"],
    help_args: &["--help"],
    features: &[
        help("supports-render-inactive", &["--render-inactive", "-r "]),
        help("supports-no-zoom", &["--no-zoom", "-z "]),
    ],
    migration: None,
};

const BUILTIN: &[ToolSpec] = &[
    GRIM, SLURP, SATTY, SWAPPY, WL_COPY, TESSERACT, IMAGEMAGICK, HYPRPICKER,
];

/// Ordered set of tool specs.
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    specs: Vec<ToolSpec>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ToolRegistry {
    /// The tools shotkit wraps.
    pub fn builtin() -> Self {
        Self {
            specs: BUILTIN.to_vec(),
        }
    }

    /// A registry over an explicit table (tests, custom tool sets).
    pub fn from_specs(specs: Vec<ToolSpec>) -> Self {
        Self { specs }
    }

    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.specs.iter().find(|s| s.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolSpec> {
        self.specs.iter()
    }

    /// Tools with a configuration file under shotkit's care.
    pub fn configurable(&self) -> impl Iterator<Item = (&ToolSpec, &'static MigrationProfile)> {
        self.specs
            .iter()
            .filter_map(|s| s.migration.map(|profile| (s, profile)))
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}
