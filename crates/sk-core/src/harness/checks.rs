//! The check battery.
//!
//! Order matters: it is the order results appear in records and reports.

use super::{CheckStatus, HarnessOptions};
use crate::capabilities::CapabilitySnapshot;
use crate::config::AnnotationPreference;
use crate::runner::{BackgroundProcess, CommandOutput, CommandRunner, Invocation};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Prefix of the token pushed through the clipboard.
pub const CLIPBOARD_TOKEN_PREFIX: &str = "shotkit-clipboard-";

/// Text rendered and read back by the OCR check.
pub const OCR_TEXT: &str = "SHOTKIT";

/// Region captured by the geometry check.
const GEOMETRY: &str = "0,0 16x16";

/// Time for the freeze overlay to appear before capturing.
const FREEZE_SETTLE: Duration = Duration::from_millis(200);

/// Everything a check may look at.
pub struct CheckContext<'a> {
    pub runner: &'a dyn CommandRunner,
    pub snapshot: &'a CapabilitySnapshot,
    /// Per-run scratch directory.
    pub artifacts: &'a Path,
    pub options: &'a HarnessOptions,
}

impl CheckContext<'_> {
    /// Binary to invoke for `tool`, if the snapshot says it is available.
    fn program(&self, tool: &str) -> Option<String> {
        self.snapshot
            .get(tool)
            .filter(|record| record.available)
            .and_then(|record| record.program())
    }

    fn artifact(&self, name: &str) -> PathBuf {
        self.artifacts.join(name)
    }

    fn run(&self, invocation: Invocation) -> Result<CommandOutput, String> {
        self.runner
            .run(&invocation.with_timeout(self.options.timeout))
            .map_err(|e| e.to_string())
    }
}

/// Status plus a one-line explanation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub status: CheckStatus,
    pub detail: String,
}

impl CheckOutcome {
    fn pass(detail: impl Into<String>) -> Self {
        Self { status: CheckStatus::Pass, detail: detail.into() }
    }

    fn fail(detail: impl Into<String>) -> Self {
        Self { status: CheckStatus::Fail, detail: detail.into() }
    }

    fn warn(detail: impl Into<String>) -> Self {
        Self { status: CheckStatus::Warn, detail: detail.into() }
    }

    fn skip(detail: impl Into<String>) -> Self {
        Self { status: CheckStatus::Skip, detail: detail.into() }
    }

    fn not_installed(tool: &str) -> Self {
        Self::skip(format!("{} not installed", tool))
    }
}

/// One entry of the battery.
pub struct Check {
    pub component: &'static str,
    pub critical: bool,
    pub run: fn(&CheckContext<'_>) -> CheckOutcome,
}

pub const BATTERY: &[Check] = &[
    Check { component: "capture", critical: true, run: capture },
    Check { component: "area-selection", critical: true, run: area_selection },
    Check { component: "clipboard", critical: true, run: clipboard },
    Check { component: "geometry-capture", critical: true, run: geometry_capture },
    Check { component: "annotation", critical: false, run: annotation },
    Check { component: "ocr", critical: false, run: ocr },
];

// ============================================================================
// Image validation
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Ppm,
}

impl std::fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageFormat::Png => write!(f, "PNG"),
            ImageFormat::Jpeg => write!(f, "JPEG"),
            ImageFormat::Ppm => write!(f, "PPM"),
        }
    }
}

/// Identify an image by its magic bytes.
pub fn detect_image_format(bytes: &[u8]) -> Option<ImageFormat> {
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some(ImageFormat::Png)
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some(ImageFormat::Jpeg)
    } else if (bytes.starts_with(b"P6") || bytes.starts_with(b"P3"))
        && bytes.get(2).is_some_and(u8::is_ascii_whitespace)
    {
        Some(ImageFormat::Ppm)
    } else {
        None
    }
}

fn validate_image(path: &Path) -> Result<String, String> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err("no image was written".to_string())
        }
        Err(e) => return Err(format!("cannot read image: {}", e)),
    };
    if bytes.is_empty() {
        return Err("image file is empty".to_string());
    }
    match detect_image_format(&bytes) {
        Some(format) => Ok(format!("{} image, {} bytes", format, bytes.len())),
        None => Err(format!("unrecognised image data ({} bytes)", bytes.len())),
    }
}

/// Run a capture command and check the image it should have written.
fn capture_into(ctx: &CheckContext<'_>, invocation: Invocation, target: &Path) -> CheckOutcome {
    let output = match ctx.run(invocation) {
        Ok(output) => output,
        Err(e) => return CheckOutcome::fail(e),
    };
    if !output.success() {
        return CheckOutcome::fail(output.failure_summary());
    }
    match validate_image(target) {
        Ok(detail) => CheckOutcome::pass(detail),
        Err(detail) => CheckOutcome::fail(detail),
    }
}

// ============================================================================
// Checks
// ============================================================================

fn hold_freeze(ctx: &CheckContext<'_>) -> Option<BackgroundProcess> {
    if !ctx.options.freeze_during_capture {
        return None;
    }
    let program = ctx.program("hyprpicker")?;
    match ctx
        .runner
        .spawn_background(&Invocation::new(program, ["-r", "-z"]))
    {
        Ok(guard) => {
            if guard.pid().is_some() {
                std::thread::sleep(FREEZE_SETTLE);
            }
            Some(guard)
        }
        Err(e) => {
            warn!(error = %e, "freeze helper failed to start, capturing without it");
            None
        }
    }
}

fn capture(ctx: &CheckContext<'_>) -> CheckOutcome {
    let Some(grim) = ctx.program("grim") else {
        return CheckOutcome::not_installed("grim");
    };
    let target = ctx.artifact("capture.png");
    let _freeze = hold_freeze(ctx);
    capture_into(
        ctx,
        Invocation::new(grim, [target.display().to_string()]),
        &target,
    )
}

fn area_selection(ctx: &CheckContext<'_>) -> CheckOutcome {
    let Some(slurp) = ctx.program("slurp") else {
        return CheckOutcome::not_installed("slurp");
    };
    match ctx.run(Invocation::new(slurp, ["-h"])) {
        Ok(output) if output.timed_out => CheckOutcome::fail(output.failure_summary()),
        Ok(output) if output.success() || !output.combined_text().trim().is_empty() => {
            CheckOutcome::pass("responds to -h")
        }
        Ok(output) => CheckOutcome::fail(output.failure_summary()),
        Err(e) => CheckOutcome::fail(e),
    }
}

fn clipboard(ctx: &CheckContext<'_>) -> CheckOutcome {
    let Some(wl_copy) = ctx.program("wl-copy") else {
        return CheckOutcome::not_installed("wl-copy");
    };
    let token = format!("{}{}", CLIPBOARD_TOKEN_PREFIX, uuid::Uuid::new_v4().simple());
    let copy = Invocation::new(wl_copy, std::iter::empty::<String>()).with_stdin(token.clone());
    match ctx.run(copy) {
        Ok(output) if output.success() => {}
        Ok(output) => return CheckOutcome::fail(format!("wl-copy: {}", output.failure_summary())),
        Err(e) => return CheckOutcome::fail(e),
    }

    if !ctx.snapshot.has_feature("wl-copy", "supports-read-back") {
        return CheckOutcome::pass("token copied (no wl-paste for read-back)");
    }
    match ctx.run(Invocation::new("wl-paste", ["--no-newline"])) {
        Ok(output) if output.success() && output.stdout == token.as_bytes() => {
            CheckOutcome::pass("token copied and read back")
        }
        Ok(output) if output.success() => {
            debug!(got = %output.stdout_str(), "clipboard read-back mismatch");
            CheckOutcome::fail("read-back did not match the copied token")
        }
        Ok(output) => CheckOutcome::fail(format!("wl-paste: {}", output.failure_summary())),
        Err(e) => CheckOutcome::fail(e),
    }
}

fn geometry_capture(ctx: &CheckContext<'_>) -> CheckOutcome {
    let Some(grim) = ctx.program("grim") else {
        return CheckOutcome::not_installed("grim");
    };
    if !ctx.snapshot.has_feature("grim", "supports-geometry-flag") {
        return CheckOutcome::skip("grim does not advertise -g");
    }
    let target = ctx.artifact("geometry.png");
    capture_into(
        ctx,
        Invocation::new(grim, ["-g".to_string(), GEOMETRY.to_string(), target.display().to_string()]),
        &target,
    )
}

fn annotation_tool(ctx: &CheckContext<'_>) -> Result<(&'static str, String), CheckOutcome> {
    let candidates: &[&'static str] = match ctx.options.annotation {
        AnnotationPreference::Auto => &["satty", "swappy"],
        AnnotationPreference::Satty => &["satty"],
        AnnotationPreference::Swappy => &["swappy"],
    };
    candidates
        .iter()
        .find_map(|tool| ctx.program(tool).map(|program| (*tool, program)))
        .ok_or_else(|| CheckOutcome::not_installed(&candidates.join(" or ")))
}

fn annotation(ctx: &CheckContext<'_>) -> CheckOutcome {
    let (tool, program) = match annotation_tool(ctx) {
        Ok(found) => found,
        Err(outcome) => return outcome,
    };
    match ctx.run(Invocation::new(program, ["--help"])) {
        Ok(output) if !output.timed_out && (output.success() || !output.combined_text().trim().is_empty()) => {
            CheckOutcome::pass(format!("{} responds to --help", tool))
        }
        Ok(output) => CheckOutcome::fail(format!("{}: {}", tool, output.failure_summary())),
        Err(e) => CheckOutcome::fail(e),
    }
}

fn ocr(ctx: &CheckContext<'_>) -> CheckOutcome {
    let (Some(magick), Some(tesseract)) = (ctx.program("imagemagick"), ctx.program("tesseract")) else {
        return CheckOutcome::skip("needs both imagemagick and tesseract");
    };
    let image = ctx.artifact("ocr.png");
    let render = Invocation::new(
        magick,
        [
            "-size", "360x100", "xc:white", "-fill", "black", "-pointsize", "48",
            "-annotate", "+20+70", OCR_TEXT,
        ]
        .iter()
        .map(|s| s.to_string())
        .chain([image.display().to_string()]),
    );
    match capture_into(ctx, render, &image) {
        CheckOutcome { status: CheckStatus::Pass, .. } => {}
        failed => {
            return CheckOutcome::fail(format!("rendering test image: {}", failed.detail))
        }
    }

    let output = match ctx.run(Invocation::new(
        tesseract,
        [image.display().to_string(), "stdout".to_string()],
    )) {
        Ok(output) if output.success() => output,
        Ok(output) => return CheckOutcome::fail(format!("tesseract: {}", output.failure_summary())),
        Err(e) => return CheckOutcome::fail(e),
    };
    let recognised: String = output
        .stdout_str()
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect::<String>()
        .to_ascii_uppercase();
    if recognised.contains(OCR_TEXT) {
        CheckOutcome::pass("rendered text recognised")
    } else {
        CheckOutcome::warn(format!("expected {:?}, recognised {:?}", OCR_TEXT, recognised))
    }
}
