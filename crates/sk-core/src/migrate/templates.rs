//! Default configuration templates for annotation tools.
//!
//! `{screenshot_dir}` is substituted at render time.

use std::path::Path;

pub const SATTY_TEMPLATE: &str = r#"[general]
fullscreen = false
early-exit = true
initial-tool = "brush"
copy-command = "wl-copy"
annotation-size-factor = 1
output-filename = "{screenshot_dir}/satty-%Y-%m-%d_%H-%M-%S.png"
save-after-copy = false
default-hide-toolbars = false
actions-on-enter = ["save-to-clipboard"]
no-window-decoration = false

[font]
family = "sans-serif"
style = "Bold"
"#;

pub const SWAPPY_TEMPLATE: &str = "[Default]
save_dir={screenshot_dir}
save_filename_format=swappy-%Y%m%d-%H%M%S.png
show_panel=false
line_size=5
text_size=20
text_font=sans-serif
paint_mode=brush
early_exit=false
fill_shape=false
auto_save=false
transparent=false
transparency=50
";

/// Fallback when no screenshot directory is configured.
pub const DEFAULT_SCREENSHOT_DIR: &str = "~/Pictures/Screenshots";

/// Substitute placeholders in a template.
pub fn render(template: &str, screenshot_dir: Option<&Path>) -> String {
    let dir = screenshot_dir
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| DEFAULT_SCREENSHOT_DIR.to_string());
    template.replace("{screenshot_dir}", dir.trim_end_matches('/'))
}
