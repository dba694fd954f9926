//! Line-preserving editor for sectioned `key = value` documents.
//!
//! Only lines touched by an edit change; comments, ordering and spacing of
//! everything else survive. All edits are idempotent: applying the same list
//! twice yields the same text as applying it once.
//!
//! TOML values may span lines (arrays, inline tables, triple-quoted
//! strings). Those trailing lines belong to the entry that opened them and
//! are never read as headers or keys.

use super::rules::{ConfigDialect, ConfigEdit};

#[derive(Debug, Clone, PartialEq, Eq)]
enum LineKind {
    Other,
    Section(String),
    Entry(String),
    /// Tail of a value opened on an earlier line.
    Continuation,
}

/// `line` up to a trailing `#` comment. A quoted `#` is kept.
fn strip_comment(line: &str) -> &str {
    let mut quote = None;
    for (i, b) in line.bytes().enumerate() {
        match (quote, b) {
            (None, b'"' | b'\'') => quote = Some(b),
            (Some(q), _) if b == q => quote = None,
            (None, b'#') => return &line[..i],
            _ => {}
        }
    }
    line
}

fn classify(line: &str) -> LineKind {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
        return LineKind::Other;
    }
    let code = strip_comment(trimmed).trim_end();
    if code.starts_with('[') && code.ends_with(']') && code.len() >= 2 {
        return LineKind::Section(code[1..code.len() - 1].trim().to_string());
    }
    match trimmed.split_once('=') {
        Some((key, _)) => LineKind::Entry(key.trim().to_string()),
        None => LineKind::Other,
    }
}

/// Brackets and triple-quoted strings still open at the end of a line.
#[derive(Debug, Clone, Copy, Default)]
struct OpenValue {
    depth: usize,
    /// Quote byte of an unterminated `"""` or `'''` string.
    string: Option<u8>,
}

impl OpenValue {
    fn is_open(&self) -> bool {
        self.depth > 0 || self.string.is_some()
    }

    fn feed(&mut self, text: &str) {
        let bytes = text.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            if let Some(q) = self.string {
                if bytes[i..].starts_with(&[q, q, q]) {
                    self.string = None;
                    i += 3;
                } else if q == b'"' && bytes[i] == b'\\' {
                    i += 2;
                } else {
                    i += 1;
                }
                continue;
            }
            match bytes[i] {
                q @ (b'"' | b'\'') if bytes[i..].starts_with(&[q, q, q]) => {
                    self.string = Some(q);
                    i += 3;
                }
                q @ (b'"' | b'\'') => {
                    i += 1;
                    while i < bytes.len() && bytes[i] != q {
                        i += if q == b'"' && bytes[i] == b'\\' { 2 } else { 1 };
                    }
                    i += 1;
                }
                b'#' => break,
                b'[' | b'{' => {
                    self.depth += 1;
                    i += 1;
                }
                b']' | b'}' => {
                    self.depth = self.depth.saturating_sub(1);
                    i += 1;
                }
                _ => i += 1,
            }
        }
    }
}

fn sections_of(kinds: &[LineKind]) -> Vec<String> {
    let mut current = String::new();
    kinds
        .iter()
        .map(|kind| {
            if let LineKind::Section(name) = kind {
                current = name.clone();
            }
            current.clone()
        })
        .collect()
}

/// One past the last line of the entry starting at `i`.
fn entry_end(kinds: &[LineKind], i: usize) -> usize {
    i + 1
        + kinds[i + 1..]
            .iter()
            .take_while(|k| **k == LineKind::Continuation)
            .count()
}

/// A parsed configuration document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigDocument {
    lines: Vec<String>,
    dialect: ConfigDialect,
}

impl ConfigDocument {
    pub fn parse(text: &str, dialect: ConfigDialect) -> Self {
        Self {
            lines: text.lines().map(str::to_string).collect(),
            dialect,
        }
    }

    /// Render with `\n` line endings and a trailing newline.
    pub fn render(&self) -> String {
        if self.lines.is_empty() {
            return String::new();
        }
        let mut out = self.lines.join("\n");
        out.push('\n');
        out
    }

    fn kinds(&self) -> Vec<LineKind> {
        let multiline = self.dialect == ConfigDialect::Toml;
        let mut open = OpenValue::default();
        self.lines
            .iter()
            .map(|line| {
                if open.is_open() {
                    open.feed(line);
                    return LineKind::Continuation;
                }
                let kind = classify(line);
                if multiline && matches!(kind, LineKind::Entry(_)) {
                    if let Some((_, value)) = line.split_once('=') {
                        open.feed(value);
                    }
                }
                kind
            })
            .collect()
    }

    pub fn has_section(&self, section: &str) -> bool {
        section.is_empty() || self.kinds().contains(&LineKind::Section(section.to_string()))
    }

    fn entry_index(&self, kinds: &[LineKind], section: &str, key: &str) -> Option<usize> {
        let sections = sections_of(kinds);
        kinds.iter().enumerate().position(|(i, kind)| {
            sections[i] == section && matches!(kind, LineKind::Entry(k) if k == key)
        })
    }

    pub fn contains_key(&self, section: &str, key: &str) -> bool {
        self.entry_index(&self.kinds(), section, key).is_some()
    }

    /// Raw value text of a key (trimmed, unparsed). Multi-line values keep
    /// their inner newlines.
    pub fn get(&self, section: &str, key: &str) -> Option<String> {
        let kinds = self.kinds();
        let i = self.entry_index(&kinds, section, key)?;
        let (_, first) = self.lines[i].split_once('=')?;
        let mut value = first.trim().to_string();
        for line in &self.lines[i + 1..entry_end(&kinds, i)] {
            value.push('\n');
            value.push_str(line);
        }
        Some(value.trim().to_string())
    }

    fn entry_line(&self, key: &str, value: &str) -> String {
        match self.dialect {
            ConfigDialect::Toml => format!("{} = {}", key, value),
            ConfigDialect::Ini => format!("{}={}", key, value),
        }
    }

    /// Apply one edit; returns whether the text changed.
    pub fn apply(&mut self, edit: &ConfigEdit) -> bool {
        match *edit {
            ConfigEdit::EnsureKey {
                section,
                key,
                value,
            } => self.ensure_key(section, key, value),
            ConfigEdit::RenameKey { from, to } => self.rename_key(from, to),
            ConfigEdit::RemoveKey { key } => self.remove_key(key),
        }
    }

    /// Apply edits in order; returns how many changed the text.
    pub fn apply_all(&mut self, edits: &[ConfigEdit]) -> usize {
        edits.iter().filter(|edit| self.apply(edit)).count()
    }

    /// Insertion point after the last entry in `range`, or `fallback`.
    fn after_last_entry(kinds: &[LineKind], start: usize, end: usize, fallback: usize) -> usize {
        kinds[start..end]
            .iter()
            .rposition(|k| matches!(k, LineKind::Entry(_)))
            .map(|i| entry_end(kinds, start + i))
            .unwrap_or(fallback)
    }

    fn ensure_key(&mut self, section: &str, key: &str, value: &str) -> bool {
        let kinds = self.kinds();
        if self.entry_index(&kinds, section, key).is_some() {
            return false;
        }
        let line = self.entry_line(key, value);
        let is_header = |k: &LineKind| matches!(k, LineKind::Section(_));

        if section.is_empty() {
            // End of the preamble: after its last entry, or at the top.
            let first_header = kinds.iter().position(is_header).unwrap_or(kinds.len());
            let at = Self::after_last_entry(&kinds, 0, first_header, 0);
            self.lines.insert(at, line);
            return true;
        }

        let header = LineKind::Section(section.to_string());
        match kinds.iter().rposition(|k| *k == header) {
            Some(start) => {
                let end = kinds[start + 1..]
                    .iter()
                    .position(is_header)
                    .map(|i| start + 1 + i)
                    .unwrap_or(kinds.len());
                let at = Self::after_last_entry(&kinds, start + 1, end, start + 1);
                self.lines.insert(at, line);
            }
            None => {
                if self.lines.last().map(|l| !l.trim().is_empty()).unwrap_or(false) {
                    self.lines.push(String::new());
                }
                self.lines.push(format!("[{}]", section));
                self.lines.push(line);
            }
        }
        true
    }

    fn rename_key(&mut self, from: &str, to: &str) -> bool {
        if from == to {
            return false;
        }
        let target = LineKind::Entry(from.to_string());
        let mut changed = false;
        loop {
            let kinds = self.kinds();
            let Some(i) = kinds.iter().position(|k| *k == target) else {
                break;
            };
            changed = true;
            let section = sections_of(&kinds)[i].clone();
            if self.entry_index(&kinds, &section, to).is_some() {
                self.lines.drain(i..entry_end(&kinds, i));
                continue;
            }
            let raw = &self.lines[i];
            let indent = raw.len() - raw.trim_start().len();
            let renamed = format!("{}{}{}", &raw[..indent], to, &raw[indent + from.len()..]);
            self.lines[i] = renamed;
        }
        changed
    }

    fn remove_key(&mut self, key: &str) -> bool {
        let mut dropping = false;
        let keep: Vec<bool> = self
            .kinds()
            .iter()
            .map(|kind| {
                dropping = match kind {
                    LineKind::Entry(name) => name == key,
                    LineKind::Continuation => dropping,
                    _ => false,
                };
                !dropping
            })
            .collect();
        let before = self.lines.len();
        let mut flags = keep.into_iter();
        self.lines.retain(|_| flags.next().unwrap_or(true));
        self.lines.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SATTY_OLD: &str = "# satty config\n[general]\nfullscreen = false\ninit-tool = \"arrow\"\n\n[font]\nfamily = \"Roboto\"\n";

    #[test]
    fn rename_preserves_value_and_indent() {
        let mut doc = ConfigDocument::parse("[general]\n  init-tool = \"arrow\"\n", ConfigDialect::Toml);
        assert!(doc.apply(&ConfigEdit::RenameKey {
            from: "init-tool",
            to: "initial-tool"
        }));
        assert_eq!(doc.render(), "[general]\n  initial-tool = \"arrow\"\n");
    }

    #[test]
    fn rename_drops_deprecated_when_replacement_exists() {
        let mut doc = ConfigDocument::parse(
            "[general]\ninit-tool = \"arrow\"\ninitial-tool = \"brush\"\n",
            ConfigDialect::Toml,
        );
        assert!(doc.apply(&ConfigEdit::RenameKey {
            from: "init-tool",
            to: "initial-tool"
        }));
        assert_eq!(doc.render(), "[general]\ninitial-tool = \"brush\"\n");
    }

    #[test]
    fn rename_in_other_section_is_independent() {
        let mut doc = ConfigDocument::parse(
            "[a]\nold = 1\n[b]\nnew = 2\nold = 3\n",
            ConfigDialect::Toml,
        );
        doc.apply(&ConfigEdit::RenameKey { from: "old", to: "new" });
        assert_eq!(doc.render(), "[a]\nnew = 1\n[b]\nnew = 2\n");
    }

    #[test]
    fn ensure_inserts_after_last_entry_of_section() {
        let mut doc = ConfigDocument::parse(SATTY_OLD, ConfigDialect::Toml);
        assert!(doc.apply(&ConfigEdit::EnsureKey {
            section: "general",
            key: "no-window-decoration",
            value: "false",
        }));
        assert_eq!(
            doc.render(),
            "# satty config\n[general]\nfullscreen = false\ninit-tool = \"arrow\"\nno-window-decoration = false\n\n[font]\nfamily = \"Roboto\"\n"
        );
        assert_eq!(doc.get("general", "no-window-decoration").as_deref(), Some("false"));
    }

    #[test]
    fn ensure_keeps_existing_value() {
        let mut doc = ConfigDocument::parse("[Default]\nauto_save=true\n", ConfigDialect::Ini);
        assert!(!doc.apply(&ConfigEdit::EnsureKey {
            section: "Default",
            key: "auto_save",
            value: "false",
        }));
        assert_eq!(doc.get("Default", "auto_save").as_deref(), Some("true"));
    }

    #[test]
    fn ensure_creates_missing_section_in_dialect_style() {
        let mut doc = ConfigDocument::parse("[Other]\nx=1\n", ConfigDialect::Ini);
        doc.apply(&ConfigEdit::EnsureKey {
            section: "Default",
            key: "early_exit",
            value: "false",
        });
        assert_eq!(doc.render(), "[Other]\nx=1\n\n[Default]\nearly_exit=false\n");
        assert!(doc.has_section("Default"));
    }

    #[test]
    fn ensure_in_empty_section_goes_right_after_header() {
        let mut doc = ConfigDocument::parse("[general]\n\n[font]\n", ConfigDialect::Toml);
        doc.apply(&ConfigEdit::EnsureKey {
            section: "general",
            key: "k",
            value: "1",
        });
        assert_eq!(doc.render(), "[general]\nk = 1\n\n[font]\n");
    }

    #[test]
    fn ensure_in_preamble() {
        let mut doc = ConfigDocument::parse("# header\na = 1\n[s]\nb = 2\n", ConfigDialect::Toml);
        doc.apply(&ConfigEdit::EnsureKey {
            section: "",
            key: "c",
            value: "3",
        });
        assert_eq!(doc.render(), "# header\na = 1\nc = 3\n[s]\nb = 2\n");
    }

    #[test]
    fn remove_key_everywhere() {
        let mut doc = ConfigDocument::parse("[a]\nx = 1\ny = 2\n[b]\nx = 3\n", ConfigDialect::Toml);
        assert!(doc.apply(&ConfigEdit::RemoveKey { key: "x" }));
        assert!(!doc.apply(&ConfigEdit::RemoveKey { key: "x" }));
        assert_eq!(doc.render(), "[a]\ny = 2\n[b]\n");
    }

    #[test]
    fn comments_are_not_entries() {
        let doc = ConfigDocument::parse("[general]\n# init-tool = \"x\"\n; auto_save=1\n", ConfigDialect::Toml);
        assert!(!doc.contains_key("general", "init-tool"));
        assert!(!doc.contains_key("general", "auto_save"));
    }

    #[test]
    fn header_with_trailing_comment_is_a_section() {
        let mut doc = ConfigDocument::parse("[general] # main options\ninit-tool = \"arrow\"\n", ConfigDialect::Toml);
        assert!(doc.has_section("general"));
        doc.apply_all(crate::migrate::rules::SATTY_RULES[0].edits);
        assert_eq!(
            doc.render(),
            "[general] # main options\ninitial-tool = \"arrow\"\nactions-on-enter = [\"save-to-clipboard\"]\nno-window-decoration = false\n"
        );
    }

    #[test]
    fn ensure_goes_after_a_multiline_array() {
        let text = "[general]\ninit-tool = \"arrow\"\nactions-on-enter = [\n  \"save-to-clipboard\",\n]\n";
        let mut doc = ConfigDocument::parse(text, ConfigDialect::Toml);
        assert!(doc.contains_key("general", "actions-on-enter"));
        assert_eq!(doc.apply_all(crate::migrate::rules::SATTY_RULES[0].edits), 2);
        assert_eq!(
            doc.render(),
            "[general]\ninitial-tool = \"arrow\"\nactions-on-enter = [\n  \"save-to-clipboard\",\n]\nno-window-decoration = false\n"
        );
        assert_eq!(
            doc.get("general", "actions-on-enter").as_deref(),
            Some("[\n  \"save-to-clipboard\",\n]")
        );
    }

    #[test]
    fn array_items_are_not_headers_or_keys() {
        let text = "[general]\nlist = [\n  [\"a\"],\n  \"x = 1\",\n]\nnote = \"\"\"\n[fake]\ny = 2\n\"\"\"\n";
        let doc = ConfigDocument::parse(text, ConfigDialect::Toml);
        assert!(!doc.has_section("fake"));
        assert!(!doc.has_section("\"a\""));
        assert!(!doc.contains_key("general", "y"));
        assert!(!doc.contains_key("general", "\"x"));
        assert!(doc.contains_key("general", "note"));
    }

    #[test]
    fn remove_and_rename_carry_continuation_lines() {
        let text = "[general]\nold = [\n  1,\n]\nnew = 2\nkeep = 3\n";
        let mut doc = ConfigDocument::parse(text, ConfigDialect::Toml);
        assert!(doc.apply(&ConfigEdit::RenameKey { from: "old", to: "new" }));
        assert_eq!(doc.render(), "[general]\nnew = 2\nkeep = 3\n");

        let mut doc = ConfigDocument::parse("[a]\nx = {\n}\ny = 1\n", ConfigDialect::Toml);
        assert!(doc.apply(&ConfigEdit::RemoveKey { key: "x" }));
        assert_eq!(doc.render(), "[a]\ny = 1\n");
    }

    #[test]
    fn quoted_hash_does_not_end_header() {
        assert_eq!(strip_comment("[\"a#b\"] # c"), "[\"a#b\"] ");
        assert_eq!(classify("[\"a#b\"] # c"), LineKind::Section("\"a#b\"".to_string()));
    }

    #[test]
    fn apply_all_is_idempotent_on_fixture() {
        let edits = crate::migrate::rules::SATTY_RULES[0].edits;
        let mut once = ConfigDocument::parse(SATTY_OLD, ConfigDialect::Toml);
        assert_eq!(once.apply_all(edits), 3);
        let first = once.render();
        let mut twice = ConfigDocument::parse(&first, ConfigDialect::Toml);
        assert_eq!(twice.apply_all(edits), 0);
        assert_eq!(twice.render(), first);
    }
}
