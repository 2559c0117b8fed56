//! Line-preserving model of an SU2 `.cfg` file.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use tracing::debug;

use super::value::ConfigValue;
use crate::error::Su2Error;
use crate::fs_util::write_atomic;

/// Characters that start a comment running to end of line.
pub const COMMENT_MARKERS: [char; 2] = ['%', '#'];

#[derive(Debug, Clone)]
enum LineKind {
    /// Blank, comment-only, or unrecognized text; kept verbatim.
    Verbatim,
    /// `KEY= VALUE` line. Offsets are byte positions into `Line::raw`.
    Entry {
        key: String,
        value_start: usize,
        value_end: usize,
    },
}

#[derive(Debug, Clone)]
struct Line {
    /// Full line text including its terminator.
    raw: String,
    kind: LineKind,
}

impl Line {
    fn parse(raw: String) -> Self {
        let kind = classify(&raw);
        Self { raw, kind }
    }

    fn key(&self) -> Option<&str> {
        match &self.kind {
            LineKind::Entry { key, .. } => Some(key),
            LineKind::Verbatim => None,
        }
    }

    fn value(&self) -> Option<&str> {
        match &self.kind {
            LineKind::Entry {
                value_start,
                value_end,
                ..
            } => Some(&self.raw[*value_start..*value_end]),
            LineKind::Verbatim => None,
        }
    }
}

/// Editable SU2 configuration.
///
/// Holds the ordered raw lines of the file plus an index from key to the line
/// that defines it. Lines that are never [`set`](Self::set) serialize back
/// byte-for-byte.
///
/// Duplicate keys are kept as-is: the last definition wins for [`get`](Self::get),
/// and [`set`](Self::set) rewrites only that last definition.
#[derive(Debug, Clone)]
pub struct ConfigDocument {
    lines: Vec<Line>,
    index: HashMap<String, usize>,
    eol: &'static str,
}

impl Default for ConfigDocument {
    fn default() -> Self {
        Self {
            lines: Vec::new(),
            index: HashMap::new(),
            eol: "\n",
        }
    }
}

impl ConfigDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse config text. Never fails: unknown or malformed lines are preserved.
    pub fn parse(text: &str) -> Self {
        let eol = if text.contains("\r\n") { "\r\n" } else { "\n" };
        let lines: Vec<Line> = text
            .split_inclusive('\n')
            .map(|l| Line::parse(l.to_string()))
            .collect();
        let mut doc = Self {
            lines,
            index: HashMap::new(),
            eol,
        };
        doc.rebuild_index();
        doc
    }

    /// Parse raw file bytes; only invalid UTF-8 is rejected.
    pub fn from_bytes(bytes: &[u8], origin: &Path) -> Result<Self, Su2Error> {
        let text = std::str::from_utf8(bytes).map_err(|e| {
            Su2Error::parse(origin, format!("invalid UTF-8 at byte {}", e.valid_up_to()))
        })?;
        Ok(Self::parse(text))
    }

    /// Read and parse a config file.
    pub fn load(path: &Path) -> Result<Self, Su2Error> {
        let bytes = std::fs::read(path).map_err(|e| Su2Error::storage(path, e))?;
        let doc = Self::from_bytes(&bytes, path)?;
        debug!(path = %path.display(), keys = doc.index.len(), "Loaded config");
        Ok(doc)
    }

    /// Write the full document to `path` atomically.
    pub fn save(&self, path: &Path) -> Result<(), Su2Error> {
        write_atomic(path, self.to_text().as_bytes())?;
        debug!(path = %path.display(), lines = self.lines.len(), "Saved config");
        Ok(())
    }

    /// Typed value for `key`, if defined.
    pub fn get(&self, key: &str) -> Option<ConfigValue> {
        self.get_raw(key).map(ConfigValue::parse)
    }

    /// Raw value text for `key` with surrounding whitespace and comment removed.
    pub fn get_raw(&self, key: &str) -> Option<&str> {
        self.index
            .get(key)
            .and_then(|&idx| self.lines[idx].value())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Set `key` to `value`.
    ///
    /// An existing definition has only its value portion replaced; leading
    /// whitespace, the gap before any trailing comment, the comment, and the
    /// line terminator are kept. A new key is appended as `KEY= VALUE`.
    pub fn set(&mut self, key: &str, value: impl Into<ConfigValue>) -> Result<(), Su2Error> {
        validate_key(key)?;
        let text = value.into().to_string();
        if text.contains(['\n', '\r']) {
            return Err(Su2Error::InvalidParams(format!(
                "value for {key} must be a single line"
            )));
        }

        match self.index.get(key).copied() {
            Some(idx) => self.rewrite_value(idx, &text),
            None => self.append_entry(key, &text),
        }
        Ok(())
    }

    /// Remove the defining (last) line of `key`. Earlier duplicates stay.
    pub fn remove(&mut self, key: &str) -> Result<(), Su2Error> {
        let idx = self
            .index
            .get(key)
            .copied()
            .ok_or_else(|| Su2Error::KeyNotFound(key.to_string()))?;
        self.lines.remove(idx);
        self.rebuild_index();
        Ok(())
    }

    /// Effective entries in order of each key's first appearance.
    pub fn entries(&self) -> Vec<(String, ConfigValue)> {
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(self.index.len());
        for line in &self.lines {
            if let Some(key) = line.key() {
                if seen.insert(key) {
                    if let Some(value) = self.get(key) {
                        out.push((key.to_string(), value));
                    }
                }
            }
        }
        out
    }

    /// Keys defined on more than one line.
    pub fn duplicate_keys(&self) -> Vec<String> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        let mut order = Vec::new();
        for key in self.lines.iter().filter_map(Line::key) {
            let count = counts.entry(key).or_insert(0);
            *count += 1;
            if *count == 2 {
                order.push(key.to_string());
            }
        }
        order
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().filter_map(Line::key)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// Serialize the document. Untouched lines come back byte-identical.
    pub fn to_text(&self) -> String {
        self.lines.iter().map(|l| l.raw.as_str()).collect()
    }

    fn rewrite_value(&mut self, idx: usize, text: &str) {
        let line = &mut self.lines[idx];
        let LineKind::Entry {
            value_start,
            value_end,
            ..
        } = line.kind
        else {
            return;
        };
        let rest = &line.raw[value_end..];
        // An empty value directly followed by a comment needs a separating space.
        let gap = if value_start == value_end && rest.starts_with(COMMENT_MARKERS) {
            " "
        } else {
            ""
        };
        let raw = format!("{}{}{}{}", &line.raw[..value_start], text, gap, rest);
        *line = Line::parse(raw);
    }

    fn append_entry(&mut self, key: &str, text: &str) {
        if let Some(last) = self.lines.last_mut() {
            if !last.raw.ends_with('\n') {
                last.raw.push_str(self.eol);
            }
        }
        self.lines
            .push(Line::parse(format!("{key}= {text}{}", self.eol)));
        self.index.insert(key.to_string(), self.lines.len() - 1);
    }

    fn rebuild_index(&mut self) {
        self.index.clear();
        for (idx, line) in self.lines.iter().enumerate() {
            if let Some(key) = line.key() {
                self.index.insert(key.to_string(), idx);
            }
        }
    }
}

impl std::fmt::Display for ConfigDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for line in &self.lines {
            f.write_str(&line.raw)?;
        }
        Ok(())
    }
}

fn validate_key(key: &str) -> Result<(), Su2Error> {
    let ok = !key.is_empty()
        && !key
            .chars()
            .any(|c| c.is_whitespace() || c == '=' || COMMENT_MARKERS.contains(&c));
    if ok {
        Ok(())
    } else {
        Err(Su2Error::InvalidParams(format!("invalid config key: {key:?}")))
    }
}

/// Classify one raw line (terminator included).
fn classify(raw: &str) -> LineKind {
    let body = raw
        .strip_suffix('\n')
        .map(|s| s.strip_suffix('\r').unwrap_or(s))
        .unwrap_or(raw);

    let trimmed = body.trim_start();
    if trimmed.is_empty() || trimmed.starts_with(COMMENT_MARKERS) {
        return LineKind::Verbatim;
    }
    let Some(eq) = body.find('=') else {
        return LineKind::Verbatim;
    };
    let key = body[..eq].trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return LineKind::Verbatim;
    }

    let after = eq + 1;
    let comment = find_comment(body, after).unwrap_or(body.len());
    let region = &body[after..comment];
    let (value_start, value_end) = if region.trim().is_empty() {
        // Keep one space of the original padding before an inserted value.
        let pad = region.chars().next().map_or(0, char::len_utf8);
        (after + pad, after + pad)
    } else {
        let lead = region.len() - region.trim_start().len();
        let trail = region.len() - region.trim_end().len();
        (after + lead, comment - trail)
    };

    LineKind::Entry {
        key: key.to_string(),
        value_start,
        value_end,
    }
}

/// Byte offset of the first comment marker at or after `from`, ignoring quoted text.
fn find_comment(body: &str, from: usize) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (offset, c) in body[from..].char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '"' || c == '\'' => quote = Some(c),
            None if COMMENT_MARKERS.contains(&c) => return Some(from + offset),
            None => {}
        }
    }
    None
}
