//! Line-level diff between two canonical texts, and the cleaner that
//! prepares a diff for summarization.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

/// One reported line of a diff. Unchanged lines are never reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffLine {
    Removed(String),
    Added(String),
}

impl fmt::Display for DiffLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiffLine::Removed(line) => write!(f, "-{line}"),
            DiffLine::Added(line) => write!(f, "+{line}"),
        }
    }
}

/// Positional greedy diff.
///
/// Both cursors advance together; equal lines are skipped, a mismatch
/// reports the old line as removed and the new one as added. Once one
/// side runs out the rest of the other is reported wholesale. This is not
/// a minimal edit script: a line that merely shifted position is reported
/// as a replacement.
pub fn diff_lines(old: &str, new: &str) -> Vec<DiffLine> {
    let old_lines: Vec<&str> = old.split('\n').collect();
    let new_lines: Vec<&str> = new.split('\n').collect();
    let mut out = Vec::new();

    let mut i = 0;
    let mut j = 0;
    while i < old_lines.len() || j < new_lines.len() {
        match (old_lines.get(i), new_lines.get(j)) {
            (Some(a), Some(b)) if a == b => {}
            (Some(a), Some(b)) => {
                out.push(DiffLine::Removed((*a).to_string()));
                out.push(DiffLine::Added((*b).to_string()));
            }
            (Some(a), None) => out.push(DiffLine::Removed((*a).to_string())),
            (None, Some(b)) => out.push(DiffLine::Added((*b).to_string())),
            (None, None) => break,
        }
        i += 1;
        j += 1;
    }
    out
}

/// Render diff lines as the on-disk diff file body.
pub fn render_diff(lines: &[DiffLine]) -> String {
    lines
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

static ANCHOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?is)<a\s+[^>]*href="([^"]+)"[^>]*>(.*?)</a>"#).unwrap());
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Flatten a raw diff to plain prose for summarization.
///
/// Links become `text (url)`, remaining tags are dropped, the common
/// entities are decoded and whitespace is collapsed to single spaces.
pub fn clean_diff(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }
    let cleaned = ANCHOR.replace_all(raw, "$2 ($1)");
    let cleaned = TAG.replace_all(&cleaned, " ");
    let cleaned = cleaned
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">");
    WHITESPACE.replace_all(&cleaned, " ").trim().to_string()
}
