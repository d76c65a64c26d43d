use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One monitored URL plus its extraction configuration.
#[derive(Debug, Clone)]
pub struct Target {
    pub url: String,
    /// Human-readable title; defaults to the URL.
    pub title: String,
    /// CSS selector narrowing the page to the fragment of interest.
    pub selector: Option<String>,
    /// Extraction pattern; only its first match is kept.
    pub pattern: Option<Regex>,
    /// Content depends on JavaScript, so prefer the headless renderer.
    pub dynamic_data: bool,
}

impl Target {
    /// A plain target with no selector, pattern or rendering.
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            selector: None,
            pattern: None,
            dynamic_data: false,
        }
    }

    /// Filesystem key derived from the title.
    pub fn key(&self) -> String {
        sanitize_key(&self.title)
    }
}

/// Persisted per-target state, keyed by URL in [`MonitorState`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetState {
    /// SHA-256 of the canonical text stored at `last_snapshot`.
    pub hash: String,
    pub last_checked_at: DateTime<Utc>,
    pub last_changed_at: DateTime<Utc>,
    /// Canonical (`.normalized.txt`) snapshot of the last observed change.
    pub last_snapshot: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renderer_failed_at: Option<DateTime<Utc>>,
}

/// The whole persisted state map, written once per cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitorState {
    #[serde(default)]
    pub urls: BTreeMap<String, TargetState>,
}

/// Type-specific payload of an [`Event`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum EventKind {
    New {
        snapshot: PathBuf,
    },
    Changed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        previous: Option<PathBuf>,
        current: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        diff: Option<PathBuf>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },
    Error {
        message: String,
    },
    Removed {
        key: String,
    },
    Fatal {
        message: String,
    },
}

impl EventKind {
    pub fn label(&self) -> &'static str {
        match self {
            EventKind::New { .. } => "NEW",
            EventKind::Changed { .. } => "CHANGED",
            EventKind::Error { .. } => "ERROR",
            EventKind::Removed { .. } => "REMOVED",
            EventKind::Fatal { .. } => "FATAL",
        }
    }
}

/// An entry of the capped event feed (`events.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Event {
    pub fn for_target(timestamp: DateTime<Utc>, target: &Target, kind: EventKind) -> Self {
        Self {
            timestamp,
            kind,
            title: Some(target.title.clone()),
            url: Some(target.url.clone()),
        }
    }

    pub fn fatal(timestamp: DateTime<Utc>, message: impl Into<String>) -> Self {
        Self {
            timestamp,
            kind: EventKind::Fatal {
                message: message.into(),
            },
            title: None,
            url: None,
        }
    }
}

/// Legacy `changes.log` line: `{ts} {TYPE} [{title}] {url} {details}`.
impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}",
            self.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            self.kind.label()
        )?;
        if let Some(title) = &self.title {
            write!(f, " [{title}]")?;
        }
        if let Some(url) = &self.url {
            write!(f, " {url}")?;
        }
        match &self.kind {
            EventKind::New { snapshot } => write!(f, " snapshot={}", snapshot.display()),
            EventKind::Changed {
                previous,
                current,
                diff,
                ..
            } => {
                if let Some(previous) = previous {
                    write!(f, " previous={}", previous.display())?;
                }
                write!(f, " current={}", current.display())?;
                if let Some(diff) = diff {
                    write!(f, " diff={}", diff.display())?;
                }
                Ok(())
            }
            EventKind::Error { message } | EventKind::Fatal { message } => {
                write!(f, " {message}")
            }
            EventKind::Removed { .. } => Ok(()),
        }
    }
}

/// One detected change handed to the notifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotice {
    pub title: String,
    pub url: String,
    pub content: String,
}

/// Result of summarizing a diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    /// Summary as returned by the model.
    pub text: String,
    /// Single-line rendition with Markdown emphasis removed.
    pub processed: String,
    /// The input diff was cut to fit the request budget.
    pub truncated: bool,
    pub attempts: u32,
}

/// Compute a SHA-256 hash of a string, returned as 64-char hex.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Map a title to a filesystem key: every char outside `[A-Za-z0-9]`
/// becomes `_`.
///
/// Not injective: `"a.b"` and `"a-b"` share the key `"a_b"`.
pub fn sanitize_key(title: &str) -> String {
    title
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Filesystem-safe timestamp used in snapshot and diff file names.
///
/// Example: `2026-10-18T10-42-00-123Z`
pub fn file_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H-%M-%S-%3fZ").to_string()
}
