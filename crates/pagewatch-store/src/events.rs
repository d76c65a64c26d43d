use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeDelta, Utc};
use pagewatch_core::error::AppError;
use pagewatch_core::models::{Event, EventKind};

use crate::atomic::write_atomic;
use crate::config::StoreConfig;

/// Capped JSON event feed plus the line-oriented `changes.log`.
///
/// Both files are rewritten wholesale on every append.
#[derive(Debug, Clone)]
pub struct EventLog {
    events_path: PathBuf,
    legacy_path: PathBuf,
    cap: usize,
    window: TimeDelta,
}

impl EventLog {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            events_path: config.events_path(),
            legacy_path: config.legacy_log_path(),
            cap: config.event_cap,
            window: config.log_window,
        }
    }

    /// Events currently in the feed, oldest first.
    pub fn read(&self) -> Result<Vec<Event>, AppError> {
        match fs::read_to_string(&self.events_path) {
            Ok(text) => serde_json::from_str(&text).map_err(|e| {
                AppError::Persistence(format!("corrupt {}: {e}", self.events_path.display()))
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(AppError::Persistence(format!(
                "cannot read {}: {e}",
                self.events_path.display()
            ))),
        }
    }

    pub fn append(&self, event: &Event) -> Result<(), AppError> {
        self.append_at(event, Utc::now())
    }

    pub(crate) fn append_at(&self, event: &Event, now: DateTime<Utc>) -> Result<(), AppError> {
        let mut events = self.read().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Starting a fresh event feed");
            Vec::new()
        });
        events.push(event.clone());
        self.write_events(events)?;
        self.append_legacy_line(&event.to_string(), now)
    }

    /// Seed `events.json` from `changes.log` when only the latter exists.
    /// Returns the number of migrated events.
    pub fn migrate_legacy(&self) -> Result<usize, AppError> {
        if self.events_path.exists() {
            return Ok(0);
        }
        let text = match fs::read_to_string(&self.legacy_path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(AppError::Persistence(format!(
                    "cannot read {}: {e}",
                    self.legacy_path.display()
                )));
            }
        };

        let events: Vec<Event> = text.lines().filter_map(parse_legacy_line).collect();
        let migrated = events.len().min(self.cap);
        self.write_events(events)?;
        tracing::info!(events = migrated, path = %self.events_path.display(), "Migrated legacy change log");
        Ok(migrated)
    }

    fn write_events(&self, mut events: Vec<Event>) -> Result<(), AppError> {
        if events.len() > self.cap {
            events.drain(..events.len() - self.cap);
        }
        let mut json = serde_json::to_string_pretty(&events)?;
        json.push('\n');
        write_atomic(&self.events_path, json.as_bytes())
    }

    fn append_legacy_line(&self, line: &str, now: DateTime<Utc>) -> Result<(), AppError> {
        let existing = match fs::read_to_string(&self.legacy_path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
            Err(e) => {
                return Err(AppError::Persistence(format!(
                    "cannot read {}: {e}",
                    self.legacy_path.display()
                )));
            }
        };

        let cutoff = now - self.window;
        let mut out = String::with_capacity(existing.len() + line.len() + 1);
        for kept in existing.lines().filter(|l| line_is_recent(l, cutoff)) {
            out.push_str(kept);
            out.push('\n');
        }
        out.push_str(line);
        out.push('\n');
        write_atomic(&self.legacy_path, out.as_bytes())
    }

    pub fn events_path(&self) -> &Path {
        &self.events_path
    }
}

fn line_is_recent(line: &str, cutoff: DateTime<Utc>) -> bool {
    line.split_once(' ')
        .and_then(|(ts, _)| DateTime::parse_from_rfc3339(ts).ok())
        .is_some_and(|ts| ts.with_timezone(&Utc) >= cutoff)
}

/// Parse a `changes.log` line: `{ts} {TYPE} [{title}] {url} {details}`,
/// or `{ts} FATAL {message}`. Unrecognized lines yield `None`.
pub fn parse_legacy_line(line: &str) -> Option<Event> {
    let (ts, rest) = line.trim_end().split_once(' ')?;
    let timestamp = DateTime::parse_from_rfc3339(ts).ok()?.with_timezone(&Utc);
    let (label, rest) = rest.split_once(' ').unwrap_or((rest, ""));

    if label == "FATAL" {
        return Some(Event::fatal(timestamp, rest));
    }

    let (title, rest) = rest.strip_prefix('[')?.split_once("] ")?;
    let (url, details) = rest.split_once(' ').unwrap_or((rest, ""));

    let kind = match label {
        "NEW" => EventKind::New {
            snapshot: field(details, "snapshot")?,
        },
        "CHANGED" => EventKind::Changed {
            previous: field(details, "previous"),
            current: field(details, "current")?,
            diff: field(details, "diff"),
            summary: None,
        },
        "ERROR" => EventKind::Error {
            message: details.to_string(),
        },
        "REMOVED" => EventKind::Removed {
            key: title.to_string(),
        },
        _ => return None,
    };

    Some(Event {
        timestamp,
        kind,
        title: Some(title.to_string()),
        url: Some(url.to_string()),
    })
}

fn field(details: &str, name: &str) -> Option<PathBuf> {
    details
        .split(' ')
        .find_map(|token| token.strip_prefix(name)?.strip_prefix('='))
        .map(PathBuf::from)
}
