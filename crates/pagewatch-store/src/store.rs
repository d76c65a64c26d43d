use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use pagewatch_core::differ::{diff_lines, render_diff};
use pagewatch_core::error::{AppError, BestEffort};
use pagewatch_core::models::{Event, EventKind, MonitorState, Target, file_timestamp, sanitize_key};
use pagewatch_core::traits::{Observation, RecordedDiff, RecordedObservation, SnapshotStore};
use pagewatch_core::MonitorConfig;
use tempfile::NamedTempFile;

use crate::atomic::{write_atomic, write_if_changed};
use crate::config::StoreConfig;
use crate::events::EventLog;

const CANONICAL_SUFFIX: &str = ".normalized.txt";
const RAW_SUFFIX: &str = ".html";

/// Which files of a target directory a listing covers.
#[derive(Debug, Clone, Copy)]
enum FileKind {
    Canonical,
    Raw,
    Diff,
}

impl FileKind {
    fn matches(self, name: &str) -> bool {
        match self {
            FileKind::Canonical => name.ends_with(CANONICAL_SUFFIX),
            FileKind::Raw => name.ends_with(RAW_SUFFIX),
            FileKind::Diff => name.starts_with("diff_") && name.ends_with(".txt"),
        }
    }
}

/// Snapshot/state store on the local filesystem.
///
/// Layout under the public directory:
/// `data/{key}/{key}_{ts}.normalized.txt` and `.html` snapshots,
/// `data/state.json`, `logs/{key}/diff_{key}_{ts}.txt`, `logs/events.json`
/// and `logs/changes.log`. Every write is an atomic replacement.
#[derive(Debug, Clone)]
pub struct FsStore {
    config: StoreConfig,
    events: EventLog,
}

impl FsStore {
    /// Prepare the directory tree and check that it is writable.
    ///
    /// An unwritable data directory is an error; a legacy `changes.log`
    /// is migrated into `events.json` when the latter is missing.
    pub fn open(config: StoreConfig) -> Result<Self, AppError> {
        for dir in [&config.data_dir, &config.log_dir] {
            fs::create_dir_all(dir).map_err(|e| {
                AppError::Persistence(format!("cannot create {}: {e}", dir.display()))
            })?;
        }
        NamedTempFile::new_in(&config.data_dir).map_err(|e| {
            AppError::Persistence(format!(
                "data directory {} is not writable: {e}",
                config.data_dir.display()
            ))
        })?;

        let events = EventLog::new(&config);
        events.migrate_legacy().best_effort("Legacy log migration");

        tracing::debug!(root = %config.public_dir.display(), "Store opened");
        Ok(Self { config, events })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn event_log(&self) -> &EventLog {
        &self.events
    }

    fn snapshot_dir(&self, key: &str) -> PathBuf {
        self.config.data_dir.join(key)
    }

    fn diff_dir(&self, key: &str) -> PathBuf {
        self.config.log_dir.join(key)
    }

    /// Keep only the newest canonical snapshots, raw snapshots and diffs
    /// of `key`, up to the configured retention each.
    pub fn prune_retention(&self, key: &str) -> Result<(), AppError> {
        let snapshots = self.snapshot_dir(key);
        let diffs = self.diff_dir(key);
        for (dir, kind) in [
            (&snapshots, FileKind::Canonical),
            (&snapshots, FileKind::Raw),
            (&diffs, FileKind::Diff),
        ] {
            for name in list_newest_first(dir, kind)?
                .iter()
                .skip(self.config.retention)
            {
                let path = dir.join(name);
                fs::remove_file(&path).map_err(|e| {
                    AppError::Persistence(format!("cannot delete {}: {e}", path.display()))
                })?;
                tracing::debug!(path = %path.display(), "Pruned");
            }
        }
        Ok(())
    }

    fn publish_config(&self, config: &MonitorConfig) -> Result<(), AppError> {
        let dest = self.config.public_dir.join("config.json");
        let contents = fs::read(&config.source).map_err(|e| {
            AppError::Persistence(format!("cannot read {}: {e}", config.source.display()))
        })?;
        if write_if_changed(&dest, &contents)? {
            tracing::debug!(path = %dest.display(), "Published configuration");
        }
        Ok(())
    }

    fn publish_index(&self, dir: &Path, kind: FileKind, field: &str) -> Result<(), AppError> {
        if !dir.is_dir() {
            return Ok(());
        }
        let mut names = list_newest_first(dir, kind)?;
        names.truncate(self.config.retention);
        let mut json = serde_json::to_string_pretty(&serde_json::json!({ field: names }))?;
        json.push('\n');
        write_if_changed(&dir.join("index.json"), json.as_bytes())?;
        Ok(())
    }

    fn remove_target_dirs(&self, key: &str) {
        for dir in [self.snapshot_dir(key), self.diff_dir(key)] {
            match fs::remove_dir_all(&dir) {
                Ok(()) => tracing::debug!(path = %dir.display(), "Removed directory"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(path = %dir.display(), error = %e, "Failed to remove directory"),
            }
        }
    }
}

impl SnapshotStore for FsStore {
    fn load_state(&self) -> Result<MonitorState, AppError> {
        let path = self.config.state_path();
        match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).map_err(|e| {
                AppError::Persistence(format!("corrupt state file {}: {e}", path.display()))
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(MonitorState::default()),
            Err(e) => Err(AppError::Persistence(format!(
                "cannot read {}: {e}",
                path.display()
            ))),
        }
    }

    fn save_state(&self, state: &MonitorState) -> Result<(), AppError> {
        let mut json = serde_json::to_string_pretty(state)?;
        json.push('\n');
        write_atomic(&self.config.state_path(), json.as_bytes())
    }

    fn record_observation(
        &self,
        observation: &Observation<'_>,
    ) -> Result<RecordedObservation, AppError> {
        let key = observation.target.key();
        let ts = file_timestamp(observation.observed_at);
        let dir = self.snapshot_dir(&key);

        let previous_text = observation
            .previous
            .map(|prev| &prev.last_snapshot)
            .filter(|path| path.is_file())
            .and_then(|path| {
                fs::read_to_string(path)
                    .map_err(|e| {
                        AppError::Persistence(format!("cannot read {}: {e}", path.display()))
                    })
                    .best_effort("Reading previous snapshot")
            });

        let raw_snapshot = dir.join(format!("{key}_{ts}{RAW_SUFFIX}"));
        let snapshot = dir.join(format!("{key}_{ts}{CANONICAL_SUFFIX}"));
        write_atomic(&raw_snapshot, observation.raw.as_bytes())?;
        write_atomic(&snapshot, observation.canonical.as_bytes())?;

        let diff = match previous_text {
            Some(previous) => {
                let lines = diff_lines(&previous, observation.canonical);
                let path = self.diff_dir(&key).join(format!("diff_{key}_{ts}.txt"));
                write_atomic(&path, render_diff(&lines).as_bytes())?;
                Some(RecordedDiff { path, lines })
            }
            None => None,
        };

        self.prune_retention(&key).best_effort("Retention");

        Ok(RecordedObservation {
            raw_snapshot,
            snapshot,
            diff,
        })
    }

    fn remove_stale_targets(
        &self,
        state: &mut MonitorState,
        live: &[Target],
        now: DateTime<Utc>,
    ) -> Vec<String> {
        let live_urls: BTreeSet<&str> = live.iter().map(|t| t.url.as_str()).collect();
        let live_keys: BTreeSet<String> = live.iter().map(Target::key).collect();
        let stale: Vec<String> = state
            .urls
            .keys()
            .filter(|url| !live_urls.contains(url.as_str()))
            .cloned()
            .collect();

        for url in &stale {
            let Some(entry) = state.urls.remove(url) else {
                continue;
            };
            let key = entry
                .last_snapshot
                .parent()
                .and_then(Path::file_name)
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| sanitize_key(url));

            if live_keys.contains(&key) {
                tracing::info!(%url, %key, "Removed target shares its key with a live one, keeping files");
            } else {
                self.remove_target_dirs(&key);
            }
            tracing::info!(%url, %key, "Target removed from configuration");

            let event = Event {
                timestamp: now,
                kind: EventKind::Removed { key: key.clone() },
                title: Some(key),
                url: Some(url.clone()),
            };
            self.append_event(&event).best_effort("Recording removal");
        }
        stale
    }

    fn append_event(&self, event: &Event) -> Result<(), AppError> {
        self.events.append(event)
    }

    fn publish(&self, config: &MonitorConfig) {
        self.publish_config(config).best_effort("Publishing configuration");

        let keys: BTreeSet<String> = config.targets.iter().map(Target::key).collect();
        for key in &keys {
            self.publish_index(&self.snapshot_dir(key), FileKind::Canonical, "snapshots")
                .best_effort("Snapshot index");
            self.publish_index(&self.diff_dir(key), FileKind::Diff, "diffs")
                .best_effort("Diff index");
        }
    }
}

/// Names of `kind` files in `dir`, newest modification first, ties broken
/// by name descending. A missing directory lists as empty.
fn list_newest_first(dir: &Path, kind: FileKind) -> Result<Vec<String>, AppError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(AppError::Persistence(format!(
                "cannot list {}: {e}",
                dir.display()
            )));
        }
    };

    let mut files: Vec<(SystemTime, String)> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !kind.matches(&name) {
                return None;
            }
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            Some((modified, name))
        })
        .collect();
    files.sort_by(|a, b| b.cmp(a));
    Ok(files.into_iter().map(|(_, name)| name).collect())
}
