use std::path::PathBuf;

use chrono::TimeDelta;
use pagewatch_core::MonitorConfig;

/// Files kept per target and kind (canonical, raw, diff).
pub const DEFAULT_RETENTION: usize = 3;
/// Entries kept in `events.json`.
pub const DEFAULT_EVENT_CAP: usize = 200;

/// Layout and limits of the on-disk store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Root shared with the browsing interface.
    pub public_dir: PathBuf,
    /// Snapshots and `state.json`.
    pub data_dir: PathBuf,
    /// Diffs, `events.json` and `changes.log`.
    pub log_dir: PathBuf,
    pub retention: usize,
    pub event_cap: usize,
    /// Age beyond which `changes.log` lines are dropped.
    pub log_window: TimeDelta,
}

impl StoreConfig {
    /// Standard layout under `public_dir`: `data/` and `logs/`.
    pub fn new(public_dir: impl Into<PathBuf>) -> Self {
        let public_dir = public_dir.into();
        Self {
            data_dir: public_dir.join("data"),
            log_dir: public_dir.join("logs"),
            public_dir,
            retention: DEFAULT_RETENTION,
            event_cap: DEFAULT_EVENT_CAP,
            log_window: TimeDelta::hours(24),
        }
    }

    pub fn from_monitor_config(config: &MonitorConfig) -> Self {
        Self {
            data_dir: config.data_dir(),
            log_dir: config.log_dir(),
            ..Self::new(config.public_dir.clone())
        }
    }

    pub fn state_path(&self) -> PathBuf {
        self.data_dir.join("state.json")
    }

    pub fn events_path(&self) -> PathBuf {
        self.log_dir.join("events.json")
    }

    pub fn legacy_log_path(&self) -> PathBuf {
        self.log_dir.join("changes.log")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_layout_follows_monitor_config() {
        let config = MonitorConfig::parse(
            r#"{"urls": ["http://example.test/a"], "publicDir": "site"}"#,
            Path::new("/srv/watch/config.json"),
        )
        .unwrap();
        let store = StoreConfig::from_monitor_config(&config);

        assert_eq!(store.public_dir, Path::new("/srv/watch/site"));
        assert_eq!(store.state_path(), Path::new("/srv/watch/site/data/state.json"));
        assert_eq!(store.events_path(), Path::new("/srv/watch/site/logs/events.json"));
        assert_eq!(store.legacy_log_path(), Path::new("/srv/watch/site/logs/changes.log"));
        assert_eq!(store.retention, 3);
        assert_eq!(store.event_cap, 200);
    }
}
