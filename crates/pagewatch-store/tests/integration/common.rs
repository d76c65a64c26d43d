use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use pagewatch_core::MonitorConfig;
use pagewatch_core::models::{Event, MonitorState};
use pagewatch_core::testutil::{MockFetcher, MockNotifier, MockReporter};
use pagewatch_core::traits::NullRenderer;
use pagewatch_core::{CycleReport, Monitor, Renderer};
use pagewatch_store::{FsStore, StoreConfig};
use tempfile::TempDir;

/// A configuration file plus the store rooted next to it.
///
/// The `TempDir` must be kept in scope for the test duration; dropping
/// it removes the whole tree.
pub struct TestEnv {
    pub dir: TempDir,
    pub config: MonitorConfig,
    pub store: FsStore,
}

impl TestEnv {
    pub fn new(config_json: &str) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("config.json");
        fs::write(&path, config_json).expect("Failed to write config");
        let config = MonitorConfig::load(&path).expect("Invalid test config");
        let store =
            FsStore::open(StoreConfig::from_monitor_config(&config)).expect("Failed to open store");
        Self { dir, config, store }
    }

    /// Rewrite the configuration file and reload it.
    pub fn reconfigure(&mut self, config_json: &str) {
        fs::write(&self.config.source, config_json).expect("Failed to write config");
        self.config = MonitorConfig::load(&self.config.source).expect("Invalid test config");
    }

    pub fn public(&self) -> PathBuf {
        self.dir.path().join("public")
    }

    pub fn events(&self) -> Vec<Event> {
        self.store.event_log().read().expect("Unreadable events.json")
    }

    pub fn event_labels(&self) -> Vec<&'static str> {
        self.events().iter().map(|e| e.kind.label()).collect()
    }

    pub fn monitor(
        &self,
        fetcher: &MockFetcher,
        notifier: &MockNotifier,
    ) -> Monitor<MockFetcher, NullRenderer, FsStore, MockNotifier> {
        self.monitor_with(fetcher, NullRenderer, notifier)
    }

    pub fn monitor_with<R: Renderer>(
        &self,
        fetcher: &MockFetcher,
        renderer: R,
        notifier: &MockNotifier,
    ) -> Monitor<MockFetcher, R, FsStore, MockNotifier> {
        Monitor::new(fetcher.clone(), renderer, self.store.clone(), notifier.clone())
    }
}

/// Run one cycle, then wait long enough for the next snapshot to get a
/// distinct millisecond timestamp.
pub async fn cycle<R: Renderer>(
    monitor: &mut Monitor<MockFetcher, R, FsStore, MockNotifier>,
    env: &TestEnv,
    state: &mut MonitorState,
) -> CycleReport {
    let report = monitor
        .run_cycle(&env.config, state, &MockReporter::new())
        .await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    report
}

/// File names in `dir` ending with `suffix`, sorted.
pub fn files_with_suffix(dir: &Path, suffix: &str) -> Vec<String> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(Result::ok)
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(suffix))
        .collect();
    names.sort();
    names
}
