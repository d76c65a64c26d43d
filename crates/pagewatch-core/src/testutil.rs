//! Test utilities: mock implementations of all core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use crate::config::MonitorConfig;
use crate::differ::diff_lines;
use crate::error::AppError;
use crate::models::{
    ChangeNotice, Event, EventKind, MonitorState, Summary, Target, TargetState, file_timestamp,
    sanitize_key,
};
use crate::monitor::{MonitorEvent, MonitorReporter};
use crate::traits::{
    Fetcher, Notifier, Observation, RecordedDiff, RecordedObservation, RenderOutput,
    RenderRequest, Renderer, SnapshotStore, Summarizer,
};

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

/// Recorded request: (url, user_agent).
pub type FetchRecord = (String, String);

/// Mock fetcher that returns queued responses.
#[derive(Clone)]
pub struct MockFetcher {
    /// Queue of responses. Each call pops the first element.
    /// If empty, returns a default HTML string.
    responses: Arc<Mutex<Vec<Result<String, AppError>>>>,
    requests: Arc<Mutex<Vec<FetchRecord>>>,
}

impl MockFetcher {
    pub fn new(html: &str) -> Self {
        Self::with_responses(vec![Ok(html.to_string())])
    }

    pub fn with_error(error: AppError) -> Self {
        Self::with_responses(vec![Err(error)])
    }

    pub fn with_responses(responses: Vec<Result<String, AppError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queue another response behind the pending ones.
    pub fn push(&self, response: Result<String, AppError>) {
        self.responses.lock().unwrap().push(response);
    }

    pub fn requests(&self) -> Vec<FetchRecord> {
        self.requests.lock().unwrap().clone()
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str, user_agent: &str) -> Result<String, AppError> {
        self.requests
            .lock()
            .unwrap()
            .push((url.to_string(), user_agent.to_string()));
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Ok("<html><body>default</body></html>".to_string())
        } else {
            responses.remove(0)
        }
    }
}

// ---------------------------------------------------------------------------
// MockRenderer
// ---------------------------------------------------------------------------

/// Mock renderer with a fixed outcome for every call.
#[derive(Clone)]
pub struct MockRenderer {
    /// `None` makes every render fail.
    output: Option<RenderOutput>,
    calls: Arc<Mutex<Vec<String>>>,
    shutdowns: Arc<Mutex<u32>>,
}

impl MockRenderer {
    pub fn new(html: &str, selector_applied: bool) -> Self {
        Self {
            output: Some(RenderOutput {
                html: html.to_string(),
                selector_applied,
            }),
            calls: Arc::new(Mutex::new(Vec::new())),
            shutdowns: Arc::new(Mutex::new(0)),
        }
    }

    /// A renderer whose every attempt fails.
    pub fn failing() -> Self {
        Self {
            output: None,
            calls: Arc::new(Mutex::new(Vec::new())),
            shutdowns: Arc::new(Mutex::new(0)),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn shutdown_count(&self) -> u32 {
        *self.shutdowns.lock().unwrap()
    }
}

impl Renderer for MockRenderer {
    async fn render(&self, request: RenderRequest<'_>) -> Result<RenderOutput, AppError> {
        self.calls.lock().unwrap().push(request.url.to_string());
        self.output
            .clone()
            .ok_or_else(|| AppError::RenderError("browser crashed".into()))
    }

    async fn shutdown(&self) {
        *self.shutdowns.lock().unwrap() += 1;
    }
}

// ---------------------------------------------------------------------------
// MockNotifier
// ---------------------------------------------------------------------------

/// Mock notifier that records every batch.
#[derive(Clone, Default)]
pub struct MockNotifier {
    pub batches: Arc<Mutex<Vec<Vec<ChangeNotice>>>>,
    error: Arc<Mutex<Option<AppError>>>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifier whose first delivery fails.
    pub fn with_error(error: AppError) -> Self {
        Self {
            batches: Arc::new(Mutex::new(Vec::new())),
            error: Arc::new(Mutex::new(Some(error))),
        }
    }
}

impl Notifier for MockNotifier {
    async fn notify_batch(&self, changes: &[ChangeNotice]) -> Result<(), AppError> {
        self.batches.lock().unwrap().push(changes.to_vec());
        match self.error.lock().unwrap().take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// MockSummarizer
// ---------------------------------------------------------------------------

/// Mock summarizer returning queued results, echoing its input when empty.
#[derive(Clone, Default)]
pub struct MockSummarizer {
    responses: Arc<Mutex<Vec<Result<Summary, AppError>>>>,
    /// Recorded calls: (url, cleaned_diff).
    pub calls: Arc<Mutex<Vec<(String, String)>>>,
}

impl MockSummarizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_responses(responses: Vec<Result<Summary, AppError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl Summarizer for MockSummarizer {
    async fn summarize(&self, url: &str, cleaned_diff: &str) -> Result<Summary, AppError> {
        self.calls
            .lock()
            .unwrap()
            .push((url.to_string(), cleaned_diff.to_string()));
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Ok(make_test_summary(&format!("summary of {cleaned_diff}")))
        } else {
            responses.remove(0)
        }
    }
}

// ---------------------------------------------------------------------------
// MockStore
// ---------------------------------------------------------------------------

/// In-memory snapshot store.
///
/// Lays out paths like the filesystem store but keeps file bodies in a
/// map; retention is not simulated.
#[derive(Clone)]
pub struct MockStore {
    initial: Arc<Mutex<MonitorState>>,
    pub saved_states: Arc<Mutex<Vec<MonitorState>>>,
    pub files: Arc<Mutex<BTreeMap<PathBuf, String>>>,
    pub events: Arc<Mutex<Vec<Event>>>,
    pub published: Arc<Mutex<u32>>,
    record_error: Arc<Mutex<Option<AppError>>>,
}

impl MockStore {
    pub fn empty() -> Self {
        Self::with_state(MonitorState::default())
    }

    pub fn with_state(state: MonitorState) -> Self {
        Self {
            initial: Arc::new(Mutex::new(state)),
            saved_states: Arc::new(Mutex::new(Vec::new())),
            files: Arc::new(Mutex::new(BTreeMap::new())),
            events: Arc::new(Mutex::new(Vec::new())),
            published: Arc::new(Mutex::new(0)),
            record_error: Arc::new(Mutex::new(None)),
        }
    }

    /// Store whose next `record_observation` fails.
    pub fn with_record_error(error: AppError) -> Self {
        let store = Self::empty();
        *store.record_error.lock().unwrap() = Some(error);
        store
    }

    /// Last persisted state map, if any.
    pub fn last_saved(&self) -> Option<MonitorState> {
        self.saved_states.lock().unwrap().last().cloned()
    }

    /// Labels of recorded events, in order.
    pub fn event_labels(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.kind.label())
            .collect()
    }

    pub fn file(&self, path: &Path) -> Option<String> {
        self.files.lock().unwrap().get(path).cloned()
    }
}

impl SnapshotStore for MockStore {
    fn load_state(&self) -> Result<MonitorState, AppError> {
        Ok(self.initial.lock().unwrap().clone())
    }

    fn save_state(&self, state: &MonitorState) -> Result<(), AppError> {
        self.saved_states.lock().unwrap().push(state.clone());
        Ok(())
    }

    fn record_observation(
        &self,
        observation: &Observation<'_>,
    ) -> Result<RecordedObservation, AppError> {
        if let Some(e) = self.record_error.lock().unwrap().take() {
            return Err(e);
        }

        let key = observation.target.key();
        let ts = file_timestamp(observation.observed_at);
        let dir = PathBuf::from("data").join(&key);
        let raw_snapshot = dir.join(format!("{key}_{ts}.html"));
        let snapshot = dir.join(format!("{key}_{ts}.normalized.txt"));

        let mut files = self.files.lock().unwrap();
        let diff = observation
            .previous
            .and_then(|prev| files.get(&prev.last_snapshot).cloned())
            .map(|prev_text| RecordedDiff {
                path: PathBuf::from("logs")
                    .join(&key)
                    .join(format!("diff_{key}_{ts}.txt")),
                lines: diff_lines(&prev_text, observation.canonical),
            });

        files.insert(raw_snapshot.clone(), observation.raw.to_string());
        files.insert(snapshot.clone(), observation.canonical.to_string());
        if let Some(diff) = &diff {
            files.insert(diff.path.clone(), crate::differ::render_diff(&diff.lines));
        }

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
        let stale: Vec<String> = state
            .urls
            .keys()
            .filter(|url| !live.iter().any(|t| &t.url == *url))
            .cloned()
            .collect();
        for url in &stale {
            if let Some(entry) = state.urls.remove(url) {
                let key = entry
                    .last_snapshot
                    .parent()
                    .and_then(Path::file_name)
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| sanitize_key(url));
                self.events.lock().unwrap().push(Event {
                    timestamp: now,
                    kind: EventKind::Removed { key: key.clone() },
                    title: Some(key),
                    url: Some(url.clone()),
                });
            }
        }
        stale
    }

    fn append_event(&self, event: &Event) -> Result<(), AppError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }

    fn publish(&self, _config: &MonitorConfig) {
        *self.published.lock().unwrap() += 1;
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Mock monitor reporter that records event labels.
#[derive(Default)]
pub struct MockReporter {
    pub events: Arc<Mutex<Vec<String>>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn labels(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl MonitorReporter for MockReporter {
    fn report(&self, event: MonitorEvent<'_>) {
        let label = match &event {
            MonitorEvent::Started { .. } => "Started",
            MonitorEvent::CycleStarted { .. } => "CycleStarted",
            MonitorEvent::TargetChecked { .. } => "TargetChecked",
            MonitorEvent::TargetFailed { .. } => "TargetFailed",
            MonitorEvent::CycleFinished { .. } => "CycleFinished",
            MonitorEvent::ShuttingDown => "ShuttingDown",
            MonitorEvent::Stopped => "Stopped",
        };
        self.events.lock().unwrap().push(label.to_string());
    }
}

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

/// A summary whose text and processed form are both `text`.
pub fn make_test_summary(text: &str) -> Summary {
    Summary {
        text: text.to_string(),
        processed: text.to_string(),
        truncated: false,
        attempts: 1,
    }
}

/// State entry as left by a previous observation of `canonical`.
pub fn make_test_state(canonical: &str, snapshot: impl Into<PathBuf>) -> TargetState {
    TargetState {
        hash: crate::models::compute_hash(canonical),
        last_checked_at: Utc::now(),
        last_changed_at: Utc::now(),
        last_snapshot: snapshot.into(),
        renderer_failed_at: None,
    }
}

/// Configuration over `targets` with a one-minute interval.
pub fn make_test_config(targets: Vec<Target>) -> MonitorConfig {
    MonitorConfig {
        source: PathBuf::from("config.json"),
        interval: std::time::Duration::from_secs(60),
        user_agent: "pagewatch-test".to_string(),
        targets,
        public_dir: PathBuf::from("public"),
        summary_model: None,
    }
}
