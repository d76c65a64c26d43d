use std::future::Future;
use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::config::MonitorConfig;
use crate::differ::DiffLine;
use crate::error::AppError;
use crate::models::{ChangeNotice, Event, MonitorState, Summary, Target, TargetState};

/// Fetches a page over plain HTTP.
pub trait Fetcher: Send + Sync + Clone {
    fn fetch(
        &self,
        url: &str,
        user_agent: &str,
    ) -> impl Future<Output = Result<String, AppError>> + Send;
}

/// What to render and how to narrow it.
#[derive(Debug, Clone, Copy)]
pub struct RenderRequest<'a> {
    pub url: &'a str,
    pub user_agent: &'a str,
    pub selector: Option<&'a str>,
}

/// Markup produced by the renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOutput {
    pub html: String,
    /// `html` is already the matched elements' outer markup. When false
    /// it is the whole page and selector extraction still has to run.
    pub selector_applied: bool,
}

/// Renders a page in a headless browser.
pub trait Renderer: Send + Sync + Clone {
    fn render(
        &self,
        request: RenderRequest<'_>,
    ) -> impl Future<Output = Result<RenderOutput, AppError>> + Send;

    /// Release the browser, if one was launched.
    fn shutdown(&self) -> impl Future<Output = ()> + Send;
}

/// A renderer that is never available.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullRenderer;

impl Renderer for NullRenderer {
    async fn render(&self, _request: RenderRequest<'_>) -> Result<RenderOutput, AppError> {
        Err(AppError::RenderError(
            "headless rendering is not available in this build".into(),
        ))
    }

    async fn shutdown(&self) {}
}

/// Delivers one message describing every change of a cycle.
pub trait Notifier: Send + Sync {
    fn notify_batch(
        &self,
        changes: &[ChangeNotice],
    ) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Summarizes a cleaned diff.
pub trait Summarizer: Send + Sync {
    fn summarize(
        &self,
        url: &str,
        cleaned_diff: &str,
    ) -> impl Future<Output = Result<Summary, AppError>> + Send;
}

/// Summarizer used when none is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSummarizer;

impl Summarizer for NullSummarizer {
    async fn summarize(&self, _url: &str, _cleaned_diff: &str) -> Result<Summary, AppError> {
        Err(AppError::SummarizerError {
            message: "summarizer disabled".into(),
            status_code: 0,
            retryable: false,
        })
    }
}

/// One NEW or CHANGED observation to persist.
#[derive(Debug, Clone, Copy)]
pub struct Observation<'a> {
    pub target: &'a Target,
    /// Extracted fragment before normalization.
    pub raw: &'a str,
    pub canonical: &'a str,
    pub digest: &'a str,
    /// State before this observation; `None` for a NEW target.
    pub previous: Option<&'a TargetState>,
    pub observed_at: DateTime<Utc>,
}

/// Files written for an observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedObservation {
    pub raw_snapshot: PathBuf,
    pub snapshot: PathBuf,
    pub diff: Option<RecordedDiff>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedDiff {
    pub path: PathBuf,
    pub lines: Vec<DiffLine>,
}

/// Durable state map, snapshots, diffs and event feed.
///
/// Mutated only by the monitor; a browsing interface may read the same
/// tree concurrently, so every write must replace whole files.
pub trait SnapshotStore: Send + Sync {
    fn load_state(&self) -> Result<MonitorState, AppError>;

    /// Persist the whole state map in one replacement.
    fn save_state(&self, state: &MonitorState) -> Result<(), AppError>;

    /// Write snapshots (and a diff on change), then prune retention.
    fn record_observation(
        &self,
        observation: &Observation<'_>,
    ) -> Result<RecordedObservation, AppError>;

    /// Drop state entries and directories of targets no longer configured.
    /// Returns the removed URLs.
    fn remove_stale_targets(
        &self,
        state: &mut MonitorState,
        live: &[Target],
        now: DateTime<Utc>,
    ) -> Vec<String>;

    fn append_event(&self, event: &Event) -> Result<(), AppError>;

    /// Refresh read-facing copies for the browsing interface.
    fn publish(&self, config: &MonitorConfig);
}
