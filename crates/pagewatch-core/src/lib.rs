pub mod acquire;
pub mod config;
pub mod detect;
pub mod differ;
pub mod error;
pub mod extract;
pub mod models;
pub mod monitor;
pub mod normalize;
pub mod schedule;
pub mod traits;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use config::MonitorConfig;
pub use error::{AppError, BestEffort};
pub use models::{
    ChangeNotice, Event, EventKind, MonitorState, Summary, Target, TargetState, compute_hash,
    file_timestamp, sanitize_key,
};
pub use monitor::{CycleReport, Monitor, MonitorReporter, TracingMonitorReporter};
pub use traits::{
    Fetcher, Notifier, NullRenderer, NullSummarizer, Observation, RecordedDiff,
    RecordedObservation, RenderOutput, RenderRequest, Renderer, SnapshotStore, Summarizer,
};
