//! The check cycle and the periodic loop around it.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::acquire::{Acquirer, RenderBackoff};
use crate::config::MonitorConfig;
use crate::detect::{ChangeKind, Classification, classify};
use crate::differ::{clean_diff, render_diff};
use crate::error::{AppError, BestEffort};
use crate::models::{ChangeNotice, Event, EventKind, MonitorState, Target, TargetState};
use crate::normalize::normalize;
use crate::schedule::{INTERVAL_POLL, Schedule};
use crate::traits::{Fetcher, Notifier, NullSummarizer, Observation, Renderer, SnapshotStore, Summarizer};

/// Events emitted by the monitor for logging.
#[derive(Debug, Clone)]
pub enum MonitorEvent<'a> {
    Started {
        targets: usize,
        interval: Duration,
    },
    CycleStarted {
        targets: usize,
    },
    TargetChecked {
        target: &'a Target,
        kind: ChangeKind,
    },
    TargetFailed {
        target: &'a Target,
        error: &'a str,
    },
    CycleFinished {
        report: &'a CycleReport,
    },
    ShuttingDown,
    Stopped,
}

/// Trait for receiving monitor events (decoupled logging).
pub trait MonitorReporter: Send + Sync {
    fn report(&self, event: MonitorEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMonitorReporter;

impl MonitorReporter for TracingMonitorReporter {
    fn report(&self, event: MonitorEvent<'_>) {
        match event {
            MonitorEvent::Started { targets, interval } => {
                tracing::info!(%targets, interval_secs = interval.as_secs(), "Monitor started");
            }
            MonitorEvent::CycleStarted { targets } => {
                tracing::debug!(%targets, "Running check");
            }
            MonitorEvent::TargetChecked { target, kind } => match kind {
                ChangeKind::Unchanged => {
                    tracing::debug!(title = %target.title, url = %target.url, "Unchanged");
                }
                ChangeKind::New | ChangeKind::Changed => {
                    tracing::info!(title = %target.title, url = %target.url, %kind, "Content recorded");
                }
            },
            MonitorEvent::TargetFailed { target, error } => {
                tracing::error!(title = %target.title, url = %target.url, %error, "Check failed");
            }
            MonitorEvent::CycleFinished { report } => {
                tracing::info!(
                    new = report.new,
                    changed = report.changed,
                    unchanged = report.unchanged,
                    failed = report.failed,
                    removed = report.removed.len(),
                    "Check complete"
                );
            }
            MonitorEvent::ShuttingDown => tracing::info!("Monitor shutting down"),
            MonitorEvent::Stopped => tracing::info!("Monitor stopped"),
        }
    }
}

/// Counters for one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub new: usize,
    pub changed: usize,
    pub unchanged: usize,
    pub failed: usize,
    /// URLs dropped from state because they left the configuration.
    pub removed: Vec<String>,
    /// Changes delivered to the notifier.
    pub notified: usize,
}

enum TargetOutcome {
    New,
    Unchanged,
    Changed(ChangeNotice),
}

impl TargetOutcome {
    fn kind(&self) -> ChangeKind {
        match self {
            TargetOutcome::New => ChangeKind::New,
            TargetOutcome::Unchanged => ChangeKind::Unchanged,
            TargetOutcome::Changed(_) => ChangeKind::Changed,
        }
    }
}

/// Runs check cycles over the configured targets.
///
/// Generic over every external dependency so a cycle can be driven
/// entirely by in-memory mocks.
pub struct Monitor<F, R, S, N, Z = NullSummarizer>
where
    F: Fetcher,
    R: Renderer,
    S: SnapshotStore,
    N: Notifier,
    Z: Summarizer,
{
    acquirer: Acquirer<F, R>,
    store: S,
    notifier: N,
    summarizer: Option<Z>,
    /// Render backoff of targets that have no state entry yet.
    pending_backoff: HashMap<String, DateTime<Utc>>,
}

impl<F, R, S, N> Monitor<F, R, S, N, NullSummarizer>
where
    F: Fetcher,
    R: Renderer,
    S: SnapshotStore,
    N: Notifier,
{
    pub fn new(fetcher: F, renderer: R, store: S, notifier: N) -> Self {
        Self {
            acquirer: Acquirer::new(fetcher, renderer),
            store,
            notifier,
            summarizer: None,
            pending_backoff: HashMap::new(),
        }
    }
}

impl<F, R, S, N, Z> Monitor<F, R, S, N, Z>
where
    F: Fetcher,
    R: Renderer,
    S: SnapshotStore,
    N: Notifier,
    Z: Summarizer,
{
    /// Summarize diffs of changed targets before notifying.
    pub fn with_summarizer<Z2: Summarizer>(self, summarizer: Z2) -> Monitor<F, R, S, N, Z2> {
        Monitor {
            acquirer: self.acquirer,
            store: self.store,
            notifier: self.notifier,
            summarizer: Some(summarizer),
            pending_backoff: self.pending_backoff,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Release the render handle.
    pub async fn shutdown(&self) {
        self.acquirer.renderer().shutdown().await;
    }

    /// Run the periodic loop until cancellation.
    ///
    /// One cycle runs immediately; later cycles follow the configured
    /// interval, which is re-read every cycle and polled while idle.
    /// Cancellation takes effect between cycles.
    pub async fn run<WR: MonitorReporter>(
        &mut self,
        mut config: MonitorConfig,
        mut state: MonitorState,
        cancel_token: CancellationToken,
        reporter: &WR,
    ) {
        reporter.report(MonitorEvent::Started {
            targets: config.targets.len(),
            interval: config.interval,
        });

        self.run_cycle(&config, &mut state, reporter).await;

        let mut schedule = Schedule::new(config.interval, Instant::now());
        let mut poll = tokio::time::interval_at(Instant::now() + INTERVAL_POLL, INTERVAL_POLL);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = cancel_token.cancelled() => break,
                () = tokio::time::sleep_until(schedule.next_due()) => {
                    config = reload(config);
                    self.run_cycle(&config, &mut state, reporter).await;
                    let now = Instant::now();
                    if !schedule.observe_interval(config.interval, now) {
                        schedule.advance(now);
                    }
                }
                _ = poll.tick() => {
                    match MonitorConfig::load(&config.source) {
                        Ok(fresh) => {
                            schedule.observe_interval(fresh.interval, Instant::now());
                            config = fresh;
                        }
                        Err(e) => tracing::debug!(error = %e, "Interval poll skipped"),
                    }
                }
            }
        }

        reporter.report(MonitorEvent::ShuttingDown);
        self.shutdown().await;
        reporter.report(MonitorEvent::Stopped);
    }

    /// Check every target once, then persist, publish and notify.
    ///
    /// Per-target failures are recorded as ERROR events and never abort
    /// the cycle.
    pub async fn run_cycle<WR: MonitorReporter>(
        &mut self,
        config: &MonitorConfig,
        state: &mut MonitorState,
        reporter: &WR,
    ) -> CycleReport {
        reporter.report(MonitorEvent::CycleStarted {
            targets: config.targets.len(),
        });

        let mut report = CycleReport::default();
        let mut notices = Vec::new();

        for target in &config.targets {
            let now = Utc::now();
            match self
                .check_target(target, &config.user_agent, state, now)
                .await
            {
                Ok(outcome) => {
                    reporter.report(MonitorEvent::TargetChecked {
                        target,
                        kind: outcome.kind(),
                    });
                    match outcome {
                        TargetOutcome::New => report.new += 1,
                        TargetOutcome::Unchanged => report.unchanged += 1,
                        TargetOutcome::Changed(notice) => {
                            report.changed += 1;
                            notices.push(notice);
                        }
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    let message = e.to_string();
                    reporter.report(MonitorEvent::TargetFailed {
                        target,
                        error: &message,
                    });
                    self.store
                        .append_event(&Event::for_target(
                            now,
                            target,
                            EventKind::Error { message },
                        ))
                        .best_effort("Recording error event");
                }
            }
        }

        report.removed = self
            .store
            .remove_stale_targets(state, &config.targets, Utc::now());
        self.pending_backoff
            .retain(|url, _| config.targets.iter().any(|t| &t.url == url));

        if let Err(e) = self.store.save_state(state) {
            tracing::error!(error = %e, "Failed to persist state");
        }
        self.store.publish(config);

        if !notices.is_empty() {
            match self.notifier.notify_batch(&notices).await {
                Ok(()) => report.notified = notices.len(),
                Err(e) => tracing::warn!(error = %e, changes = notices.len(), "Notification failed"),
            }
        }

        reporter.report(MonitorEvent::CycleFinished { report: &report });
        report
    }

    async fn check_target(
        &mut self,
        target: &Target,
        user_agent: &str,
        state: &mut MonitorState,
        now: DateTime<Utc>,
    ) -> Result<TargetOutcome, AppError> {
        let mut backoff = match state.urls.get(&target.url) {
            Some(entry) => entry.renderer_failed_at,
            None => self.pending_backoff.get(&target.url).copied(),
        };
        let acquired = self
            .acquirer
            .acquire(target, user_agent, &mut backoff, now)
            .await;
        self.remember_backoff(target, state, backoff);
        let acquired = acquired?;
        tracing::debug!(url = %target.url, path = ?acquired.path, "Content acquired");

        let canonical = normalize(&acquired.content);
        let previous = state.urls.get(&target.url);
        let Classification { kind, digest } = classify(&canonical, previous);

        if kind == ChangeKind::Unchanged {
            if let Some(entry) = state.urls.get_mut(&target.url) {
                entry.last_checked_at = now;
            }
            return Ok(TargetOutcome::Unchanged);
        }

        let recorded = self.store.record_observation(&Observation {
            target,
            raw: &acquired.content,
            canonical: &canonical,
            digest: &digest,
            previous,
            observed_at: now,
        })?;
        let previous_snapshot = previous.map(|p| p.last_snapshot.clone());

        state.urls.insert(
            target.url.clone(),
            TargetState {
                hash: digest,
                last_checked_at: now,
                last_changed_at: now,
                last_snapshot: recorded.snapshot.clone(),
                renderer_failed_at: backoff,
            },
        );
        self.pending_backoff.remove(&target.url);

        if kind == ChangeKind::New {
            self.store
                .append_event(&Event::for_target(
                    now,
                    target,
                    EventKind::New {
                        snapshot: recorded.snapshot,
                    },
                ))
                .best_effort("Recording NEW event");
            return Ok(TargetOutcome::New);
        }

        let summary = match (&self.summarizer, &recorded.diff) {
            (Some(summarizer), Some(diff)) => {
                let cleaned = clean_diff(&render_diff(&diff.lines));
                summarizer
                    .summarize(&target.url, &cleaned)
                    .await
                    .best_effort("Summarizing diff")
            }
            _ => None,
        };

        self.store
            .append_event(&Event::for_target(
                now,
                target,
                EventKind::Changed {
                    previous: recorded.diff.as_ref().and(previous_snapshot),
                    current: recorded.snapshot,
                    diff: recorded.diff.map(|d| d.path),
                    summary: summary.as_ref().map(|s| s.processed.clone()),
                },
            ))
            .best_effort("Recording CHANGED event");

        Ok(TargetOutcome::Changed(ChangeNotice {
            title: target.title.clone(),
            url: target.url.clone(),
            content: summary.map_or(canonical, |s| s.text),
        }))
    }

    fn remember_backoff(&mut self, target: &Target, state: &mut MonitorState, backoff: RenderBackoff) {
        match (state.urls.get_mut(&target.url), backoff) {
            (Some(entry), _) => entry.renderer_failed_at = backoff,
            (None, Some(failed_at)) => {
                self.pending_backoff.insert(target.url.clone(), failed_at);
            }
            (None, None) => {
                self.pending_backoff.remove(&target.url);
            }
        }
    }
}

/// Re-read the configuration; on failure keep the one in effect.
pub fn reload(current: MonitorConfig) -> MonitorConfig {
    match MonitorConfig::load(&current.source) {
        Ok(fresh) => {
            fresh.warn_key_collisions();
            fresh
        }
        Err(e) => {
            tracing::error!(error = %e, "Reloading configuration failed, keeping previous");
            current
        }
    }
}
