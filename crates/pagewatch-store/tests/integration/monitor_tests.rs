use std::fs;

use pagewatch_core::models::{EventKind, MonitorState, compute_hash};
use pagewatch_core::testutil::{MockFetcher, MockNotifier, MockRenderer};
use pagewatch_core::{AppError, SnapshotStore};

use crate::common::{TestEnv, cycle, files_with_suffix};

const SINGLE_A: &str = r#"{"urls": [{"url": "http://example.test/a", "title": "A"}]}"#;

#[tokio::test]
async fn scenario_a_new_then_changed() {
    let env = TestEnv::new(SINGLE_A);
    let fetcher = MockFetcher::with_responses(vec![
        Ok("<p>Hello</p>".into()),
        Ok("<p>Hello World</p>".into()),
    ]);
    let notifier = MockNotifier::new();
    let mut monitor = env.monitor(&fetcher, &notifier);
    let mut state = MonitorState::default();

    let report = cycle(&mut monitor, &env, &mut state).await;
    assert_eq!(report.new, 1);
    assert_eq!(env.event_labels(), vec!["NEW"]);
    let entry = &state.urls["http://example.test/a"];
    assert_eq!(entry.hash, compute_hash("Hello"));

    let snapshot_dir = env.public().join("data/A");
    assert_eq!(files_with_suffix(&snapshot_dir, ".html").len(), 1);
    assert_eq!(files_with_suffix(&snapshot_dir, ".normalized.txt").len(), 1);
    assert_eq!(fs::read_to_string(&entry.last_snapshot).unwrap(), "Hello");
    assert!(notifier.batches.lock().unwrap().is_empty());

    let report = cycle(&mut monitor, &env, &mut state).await;
    assert_eq!(report.changed, 1);
    assert_eq!(report.notified, 1);
    assert_eq!(env.event_labels(), vec!["NEW", "CHANGED"]);

    let events = env.events();
    let EventKind::Changed { previous, current, diff, .. } = &events[1].kind else {
        panic!("expected CHANGED, got {:?}", events[1].kind);
    };
    assert!(previous.is_some());
    assert_eq!(fs::read_to_string(current).unwrap(), "Hello World");
    let diff = fs::read_to_string(diff.as_ref().expect("diff path")).unwrap();
    assert_eq!(diff, "-Hello\n+Hello World");

    let batches = notifier.batches.lock().unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 1);
    assert_eq!(batches[0][0].content, "Hello World");
    assert_eq!(batches[0][0].title, "A");
}

#[tokio::test]
async fn scenario_b_render_failure_backs_off() {
    let env = TestEnv::new(
        r#"{"urls": [{"url": "http://example.test/b", "title": "B", "dynamicData": true}]}"#,
    );
    let fetcher = MockFetcher::with_responses(vec![
        Ok("<p>Price 10</p>".into()),
        Ok("<p>Price 10</p>".into()),
    ]);
    let renderer = MockRenderer::failing();
    let notifier = MockNotifier::new();
    let mut monitor = env.monitor_with(&fetcher, renderer.clone(), &notifier);
    let mut state = MonitorState::default();

    let report = cycle(&mut monitor, &env, &mut state).await;
    assert_eq!(report.new, 1);
    assert_eq!(renderer.call_count(), 1);
    assert_eq!(fetcher.requests().len(), 1);
    assert!(state.urls["http://example.test/b"].renderer_failed_at.is_some());

    let persisted = env.store.load_state().unwrap();
    assert!(persisted.urls["http://example.test/b"].renderer_failed_at.is_some());

    let report = cycle(&mut monitor, &env, &mut state).await;
    assert_eq!(report.unchanged, 1);
    assert_eq!(renderer.call_count(), 1, "renderer must be skipped during backoff");
    assert_eq!(fetcher.requests().len(), 2);
}

#[tokio::test]
async fn identical_content_is_unchanged_and_writes_nothing() {
    let env = TestEnv::new(SINGLE_A);
    let fetcher = MockFetcher::with_responses(vec![
        Ok("<p>Same</p>".into()),
        Ok("<p>Same</p>".into()),
        Ok("<p>Same</p>".into()),
    ]);
    let notifier = MockNotifier::new();
    let mut monitor = env.monitor(&fetcher, &notifier);
    let mut state = MonitorState::default();

    cycle(&mut monitor, &env, &mut state).await;
    for _ in 0..2 {
        let report = cycle(&mut monitor, &env, &mut state).await;
        assert_eq!(report.unchanged, 1);
    }

    let snapshot_dir = env.public().join("data/A");
    assert_eq!(files_with_suffix(&snapshot_dir, ".normalized.txt").len(), 1);
    assert_eq!(env.event_labels(), vec!["NEW"]);
    assert!(notifier.batches.lock().unwrap().is_empty());
}

#[tokio::test]
async fn retention_keeps_three_most_recent() {
    let env = TestEnv::new(SINGLE_A);
    let fetcher = MockFetcher::with_responses(
        (0..5).map(|i| Ok(format!("<p>Version {i}</p>"))).collect(),
    );
    let notifier = MockNotifier::new();
    let mut monitor = env.monitor(&fetcher, &notifier);
    let mut state = MonitorState::default();

    for _ in 0..5 {
        cycle(&mut monitor, &env, &mut state).await;
    }

    let snapshot_dir = env.public().join("data/A");
    let snapshots = files_with_suffix(&snapshot_dir, ".normalized.txt");
    assert_eq!(snapshots.len(), 3);
    assert_eq!(files_with_suffix(&snapshot_dir, ".html").len(), 3);
    assert!(files_with_suffix(&env.public().join("logs/A"), ".txt").len() <= 3);

    let kept: Vec<String> = snapshots
        .iter()
        .map(|name| fs::read_to_string(snapshot_dir.join(name)).unwrap())
        .collect();
    assert_eq!(kept, vec!["Version 2", "Version 3", "Version 4"]);

    let index: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(snapshot_dir.join("index.json")).unwrap())
            .unwrap();
    let listed = index["snapshots"].as_array().unwrap();
    assert_eq!(listed.len(), 3);
    assert_eq!(listed[0].as_str(), snapshots.last().map(String::as_str));
}

#[tokio::test]
async fn removed_target_is_cleaned_up_once() {
    let mut env = TestEnv::new(
        r#"{"urls": [
            {"url": "http://example.test/a", "title": "A"},
            {"url": "http://example.test/b", "title": "B"}
        ]}"#,
    );
    let fetcher = MockFetcher::with_responses(vec![
        Ok("<p>a</p>".into()),
        Ok("<p>b</p>".into()),
        Ok("<p>a</p>".into()),
        Ok("<p>a</p>".into()),
    ]);
    let notifier = MockNotifier::new();
    let mut monitor = env.monitor(&fetcher, &notifier);
    let mut state = MonitorState::default();

    cycle(&mut monitor, &env, &mut state).await;
    assert!(env.public().join("data/B").is_dir());

    env.reconfigure(SINGLE_A);
    let report = cycle(&mut monitor, &env, &mut state).await;
    assert_eq!(report.removed, vec!["http://example.test/b".to_string()]);
    assert!(!state.urls.contains_key("http://example.test/b"));
    assert!(!env.public().join("data/B").exists());
    assert!(env.public().join("data/A").is_dir());

    cycle(&mut monitor, &env, &mut state).await;
    let removed: Vec<_> = env
        .events()
        .into_iter()
        .filter(|e| matches!(e.kind, EventKind::Removed { .. }))
        .collect();
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].url.as_deref(), Some("http://example.test/b"));
    assert!(!env.store.load_state().unwrap().urls.contains_key("http://example.test/b"));
}

#[tokio::test]
async fn failing_target_does_not_abort_cycle() {
    let env = TestEnv::new(
        r#"{"urls": [
            {"url": "http://example.test/down", "title": "Down"},
            {"url": "http://example.test/up", "title": "Up"}
        ]}"#,
    );
    let fetcher = MockFetcher::with_responses(vec![
        Err(AppError::HttpError("HTTP 503 Service Unavailable".into())),
        Ok("<p>fine</p>".into()),
    ]);
    let notifier = MockNotifier::new();
    let mut monitor = env.monitor(&fetcher, &notifier);
    let mut state = MonitorState::default();

    let report = cycle(&mut monitor, &env, &mut state).await;
    assert_eq!(report.failed, 1);
    assert_eq!(report.new, 1);
    assert_eq!(env.event_labels(), vec!["ERROR", "NEW"]);
    assert!(!state.urls.contains_key("http://example.test/down"));

    let log = fs::read_to_string(env.public().join("logs/changes.log")).unwrap();
    assert_eq!(log.lines().count(), 2);
    assert!(log.lines().next().unwrap().contains("ERROR [Down] http://example.test/down"));
}

#[tokio::test]
async fn state_survives_restart() {
    let env = TestEnv::new(SINGLE_A);
    let fetcher = MockFetcher::new("<p>Hello</p>");
    let notifier = MockNotifier::new();
    let mut state = MonitorState::default();
    {
        let mut monitor = env.monitor(&fetcher, &notifier);
        cycle(&mut monitor, &env, &mut state).await;
    }

    let restored = env.store.load_state().unwrap();
    assert_eq!(restored, state);

    fetcher.push(Ok("<p>Hello</p>".into()));
    let mut monitor = env.monitor(&fetcher, &notifier);
    let mut restored = restored;
    let report = cycle(&mut monitor, &env, &mut restored).await;
    assert_eq!(report.unchanged, 1);
    assert_eq!(env.event_labels(), vec!["NEW"]);
}

#[tokio::test]
async fn publish_copies_configuration() {
    let env = TestEnv::new(SINGLE_A);
    let fetcher = MockFetcher::new("<p>Hello</p>");
    let notifier = MockNotifier::new();
    let mut monitor = env.monitor(&fetcher, &notifier);
    let mut state = MonitorState::default();

    cycle(&mut monitor, &env, &mut state).await;

    assert_eq!(
        fs::read_to_string(env.public().join("config.json")).unwrap(),
        SINGLE_A
    );
    assert!(env.public().join("data/A/index.json").is_file());
    assert!(!env.public().join("logs/A").exists());
}
