use std::fs;

use chrono::Utc;
use pagewatch_core::models::{Event, EventKind, MonitorState};
use pagewatch_core::testutil::{MockFetcher, MockNotifier};
use pagewatch_core::{AppError, SnapshotStore};
use pagewatch_store::{FsStore, StoreConfig};

use crate::common::{TestEnv, cycle, files_with_suffix};

#[tokio::test]
async fn colliding_titles_share_a_directory() {
    let env = TestEnv::new(
        r#"{"urls": [
            {"url": "http://example.test/1", "title": "a.b"},
            {"url": "http://example.test/2", "title": "a-b"}
        ]}"#,
    );
    assert_eq!(env.config.key_collisions().len(), 1);

    let fetcher = MockFetcher::with_responses(vec![Ok("<p>one</p>".into()), Ok("<p>two</p>".into())]);
    let notifier = MockNotifier::new();
    let mut monitor = env.monitor(&fetcher, &notifier);
    let mut state = MonitorState::default();

    let report = cycle(&mut monitor, &env, &mut state).await;
    assert_eq!(report.new, 2);
    assert_eq!(state.urls.len(), 2);
    assert_ne!(
        state.urls["http://example.test/1"].hash,
        state.urls["http://example.test/2"].hash
    );
    let dir = env.public().join("data/a_b");
    assert!(!files_with_suffix(&dir, ".normalized.txt").is_empty());
}

#[test]
fn event_feed_stays_capped() {
    let env = TestEnv::new(r#"{"urls": ["http://example.test/a"]}"#);
    let now = Utc::now();
    for i in 0..210 {
        env.store
            .append_event(&Event::fatal(now, format!("failure {i}")))
            .unwrap();
    }

    let events = env.events();
    assert_eq!(events.len(), 200);
    assert_eq!(
        events[0].kind,
        EventKind::Fatal {
            message: "failure 10".into()
        }
    );
    let log = fs::read_to_string(env.public().join("logs/changes.log")).unwrap();
    assert_eq!(log.lines().count(), 210);
}

#[test]
fn unwritable_data_dir_fails_to_open() {
    let dir = tempfile::TempDir::new().unwrap();
    let blocker = dir.path().join("public");
    fs::write(&blocker, "not a directory").unwrap();

    let err = FsStore::open(StoreConfig::new(&blocker)).unwrap_err();
    assert!(matches!(err, AppError::Persistence(_)));
}

#[test]
fn publish_skips_identical_config() {
    let env = TestEnv::new(r#"{"urls": ["http://example.test/a"]}"#);
    env.store.publish(&env.config);
    let published = env.public().join("config.json");
    let first = fs::metadata(&published).unwrap().modified().unwrap();

    std::thread::sleep(std::time::Duration::from_millis(20));
    env.store.publish(&env.config);
    assert_eq!(fs::metadata(&published).unwrap().modified().unwrap(), first);
}
