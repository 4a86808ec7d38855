mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::sleep;

use common::{summary, Op, ScriptedBackend};
use sync_engine::{Escalation, Notifier, SyncConfig, SyncError, TopicListSynchronizer};

fn synchronizer(backend: &Arc<ScriptedBackend>) -> (TopicListSynchronizer, mpsc::Receiver<Escalation>) {
    let (tx, rx) = mpsc::channel(1);
    let sync = TopicListSynchronizer::new(backend.clone(), SyncConfig::default(), Notifier::default(), tx);
    (sync, rx)
}

fn fetched_filters(backend: &ScriptedBackend) -> Vec<String> {
    backend
        .ops()
        .into_iter()
        .filter_map(|op| match op {
            Op::FetchTopics(f) => Some(f),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn edits_within_quiet_window_coalesce() {
    let backend = ScriptedBackend::new(&["abc", "abcd", "orders"]);
    let (mut sync, _rx) = synchronizer(&backend);

    sync.set_filter("a");
    sleep(Duration::from_millis(30)).await;
    sync.set_filter("ab");
    sleep(Duration::from_millis(30)).await;
    sync.set_filter("abc");
    sleep(Duration::from_millis(99)).await;
    assert_eq!(backend.fetch_calls(), 0);

    sleep(Duration::from_millis(50)).await;
    assert_eq!(fetched_filters(&backend), vec!["abc".to_string()]);

    let state = sync.state();
    assert!(state.is_current());
    assert_eq!(state.topics, vec![summary("abc"), summary("abcd")]);

    sync.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn only_newest_filter_result_is_rendered() {
    let backend = ScriptedBackend::new(&["abc", "abcd"]);
    backend.script(|s| {
        s.fetch_latency.insert("abc".into(), Duration::from_millis(500));
    });
    let (mut sync, _rx) = synchronizer(&backend);
    let mut watch = sync.subscribe();

    sync.set_filter("abc");
    sleep(Duration::from_millis(150)).await;
    assert_eq!(fetched_filters(&backend), vec!["abc".to_string()]);

    sync.set_filter("abcd");
    sleep(Duration::from_millis(2_000)).await;

    assert_eq!(fetched_filters(&backend), vec!["abc".to_string(), "abcd".to_string()]);
    let state = watch.borrow_and_update().clone();
    assert_eq!(state.filter, "abcd");
    assert_eq!(state.topics, vec![summary("abcd")]);
    assert_eq!(state.applied_sequence, state.sequence);

    sync.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn pending_retry_is_abandoned_on_filter_change() {
    let backend = ScriptedBackend::new(&["abc", "abcd"]);
    backend.script(|s| {
        s.failing_filters.insert("abc".into());
    });
    let (mut sync, mut rx) = synchronizer(&backend);

    sync.set_filter("abc");
    sleep(Duration::from_millis(1_200)).await;
    assert_eq!(backend.fetch_calls(), 2);
    assert!(matches!(sync.state().last_error, Some(SyncError::TransientFetch(_))));

    sync.set_filter("abcd");
    sleep(Duration::from_secs(20)).await;

    let filters = fetched_filters(&backend);
    assert_eq!(filters.iter().filter(|f| *f == "abc").count(), 2);
    assert_eq!(filters.last().map(String::as_str), Some("abcd"));
    assert!(rx.try_recv().is_err());
    assert!(!sync.has_escalated());

    let state = sync.state();
    assert_eq!(state.topics, vec![summary("abcd")]);
    assert!(state.last_error.is_none());

    sync.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn escalates_once_after_six_failures() {
    let backend = ScriptedBackend::new(&["orders"]);
    backend.script(|s| s.fetch_failures = u32::MAX);
    let (mut sync, mut rx) = synchronizer(&backend);

    sync.set_filter("");
    // attempts at 100, 1100, 2100, 3100, 4100, 5100 ms
    sleep(Duration::from_millis(5_050)).await;
    assert_eq!(backend.fetch_calls(), 5);
    assert!(rx.try_recv().is_err());

    sleep(Duration::from_millis(100)).await;
    assert_eq!(backend.fetch_calls(), 6);
    let escalation = rx.try_recv().unwrap();
    assert_eq!(escalation.attempts, 6);
    assert_eq!(escalation.filter, "");

    sleep(Duration::from_secs(30)).await;
    assert_eq!(backend.fetch_calls(), 6);
    assert!(rx.try_recv().is_err());

    // no new chains once escalated
    sync.set_filter("x");
    sleep(Duration::from_secs(30)).await;
    assert_eq!(backend.fetch_calls(), 6);

    sync.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn success_on_last_retry_does_not_escalate() {
    let backend = ScriptedBackend::new(&["orders"]);
    backend.script(|s| s.fetch_failures = 5);
    let (mut sync, mut rx) = synchronizer(&backend);

    sync.set_filter("");
    sleep(Duration::from_secs(10)).await;

    assert_eq!(backend.fetch_calls(), 6);
    assert!(rx.try_recv().is_err());
    let state = sync.state();
    assert_eq!(state.topics, vec![summary("orders")]);
    assert!(state.last_error.is_none());

    // next chain starts from a fresh attempt count
    backend.script(|s| s.fetch_failures = 5);
    sync.refresh();
    sleep(Duration::from_secs(10)).await;
    assert_eq!(backend.fetch_calls(), 12);
    assert!(!sync.has_escalated());

    sync.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_pending_debounce() {
    let backend = ScriptedBackend::new(&["orders"]);
    let (mut sync, _rx) = synchronizer(&backend);

    sync.set_filter("ord");
    sync.shutdown().await;
    sleep(Duration::from_secs(1)).await;
    assert_eq!(backend.fetch_calls(), 0);
}
