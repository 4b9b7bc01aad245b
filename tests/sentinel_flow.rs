//! End-to-end scenarios through the sentinel's public contract:
//! dispatch reports, observe persisted batches, snapshots, and
//! notifications.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use vigil::cache::{MemoryCache, StatsCache};
use vigil::notify::Notifier;
use vigil::sentinel::{ReportData, SentinelHandle, ServiceSentinel, StatsLoader};
use vigil::storage::{MemoryStore, MonitorStore};
use vigil::{Monitor, ProbeKind, TaskResult};

#[derive(Debug, Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<(String, bool)>>,
}

impl RecordingNotifier {
    fn sent(&self) -> Vec<(String, bool)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_notification(&self, text: &str, urgent: bool) {
        self.sent.lock().unwrap().push((text.to_string(), urgent));
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    notifier: Arc<RecordingNotifier>,
    sentinel: SentinelHandle,
}

async fn harness(monitors: Vec<Monitor>) -> Harness {
    let store = Arc::new(MemoryStore::new());
    for monitor in monitors {
        store.add_monitor(monitor);
    }
    let notifier = Arc::new(RecordingNotifier::default());
    let sentinel = ServiceSentinel::spawn(
        Arc::clone(&store) as Arc<dyn MonitorStore>,
        Arc::new(MemoryCache::new()),
        Arc::clone(&notifier) as Arc<dyn Notifier>,
    )
    .await
    .expect("spawn sentinel");
    Harness {
        store,
        notifier,
        sentinel,
    }
}

fn monitor(id: u64, name: &str, notify: bool) -> Monitor {
    Monitor {
        id,
        name: name.to_string(),
        target: "https://example.com".to_string(),
        kind: ProbeKind::HttpGet,
        notify,
    }
}

fn report(id: u64, successful: bool, delay: f32, data: &str) -> ReportData {
    ReportData {
        result: TaskResult {
            id,
            kind: ProbeKind::HttpGet,
            delay,
            successful,
            data: data.to_string(),
        },
        reporter: 1,
    }
}

/// Wait out the detached notification tasks.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn twenty_nine_successes_stay_quiet() {
    let h = harness(vec![monitor(1, "web", true)]).await;

    for _ in 0..29 {
        h.sentinel.dispatch(report(1, true, 100.0, "")).await;
    }
    let snapshot = h.sentinel.live_snapshot().await;
    settle().await;

    assert_eq!(snapshot.current_up[&1], 29);
    assert_eq!(snapshot.current_down[&1], 0);
    assert_eq!(snapshot.today[&1].up, 29);
    assert!((snapshot.today[&1].delay - 100.0).abs() < 1e-3);
    // First-ever state is "good": the maiden observation does not page.
    assert!(h.notifier.sent().is_empty());
    assert!(h.store.batch_sizes().is_empty());
    h.sentinel.shutdown().await;
}

#[tokio::test]
async fn thirtieth_report_persists_exactly_one_batch() {
    let h = harness(vec![monitor(1, "web", true)]).await;

    for _ in 0..30 {
        h.sentinel.dispatch(report(1, true, 100.0, "")).await;
    }
    let _ = h.sentinel.live_snapshot().await;

    assert_eq!(h.store.batch_sizes(), vec![30]);
    assert_eq!(h.store.history_count(), 30);

    // The window index reset: 29 more reports stay below the next batch.
    for _ in 0..29 {
        h.sentinel.dispatch(report(1, true, 100.0, "")).await;
    }
    let _ = h.sentinel.live_snapshot().await;
    assert_eq!(h.store.batch_sizes(), vec![30]);

    h.sentinel.dispatch(report(1, true, 100.0, "")).await;
    let _ = h.sentinel.live_snapshot().await;
    assert_eq!(h.store.batch_sizes(), vec![30, 30]);
    h.sentinel.shutdown().await;
}

#[tokio::test]
async fn mixed_window_goes_fault_and_notifies() {
    let h = harness(vec![monitor(2, "db", true)]).await;

    for _ in 0..20 {
        h.sentinel.dispatch(report(2, false, 0.0, "refused")).await;
    }
    for _ in 0..10 {
        h.sentinel.dispatch(report(2, true, 80.0, "")).await;
    }
    let snapshot = h.sentinel.live_snapshot().await;
    settle().await;

    // 10 * 100 / 30 = 33%: fault.
    assert_eq!(snapshot.current_up[&2], 10);
    assert_eq!(snapshot.current_down[&2], 20);

    let sent = h.notifier.sent();
    assert!(!sent.is_empty());
    assert!(sent
        .iter()
        .all(|(text, urgent)| text == "服务监控：db 服务状态：故障" && *urgent));
    h.sentinel.shutdown().await;
}

#[tokio::test]
async fn ssl_change_pages_once_transients_never() {
    let h = harness(vec![monitor(3, "edge", true), monitor(4, "mail", true)]).await;

    let first = "Let's Encrypt|2099-01-01 00:00:00 +0000 UTC";
    h.sentinel.dispatch(report(3, true, 5.0, first)).await;
    h.sentinel.dispatch(report(3, true, 5.0, first)).await;
    let _ = h.sentinel.live_snapshot().await;
    settle().await;
    assert!(h.notifier.sent().is_empty());

    let changed = "DigiCert|2099-06-01 00:00:00 +0000 UTC";
    h.sentinel.dispatch(report(3, true, 5.0, changed)).await;

    // Transient SSL failure on another monitor is suppressed outright.
    h.sentinel
        .dispatch(report(
            4,
            false,
            0.0,
            "SSL证书错误：read: connection timeout",
        ))
        .await;
    let _ = h.sentinel.live_snapshot().await;
    settle().await;

    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].0.starts_with("服务监控：edge SSL证书变更"));
    h.sentinel.shutdown().await;
}

#[tokio::test]
async fn deleting_one_monitor_leaves_the_rest() {
    let h = harness(vec![monitor(1, "web", false), monitor(2, "db", false)]).await;

    for _ in 0..5 {
        h.sentinel.dispatch(report(1, true, 10.0, "")).await;
        h.sentinel.dispatch(report(2, true, 20.0, "")).await;
    }
    h.sentinel.on_monitor_delete(1).await;

    let snapshot = h.sentinel.live_snapshot().await;
    assert!(!snapshot.today.contains_key(&1));
    assert_eq!(snapshot.today[&2].up, 5);
    assert_eq!(
        h.sentinel
            .monitors()
            .await
            .iter()
            .map(|m| m.id)
            .collect::<Vec<_>>(),
        vec![2]
    );
    h.sentinel.shutdown().await;
}

#[tokio::test]
async fn service_page_composes_live_overlay() {
    let h = harness(vec![monitor(1, "web", false)]).await;
    let cache = Arc::new(MemoryCache::new());
    let loader = StatsLoader::new(
        Arc::clone(&h.store) as Arc<dyn MonitorStore>,
        cache as Arc<dyn StatsCache>,
        h.sentinel.clone(),
    );

    for _ in 0..3 {
        h.sentinel.dispatch(report(1, true, 90.0, "")).await;
    }
    h.sentinel.dispatch(report(1, false, 0.0, "refused")).await;
    let _ = h.sentinel.live_snapshot().await;

    let page = loader.load_stats().await.unwrap();
    let entry = &page[&1];
    assert_eq!(entry.monitor.name, "web");
    assert_eq!(entry.up[29], 3);
    assert_eq!(entry.down[29], 1);
    assert_eq!(entry.current_up, 3);
    assert_eq!(entry.current_down, 1);
    assert_eq!(entry.total_up, 3);
    assert_eq!(entry.total_down, 1);
    h.sentinel.shutdown().await;
}
