//! Health monitoring against a remote store that goes down and recovers.

use asset_tiers::monitor::{AlertKind, AlertSeverity, CollectingAlertSink, Trend};
use asset_tiers::{
    AlertSink, AssetDelivery, CacheConfig, DeliveryConfig, DynObjectStore, HealthStatus,
    InMemoryObjectStore, MonitorConfig,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct TestEnv {
    _dir: TempDir,
    remote: Arc<InMemoryObjectStore>,
    sink: Arc<CollectingAlertSink>,
    delivery: AssetDelivery,
}

async fn create_test_env() -> TestEnv {
    create_test_env_with(|_| {}).await
}

async fn create_test_env_with(configure: impl FnOnce(&mut DeliveryConfig)) -> TestEnv {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let remote = Arc::new(InMemoryObjectStore::new("https://cdn.example.com"));
    let sink = Arc::new(CollectingAlertSink::new());

    let mut config = DeliveryConfig {
        local_root: dir.path().join("imgs"),
        monitor: MonitorConfig {
            check_interval: Duration::from_millis(10),
            error_threshold: 3,
            error_rate_threshold: 0.5,
            response_time_threshold: Duration::from_millis(150),
            alert_channels: Vec::new(),
        },
        ..DeliveryConfig::default()
    };
    configure(&mut config);

    let delivery = AssetDelivery::builder(config)
        .auto_create_dirs(true)
        .with_remote_store(remote.clone() as DynObjectStore)
        .with_alert_sinks(vec![sink.clone() as Arc<dyn AlertSink>])
        .build()
        .await
        .unwrap();

    TestEnv {
        _dir: dir,
        remote,
        sink,
        delivery,
    }
}

#[tokio::test]
async fn test_outage_alerts_once_and_recovers() {
    let env = create_test_env().await;
    let monitor = env.delivery.monitor();

    assert!(monitor.check_now().await.is_empty());

    env.remote.set_unavailable(true);
    for _ in 0..6 {
        monitor.check_now().await;
    }
    let alerts = env.sink.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].kind, AlertKind::Failure);
    assert_eq!(alerts[0].severity, AlertSeverity::Critical);
    assert_eq!(alerts[0].metrics["consecutive_failures"], 3);

    env.remote.set_unavailable(false);
    monitor.check_now().await;
    let snapshot = env.delivery.monitoring_snapshot();
    assert_eq!(snapshot.consecutive_failures, 0);
    assert!(!snapshot.failure_breach_active);
    assert_eq!(snapshot.samples.len(), 8);
    assert_eq!(
        snapshot.samples.last().map(|s| s.overall),
        Some(HealthStatus::Healthy)
    );
}

#[tokio::test]
async fn test_slow_remote_raises_latency_warning() {
    let env = create_test_env().await;
    let monitor = env.delivery.monitor();

    env.remote.set_delay(Some(Duration::from_millis(200)));
    monitor.check_now().await;
    monitor.check_now().await;

    let alerts = env.sink.alerts();
    let latency: Vec<_> = alerts
        .iter()
        .filter(|a| a.kind == AlertKind::Latency)
        .collect();
    assert_eq!(latency.len(), 1);
    assert_eq!(latency[0].severity, AlertSeverity::Warning);
    assert!(env.delivery.monitoring_snapshot().latency_breach_active);
}

#[tokio::test]
async fn test_error_trend_degrades_during_outage() {
    let env = create_test_env().await;
    let monitor = env.delivery.monitor();

    for _ in 0..4 {
        monitor.check_now().await;
    }
    env.remote.set_unavailable(true);
    for _ in 0..4 {
        monitor.check_now().await;
    }
    assert_eq!(
        env.delivery.monitoring_snapshot().trends.error_rate,
        Trend::Degrading
    );
}

#[tokio::test]
async fn test_background_loop_samples_until_stopped() {
    let env = create_test_env().await;
    assert!(env.delivery.start_monitoring());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(env.delivery.stop_monitoring().await);

    let snapshot = env.delivery.monitoring_snapshot();
    assert!(!snapshot.running);
    let taken = snapshot.samples.len();
    assert!(taken >= 1);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(env.delivery.monitoring_snapshot().samples.len(), taken);
}

#[tokio::test]
async fn test_entries_expiring_while_idle_stay_healthy() {
    let env = create_test_env_with(|config| {
        config.cache = CacheConfig {
            default_ttl: Duration::from_millis(50),
            ..CacheConfig::default()
        };
    })
    .await;
    for name in ["a", "b", "c"] {
        env.delivery
            .put_asset(&format!("imgs/{}.png", name), &b"png"[..], "image/png")
            .await
            .unwrap();
    }
    assert_eq!(env.delivery.service().cache().stats().unwrap().total_entries, 3);

    // Nobody reads the entries before they expire.
    tokio::time::sleep(Duration::from_millis(120)).await;

    let monitor = env.delivery.monitor();
    for _ in 0..4 {
        assert!(monitor.check_now().await.is_empty());
    }
    let snapshot = env.delivery.monitoring_snapshot();
    assert_eq!(snapshot.consecutive_failures, 0);
    assert!(snapshot
        .samples
        .iter()
        .all(|s| s.overall == HealthStatus::Healthy && s.cache == HealthStatus::Healthy));

    let stats = env.delivery.service().cache().stats().unwrap();
    assert_eq!(stats.total_entries, 0);
    assert_eq!(stats.total_bytes, 0);
    assert!(env.sink.is_empty());
}
