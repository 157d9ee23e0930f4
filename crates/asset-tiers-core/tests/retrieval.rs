//! Tier fallback behavior of the retrieval service.

use asset_tiers::remote::{CircuitBreakerConfig, CircuitState};
use asset_tiers::{
    AssetDelivery, AssetError, DeliveryConfig, DynObjectStore, InMemoryObjectStore, Tier,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct TestEnv {
    _dir: TempDir,
    remote: Arc<InMemoryObjectStore>,
    delivery: AssetDelivery,
}

async fn create_test_env(configure: impl FnOnce(&mut DeliveryConfig)) -> TestEnv {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let mut config = DeliveryConfig {
        local_root: dir.path().join("imgs"),
        tier_timeout: Duration::from_millis(100),
        ..DeliveryConfig::default()
    };
    configure(&mut config);

    let remote = Arc::new(InMemoryObjectStore::new("https://cdn.example.com"));
    let delivery = AssetDelivery::builder(config)
        .auto_create_dirs(true)
        .with_remote_store(remote.clone() as DynObjectStore)
        .with_circuit_breaker(CircuitBreakerConfig {
            failure_threshold: 2,
            recovery_timeout: Duration::from_secs(60),
            half_open_max_calls: 1,
        })
        .build()
        .await
        .unwrap();
    TestEnv {
        _dir: dir,
        remote,
        delivery,
    }
}

#[tokio::test]
async fn test_remote_timeout_falls_back_to_local() {
    let env = create_test_env(|_| {}).await;
    env.remote.insert("imgs/a.png", &b"remote"[..], "image/png");
    env.remote.set_delay(Some(Duration::from_secs(5)));
    env.delivery
        .service()
        .local()
        .put("imgs/a.png", b"local")
        .await
        .unwrap();

    let payload = env.delivery.get_asset("imgs/a.png").await.unwrap();
    assert_eq!(payload.source, Tier::Local);
    assert_eq!(&payload.bytes[..], b"local");

    // The local hit was written through to the cache.
    env.delivery.service().local().put("imgs/a.png", b"changed").await.unwrap();
    let again = env.delivery.get_asset("imgs/a.png").await.unwrap();
    assert_eq!(again.source, Tier::Cache);
    assert_eq!(&again.bytes[..], b"local");
}

#[tokio::test]
async fn test_breaker_opens_and_skips_remote() {
    let env = create_test_env(|_| {}).await;
    env.remote.set_unavailable(true);
    env.delivery
        .service()
        .local()
        .put("imgs/a.png", b"local")
        .await
        .unwrap();

    for _ in 0..2 {
        env.delivery.invalidate("imgs/a.png").unwrap();
        env.delivery.get_asset("imgs/a.png").await.unwrap();
    }
    assert_eq!(env.delivery.service().circuit_breaker().state(), CircuitState::Open);

    let calls = env.remote.get_calls();
    env.delivery.invalidate("imgs/a.png").unwrap();
    let payload = env.delivery.get_asset("imgs/a.png").await.unwrap();
    assert_eq!(payload.source, Tier::Local);
    assert_eq!(env.remote.get_calls(), calls);
}

#[tokio::test]
async fn test_not_found_does_not_trip_breaker() {
    let env = create_test_env(|_| {}).await;
    env.delivery
        .service()
        .local()
        .put("imgs/a.png", b"local")
        .await
        .unwrap();

    for _ in 0..5 {
        env.delivery.invalidate("imgs/a.png").unwrap();
        env.delivery.get_asset("imgs/a.png").await.unwrap();
    }
    assert_eq!(env.delivery.service().circuit_breaker().state(), CircuitState::Closed);
}

#[tokio::test]
async fn test_concurrent_requests_share_one_remote_fetch() {
    let env = create_test_env(|config| config.tier_timeout = Duration::from_secs(5)).await;
    env.remote.insert("imgs/a.png", &b"remote"[..], "image/png");
    env.remote.set_delay(Some(Duration::from_millis(100)));

    let requests = (0..8).map(|_| env.delivery.get_asset("imgs/a.png"));
    let results = futures::future::join_all(requests).await;
    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(env.remote.get_calls(), 1);
}

#[tokio::test]
async fn test_every_tier_missing_is_unavailable() {
    let env = create_test_env(|_| {}).await;
    let err = env.delivery.get_asset("imgs/missing.png").await.unwrap_err();
    match err {
        AssetError::AssetUnavailable {
            key,
            remote,
            cache,
            local,
        } => {
            assert_eq!(key, "imgs/missing.png");
            assert!(remote.is_not_found());
            assert!(cache.is_not_found());
            assert!(local.is_not_found());
        }
        other => panic!("expected AssetUnavailable, got {other:?}"),
    }
}

#[tokio::test]
async fn test_put_falls_back_to_local_when_remote_fails() {
    let env = create_test_env(|_| {}).await;
    env.remote.set_unavailable(true);

    let outcome = env
        .delivery
        .put_asset("imgs/new.png", &b"bytes"[..], "image/png")
        .await
        .unwrap();
    assert_eq!(outcome.tiers_written, vec![Tier::Local, Tier::Cache]);
    assert!(outcome.public_url.is_none());

    let exists = env.delivery.exists("imgs/new.png").await;
    assert!(!exists.remote);
    assert!(exists.cache);
    assert!(exists.local);
}

#[tokio::test]
async fn test_put_without_fallback_fails() {
    let env = create_test_env(|config| config.remote.fallback_enabled = false).await;
    env.remote.set_unavailable(true);

    let result = env
        .delivery
        .put_asset("imgs/new.png", &b"bytes"[..], "image/png")
        .await;
    assert!(result.is_err());
    assert!(!env.delivery.exists("imgs/new.png").await.cache);
}
