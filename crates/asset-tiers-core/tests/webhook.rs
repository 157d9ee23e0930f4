//! Webhook alert delivery against an in-process HTTP receiver.

use asset_tiers::monitor::{AlertKind, AlertSeverity, CollectingAlertSink, WebhookAlertSink};
use asset_tiers::{
    Alert, AlertChannelConfig, AlertSink, AssetDelivery, AssetError, DeliveryConfig,
    DynObjectStore, InMemoryObjectStore, MonitorConfig,
};
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;

#[derive(Debug, Clone)]
struct Received {
    content_type: Option<String>,
    body: Value,
}

#[derive(Clone, Default)]
struct Receiver {
    received: Arc<Mutex<Vec<Received>>>,
}

impl Receiver {
    fn received(&self) -> Vec<Received> {
        self.received.lock().unwrap().clone()
    }
}

/// Records the request and answers with the status named in the path.
async fn hook(
    State(receiver): State<Receiver>,
    Path(status): Path<u16>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StatusCode {
    receiver.received.lock().unwrap().push(Received {
        content_type: headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body,
    });
    StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

async fn start_receiver() -> (String, Receiver) {
    let receiver = Receiver::default();
    let app = Router::new()
        .route("/hooks/:status", post(hook))
        .with_state(receiver.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}/hooks", addr), receiver)
}

struct TestEnv {
    _dir: TempDir,
    remote: Arc<InMemoryObjectStore>,
    delivery: AssetDelivery,
}

async fn create_test_env(
    channels: Vec<AlertChannelConfig>,
    sinks: Option<Vec<Arc<dyn AlertSink>>>,
) -> TestEnv {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let remote = Arc::new(InMemoryObjectStore::new("https://cdn.example.com"));
    let config = DeliveryConfig {
        local_root: dir.path().join("imgs"),
        monitor: MonitorConfig {
            check_interval: Duration::from_millis(10),
            error_threshold: 3,
            error_rate_threshold: 0.5,
            response_time_threshold: Duration::from_secs(2),
            alert_channels: channels,
        },
        ..DeliveryConfig::default()
    };

    let mut builder = AssetDelivery::builder(config)
        .auto_create_dirs(true)
        .with_remote_store(remote.clone() as DynObjectStore);
    if let Some(sinks) = sinks {
        builder = builder.with_alert_sinks(sinks);
    }
    TestEnv {
        _dir: dir,
        remote,
        delivery: builder.build().await.unwrap(),
    }
}

fn sample_alert() -> Alert {
    Alert {
        timestamp: Utc::now(),
        severity: AlertSeverity::Warning,
        kind: AlertKind::Latency,
        message: "response time 2500ms exceeds threshold 2000ms".into(),
        metrics: serde_json::json!({ "response_time_ms": 2500, "threshold_ms": 2000 }),
    }
}

#[tokio::test]
async fn test_breach_posts_alert_json() {
    let (base, receiver) = start_receiver().await;
    let env = create_test_env(
        vec![AlertChannelConfig::Webhook {
            url: format!("{}/200", base),
        }],
        None,
    )
    .await;

    env.remote.set_unavailable(true);
    for _ in 0..5 {
        env.delivery.monitor().check_now().await;
    }

    let received = receiver.received();
    assert_eq!(received.len(), 1);
    let request = &received[0];
    assert_eq!(request.content_type.as_deref(), Some("application/json"));

    let body = request.body.as_object().unwrap();
    let mut fields: Vec<_> = body.keys().map(String::as_str).collect();
    fields.sort();
    assert_eq!(fields, vec!["message", "metrics", "severity", "timestamp"]);
    assert_eq!(body["severity"], "critical");
    assert!(body["message"].as_str().unwrap().contains("consecutive"));
    assert_eq!(body["metrics"]["consecutive_failures"], 3);
    assert!(body["timestamp"]
        .as_str()
        .unwrap()
        .parse::<DateTime<Utc>>()
        .is_ok());
}

#[tokio::test]
async fn test_server_error_is_reported_by_sink() {
    let (base, receiver) = start_receiver().await;
    let sink = WebhookAlertSink::new(format!("{}/500", base)).unwrap();

    let err = sink.dispatch(&sample_alert()).await.unwrap_err();
    assert!(matches!(err, AssetError::Network { .. }));
    assert!(err.to_string().contains("500"));
    assert_eq!(receiver.received().len(), 1);
    assert_eq!(receiver.received()[0].body["severity"], "warning");
}

#[tokio::test]
async fn test_unreachable_webhook_is_reported_by_sink() {
    // Nothing listens on port 9 of the loopback interface.
    let sink = WebhookAlertSink::new("http://127.0.0.1:9/hooks/200").unwrap();
    let err = sink.dispatch(&sample_alert()).await.unwrap_err();
    assert!(matches!(err, AssetError::Network { .. }));
}

#[tokio::test]
async fn test_failing_webhook_does_not_block_other_sinks() {
    let (base, receiver) = start_receiver().await;
    let collecting = Arc::new(CollectingAlertSink::new());
    let sinks: Vec<Arc<dyn AlertSink>> = vec![
        Arc::new(WebhookAlertSink::new(format!("{}/500", base)).unwrap()),
        Arc::new(WebhookAlertSink::new("http://127.0.0.1:9/hooks/200").unwrap()),
        collecting.clone(),
    ];
    let env = create_test_env(Vec::new(), Some(sinks)).await;

    env.remote.set_unavailable(true);
    let mut raised = Vec::new();
    for _ in 0..3 {
        raised.extend(env.delivery.monitor().check_now().await);
    }

    assert_eq!(raised.len(), 1);
    assert_eq!(receiver.received().len(), 1);
    assert_eq!(collecting.alerts(), raised);
    assert_eq!(env.delivery.monitoring_snapshot().alerts_sent, 1);
}
