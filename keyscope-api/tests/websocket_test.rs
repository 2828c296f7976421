//! End-to-end tests for the HTTP surface
//!
//! Runs the real router against an in-memory store. Websocket tests bind an
//! ephemeral port and connect with tokio-tungstenite.
//!
//! Run with: cargo test -p keyscope-api --test websocket_test

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures::StreamExt;
use keyscope_api::{create_router, AppState};
use keyscope_core::test_helpers::MemoryStore;
use keyscope_core::store::NotificationStream;
use keyscope_core::{Envelope, MemoryUsage, Store};
use keyscope_live::{Hub, KeyFilter, NotificationController, StatsPublisher};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

struct TestApp {
    memory: Arc<MemoryStore>,
    state: AppState,
}

/// Delegates to the in-memory store but answers DBSIZE slowly
struct SlowDbSize {
    inner: Arc<MemoryStore>,
    delay: Duration,
}

#[async_trait]
impl Store for SlowDbSize {
    async fn notification_config(&self) -> keyscope_core::Result<String> {
        self.inner.notification_config().await
    }

    async fn set_notification_config(&self, flags: &str) -> keyscope_core::Result<()> {
        self.inner.set_notification_config(flags).await
    }

    async fn psubscribe(&self, pattern: &str) -> keyscope_core::Result<NotificationStream> {
        self.inner.psubscribe(pattern).await
    }

    async fn db_size(&self) -> keyscope_core::Result<i64> {
        tokio::time::sleep(self.delay).await;
        self.inner.db_size().await
    }

    async fn memory_usage(&self) -> keyscope_core::Result<MemoryUsage> {
        self.inner.memory_usage().await
    }
}

fn test_app(memory: MemoryStore) -> TestApp {
    let memory = Arc::new(memory);
    let store: Arc<dyn Store> = memory.clone();
    app_over(memory, store)
}

fn app_over(memory: Arc<MemoryStore>, store: Arc<dyn Store>) -> TestApp {
    let shutdown = CancellationToken::new();
    let (hub, _task) = Hub::spawn(64, shutdown.clone());
    let controller = Arc::new(NotificationController::new(
        store.clone(),
        hub.clone(),
        0,
        KeyFilter::new("app:"),
        16,
        shutdown.clone(),
    ));
    let stats = Arc::new(StatsPublisher::new(
        store,
        hub.clone(),
        controller.clone(),
        Duration::from_secs(5),
    ));

    TestApp {
        memory,
        state: AppState {
            controller,
            hub,
            stats,
            queue_capacity: 64,
            write_timeout: Duration::from_secs(10),
            shutdown,
        },
    }
}

async fn serve(state: AppState) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, create_router(state)).await.unwrap();
    });
    format!("ws://{addr}/ws")
}

async fn next_envelope<S>(socket: &mut S) -> Envelope
where
    S: futures::Stream<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection closed")
            .expect("read failed");
        if let tungstenite::Message::Text(text) = message {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn wait_for_clients(state: &AppState, expected: usize) {
    for _ in 0..200 {
        if state.hub.client_count().await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {expected} registered viewers");
}

async fn call(state: &AppState, method: &str, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = create_router(state.clone())
        .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null))
}

#[tokio::test]
async fn test_greeting_is_status_then_stats() {
    let app = test_app(MemoryStore::with_notify_flags("KEA"));
    app.memory.set_db_size(1024);
    app.memory.set_memory(Some(MemoryUsage {
        used_memory: 524_288,
        used_memory_human: "512.00K".to_string(),
    }));
    app.state.controller.enable().await.unwrap();
    let url = serve(app.state.clone()).await;

    let (mut socket, _) = tokio_tungstenite::connect_async(url).await.unwrap();

    assert_eq!(next_envelope(&mut socket).await, Envelope::status(true, ""));
    match next_envelope(&mut socket).await {
        Envelope::Stats(stats) => {
            assert_eq!(stats.db_size, 1024);
            assert_eq!(stats.used_memory_human, "512.00K");
            assert!(stats.notifications_on);
        }
        other => panic!("expected stats, got {other:?}"),
    }
}

#[tokio::test]
async fn test_enable_during_greeting_is_not_lost() {
    let memory = Arc::new(MemoryStore::with_notify_flags("KEA"));
    let store: Arc<dyn Store> = Arc::new(SlowDbSize {
        inner: memory.clone(),
        delay: Duration::from_millis(300),
    });
    let app = app_over(memory, store);
    let url = serve(app.state.clone()).await;

    let (mut socket, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    // The greeting snapshot is still being collected when this lands.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(app.state.controller.enable().await.unwrap());

    assert_eq!(next_envelope(&mut socket).await, Envelope::status(true, ""));
    match next_envelope(&mut socket).await {
        Envelope::Stats(stats) => assert!(stats.notifications_on),
        other => panic!("expected stats, got {other:?}"),
    }
}

#[tokio::test]
async fn test_key_events_reach_viewer_after_enable() {
    let app = test_app(MemoryStore::new());
    let url = serve(app.state.clone()).await;

    let (mut socket, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    assert_eq!(next_envelope(&mut socket).await, Envelope::status(false, ""));
    assert!(matches!(next_envelope(&mut socket).await, Envelope::Stats(_)));
    wait_for_clients(&app.state, 1).await;

    let (status, body) = call(&app.state, "POST", "/api/notifications/enable").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!({"live": true, "changed": true}));
    assert_eq!(next_envelope(&mut socket).await, Envelope::status(true, ""));

    app.memory.touch(0, "other:1", "set");
    app.memory.touch(0, "app:42", "set");

    let event = next_envelope(&mut socket).await;
    assert_eq!(
        event,
        Envelope::from(keyscope_core::ChangeEvent::new("set", "app:42"))
    );
}

#[tokio::test]
async fn test_viewer_disconnect_unregisters() {
    let app = test_app(MemoryStore::new());
    let url = serve(app.state.clone()).await;

    let (mut socket, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    next_envelope(&mut socket).await;
    wait_for_clients(&app.state, 1).await;

    socket.close(None).await.unwrap();
    wait_for_clients(&app.state, 0).await;
}

#[tokio::test]
async fn test_shutdown_closes_viewers() {
    let app = test_app(MemoryStore::new());
    let url = serve(app.state.clone()).await;

    let (mut socket, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    next_envelope(&mut socket).await;
    next_envelope(&mut socket).await;
    wait_for_clients(&app.state, 1).await;

    app.state.shutdown.cancel();

    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match socket.next().await {
                None | Some(Err(_)) | Some(Ok(tungstenite::Message::Close(_))) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "server must close the connection on shutdown");
}

#[tokio::test]
async fn test_toggle_endpoints() {
    let app = test_app(MemoryStore::with_notify_flags("KEA"));

    let (status, body) = call(&app.state, "GET", "/api/notifications").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!({"live": false, "clients": 0}));

    let (_, body) = call(&app.state, "POST", "/api/notifications/enable").await;
    assert_eq!(body, serde_json::json!({"live": true, "changed": true}));
    let (_, body) = call(&app.state, "POST", "/api/notifications/enable").await;
    assert_eq!(body, serde_json::json!({"live": true, "changed": false}));

    let (_, body) = call(&app.state, "POST", "/api/notifications/disable").await;
    assert_eq!(body, serde_json::json!({"live": false, "changed": true}));
    let (_, body) = call(&app.state, "POST", "/api/notifications/disable").await;
    assert_eq!(body, serde_json::json!({"live": false, "changed": false}));
}

#[tokio::test]
async fn test_enable_failure_is_503() {
    let app = test_app(MemoryStore::new());
    app.memory.fail_config(true);

    let (status, body) = call(&app.state, "POST", "/api/notifications/enable").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], 503);
    assert!(!app.state.controller.is_enabled());
}

#[tokio::test]
async fn test_health() {
    let app = test_app(MemoryStore::new());
    let response = create_router(app.state.clone())
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"OK");
}
