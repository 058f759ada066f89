//! Analytics relay integration tests against an in-process fake collector

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Method, Request, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use museum::api::{create_router, AnalyticsInfo, AppState};
use museum::auth::AuthService;
use museum::config::CorsConfig;
use museum::relay::{EventRelay, RelayError, RelayOptions, RelayState, TrackEvent};
use museum::storage::MemoryStorage;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tower::ServiceExt;

#[derive(Default)]
struct Collector {
    /// Logins answer 503 when set
    unavailable: bool,
    send_delay: Duration,
    websites: Vec<(String, String)>,
    logins: AtomicUsize,
    sends_started: AtomicUsize,
    created: Mutex<Vec<String>>,
    events: Mutex<Vec<(Value, HeaderMap)>>,
}

impl Collector {
    fn event_count(&self) -> usize {
        self.events.lock().unwrap().len()
    }
}

async fn login(State(collector): State<Arc<Collector>>, Json(body): Json<Value>) -> impl IntoResponse {
    collector.logins.fetch_add(1, Ordering::SeqCst);
    if collector.unavailable {
        return (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"error": "starting"})));
    }
    if body["username"] != "admin" || body["password"] != "umami" {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "bad credentials"})));
    }
    (StatusCode::OK, Json(json!({"token": "test-token"})))
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        == Some("Bearer test-token")
}

async fn list_websites(
    State(collector): State<Arc<Collector>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({})));
    }
    let data: Vec<Value> = collector
        .websites
        .iter()
        .map(|(id, domain)| json!({"id": id, "domain": domain, "name": domain}))
        .collect();
    (StatusCode::OK, Json(json!({ "data": data })))
}

async fn create_website(
    State(collector): State<Arc<Collector>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({})));
    }
    let domain = body["domain"].as_str().unwrap_or_default().to_string();
    collector.created.lock().unwrap().push(domain.clone());
    (StatusCode::OK, Json(json!({"id": format!("created-{domain}")})))
}

async fn send(
    State(collector): State<Arc<Collector>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StatusCode {
    collector.sends_started.fetch_add(1, Ordering::SeqCst);
    if !collector.send_delay.is_zero() {
        tokio::time::sleep(collector.send_delay).await;
    }
    collector.events.lock().unwrap().push((body, headers));
    StatusCode::OK
}

/// Serve the collector on an ephemeral port and return its base URL
async fn spawn_collector(collector: Arc<Collector>) -> String {
    let app = Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/websites", post(create_website).get(list_websites))
        .route("/api/send", post(send))
        .with_state(collector);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn options(url: &str) -> RelayOptions {
    RelayOptions {
        username: "admin".to_string(),
        password: "umami".to_string(),
        domain: "museum.example".to_string(),
        retry_delay: Duration::from_millis(10),
        attempt_timeout: Duration::from_secs(2),
        ..RelayOptions::new(url)
    }
}

fn event(path: &str) -> TrackEvent {
    TrackEvent {
        path: path.to_string(),
        hostname: "museum.example".to_string(),
        title: path.to_string(),
        language: "en-US".to_string(),
        referrer: "https://search.example".to_string(),
        user_agent: "Mozilla/5.0 (Test)".to_string(),
        ip: "1.2.3.4".to_string(),
    }
}

async fn wait_until<F: Fn() -> bool>(condition: F, limit: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < limit {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

#[tokio::test]
async fn test_resolves_existing_website() {
    let collector = Arc::new(Collector {
        websites: vec![
            ("site-other".to_string(), "other.example".to_string()),
            ("site-museum".to_string(), "museum.example".to_string()),
        ],
        ..Default::default()
    });
    let url = spawn_collector(Arc::clone(&collector)).await;

    let relay = EventRelay::new(options(&url)).unwrap();
    relay.initialize().await.unwrap();

    assert_eq!(relay.state(), RelayState::Ready);
    let identity = relay.identity().unwrap();
    assert_eq!(identity.website_id, "site-museum");
    assert_eq!(identity.base_url, url);
    assert!(collector.created.lock().unwrap().is_empty());

    relay.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_creates_missing_website() {
    let collector = Arc::new(Collector::default());
    let url = spawn_collector(Arc::clone(&collector)).await;

    let relay = EventRelay::new(options(&format!("{url}/"))).unwrap();
    relay.initialize().await.unwrap();

    assert_eq!(
        relay.identity().unwrap().website_id,
        "created-museum.example"
    );
    assert_eq!(*collector.created.lock().unwrap(), vec!["museum.example"]);

    // A second initialize is rejected and does not resolve again
    assert!(matches!(
        relay.initialize().await,
        Err(RelayError::InvalidState(RelayState::Ready, _))
    ));
    assert_eq!(collector.logins.load(Ordering::SeqCst), 1);

    relay.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_configured_website_id_skips_login() {
    let collector = Arc::new(Collector::default());
    let url = spawn_collector(Arc::clone(&collector)).await;

    let relay = EventRelay::new(RelayOptions {
        website_id: Some("preset".to_string()),
        ..options(&url)
    })
    .unwrap();
    relay.initialize().await.unwrap();

    assert_eq!(relay.identity().unwrap().website_id, "preset");
    assert_eq!(collector.logins.load(Ordering::SeqCst), 0);

    relay.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_events_carry_visitor_identity() {
    let collector = Arc::new(Collector {
        websites: vec![("site-museum".to_string(), "museum.example".to_string())],
        ..Default::default()
    });
    let url = spawn_collector(Arc::clone(&collector)).await;

    let relay = EventRelay::new(options(&url)).unwrap();
    relay.initialize().await.unwrap();

    for path in ["/", "/news", "/exhibitions"] {
        relay.track(event(path));
    }

    assert!(wait_until(|| collector.event_count() == 3, Duration::from_secs(5)).await);

    let events = collector.events.lock().unwrap().clone();
    let mut paths: Vec<String> = events
        .iter()
        .map(|(body, _)| body["payload"]["url"].as_str().unwrap().to_string())
        .collect();
    paths.sort();
    assert_eq!(paths, vec!["/", "/exhibitions", "/news"]);

    for (body, headers) in &events {
        assert_eq!(body["type"], "event");
        assert_eq!(body["payload"]["website"], "site-museum");
        assert_eq!(body["payload"]["hostname"], "museum.example");
        assert_eq!(body["payload"]["language"], "en-US");
        assert_eq!(body["payload"]["referrer"], "https://search.example");
        assert_eq!(headers.get(header::USER_AGENT).unwrap(), "Mozilla/5.0 (Test)");
        assert_eq!(headers.get("x-forwarded-for").unwrap(), "1.2.3.4");
    }

    assert!(wait_until(|| relay.counters().sent == 3, Duration::from_secs(5)).await);
    let counters = relay.counters();
    assert_eq!(counters.enqueued, 3);
    assert_eq!(counters.dropped, 0);
    assert_eq!(counters.failed, 0);

    relay.shutdown(Duration::from_secs(1)).await;
    assert_eq!(relay.state(), RelayState::Stopped);
}

#[tokio::test]
async fn test_unreachable_collector_fails_after_bounded_attempts() {
    let collector = Arc::new(Collector {
        unavailable: true,
        ..Default::default()
    });
    let url = spawn_collector(Arc::clone(&collector)).await;

    let relay = EventRelay::new(options(&url)).unwrap();
    let result = relay.initialize().await;

    assert!(matches!(
        result,
        Err(RelayError::UpstreamUnavailable { attempts: 10, .. })
    ));
    assert_eq!(collector.logins.load(Ordering::SeqCst), 10);
    assert_eq!(relay.state(), RelayState::Failed);
    assert!(relay.identity().is_none());

    // Tracking is a counted no-op
    relay.track(event("/"));
    assert_eq!(relay.counters().dropped, 1);
    assert_eq!(relay.counters().enqueued, 0);

    relay.shutdown(Duration::from_millis(100)).await;
    assert_eq!(relay.state(), RelayState::Failed);
    assert_eq!(collector.sends_started.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_slow_collector_never_blocks_tracking() {
    const EVENTS: u64 = 5_000;
    const CAPACITY: usize = 16;

    let collector = Arc::new(Collector {
        send_delay: Duration::from_millis(200),
        ..Default::default()
    });
    let url = spawn_collector(Arc::clone(&collector)).await;

    let relay = EventRelay::new(RelayOptions {
        website_id: Some("site-museum".to_string()),
        queue_capacity: CAPACITY,
        workers: 2,
        ..options(&url)
    })
    .unwrap();
    relay.initialize().await.unwrap();

    let start = Instant::now();
    for i in 0..EVENTS {
        relay.track(event(&format!("/page/{i}")));
        assert!(relay.counters().queue_depth <= CAPACITY);
    }
    assert!(start.elapsed() < Duration::from_secs(2));

    let counters = relay.counters();
    assert_eq!(counters.enqueued + counters.dropped, EVENTS);
    assert!(counters.dropped > 0);
    assert!(counters.enqueued <= (CAPACITY as u64) + 2 + counters.sent + counters.failed);

    relay.shutdown(Duration::from_millis(300)).await;
    assert_eq!(relay.state(), RelayState::Stopped);
    assert_eq!(relay.counters().queue_depth, 0);

    // Once stopped, tracking only counts drops
    let before = relay.counters();
    relay.track(event("/late"));
    let after = relay.counters();
    assert_eq!(after.dropped, before.dropped + 1);
    assert_eq!(after.enqueued, before.enqueued);
}

#[tokio::test]
async fn test_shutdown_aborts_stuck_sends_after_grace() {
    let collector = Arc::new(Collector {
        send_delay: Duration::from_secs(30),
        ..Default::default()
    });
    let url = spawn_collector(Arc::clone(&collector)).await;

    let relay = EventRelay::new(RelayOptions {
        website_id: Some("site-museum".to_string()),
        send_timeout: Duration::from_secs(60),
        workers: 1,
        ..options(&url)
    })
    .unwrap();
    relay.initialize().await.unwrap();

    relay.track(event("/"));
    assert!(
        wait_until(
            || collector.sends_started.load(Ordering::SeqCst) == 1,
            Duration::from_secs(5)
        )
        .await
    );

    let start = Instant::now();
    relay.shutdown(Duration::from_millis(100)).await;

    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(relay.state(), RelayState::Stopped);
    assert_eq!(collector.event_count(), 0);
}

#[tokio::test]
async fn test_visit_endpoint_forwards_to_collector() {
    let collector = Arc::new(Collector {
        websites: vec![("site-museum".to_string(), "museum.example".to_string())],
        ..Default::default()
    });
    let url = spawn_collector(Arc::clone(&collector)).await;

    let relay = Arc::new(EventRelay::new(options(&url)).unwrap());
    relay.initialize().await.unwrap();

    let analytics = AnalyticsInfo {
        enabled: true,
        url: url.clone(),
        website_id: None,
    };
    let state = Arc::new(AppState::new(
        Arc::new(MemoryStorage::new()),
        Some(Arc::clone(&relay)),
        analytics,
    ));
    let app = create_router(
        state,
        Arc::new(AuthService::new("curator", "secret")),
        &CorsConfig::default(),
    );

    let request = Request::builder()
        .method(Method::POST)
        .uri("/museum/visit")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::HOST, "museum.example:8080")
        .header(header::USER_AGENT, "Mozilla/5.0 (Visitor)")
        .header(header::ACCEPT_LANGUAGE, "ru-RU,ru;q=0.9")
        .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
        .body(Body::from(json!({"page": "/exhibitions"}).to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    assert!(wait_until(|| collector.event_count() == 1, Duration::from_secs(5)).await);
    let (body, headers) = collector.events.lock().unwrap()[0].clone();
    assert_eq!(body["payload"]["url"], "/exhibitions");
    assert_eq!(body["payload"]["hostname"], "museum.example");
    assert_eq!(body["payload"]["language"], "ru-RU");
    assert_eq!(headers.get("x-forwarded-for").unwrap(), "203.0.113.7");
    assert_eq!(headers.get(header::USER_AGENT).unwrap(), "Mozilla/5.0 (Visitor)");

    // The frontend learns the resolved website id
    let response = app
        .oneshot(
            Request::builder()
                .uri("/museum/analytics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let info: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(info["enabled"], true);
    assert_eq!(info["website_id"], "site-museum");

    relay.shutdown(Duration::from_secs(1)).await;
}
