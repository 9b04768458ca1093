use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::{Json, Router};
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::{Duration, sleep};

pub const PATH_GET: &str = "/get";
pub const PATH_POST: &str = "/post";
pub const PATH_STATUS: &str = "/status/{code}";
pub const PATH_JSON: &str = "/json";
pub const PATH_XML: &str = "/xml";
pub const PATH_BASIC_AUTH: &str = "/basic-auth/{user}/{password}";
pub const PATH_DELAY: &str = "/delay/{ms}";

const MAX_DELAY_MS: u64 = 10_000;

const XML_BODY: &str = r#"<?xml version="1.0" encoding="us-ascii"?>
<slideshow title="Sample Slide Show" date="Date of publication" author="Yours Truly">
  <slide type="all">
    <title>Wake up to WonderWidgets!</title>
  </slide>
</slideshow>
"#;

#[derive(Debug, Clone, Default)]
pub struct TestServerStats {
    requests_total: Arc<AtomicU64>,
    auth_failures: Arc<AtomicU64>,
}

impl TestServerStats {
    fn inc_requests_total(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    fn inc_auth_failures(&self) {
        self.auth_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn auth_failures(&self) -> u64 {
        self.auth_failures.load(Ordering::Relaxed)
    }
}

fn header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|(k, v)| {
            (
                k.as_str().to_string(),
                String::from_utf8_lossy(v.as_bytes()).into_owned(),
            )
        })
        .collect()
}

async fn handle_get(
    State(stats): State<TestServerStats>,
    Query(args): Query<BTreeMap<String, String>>,
    headers: HeaderMap,
) -> Json<Value> {
    stats.inc_requests_total();
    Json(json!({
        "args": args,
        "headers": header_map(&headers),
    }))
}

async fn handle_post(
    State(stats): State<TestServerStats>,
    Query(args): Query<BTreeMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    stats.inc_requests_total();

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    let mut json_body = Value::Null;
    let mut form = BTreeMap::new();
    if content_type.starts_with("application/json") {
        match serde_json::from_slice(&body) {
            Ok(v) => json_body = v,
            Err(_) => return (StatusCode::BAD_REQUEST, "bad json").into_response(),
        }
    } else if content_type.starts_with("application/x-www-form-urlencoded") {
        form = url::form_urlencoded::parse(&body)
            .into_owned()
            .collect::<BTreeMap<String, String>>();
    }

    Json(json!({
        "args": args,
        "headers": header_map(&headers),
        "json": json_body,
        "form": form,
        "data": String::from_utf8_lossy(&body),
    }))
    .into_response()
}

async fn handle_status(State(stats): State<TestServerStats>, Path(code): Path<u16>) -> StatusCode {
    stats.inc_requests_total();
    StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST)
}

async fn handle_json(State(stats): State<TestServerStats>) -> Json<Value> {
    stats.inc_requests_total();
    Json(json!({
        "slideshow": {
            "author": "Yours Truly",
            "title": "Sample Slide Show",
            "slides": [
                {"title": "Wake up to WonderWidgets!", "type": "all"},
                {"title": "Overview", "type": "all", "items": ["Why WonderWidgets are great", "Who buys WonderWidgets"]}
            ]
        }
    }))
}

async fn handle_xml(State(stats): State<TestServerStats>) -> impl IntoResponse {
    stats.inc_requests_total();
    ([(header::CONTENT_TYPE, "application/xml")], XML_BODY)
}

async fn handle_basic_auth(
    State(stats): State<TestServerStats>,
    Path((user, password)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    stats.inc_requests_total();

    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Basic "))
        .and_then(|token| STANDARD.decode(token.trim()).ok())
        .and_then(|raw| String::from_utf8(raw).ok());

    if presented.as_deref() == Some(format!("{user}:{password}").as_str()) {
        return Json(json!({"authenticated": true, "user": user})).into_response();
    }

    stats.inc_auth_failures();
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Basic realm=\"stampede\"")],
    )
        .into_response()
}

async fn handle_delay(State(stats): State<TestServerStats>, Path(ms): Path<u64>) -> Json<Value> {
    stats.inc_requests_total();
    let ms = ms.min(MAX_DELAY_MS);
    sleep(Duration::from_millis(ms)).await;
    Json(json!({"delay_ms": ms}))
}

pub fn router(stats: TestServerStats) -> Router {
    Router::new()
        .route(PATH_GET, get(handle_get))
        .route(PATH_POST, post(handle_post))
        .route(PATH_STATUS, any(handle_status))
        .route(PATH_JSON, get(handle_json))
        .route(PATH_XML, get(handle_xml))
        .route(PATH_BASIC_AUTH, get(handle_basic_auth))
        .route(PATH_DELAY, get(handle_delay))
        .with_state(stats)
}

/// httpbin-style server on an ephemeral local port.
pub struct TestServer {
    addr: SocketAddr,
    base_url: String,
    stats: TestServerStats,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let stats = TestServerStats::default();
        let app = router(stats.clone());

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            let _ = serve.await;
        });

        Ok(Self {
            addr,
            base_url: format!("http://{addr}"),
            stats,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `path` must start with `/`.
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    pub fn stats(&self) -> &TestServerStats {
        &self.stats
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if self.shutdown_tx.is_some()
            && let Some(task) = self.task.take()
        {
            task.abort();
        }
    }
}
