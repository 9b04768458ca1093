use std::time::Duration;

use anyhow::Context as _;
use stampede_core::metrics::{CollectorSnapshot, MetricsSnapshot, TagSet};
use stampede_core::{IterationContext, RunContext};
use stampede_http::{
    Assertion, Check, Error, HTTP_REQ_DURATION, HttpClient, HttpMetrics, HttpRequest,
    apply_checks, send,
};
use stampede_testserver::TestServer;

struct Harness {
    run: RunContext,
    ctx: IterationContext,
    client: HttpClient,
    metrics: HttpMetrics,
}

impl Harness {
    fn new() -> anyhow::Result<Self> {
        let run = RunContext::new()?;
        let metrics = HttpMetrics::register(run.metrics())?;
        let ctx = IterationContext::new(1, 0, run.metrics().clone(), run.builtin().clone());
        Ok(Self {
            run,
            ctx,
            client: HttpClient::default(),
            metrics,
        })
    }

    async fn send(&self, req: HttpRequest) -> stampede_http::Result<stampede_http::HttpResponse> {
        send(&self.client, &self.metrics, &self.ctx, req).await
    }

    fn snapshot(&self) -> MetricsSnapshot {
        self.run.metrics().snapshot(Duration::from_secs(1))
    }
}

fn counter(snap: &MetricsSnapshot, key: &str) -> f64 {
    match snap.get(key) {
        Some(CollectorSnapshot::Counter(c)) => c.count,
        other => panic!("expected counter at {key}, got {other:?}"),
    }
}

fn rate(snap: &MetricsSnapshot, key: &str) -> (u64, u64) {
    match snap.get(key) {
        Some(CollectorSnapshot::Rate(r)) => (r.passes, r.fails),
        other => panic!("expected rate at {key}, got {other:?}"),
    }
}

fn trend_count(snap: &MetricsSnapshot, key: &str) -> u64 {
    match snap.get(key) {
        Some(CollectorSnapshot::Trend(t)) => t.count,
        other => panic!("expected trend at {key}, got {other:?}"),
    }
}

#[tokio::test]
async fn get_records_tagged_request_metrics() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;
    let h = Harness::new()?;
    h.run
        .metrics()
        .declare_submetric(HTTP_REQ_DURATION, TagSet::new([("type", "GET")]))?;

    let res = h
        .send(
            HttpRequest::get(server.url("/get?param1=value1&param2=value2"))
                .name("get with args")
                .tag("type", "GET"),
        )
        .await?;
    h.send(HttpRequest::get(server.url("/json"))).await?;

    anyhow::ensure!(res.status == 200, "status {}", res.status);
    let body = res.json()?;
    anyhow::ensure!(body["args"]["param2"] == "value2", "body {body}");
    anyhow::ensure!(res.timings.duration >= res.timings.waiting);

    let snap = h.snapshot();
    anyhow::ensure!(counter(&snap, "http_reqs") == 2.0);
    anyhow::ensure!(trend_count(&snap, "http_req_duration") == 2);
    anyhow::ensure!(trend_count(&snap, "http_req_duration{type:GET}") == 1);
    anyhow::ensure!(rate(&snap, "http_req_failed") == (0, 2));
    anyhow::ensure!(counter(&snap, "data_sent") > 0.0);
    anyhow::ensure!(counter(&snap, "data_received") >= res.body.len() as f64);

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn error_statuses_count_as_failed_requests() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;
    let h = Harness::new()?;
    h.run
        .metrics()
        .declare_submetric("http_req_failed", TagSet::new([("status", "500")]))?;

    for code in [200, 404, 500] {
        let res = h
            .send(HttpRequest::get(server.url(&format!("/status/{code}"))).name("status"))
            .await?;
        anyhow::ensure!(res.status == code, "expected {code}, got {}", res.status);
        anyhow::ensure!(
            apply_checks(&h.ctx, Some(&res), &[Check::new(Assertion::Status { equals: code })]),
            "status check for {code}"
        );
    }

    let snap = h.snapshot();
    anyhow::ensure!(rate(&snap, "http_req_failed") == (2, 1));
    anyhow::ensure!(rate(&snap, "http_req_failed{status:500}") == (1, 0));
    anyhow::ensure!(rate(&snap, "checks") == (3, 0));

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn post_bodies_are_echoed() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;
    let h = Harness::new()?;

    let res = h
        .send(HttpRequest::post(server.url("/post")).json(&serde_json::json!({
            "message": "Test message",
            "number": 123,
            "boolean": true,
        }))?)
        .await?;
    let checks = [
        Check::new(Assertion::Status { equals: 200 }),
        Check::new(Assertion::Json {
            path: "json.message".to_string(),
            equals: Some("Test message".into()),
        })
        .named("POST JSON message matches"),
    ];
    anyhow::ensure!(apply_checks(&h.ctx, Some(&res), &checks));

    let res = h
        .send(
            HttpRequest::post(server.url("/post"))
                .form([("field1", "value1"), ("field2", "value2")]),
        )
        .await?;
    let form_check = Check::new(Assertion::Json {
        path: "form.field1".to_string(),
        equals: Some("value1".into()),
    });
    anyhow::ensure!(apply_checks(&h.ctx, Some(&res), &[form_check]));

    let snap = h.snapshot();
    anyhow::ensure!(rate(&snap, "checks") == (3, 0));

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn basic_auth_and_content_types() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;
    let h = Harness::new()?;

    let ok = h
        .send(HttpRequest::get(server.url("/basic-auth/user/pass")).basic_auth("user", "pass"))
        .await?;
    anyhow::ensure!(ok.status == 200, "status {}", ok.status);

    let denied = h
        .send(HttpRequest::get(server.url("/basic-auth/user/pass")).basic_auth("user", "nope"))
        .await?;
    anyhow::ensure!(denied.status == 401, "status {}", denied.status);
    anyhow::ensure!(server.stats().auth_failures() == 1);

    let xml = h.send(HttpRequest::get(server.url("/xml"))).await?;
    let is_xml = Check::new(Assertion::Header {
        header: "content-type".to_string(),
        contains: Some("application/xml".to_string()),
    });
    let is_json = Check::new(Assertion::Json {
        path: String::new(),
        equals: None,
    });
    anyhow::ensure!(apply_checks(&h.ctx, Some(&xml), std::slice::from_ref(&is_xml)));
    anyhow::ensure!(!apply_checks(&h.ctx, Some(&xml), &[is_json]));

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn transport_errors_are_recorded_with_status_zero() -> anyhow::Result<()> {
    let h = Harness::new()?;
    h.run
        .metrics()
        .declare_submetric("http_reqs", TagSet::new([("status", "0")]))?;

    let res = h.send(HttpRequest::get("http://127.0.0.1:1/get")).await;
    anyhow::ensure!(res.is_err(), "expected connection failure");
    anyhow::ensure!(!apply_checks(
        &h.ctx,
        None,
        &[Check::new(Assertion::Status { equals: 200 })]
    ));

    let snap = h.snapshot();
    anyhow::ensure!(counter(&snap, "http_reqs{status:0}") == 1.0);
    anyhow::ensure!(rate(&snap, "http_req_failed") == (1, 0));
    anyhow::ensure!(trend_count(&snap, "http_req_duration") == 0);
    Ok(())
}

#[tokio::test]
async fn request_timeout_covers_slow_responses() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;
    let h = Harness::new()?;

    let res = h
        .send(HttpRequest::get(server.url("/delay/500")).timeout(Duration::from_millis(50)))
        .await;
    anyhow::ensure!(
        matches!(res, Err(Error::Timeout(_))),
        "expected timeout, got {res:?}"
    );

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn timings_split_the_request_duration() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;
    let h = Harness::new()?;

    // The first request opens the connection, the second reuses it.
    for _ in 0..2 {
        let res = h.send(HttpRequest::get(server.url("/delay/200"))).await?;
        let t = res.timings;
        anyhow::ensure!(t.waiting >= Duration::from_millis(200), "{t:?}");
        anyhow::ensure!(t.waiting <= t.duration, "{t:?}");
        anyhow::ensure!(t.receiving <= t.duration, "{t:?}");
        anyhow::ensure!(t.waiting + t.receiving <= t.duration, "{t:?}");
    }

    server.shutdown().await;
    Ok(())
}
