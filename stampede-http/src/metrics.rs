use stampede_core::IterationContext;
use stampede_core::metrics::{MetricHandle, MetricKind, Registry, TagSet};
use tokio::time::Instant;

use crate::client::HttpClient;
use crate::error::Result;
use crate::types::{HttpRequest, HttpResponse};

pub const HTTP_REQS: &str = "http_reqs";
pub const HTTP_REQ_DURATION: &str = "http_req_duration";
pub const HTTP_REQ_WAITING: &str = "http_req_waiting";
pub const HTTP_REQ_RECEIVING: &str = "http_req_receiving";
pub const HTTP_REQ_FAILED: &str = "http_req_failed";
pub const DATA_SENT: &str = "data_sent";
pub const DATA_RECEIVED: &str = "data_received";

pub const METHOD_TAG: &str = "method";
pub const STATUS_TAG: &str = "status";
pub const NAME_TAG: &str = "name";
pub const ERROR_TAG: &str = "error";

/// Status tag value for requests that never got a response.
const NO_STATUS: &str = "0";

/// Handles to the built-in HTTP metrics of one run.
#[derive(Debug, Clone)]
pub struct HttpMetrics {
    reqs: MetricHandle,
    duration: MetricHandle,
    waiting: MetricHandle,
    receiving: MetricHandle,
    failed: MetricHandle,
    data_sent: MetricHandle,
    data_received: MetricHandle,
}

impl HttpMetrics {
    pub fn register(metrics: &Registry) -> stampede_core::metrics::Result<Self> {
        Ok(Self {
            reqs: metrics.register(HTTP_REQS, MetricKind::Counter)?,
            duration: metrics.register(HTTP_REQ_DURATION, MetricKind::Trend)?,
            waiting: metrics.register(HTTP_REQ_WAITING, MetricKind::Trend)?,
            receiving: metrics.register(HTTP_REQ_RECEIVING, MetricKind::Trend)?,
            failed: metrics.register(HTTP_REQ_FAILED, MetricKind::Rate)?,
            data_sent: metrics.register(DATA_SENT, MetricKind::Counter)?,
            data_received: metrics.register(DATA_RECEIVED, MetricKind::Counter)?,
        })
    }

    /// Tags for one request: iteration context tags, then `method`, `name`
    /// and `status`, then the request's own tags.
    fn request_tags(ctx: &IterationContext, req: &HttpRequest, status: &str) -> TagSet {
        ctx.tags()
            .with(METHOD_TAG, req.method.as_str())
            .with(NAME_TAG, req.display_name())
            .with(STATUS_TAG, status)
            .merged(&req.tags)
    }

    pub fn record_response(&self, ctx: &IterationContext, req: &HttpRequest, res: &HttpResponse) {
        let tags = Self::request_tags(ctx, req, &res.status.to_string());
        self.reqs.add_with_tags(1.0, &tags);
        self.duration.add_duration_with_tags(res.timings.duration, &tags);
        self.waiting.add_duration_with_tags(res.timings.waiting, &tags);
        self.receiving.add_duration_with_tags(res.timings.receiving, &tags);
        self.failed.add_bool_with_tags(res.is_failure(), &tags);
        self.data_sent.add_with_tags(res.bytes_sent as f64, &tags);
        self.data_received.add_with_tags(res.bytes_received as f64, &tags);
    }

    /// Transport failures count as requests and failures; no timings are recorded.
    pub fn record_error(&self, ctx: &IterationContext, req: &HttpRequest, err: &crate::Error) {
        let tags = Self::request_tags(ctx, req, NO_STATUS)
            .with(ERROR_TAG, err.transport_error_kind().to_string());
        self.reqs.add_with_tags(1.0, &tags);
        self.failed.add_bool_with_tags(true, &tags);
    }
}

/// Sends `req` and records the outcome in `metrics` under `ctx`'s tags.
pub async fn send(
    client: &HttpClient,
    metrics: &HttpMetrics,
    ctx: &IterationContext,
    req: HttpRequest,
) -> Result<HttpResponse> {
    let meta = req.clone();
    let started = Instant::now();

    match client.request(req).await {
        Ok(res) => {
            metrics.record_response(ctx, &meta, &res);
            Ok(res)
        }
        Err(err) => {
            tracing::debug!(
                url = %meta.url,
                method = %meta.method,
                elapsed = ?started.elapsed(),
                error = %err,
                "http request failed"
            );
            metrics.record_error(ctx, &meta, &err);
            Err(err)
        }
    }
}
