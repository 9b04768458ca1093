use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt as _, Full};
use hyper::Request;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::estimate;
use crate::types::{HttpRequest, HttpResponse, HttpTimings};
use crate::util::{has_header, host_header_value, parse_http_url};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Pooled HTTP/1.1 client shared by all VUs of a run.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
}

impl Default for HttpClient {
    fn default() -> Self {
        // Unreachable hosts should fail within the run, not after the OS connect timeout.
        Self::new(Some(DEFAULT_CONNECT_TIMEOUT))
    }
}

struct Exchange {
    parts: http::response::Parts,
    body: Bytes,
    waiting: Duration,
    receiving: Duration,
}

impl HttpClient {
    #[must_use]
    pub fn new(connect_timeout: Option<Duration>) -> Self {
        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false);
        http_connector.set_connect_timeout(connect_timeout);

        let https_connector = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let inner = Client::builder(TokioExecutor::new()).build(https_connector);

        Self { inner }
    }

    /// Sends `req` and reads the whole body. The request timeout covers the
    /// body read as well.
    pub async fn request(&self, req: HttpRequest) -> Result<HttpResponse> {
        let parsed = parse_http_url(&req.url)?;
        let bytes_sent =
            estimate::request_bytes(&req.method, &parsed, &req.headers, req.body.len() as u64);

        let uri: hyper::Uri = req
            .url
            .parse()
            .map_err(|_| Error::InvalidUrl(req.url.clone()))?;

        let mut builder = Request::builder().method(req.method).uri(uri);

        // Host and Content-Length are made explicit so byte accounting matches the wire.
        if !has_header(&req.headers, "host")
            && let Some(host) = host_header_value(&parsed)
        {
            builder = builder.header(http::header::HOST, host);
        }
        if !req.body.is_empty() && !has_header(&req.headers, "content-length") {
            builder = builder.header(http::header::CONTENT_LENGTH, req.body.len());
        }
        for (k, v) in &req.headers {
            let name = http::header::HeaderName::from_bytes(k.as_bytes())?;
            let value = http::header::HeaderValue::from_str(v)?;
            builder = builder.header(name, value);
        }

        let request: Request<Full<Bytes>> = builder.body(Full::new(req.body))?;

        let started = Instant::now();
        let exchange = match req.timeout {
            Some(limit) => tokio::time::timeout(limit, self.exchange(request))
                .await
                .map_err(|_| Error::Timeout(limit))??,
            None => self.exchange(request).await?,
        };
        let duration = started.elapsed();

        let Exchange {
            parts,
            body,
            waiting,
            receiving,
        } = exchange;

        let head_bytes = estimate::response_head_bytes(parts.version, parts.status, &parts.headers);

        Ok(HttpResponse {
            status: parts.status.as_u16(),
            headers: merge_headers(&parts.headers),
            bytes_sent,
            bytes_received: head_bytes.saturating_add(body.len() as u64),
            body,
            timings: HttpTimings {
                waiting,
                receiving,
                duration,
            },
        })
    }

    pub async fn get(&self, url: &str) -> Result<HttpResponse> {
        self.request(HttpRequest::get(url)).await
    }

    async fn exchange(&self, request: Request<Full<Bytes>>) -> Result<Exchange> {
        let sent = Instant::now();
        let res = self.inner.request(request).await?;
        let head = Instant::now();

        let (parts, body) = res.into_parts();
        let body = body.collect().await?.to_bytes();

        Ok(Exchange {
            parts,
            body,
            waiting: head.duration_since(sent),
            receiving: head.elapsed(),
        })
    }
}

fn merge_headers(headers: &http::HeaderMap) -> Vec<(String, String)> {
    let mut merged: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let v = String::from_utf8_lossy(value.as_bytes()).into_owned();
        merged
            .entry(name.as_str().to_ascii_lowercase())
            .and_modify(|cur| {
                if !cur.is_empty() {
                    cur.push_str(", ");
                }
                cur.push_str(&v);
            })
            .or_insert(v);
    }
    merged.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_host_fails_fast_with_connect_timeout() {
        let client = HttpClient::new(Some(Duration::from_millis(200)));
        let req = HttpRequest::get("http://192.0.2.1:81/");

        let started = std::time::Instant::now();
        let res = client.request(req).await;
        let elapsed = started.elapsed();

        assert!(res.is_err());
        assert!(
            elapsed < Duration::from_secs(2),
            "expected fast failure, elapsed={elapsed:?}"
        );
    }

    #[tokio::test]
    async fn rejects_unsupported_scheme_before_connecting() {
        let res = HttpClient::default()
            .request(HttpRequest::get("ftp://example.com/file"))
            .await;
        assert!(matches!(res, Err(Error::UnsupportedScheme(_))));
    }

    #[test]
    fn repeated_headers_are_joined() {
        let mut headers = http::HeaderMap::new();
        headers.append("X-Trace", http::HeaderValue::from_static("a"));
        headers.append("x-trace", http::HeaderValue::from_static("b"));
        headers.insert("Content-Type", http::HeaderValue::from_static("text/xml"));

        let merged = merge_headers(&headers);
        assert_eq!(
            merged,
            vec![
                ("content-type".to_string(), "text/xml".to_string()),
                ("x-trace".to_string(), "a, b".to_string()),
            ]
        );
    }
}
