use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use stampede_core::metrics::TagSet;

use crate::error::Result;
use crate::util::{header_value, set_header};

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: http::Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub timeout: Option<Duration>,
    /// Value of the `name` tag. Defaults to the URL.
    pub name: Option<String>,
    /// Extra tags for this request's samples.
    pub tags: TagSet,
}

impl HttpRequest {
    #[must_use]
    pub fn new(method: http::Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: Bytes::new(),
            timeout: None,
            name: None,
            tags: TagSet::default(),
        }
    }

    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(http::Method::GET, url)
    }

    #[must_use]
    pub fn post(url: impl Into<String>) -> Self {
        Self::new(http::Method::POST, url)
    }

    /// Sets a header, replacing any existing header of the same name.
    #[must_use]
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        set_header(&mut self.headers, name, value.into());
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// JSON body. Sets `content-type: application/json` unless one is already present.
    pub fn json(mut self, value: &serde_json::Value) -> Result<Self> {
        self.body = Bytes::from(serde_json::to_vec(value)?);
        if header_value(&self.headers, "content-type").is_none() {
            self.headers
                .push(("content-type".to_string(), "application/json".to_string()));
        }
        Ok(self)
    }

    /// URL-encoded form body.
    #[must_use]
    pub fn form<K, V>(mut self, fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let encoded = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields)
            .finish();
        self.body = Bytes::from(encoded);
        if header_value(&self.headers, "content-type").is_none() {
            self.headers.push((
                "content-type".to_string(),
                "application/x-www-form-urlencoded".to_string(),
            ));
        }
        self
    }

    #[must_use]
    pub fn basic_auth(self, user: &str, password: &str) -> Self {
        let token = STANDARD.encode(format!("{user}:{password}"));
        self.header("authorization", format!("Basic {token}"))
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn tag(mut self, key: &str, value: &str) -> Self {
        self.tags = self.tags.with(key, value);
        self
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.url)
    }
}

/// Time spent in each phase of one request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HttpTimings {
    /// Request handed to the pool until the response head arrived. On a
    /// fresh connection this includes DNS, TCP connect and the TLS handshake.
    pub waiting: Duration,
    /// Reading the response body.
    pub receiving: Duration,
    pub duration: Duration,
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Bytes,
    /// Lowercased names; repeated headers joined with `", "`.
    pub headers: Vec<(String, String)>,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub timings: HttpTimings,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        header_value(&self.headers, name)
    }

    pub fn body_utf8(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    pub fn json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Statuses 400 and above count towards `http_req_failed`.
    pub fn is_failure(&self) -> bool {
        self.status >= 400
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_body_is_url_encoded() {
        let req = HttpRequest::post("http://h/post").form([("field1", "value 1"), ("a&b", "c")]);
        assert_eq!(&req.body[..], b"field1=value+1&a%26b=c");
        assert_eq!(
            header_value(&req.headers, "content-type"),
            Some("application/x-www-form-urlencoded")
        );
    }

    #[test]
    fn json_keeps_explicit_content_type() {
        let req = HttpRequest::post("http://h/post")
            .header("Content-Type", "application/vnd.api+json")
            .json(&serde_json::json!({"number": 123}))
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(req.headers.len(), 1);
        assert_eq!(&req.body[..], br#"{"number":123}"#);
    }

    #[test]
    fn basic_auth_header() {
        let req = HttpRequest::get("http://h/").basic_auth("user", "pass");
        assert_eq!(
            header_value(&req.headers, "authorization"),
            Some("Basic dXNlcjpwYXNz")
        );
    }

    #[test]
    fn display_name_defaults_to_url() {
        let req = HttpRequest::get("http://h/status/404");
        assert_eq!(req.display_name(), "http://h/status/404");
        assert_eq!(req.name("status").display_name(), "status");
    }
}
