//! HTTP/1.1 wire size estimates for `data_sent` and `data_received`.

use crate::util::{has_header, host_header_value};

const CRLF: u64 = 2;

/// Request line, headers (including the implicit Host and Content-Length the
/// client adds), blank line and body.
pub(crate) fn request_bytes(
    method: &http::Method,
    parsed: &url::Url,
    headers: &[(String, String)],
    body_len: u64,
) -> u64 {
    let target_len = match parsed.query() {
        Some(q) => parsed.path().len() + 1 + q.len(),
        None => parsed.path().len(),
    } as u64;

    // "METHOD SP target SP HTTP/1.1 CRLF"
    let mut bytes = (method.as_str().len() as u64)
        .saturating_add(1)
        .saturating_add(target_len)
        .saturating_add(1)
        .saturating_add("HTTP/1.1".len() as u64)
        .saturating_add(CRLF);

    for (k, v) in headers {
        bytes = bytes.saturating_add(header_bytes(k.as_bytes(), v.as_bytes()));
    }
    if !has_header(headers, "host")
        && let Some(host) = host_header_value(parsed)
    {
        bytes = bytes.saturating_add(header_bytes(b"host", host.as_bytes()));
    }
    if body_len != 0 && !has_header(headers, "content-length") {
        let v = body_len.to_string();
        bytes = bytes.saturating_add(header_bytes(b"content-length", v.as_bytes()));
    }

    bytes.saturating_add(CRLF).saturating_add(body_len)
}

/// Status line without reason phrase, headers and blank line.
pub(crate) fn response_head_bytes(
    version: http::Version,
    status: http::StatusCode,
    headers: &http::HeaderMap,
) -> u64 {
    let version = match version {
        http::Version::HTTP_10 => "HTTP/1.0",
        http::Version::HTTP_2 => "HTTP/2",
        http::Version::HTTP_3 => "HTTP/3",
        _ => "HTTP/1.1",
    };

    let mut bytes = (version.len() as u64)
        .saturating_add(1)
        .saturating_add(status.as_str().len() as u64)
        .saturating_add(CRLF);
    for (name, value) in headers {
        bytes = bytes.saturating_add(header_bytes(name.as_str().as_bytes(), value.as_bytes()));
    }
    bytes.saturating_add(CRLF)
}

fn header_bytes(name: &[u8], value: &[u8]) -> u64 {
    // "name: value\r\n"
    (name.len() as u64)
        .saturating_add(2)
        .saturating_add(value.len() as u64)
        .saturating_add(CRLF)
}
