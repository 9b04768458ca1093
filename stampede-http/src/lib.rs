mod assert;
mod client;
mod error;
mod estimate;
mod metrics;
mod types;
mod util;

pub use assert::{Assertion, Check, apply_checks};
pub use client::HttpClient;
pub use error::{Error, HttpTransportErrorKind, Result};
pub use metrics::{
    DATA_RECEIVED, DATA_SENT, ERROR_TAG, HTTP_REQ_DURATION, HTTP_REQ_FAILED, HTTP_REQ_RECEIVING,
    HTTP_REQ_WAITING, HTTP_REQS, HttpMetrics, METHOD_TAG, NAME_TAG, STATUS_TAG, send,
};
pub use http::Method;
pub use types::{HttpRequest, HttpResponse, HttpTimings};
