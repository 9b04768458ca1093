use crate::metrics::MetricKind;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid metric name `{0}` (expected letters, digits and `_`, not starting with a digit)")]
    InvalidName(String),

    #[error("metric `{name}` is already registered as a {existing}, cannot register it as a {requested}")]
    KindMismatch {
        name: String,
        existing: MetricKind,
        requested: MetricKind,
    },

    #[error("unknown metric `{0}`")]
    UnknownMetric(String),

    #[error("invalid metric key `{0}` (expected `name` or `name{{tag:value,...}}`)")]
    InvalidKey(String),
}

/// Why a sample was dropped instead of aggregated.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::IntoStaticStr,
    strum::EnumIter,
)]
#[strum(serialize_all = "snake_case")]
pub enum IngestErrorKind {
    UnknownMetric,
    InvalidValue,
}

impl std::error::Error for IngestErrorKind {}
