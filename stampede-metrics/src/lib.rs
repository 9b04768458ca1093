pub mod error;
pub mod metrics;
pub mod registry;
pub mod sample;
pub mod tags;

pub use error::{Error, IngestErrorKind, Result};
pub use metrics::{
    CollectorSnapshot, CounterSnapshot, MetricKind, RateSnapshot, TrendSnapshot, nearest_rank,
};
pub use registry::{MetricHandle, MetricsSnapshot, Registry, metric_key};
pub use sample::Sample;
pub use tags::{TagSet, parse_metric_key};
