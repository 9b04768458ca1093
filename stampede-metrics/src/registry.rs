use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use strum::IntoEnumIterator;

use crate::error::{Error, IngestErrorKind, Result};
use crate::metrics::{Collector, CollectorSnapshot, MetricKind};
use crate::sample::Sample;
use crate::tags::TagSet;

/// Snapshot of every metric and declared submetric, keyed by [`metric_key`].
pub type MetricsSnapshot = BTreeMap<String, CollectorSnapshot>;

const MAX_NAME_LEN: usize = 128;

/// `name` for the base metric, `name{k:v,...}` for a submetric.
pub fn metric_key(name: &str, tags: &TagSet) -> String {
    format!("{name}{tags}")
}

fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidName(name.to_string()))
    }
}

#[derive(Debug, Default)]
struct IngestErrors {
    counts: DashMap<IngestErrorKind, AtomicU64>,
}

impl IngestErrors {
    fn record(&self, kind: IngestErrorKind, metric: &str) {
        let previous = self
            .counts
            .entry(kind)
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
        if previous == 0 {
            tracing::warn!(metric, reason = %kind, "dropping malformed sample");
        } else {
            tracing::debug!(metric, reason = %kind, "dropping malformed sample");
        }
    }

    fn get(&self, kind: IngestErrorKind) -> u64 {
        self.counts
            .get(&kind)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

#[derive(Debug)]
struct Submetric {
    filter: TagSet,
    collector: Collector,
}

#[derive(Debug)]
struct Metric {
    name: Arc<str>,
    kind: MetricKind,
    base: Collector,
    submetrics: RwLock<Vec<Submetric>>,
}

impl Metric {
    fn new(name: Arc<str>, kind: MetricKind) -> Self {
        Self {
            name,
            kind,
            base: Collector::new(kind),
            submetrics: RwLock::new(Vec::new()),
        }
    }

    fn add(&self, value: f64, tags: &TagSet) -> std::result::Result<(), IngestErrorKind> {
        self.base.add(value)?;
        let subs = self.submetrics.read();
        for sub in subs.iter().filter(|s| tags.matches(&s.filter)) {
            // Same value, same kind: cannot fail after the base accepted it.
            let _ = sub.collector.add(value);
        }
        Ok(())
    }
}

/// Cheap, cloneable writer for one registered metric.
#[derive(Debug, Clone)]
pub struct MetricHandle {
    metric: Arc<Metric>,
    errors: Arc<IngestErrors>,
}

impl MetricHandle {
    pub fn name(&self) -> &str {
        &self.metric.name
    }

    pub fn kind(&self) -> MetricKind {
        self.metric.kind
    }

    #[inline]
    pub fn add(&self, value: f64) {
        self.add_with_tags(value, &TagSet::default());
    }

    pub fn add_with_tags(&self, value: f64, tags: &TagSet) {
        if let Err(kind) = self.metric.add(value, tags) {
            self.errors.record(kind, &self.metric.name);
        }
    }

    #[inline]
    pub fn add_bool(&self, value: bool) {
        self.add(if value { 1.0 } else { 0.0 });
    }

    pub fn add_bool_with_tags(&self, value: bool, tags: &TagSet) {
        self.add_with_tags(if value { 1.0 } else { 0.0 }, tags);
    }

    /// Records a duration in milliseconds.
    #[inline]
    pub fn add_duration(&self, value: Duration) {
        self.add(value.as_secs_f64() * 1000.0);
    }

    pub fn add_duration_with_tags(&self, value: Duration, tags: &TagSet) {
        self.add_with_tags(value.as_secs_f64() * 1000.0, tags);
    }
}

/// Concurrent store of named metrics.
#[derive(Debug, Default)]
pub struct Registry {
    metrics: DashMap<Arc<str>, Arc<Metric>>,
    errors: Arc<IngestErrors>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `name` as `kind`, or returns the existing metric when the
    /// kind matches.
    pub fn register(&self, name: &str, kind: MetricKind) -> Result<MetricHandle> {
        validate_name(name)?;

        let metric = self
            .metrics
            .entry(Arc::from(name))
            .or_insert_with(|| Arc::new(Metric::new(Arc::from(name), kind)))
            .value()
            .clone();

        if metric.kind != kind {
            return Err(Error::KindMismatch {
                name: name.to_string(),
                existing: metric.kind,
                requested: kind,
            });
        }

        Ok(MetricHandle {
            metric,
            errors: self.errors.clone(),
        })
    }

    pub fn handle(&self, name: &str) -> Option<MetricHandle> {
        let metric = self.metrics.get(name)?.value().clone();
        Some(MetricHandle {
            metric,
            errors: self.errors.clone(),
        })
    }

    pub fn kind_of(&self, name: &str) -> Option<MetricKind> {
        self.metrics.get(name).map(|m| m.kind)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.metrics.contains_key(name)
    }

    /// Starts aggregating samples of `name` whose tags include `filter`
    /// into a separate series. Declaring the same filter twice is a no-op.
    ///
    /// Only samples ingested after the declaration are counted.
    pub fn declare_submetric(&self, name: &str, filter: TagSet) -> Result<()> {
        if filter.is_empty() {
            return if self.contains(name) {
                Ok(())
            } else {
                Err(Error::UnknownMetric(name.to_string()))
            };
        }

        let metric = self
            .metrics
            .get(name)
            .map(|m| m.value().clone())
            .ok_or_else(|| Error::UnknownMetric(name.to_string()))?;

        let mut subs = metric.submetrics.write();
        if !subs.iter().any(|s| s.filter == filter) {
            subs.push(Submetric {
                filter,
                collector: Collector::new(metric.kind),
            });
        }
        Ok(())
    }

    /// Aggregates a sample. Malformed samples are counted and dropped.
    pub fn ingest(&self, sample: &Sample) -> std::result::Result<(), IngestErrorKind> {
        let Some(metric) = self.metrics.get(&sample.metric).map(|m| m.value().clone()) else {
            self.errors
                .record(IngestErrorKind::UnknownMetric, &sample.metric);
            return Err(IngestErrorKind::UnknownMetric);
        };

        metric.add(sample.value, &sample.tags).inspect_err(|kind| {
            self.errors.record(*kind, &sample.metric);
        })
    }

    pub fn snapshot(&self, elapsed: Duration) -> MetricsSnapshot {
        let metrics: Vec<Arc<Metric>> = self.metrics.iter().map(|m| m.value().clone()).collect();

        let mut out = BTreeMap::new();
        for metric in metrics {
            out.insert(metric.name.to_string(), metric.base.snapshot(elapsed));
            let subs = metric.submetrics.read();
            for sub in subs.iter() {
                out.insert(
                    metric_key(&metric.name, &sub.filter),
                    sub.collector.snapshot(elapsed),
                );
            }
        }
        out
    }

    /// Dropped-sample counts by reason. Reasons with no drops are included.
    pub fn ingest_errors(&self) -> BTreeMap<String, u64> {
        IngestErrorKind::iter()
            .map(|kind| (kind.to_string(), self.errors.get(kind)))
            .collect()
    }

    pub fn ingest_errors_total(&self) -> u64 {
        IngestErrorKind::iter().map(|k| self.errors.get(k)).sum()
    }
}
