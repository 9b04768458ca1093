use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::error::IngestErrorKind;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Counter,
    Rate,
    Trend,
}

/// Monotonic sum of non-negative samples.
#[derive(Debug, Default)]
pub struct Counter {
    bits: AtomicU64,
}

impl Counter {
    pub fn add(&self, value: f64) -> Result<(), IngestErrorKind> {
        if !value.is_finite() || value < 0.0 {
            return Err(IngestErrorKind::InvalidValue);
        }
        let mut current = self.bits.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + value).to_bits();
            match self.bits.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    pub fn value(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct RateCounts {
    hits: u64,
    total: u64,
}

/// Fraction of non-zero samples. Both counts change under one lock so a
/// snapshot never sees a sample counted in `total` but not yet in `hits`.
#[derive(Debug, Default)]
pub struct Rate {
    inner: Mutex<RateCounts>,
}

impl Rate {
    pub fn add(&self, value: f64) -> Result<(), IngestErrorKind> {
        if value.is_nan() {
            return Err(IngestErrorKind::InvalidValue);
        }
        let mut inner = self.inner.lock();
        inner.total += 1;
        if value != 0.0 {
            inner.hits += 1;
        }
        Ok(())
    }

    /// Returns `(hits, total)`.
    pub fn counts(&self) -> (u64, u64) {
        let RateCounts { hits, total } = *self.inner.lock();
        (hits, total)
    }
}

#[derive(Debug, Default)]
struct TrendValues {
    values: Vec<f64>,
    sum: f64,
    min: f64,
    max: f64,
}

/// Keeps every observation so percentiles are exact.
#[derive(Debug, Default)]
pub struct Trend {
    inner: Mutex<TrendValues>,
}

impl Trend {
    pub fn add(&self, value: f64) -> Result<(), IngestErrorKind> {
        if !value.is_finite() {
            return Err(IngestErrorKind::InvalidValue);
        }
        let mut inner = self.inner.lock();
        if inner.values.is_empty() {
            inner.min = value;
            inner.max = value;
        } else {
            inner.min = inner.min.min(value);
            inner.max = inner.max.max(value);
        }
        inner.sum += value;
        inner.values.push(value);
        Ok(())
    }

    pub fn snapshot(&self) -> TrendSnapshot {
        let (mut values, sum, min, max) = {
            let inner = self.inner.lock();
            (inner.values.clone(), inner.sum, inner.min, inner.max)
        };
        // Sort outside the lock so writers are not blocked.
        values.sort_by(f64::total_cmp);
        TrendSnapshot::from_sorted(values, sum, min, max)
    }
}

#[derive(Debug)]
pub(crate) enum Collector {
    Counter(Counter),
    Rate(Rate),
    Trend(Trend),
}

impl Collector {
    pub(crate) fn new(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Counter => Collector::Counter(Counter::default()),
            MetricKind::Rate => Collector::Rate(Rate::default()),
            MetricKind::Trend => Collector::Trend(Trend::default()),
        }
    }

    #[inline]
    pub(crate) fn add(&self, value: f64) -> Result<(), IngestErrorKind> {
        match self {
            Collector::Counter(c) => c.add(value),
            Collector::Rate(r) => r.add(value),
            Collector::Trend(t) => t.add(value),
        }
    }

    pub(crate) fn snapshot(&self, elapsed: Duration) -> CollectorSnapshot {
        match self {
            Collector::Counter(c) => {
                let count = c.value();
                let secs = elapsed.as_secs_f64();
                CollectorSnapshot::Counter(CounterSnapshot {
                    count,
                    rate: if secs > 0.0 { count / secs } else { 0.0 },
                })
            }
            Collector::Rate(r) => {
                let (passes, total) = r.counts();
                CollectorSnapshot::Rate(RateSnapshot {
                    rate: if total > 0 {
                        passes as f64 / total as f64
                    } else {
                        0.0
                    },
                    passes,
                    fails: total - passes,
                })
            }
            Collector::Trend(t) => CollectorSnapshot::Trend(t.snapshot()),
        }
    }
}

/// Point-in-time aggregate of one collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "values", rename_all = "snake_case")]
pub enum CollectorSnapshot {
    Counter(CounterSnapshot),
    Rate(RateSnapshot),
    Trend(TrendSnapshot),
}

impl CollectorSnapshot {
    pub fn kind(&self) -> MetricKind {
        match self {
            CollectorSnapshot::Counter(_) => MetricKind::Counter,
            CollectorSnapshot::Rate(_) => MetricKind::Rate,
            CollectorSnapshot::Trend(_) => MetricKind::Trend,
        }
    }

    /// Whether at least one sample has been aggregated.
    pub fn has_data(&self) -> bool {
        match self {
            CollectorSnapshot::Counter(c) => c.count > 0.0,
            CollectorSnapshot::Rate(r) => r.passes + r.fails > 0,
            CollectorSnapshot::Trend(t) => t.count > 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub count: f64,
    /// Per second over the elapsed run time.
    pub rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateSnapshot {
    pub rate: f64,
    pub passes: u64,
    pub fails: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendSnapshot {
    pub count: u64,
    pub avg: Option<f64>,
    pub min: Option<f64>,
    pub med: Option<f64>,
    pub max: Option<f64>,
    #[serde(rename = "p(90)")]
    pub p90: Option<f64>,
    #[serde(rename = "p(95)")]
    pub p95: Option<f64>,
    #[serde(rename = "p(99)")]
    pub p99: Option<f64>,
    #[serde(skip, default = "empty_values")]
    sorted: Arc<[f64]>,
}

fn empty_values() -> Arc<[f64]> {
    Arc::from(Vec::new())
}

impl TrendSnapshot {
    fn from_sorted(sorted: Vec<f64>, sum: f64, min: f64, max: f64) -> Self {
        if sorted.is_empty() {
            return Self {
                count: 0,
                avg: None,
                min: None,
                med: None,
                max: None,
                p90: None,
                p95: None,
                p99: None,
                sorted: empty_values(),
            };
        }

        let count = sorted.len() as u64;
        Self {
            count,
            avg: Some(sum / count as f64),
            min: Some(min),
            med: nearest_rank(&sorted, 50.0),
            max: Some(max),
            p90: nearest_rank(&sorted, 90.0),
            p95: nearest_rank(&sorted, 95.0),
            p99: nearest_rank(&sorted, 99.0),
            sorted: Arc::from(sorted),
        }
    }

    /// Nearest-rank percentile for `p` in `[0, 100]`.
    ///
    /// A snapshot read back from JSON has no raw values; only the exported
    /// percentiles are available then.
    pub fn percentile(&self, p: f64) -> Option<f64> {
        if !self.sorted.is_empty() {
            return nearest_rank(&self.sorted, p);
        }
        [
            (50.0, self.med),
            (90.0, self.p90),
            (95.0, self.p95),
            (99.0, self.p99),
            (100.0, self.max),
        ]
        .into_iter()
        .find_map(|(at, value)| (at == p).then_some(value).flatten())
    }
}

/// Value at rank `ceil(p/100 * n)` of an ascending slice, clamped to the
/// slice bounds. `p(0)` is the minimum and `p(100)` the maximum.
pub fn nearest_rank(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() || p.is_nan() {
        return None;
    }
    let n = sorted.len();
    let p = p.clamp(0.0, 100.0);
    // Multiply before dividing: 95.0 * 100 / 100 is exact, 0.95 * 100 is not.
    let rank = (p * n as f64 / 100.0).ceil() as usize;
    sorted.get(rank.saturating_sub(1).min(n - 1)).copied()
}
