use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use stampede_metrics::{
    CollectorSnapshot, MetricKind, MetricsSnapshot, Registry, TagSet, metric_key,
    parse_metric_key,
};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ThresholdError {
    #[error("invalid threshold `{raw}`: {reason}")]
    Parse { raw: String, reason: String },

    #[error("invalid threshold key `{0}` (expected `metric` or `metric{{tag:value}}`)")]
    InvalidKey(String),

    #[error("threshold references unknown metric `{0}`")]
    UnknownMetric(String),

    #[error("threshold `{0}` is declared more than once")]
    Duplicate(String),

    #[error("threshold `{expression}` on {kind} metric `{metric}`: `{agg}` is not available for {kind}s")]
    UnsupportedAggregation {
        metric: String,
        expression: String,
        agg: ThresholdAgg,
        kind: MetricKind,
    },
}

/// A pass/fail assertion over one metric (or tag-filtered submetric).
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdSpec {
    pub metric: String,
    pub tag_filter: TagSet,
    pub expression: String,
    /// Also evaluated periodically during the run; a failure sticks.
    pub windowed: bool,
    /// Stop the run as soon as a periodic evaluation fails.
    pub abort_on_fail: bool,
}

impl ThresholdSpec {
    pub fn new(metric: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            metric: metric.into(),
            tag_filter: TagSet::default(),
            expression: expression.into(),
            windowed: false,
            abort_on_fail: false,
        }
    }

    /// Builds a spec from a key such as `http_req_duration{type:GET}`.
    pub fn from_key(key: &str, expression: impl Into<String>) -> Result<Self, ThresholdError> {
        let (metric, tag_filter) =
            parse_metric_key(key).map_err(|_| ThresholdError::InvalidKey(key.to_string()))?;
        Ok(Self {
            tag_filter,
            ..Self::new(metric, expression)
        })
    }

    #[must_use]
    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.tag_filter = self.tag_filter.with(key, value);
        self
    }

    #[must_use]
    pub fn windowed(mut self, windowed: bool) -> Self {
        self.windowed = windowed;
        self
    }

    #[must_use]
    pub fn abort_on_fail(mut self, abort: bool) -> Self {
        self.abort_on_fail = abort;
        self
    }

    /// Key of the series this spec reads from a snapshot.
    pub fn metric_key(&self) -> String {
        metric_key(&self.metric, &self.tag_filter)
    }

    /// Stable result name, `metric{tags}: expression`.
    pub fn name(&self) -> String {
        format!("{}: {}", self.metric_key(), self.expression.trim())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdOp {
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThresholdAgg {
    Avg,
    Min,
    Max,
    Med,
    Count,
    Rate,
    /// Percentile in `(0, 100]`.
    P(f64),
}

impl fmt::Display for ThresholdAgg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThresholdAgg::Avg => f.write_str("avg"),
            ThresholdAgg::Min => f.write_str("min"),
            ThresholdAgg::Max => f.write_str("max"),
            ThresholdAgg::Med => f.write_str("med"),
            ThresholdAgg::Count => f.write_str("count"),
            ThresholdAgg::Rate => f.write_str("rate"),
            ThresholdAgg::P(p) => write!(f, "p({p})"),
        }
    }
}

impl ThresholdAgg {
    pub fn supports(self, kind: MetricKind) -> bool {
        match kind {
            MetricKind::Counter => matches!(self, ThresholdAgg::Count | ThresholdAgg::Rate),
            MetricKind::Rate => matches!(self, ThresholdAgg::Rate | ThresholdAgg::Count),
            MetricKind::Trend => !matches!(self, ThresholdAgg::Rate),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdExpr {
    pub agg: ThresholdAgg,
    pub op: ThresholdOp,
    pub value: f64,
}

pub fn parse_threshold_expr(raw: &str) -> Result<ThresholdExpr, ThresholdError> {
    let err = |reason: &str| ThresholdError::Parse {
        raw: raw.to_string(),
        reason: reason.to_string(),
    };

    let s: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if s.is_empty() {
        return Err(err("empty threshold"));
    }

    // Two-character operators first so `<=` is not read as `<`.
    let ops = [
        ("<=", ThresholdOp::Lte),
        (">=", ThresholdOp::Gte),
        ("==", ThresholdOp::Eq),
        ("<", ThresholdOp::Lt),
        (">", ThresholdOp::Gt),
    ];
    let (op_pos, op_len, op) = ops
        .iter()
        .find_map(|(tok, op)| s.find(tok).map(|pos| (pos, tok.len(), *op)))
        .ok_or_else(|| err("missing operator"))?;

    let (left, right_with_op) = s.split_at(op_pos);
    let right = &right_with_op[op_len..];
    if left.is_empty() || right.is_empty() {
        return Err(err("expected `<aggregation> <operator> <number>`"));
    }

    let agg = if left.eq_ignore_ascii_case("avg") {
        ThresholdAgg::Avg
    } else if left.eq_ignore_ascii_case("min") {
        ThresholdAgg::Min
    } else if left.eq_ignore_ascii_case("max") {
        ThresholdAgg::Max
    } else if left.eq_ignore_ascii_case("med") {
        ThresholdAgg::Med
    } else if left.eq_ignore_ascii_case("count") {
        ThresholdAgg::Count
    } else if left.eq_ignore_ascii_case("rate") {
        ThresholdAgg::Rate
    } else if let Some(inner) = left.strip_prefix("p(").and_then(|v| v.strip_suffix(')')) {
        let p: f64 = inner.parse().map_err(|_| err("invalid percentile"))?;
        if !(p > 0.0 && p <= 100.0) {
            return Err(err("percentile out of range (0, 100]"));
        }
        ThresholdAgg::P(p)
    } else {
        return Err(err(&format!("unknown aggregation `{left}`")));
    };

    let value: f64 = right.parse().map_err(|_| err("invalid numeric value"))?;
    if !value.is_finite() {
        return Err(err("invalid numeric value"));
    }

    Ok(ThresholdExpr { agg, op, value })
}

/// A spec checked against the registry, ready to evaluate.
#[derive(Debug, Clone)]
pub struct CompiledThreshold {
    spec: ThresholdSpec,
    expr: ThresholdExpr,
    key: String,
    name: String,
}

impl CompiledThreshold {
    pub fn spec(&self) -> &ThresholdSpec {
        &self.spec
    }

    pub fn expr(&self) -> ThresholdExpr {
        self.expr
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pure: the same snapshot always yields the same result. A missing
    /// series or an undefined aggregate fails.
    pub fn evaluate(&self, snapshot: &MetricsSnapshot) -> ThresholdResult {
        let observed = snapshot
            .get(&self.key)
            .and_then(|s| observed_value(s, self.expr.agg));
        let passed = observed
            .map(|v| compare(v, self.expr.op, self.expr.value))
            .unwrap_or(false);

        ThresholdResult {
            metric: self.key.clone(),
            expression: self.spec.expression.trim().to_string(),
            passed,
            observed,
        }
    }

    /// Whether the underlying series has received any samples yet.
    pub fn has_data(&self, snapshot: &MetricsSnapshot) -> bool {
        snapshot.get(&self.key).is_some_and(CollectorSnapshot::has_data)
    }
}

/// Validates every spec against the registered metrics and declares the
/// submetrics tag-filtered specs read from.
pub fn compile_thresholds(
    specs: &[ThresholdSpec],
    registry: &Registry,
) -> Result<Vec<CompiledThreshold>, ThresholdError> {
    let mut out = Vec::with_capacity(specs.len());
    let mut names = BTreeSet::new();
    for spec in specs {
        let name = spec.name();
        if !names.insert(name.clone()) {
            return Err(ThresholdError::Duplicate(name));
        }
        let expr = parse_threshold_expr(&spec.expression)?;
        let kind = registry
            .kind_of(&spec.metric)
            .ok_or_else(|| ThresholdError::UnknownMetric(spec.metric.clone()))?;
        if !expr.agg.supports(kind) {
            return Err(ThresholdError::UnsupportedAggregation {
                metric: spec.metric.clone(),
                expression: spec.expression.clone(),
                agg: expr.agg,
                kind,
            });
        }
        if !spec.tag_filter.is_empty() {
            registry
                .declare_submetric(&spec.metric, spec.tag_filter.clone())
                .map_err(|_| ThresholdError::UnknownMetric(spec.metric.clone()))?;
        }

        out.push(CompiledThreshold {
            key: spec.metric_key(),
            name,
            spec: spec.clone(),
            expr,
        });
    }
    Ok(out)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdResult {
    pub metric: String,
    pub expression: String,
    pub passed: bool,
    pub observed: Option<f64>,
}

/// Evaluates every threshold; keys are [`ThresholdSpec::name`].
pub fn evaluate_thresholds(
    thresholds: &[CompiledThreshold],
    snapshot: &MetricsSnapshot,
) -> BTreeMap<String, ThresholdResult> {
    thresholds
        .iter()
        .map(|t| (t.name.clone(), t.evaluate(snapshot)))
        .collect()
}

fn compare(left: f64, op: ThresholdOp, right: f64) -> bool {
    match op {
        ThresholdOp::Lt => left < right,
        ThresholdOp::Lte => left <= right,
        ThresholdOp::Gt => left > right,
        ThresholdOp::Gte => left >= right,
        ThresholdOp::Eq => left == right,
    }
}

fn observed_value(series: &CollectorSnapshot, agg: ThresholdAgg) -> Option<f64> {
    match (series, agg) {
        (CollectorSnapshot::Counter(c), ThresholdAgg::Count) => Some(c.count),
        (CollectorSnapshot::Counter(c), ThresholdAgg::Rate) => Some(c.rate),

        (CollectorSnapshot::Rate(r), ThresholdAgg::Rate) => Some(r.rate),
        (CollectorSnapshot::Rate(r), ThresholdAgg::Count) => Some((r.passes + r.fails) as f64),

        (CollectorSnapshot::Trend(t), ThresholdAgg::Avg) => t.avg,
        (CollectorSnapshot::Trend(t), ThresholdAgg::Min) => t.min,
        (CollectorSnapshot::Trend(t), ThresholdAgg::Max) => t.max,
        (CollectorSnapshot::Trend(t), ThresholdAgg::Med) => t.med,
        (CollectorSnapshot::Trend(t), ThresholdAgg::Count) => Some(t.count as f64),
        (CollectorSnapshot::Trend(t), ThresholdAgg::P(p)) => t.percentile(p),

        // Rejected at compile time.
        (_, _) => None,
    }
}
