use std::sync::Arc;

use stampede_metrics::{IngestErrorKind, MetricHandle, Registry, Sample, TagSet};

use crate::context::BuiltinMetrics;

pub const GROUP_TAG: &str = "group";
pub const CHECK_TAG: &str = "check";

const GROUP_SEPARATOR: &str = "::";

/// Handed to the workload once per iteration.
#[derive(Debug, Clone)]
pub struct IterationContext {
    vu_id: u64,
    iteration: u64,
    metrics: Arc<Registry>,
    builtin: Arc<BuiltinMetrics>,
    tags: TagSet,
}

impl IterationContext {
    pub fn new(
        vu_id: u64,
        iteration: u64,
        metrics: Arc<Registry>,
        builtin: Arc<BuiltinMetrics>,
    ) -> Self {
        Self {
            vu_id,
            iteration,
            metrics,
            builtin,
            tags: TagSet::default(),
        }
    }

    /// 1-based VU id, unique within a run.
    pub fn vu_id(&self) -> u64 {
        self.vu_id
    }

    /// 0-based iteration number of this VU.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn metrics(&self) -> &Registry {
        &self.metrics
    }

    /// Tags attached to every sample recorded through this context.
    pub fn tags(&self) -> &TagSet {
        &self.tags
    }

    pub fn group_name(&self) -> Option<&str> {
        self.tags.get(GROUP_TAG)
    }

    /// A context whose samples carry a `group` tag. Nested groups join their
    /// names with `::`.
    #[must_use]
    pub fn group(&self, name: &str) -> IterationContext {
        let group = match self.group_name() {
            Some(parent) => format!("{parent}{GROUP_SEPARATOR}{name}"),
            None => name.to_string(),
        };
        self.with_tag(GROUP_TAG, &group)
    }

    #[must_use]
    pub fn with_tag(&self, key: &str, value: &str) -> IterationContext {
        IterationContext {
            tags: self.tags.with(key, value),
            ..self.clone()
        }
    }

    /// Records a named pass/fail check in the `checks` rate and returns `passed`.
    pub fn check(&self, name: &str, passed: bool) -> bool {
        let tags = self.tags.with(CHECK_TAG, name);
        self.builtin.checks.add_bool_with_tags(passed, &tags);
        passed
    }

    /// Records a sample for `metric` carrying this context's tags.
    pub fn add(&self, metric: &str, value: f64) -> Result<(), IngestErrorKind> {
        self.add_with_tags(metric, value, &TagSet::default())
    }

    /// Like [`add`](Self::add); `extra` wins over the context tags.
    pub fn add_with_tags(
        &self,
        metric: &str,
        value: f64,
        extra: &TagSet,
    ) -> Result<(), IngestErrorKind> {
        let sample = Sample::new(metric, value).with_tags(self.tags.merged(extra));
        self.metrics.ingest(&sample)
    }

    /// Records through a pre-resolved handle, skipping the name lookup.
    pub fn record(&self, handle: &MetricHandle, value: f64) {
        handle.add_with_tags(value, &self.tags);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stampede_metrics::{CollectorSnapshot, MetricKind};
    use std::time::Duration;

    fn ctx() -> (Arc<Registry>, IterationContext) {
        let metrics = Arc::new(Registry::new());
        let builtin =
            Arc::new(BuiltinMetrics::register(&metrics).unwrap_or_else(|e| panic!("{e}")));
        let ctx = IterationContext::new(1, 0, metrics.clone(), builtin);
        (metrics, ctx)
    }

    #[test]
    fn checks_are_tagged_and_returned() {
        let (metrics, ctx) = ctx();
        metrics
            .declare_submetric("checks", TagSet::new([("check", "status is 200")]))
            .unwrap_or_else(|e| panic!("{e}"));

        assert!(ctx.check("status is 200", true));
        assert!(!ctx.check("status is 200", false));
        assert!(ctx.check("body ok", true));

        let snap = metrics.snapshot(Duration::from_secs(1));
        let Some(CollectorSnapshot::Rate(all)) = snap.get("checks") else {
            panic!("expected checks rate");
        };
        assert_eq!((all.passes, all.fails), (2, 1));
        let Some(CollectorSnapshot::Rate(one)) = snap.get("checks{check:status is 200}") else {
            panic!("expected check submetric");
        };
        assert_eq!((one.passes, one.fails), (1, 1));
    }

    #[test]
    fn groups_nest_and_tag_samples() {
        let (metrics, ctx) = ctx();
        metrics
            .register("waiting_time", MetricKind::Trend)
            .unwrap_or_else(|e| panic!("{e}"));
        metrics
            .declare_submetric("waiting_time", TagSet::new([("group", "api::get")]))
            .unwrap_or_else(|e| panic!("{e}"));

        let api = ctx.group("api");
        assert_eq!(api.group_name(), Some("api"));
        let get = api.group("get");
        assert_eq!(get.group_name(), Some("api::get"));
        assert_eq!(ctx.group_name(), None);

        get.add("waiting_time", 12.0).unwrap_or_else(|e| panic!("{e}"));
        api.add("waiting_time", 40.0).unwrap_or_else(|e| panic!("{e}"));

        let snap = metrics.snapshot(Duration::from_secs(1));
        let Some(CollectorSnapshot::Trend(t)) = snap.get("waiting_time{group:api::get}") else {
            panic!("expected group submetric");
        };
        assert_eq!(t.count, 1);
        assert_eq!(t.max, Some(12.0));
    }

    #[test]
    fn unknown_metric_is_reported() {
        let (metrics, ctx) = ctx();
        assert_eq!(ctx.add("missing", 1.0), Err(IngestErrorKind::UnknownMetric));
        assert_eq!(metrics.ingest_errors_total(), 1);
    }
}
