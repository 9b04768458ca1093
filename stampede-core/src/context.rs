use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use stampede_metrics::{MetricHandle, MetricKind, Registry};

use crate::error::Result;

pub const ITERATIONS: &str = "iterations";
pub const ITERATION_DURATION: &str = "iteration_duration";
pub const SUCCESS: &str = "success";
pub const CHECKS: &str = "checks";

/// Metrics every run records, independent of the workload.
#[derive(Debug, Clone)]
pub struct BuiltinMetrics {
    pub iterations: MetricHandle,
    /// Milliseconds.
    pub iteration_duration: MetricHandle,
    /// One sample per iteration: 1 when the workload returned `Ok`.
    pub success: MetricHandle,
    /// One sample per [`check`](crate::IterationContext::check), tagged `check`.
    pub checks: MetricHandle,
}

impl BuiltinMetrics {
    pub fn register(metrics: &Registry) -> Result<Self> {
        Ok(Self {
            iterations: metrics.register(ITERATIONS, MetricKind::Counter)?,
            iteration_duration: metrics.register(ITERATION_DURATION, MetricKind::Trend)?,
            success: metrics.register(SUCCESS, MetricKind::Rate)?,
            checks: metrics.register(CHECKS, MetricKind::Rate)?,
        })
    }
}

/// Owns the collectors and the stop signal of one run.
///
/// Independent contexts never share state, so several runs can execute in
/// the same process.
#[derive(Debug, Clone)]
pub struct RunContext {
    metrics: Arc<Registry>,
    builtin: Arc<BuiltinMetrics>,
    stop: CancellationToken,
}

impl RunContext {
    pub fn new() -> Result<Self> {
        let metrics = Arc::new(Registry::new());
        let builtin = Arc::new(BuiltinMetrics::register(&metrics)?);
        Ok(Self {
            metrics,
            builtin,
            stop: CancellationToken::new(),
        })
    }

    pub fn metrics(&self) -> &Arc<Registry> {
        &self.metrics
    }

    pub fn builtin(&self) -> &Arc<BuiltinMetrics> {
        &self.builtin
    }

    /// Declares a custom metric. Must happen before the run starts for
    /// thresholds to reference it.
    pub fn register_metric(&self, name: &str, kind: MetricKind) -> Result<MetricHandle> {
        Ok(self.metrics.register(name, kind)?)
    }

    /// Requests a graceful stop. The run still produces a summary.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }
}
