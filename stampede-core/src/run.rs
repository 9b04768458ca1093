use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use stampede_metrics::Registry;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::RunConfig;
use crate::context::RunContext;
use crate::error::Result;
use crate::progress::{ProgressFn, ProgressUpdate};
use crate::schedule::RampingSchedule;
use crate::scheduler::{self, SchedulerState};
use crate::summary::{RunState, RunSummary};
use crate::thresholds::{CompiledThreshold, compile_thresholds, evaluate_thresholds};
use crate::vu::IterationContext;

/// Executes a full run and returns its summary.
///
/// Thresholds are compiled against `ctx`'s metrics before any VU starts, so
/// custom metrics must be registered on `ctx` beforehand. Stopping `ctx`
/// mid-run still yields a summary, with [`RunState::Cancelled`].
pub async fn run<F, Fut, E>(
    config: RunConfig,
    ctx: &RunContext,
    workload: F,
    progress: Option<ProgressFn>,
) -> Result<RunSummary>
where
    F: Fn(IterationContext) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<(), E>> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    config.options.validate()?;
    let thresholds = compile_thresholds(&config.thresholds, ctx.metrics())?;

    tracing::info!(
        stages = config.plan.stages().len(),
        max_vus = config.plan.max_vus(),
        duration = ?config.plan.total_duration(),
        thresholds = thresholds.len(),
        "starting run"
    );

    let handle = scheduler::start(&config.plan, &config.options, ctx, workload);

    let monitor_done = CancellationToken::new();
    let monitor = Monitor {
        metrics: ctx.metrics().clone(),
        thresholds: thresholds
            .iter()
            .filter(|t| t.spec().windowed || t.spec().abort_on_fail)
            .cloned()
            .collect(),
        state: handle.state().clone(),
        schedule: handle.schedule().clone(),
        started: handle.started_at(),
        interval: config.options.monitor_interval,
        progress,
        scheduler_stop: handle.stop_token(),
        done: monitor_done.clone(),
    };
    let monitor_task = tokio::spawn(monitor.run());

    let report = handle.wait().await;
    monitor_done.cancel();
    let monitored = monitor_task.await?;
    let report = report?;

    let metrics = ctx.metrics().snapshot(report.elapsed);
    let mut results = evaluate_thresholds(&thresholds, &metrics);
    for name in &monitored.latched {
        if let Some(result) = results.get_mut(name) {
            result.passed = false;
        }
    }

    let state = if monitored.aborted {
        RunState::AbortedByThreshold
    } else if report.stopped {
        RunState::Cancelled
    } else {
        RunState::Completed
    };

    let summary = RunSummary {
        state,
        duration: report.elapsed,
        iterations: report.iterations,
        interrupted_iterations: report.interrupted_iterations,
        vus_max: report.vus_max,
        metrics,
        thresholds: results,
        ingest_errors: ctx.metrics().ingest_errors(),
    };

    tracing::info!(
        state = %summary.state,
        iterations = summary.iterations,
        duration = ?summary.duration,
        thresholds_passed = summary.thresholds_passed(),
        "run finished"
    );

    Ok(summary)
}

#[derive(Debug, Default)]
struct MonitorOutcome {
    /// Thresholds that failed at least one periodic evaluation.
    latched: BTreeSet<String>,
    aborted: bool,
}

struct Monitor {
    metrics: Arc<Registry>,
    thresholds: Vec<CompiledThreshold>,
    state: Arc<SchedulerState>,
    schedule: Arc<RampingSchedule>,
    started: Instant,
    interval: Duration,
    progress: Option<ProgressFn>,
    scheduler_stop: CancellationToken,
    done: CancellationToken,
}

impl Monitor {
    async fn run(self) -> MonitorOutcome {
        let mut interval = tokio::time::interval_at(self.started + self.interval, self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut outcome = MonitorOutcome::default();
        let mut tick_id: u64 = 0;
        let mut last_at = self.started;
        let mut last_iterations: u64 = 0;

        loop {
            tokio::select! {
                biased;
                _ = self.done.cancelled() => break,
                _ = interval.tick() => {}
            }

            tick_id = tick_id.saturating_add(1);
            let now = Instant::now();
            let elapsed = now.duration_since(self.started);
            let dt = now.duration_since(last_at);
            last_at = now;

            if !self.thresholds.is_empty() {
                self.check_thresholds(elapsed, &mut outcome);
            }

            if let Some(progress) = &self.progress {
                let iterations_total = self.state.iterations_total();
                let delta = iterations_total.saturating_sub(last_iterations);
                last_iterations = iterations_total;

                progress(ProgressUpdate {
                    tick: tick_id,
                    elapsed,
                    total_duration: self.schedule.total_duration(),
                    stage: self.schedule.stage_snapshot_at(elapsed),
                    target_vus: self.state.target_vus(),
                    active_vus: self.state.active_vus(),
                    iterations_total,
                    iterations_per_sec_now: delta as f64 / dt.as_secs_f64().max(1e-9),
                    failed_thresholds: outcome.latched.iter().cloned().collect(),
                });
            }
        }

        outcome
    }

    /// A threshold is only judged once its series has data, so an empty
    /// trend early in the run does not fail it.
    fn check_thresholds(&self, elapsed: Duration, outcome: &mut MonitorOutcome) {
        let snapshot = self.metrics.snapshot(elapsed);
        for threshold in &self.thresholds {
            if outcome.latched.contains(threshold.name()) || !threshold.has_data(&snapshot) {
                continue;
            }

            let result = threshold.evaluate(&snapshot);
            if result.passed {
                continue;
            }

            tracing::warn!(
                threshold = threshold.name(),
                observed = ?result.observed,
                "threshold failed during run"
            );
            outcome.latched.insert(threshold.name().to_string());

            if threshold.spec().abort_on_fail && !outcome.aborted {
                tracing::warn!(threshold = threshold.name(), "aborting run");
                outcome.aborted = true;
                self.scheduler_stop.cancel();
            }
        }
    }
}
