use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use stampede_metrics::Registry;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::{RunOptions, StagePlan};
use crate::context::{BuiltinMetrics, RunContext};
use crate::error::{Error, Result};
use crate::schedule::{RampingSchedule, StageSnapshot};
use crate::vu::IterationContext;

/// Live counters shared between the control loop, the VUs and observers.
#[derive(Debug, Default)]
pub struct SchedulerState {
    target: AtomicU64,
    active: AtomicU64,
    live: AtomicU64,
    vus_max: AtomicU64,
    in_flight: AtomicU64,
    iterations: AtomicU64,
}

impl SchedulerState {
    pub fn target_vus(&self) -> u64 {
        self.target.load(Ordering::Relaxed)
    }

    /// VUs not asked to stop.
    pub fn active_vus(&self) -> u64 {
        self.active.load(Ordering::Relaxed)
    }

    /// Active VUs plus those finishing their last iteration.
    pub fn live_vus(&self) -> u64 {
        self.live.load(Ordering::Relaxed)
    }

    pub fn vus_max(&self) -> u64 {
        self.vus_max.load(Ordering::Relaxed)
    }

    pub fn iterations_total(&self) -> u64 {
        self.iterations.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerReport {
    pub elapsed: Duration,
    pub iterations: u64,
    /// Iterations cut short because `graceful_stop` expired.
    pub interrupted_iterations: u64,
    pub vus_max: u64,
    /// The plan did not run to its end.
    pub stopped: bool,
}

#[derive(Debug)]
pub struct SchedulerHandle {
    stop: CancellationToken,
    state: Arc<SchedulerState>,
    schedule: Arc<RampingSchedule>,
    started: Instant,
    task: JoinHandle<Result<SchedulerReport>>,
}

impl SchedulerHandle {
    /// Stops the plan; VUs finish their in-flight iteration first.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    pub fn state(&self) -> &Arc<SchedulerState> {
        &self.state
    }

    pub fn schedule(&self) -> &Arc<RampingSchedule> {
        &self.schedule
    }

    pub fn started_at(&self) -> Instant {
        self.started
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn stage_snapshot(&self) -> Option<StageSnapshot> {
        self.schedule.stage_snapshot_at(self.elapsed())
    }

    /// Resolves once the plan has ended (or was stopped) and every VU exited.
    pub async fn wait(self) -> Result<SchedulerReport> {
        self.task.await?
    }
}

struct VuShared {
    metrics: Arc<Registry>,
    builtin: Arc<BuiltinMetrics>,
    state: Arc<SchedulerState>,
    think_time: Duration,
}

/// Starts driving `plan` on the current tokio runtime.
///
/// Stopping `ctx` stops this scheduler as well.
pub fn start<F, Fut, E>(
    plan: &StagePlan,
    options: &RunOptions,
    ctx: &RunContext,
    workload: F,
) -> SchedulerHandle
where
    F: Fn(IterationContext) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<(), E>> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    let schedule = Arc::new(RampingSchedule::new(plan));
    let state = Arc::new(SchedulerState::default());
    let stop = ctx.stop_token().child_token();
    let started = Instant::now();

    let control = ControlLoop {
        schedule: schedule.clone(),
        control_tick: options.control_tick,
        graceful_stop: options.graceful_stop,
        stop: stop.clone(),
        state: state.clone(),
        started,
        shared: Arc::new(VuShared {
            metrics: ctx.metrics().clone(),
            builtin: ctx.builtin().clone(),
            state: state.clone(),
            think_time: options.think_time,
        }),
    };

    SchedulerHandle {
        stop,
        state,
        schedule,
        started,
        task: tokio::spawn(control.run(workload)),
    }
}

struct ControlLoop {
    schedule: Arc<RampingSchedule>,
    control_tick: Duration,
    graceful_stop: Option<Duration>,
    stop: CancellationToken,
    state: Arc<SchedulerState>,
    started: Instant,
    shared: Arc<VuShared>,
}

impl ControlLoop {
    async fn run<F, Fut, E>(self, workload: F) -> Result<SchedulerReport>
    where
        F: Fn(IterationContext) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), E>> + Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        let total = self.schedule.total_duration();
        let deadline = self.started + total;
        let mut tick = tokio::time::interval(self.control_tick);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let all_vus = CancellationToken::new();
        let mut tasks: JoinSet<u64> = JoinSet::new();
        // Spawn order; the newest VU is retired first.
        let mut active: Vec<(u64, CancellationToken)> = Vec::new();
        let mut next_id: u64 = 1;
        let mut fault: Option<String> = None;
        let mut stopped = false;
        let mut stage_idx: Option<usize> = None;

        loop {
            while let Some(res) = tasks.try_join_next() {
                reap(res, &mut fault);
            }
            if fault.is_some() {
                stopped = true;
                break;
            }

            let elapsed = self.started.elapsed();
            if let Some(stage) = self.schedule.stage_snapshot_at(elapsed)
                && stage_idx != Some(stage.index)
            {
                stage_idx = Some(stage.index);
                tracing::info!(
                    stage = stage.index + 1,
                    stages = stage.count,
                    from = stage.start_target,
                    to = stage.end_target,
                    "entering stage"
                );
            }
            if elapsed >= total {
                break;
            }

            let target = self.schedule.target_at(elapsed);
            self.state.target.store(target, Ordering::Relaxed);

            while (active.len() as u64) < target {
                let id = next_id;
                next_id = next_id.saturating_add(1);
                let token = all_vus.child_token();
                tasks.spawn(vu_loop(
                    id,
                    token.clone(),
                    self.shared.clone(),
                    workload.clone(),
                ));
                active.push((id, token));
                tracing::debug!(vu = id, "vu started");
            }
            while (active.len() as u64) > target {
                if let Some((id, token)) = active.pop() {
                    token.cancel();
                    tracing::debug!(vu = id, "vu retiring");
                }
            }

            self.state
                .active
                .store(active.len() as u64, Ordering::Relaxed);
            self.state.live.store(tasks.len() as u64, Ordering::Relaxed);
            self.state
                .vus_max
                .fetch_max(active.len() as u64, Ordering::Relaxed);

            tokio::select! {
                biased;
                _ = self.stop.cancelled() => {
                    stopped = true;
                    break;
                }
                Some(res) = tasks.join_next(), if !tasks.is_empty() => {
                    reap(res, &mut fault);
                }
                _ = tokio::time::sleep_until(deadline) => {}
                _ = tick.tick() => {}
            }
        }

        all_vus.cancel();
        self.state.active.store(0, Ordering::Relaxed);
        self.state.target.store(0, Ordering::Relaxed);

        let interrupted = self.drain(&mut tasks, &mut fault).await;
        self.state.live.store(0, Ordering::Relaxed);

        if let Some(fault) = fault {
            return Err(Error::SchedulerFault(fault));
        }

        Ok(SchedulerReport {
            elapsed: self.started.elapsed(),
            iterations: self.state.iterations_total(),
            interrupted_iterations: interrupted,
            vus_max: self.state.vus_max(),
            stopped,
        })
    }

    /// Waits for every VU to exit. Returns the number of iterations that
    /// were still running when `graceful_stop` expired.
    async fn drain(&self, tasks: &mut JoinSet<u64>, fault: &mut Option<String>) -> u64 {
        let graceful = async {
            while let Some(res) = tasks.join_next().await {
                reap(res, fault);
                self.state.live.store(tasks.len() as u64, Ordering::Relaxed);
            }
        };

        let Some(grace) = self.graceful_stop else {
            graceful.await;
            return 0;
        };
        if tokio::time::timeout(grace, graceful).await.is_ok() {
            return 0;
        }

        let interrupted = self.shared.state.in_flight.load(Ordering::Relaxed);
        tracing::warn!(
            interrupted,
            vus = tasks.len(),
            "graceful stop expired, aborting remaining vus"
        );
        tasks.abort_all();
        while let Some(res) = tasks.join_next().await {
            reap(res, fault);
        }
        interrupted
    }
}

fn reap(res: std::result::Result<u64, JoinError>, fault: &mut Option<String>) {
    match res {
        Ok(id) => tracing::debug!(vu = id, "vu exited"),
        Err(err) if err.is_panic() => {
            tracing::error!(error = %err, "vu task panicked");
            fault.get_or_insert_with(|| err.to_string());
        }
        // Aborted after `graceful_stop`.
        Err(_) => {}
    }
}

async fn vu_loop<F, Fut, E>(
    id: u64,
    token: CancellationToken,
    shared: Arc<VuShared>,
    workload: F,
) -> u64
where
    F: Fn(IterationContext) -> Fut,
    Fut: Future<Output = std::result::Result<(), E>>,
    E: std::error::Error,
{
    let mut iteration: u64 = 0;
    while !token.is_cancelled() {
        let ctx = IterationContext::new(
            id,
            iteration,
            shared.metrics.clone(),
            shared.builtin.clone(),
        );

        shared.state.in_flight.fetch_add(1, Ordering::Relaxed);
        let began = Instant::now();
        let outcome = workload(ctx).await;
        let took = began.elapsed();
        shared.state.in_flight.fetch_sub(1, Ordering::Relaxed);
        shared.state.iterations.fetch_add(1, Ordering::Relaxed);

        shared.builtin.iterations.add(1.0);
        shared.builtin.iteration_duration.add_duration(took);
        shared.builtin.success.add_bool(outcome.is_ok());
        if let Err(err) = outcome {
            tracing::debug!(vu = id, iteration, error = %err, "iteration failed");
        }
        iteration = iteration.saturating_add(1);

        if shared.think_time.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(shared.think_time) => {}
            }
        }
    }
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Stage;

    #[derive(Debug, thiserror::Error)]
    #[error("boom")]
    struct Boom;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    async fn sleepy(_ctx: IterationContext) -> std::result::Result<(), Boom> {
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn follows_the_ramp() {
        let ctx = RunContext::new().unwrap_or_else(|e| panic!("{e}"));
        let plan = StagePlan::new(
            0,
            vec![Stage::new(secs(30), 5), Stage::new(secs(30), 0)],
        )
        .unwrap_or_else(|e| panic!("{e}"));

        let handle = start(&plan, &RunOptions::default(), &ctx, sleepy);

        tokio::time::sleep(Duration::from_millis(15_050)).await;
        assert!((2..=3).contains(&handle.state().active_vus()));

        tokio::time::sleep(secs(15)).await;
        assert_eq!(handle.state().active_vus(), 5);
        assert_eq!(handle.stage_snapshot().map(|s| s.index), Some(1));

        // Halfway down the second stage.
        tokio::time::sleep(secs(15)).await;
        assert!((2..=3).contains(&handle.state().active_vus()));
        assert!(handle.state().live_vus() >= handle.state().active_vus());

        let state = handle.state().clone();
        let report = handle.wait().await.unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(state.active_vus(), 0);
        assert_eq!(state.live_vus(), 0);
        assert!(!report.stopped);
        assert_eq!(report.vus_max, 5);
        assert!(report.iterations > 0);
        assert!(report.elapsed >= secs(60));
        assert_eq!(report.interrupted_iterations, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_finishes_in_flight_iterations() {
        let ctx = RunContext::new().unwrap_or_else(|e| panic!("{e}"));
        let plan = StagePlan::constant(3, secs(60)).unwrap_or_else(|e| panic!("{e}"));
        let handle = start(&plan, &RunOptions::default(), &ctx, sleepy);

        tokio::time::sleep(secs(5)).await;
        handle.stop();
        let report = handle.wait().await.unwrap_or_else(|e| panic!("{e}"));

        assert!(report.stopped);
        assert!(report.elapsed < secs(6));
        assert_eq!(report.interrupted_iterations, 0);
        // Every started iteration was recorded.
        let snap = ctx.metrics().snapshot(report.elapsed);
        let Some(stampede_metrics::CollectorSnapshot::Counter(c)) = snap.get("iterations") else {
            panic!("expected iterations counter");
        };
        assert_eq!(c.count as u64, report.iterations);
    }

    #[tokio::test(start_paused = true)]
    async fn retired_vus_finish_and_record_their_iteration() {
        let ctx = RunContext::new().unwrap_or_else(|e| panic!("{e}"));
        let plan = StagePlan::new(
            4,
            vec![
                Stage::new(secs(3), 4),
                Stage::new(Duration::from_millis(500), 1),
                Stage::new(secs(3), 1),
            ],
        )
        .unwrap_or_else(|e| panic!("{e}"));
        let started = Arc::new(AtomicU64::new(0));

        let counter = started.clone();
        let handle = start(&plan, &RunOptions::default(), &ctx, move |_ctx| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::Relaxed);
                tokio::time::sleep(Duration::from_millis(1300)).await;
                Ok::<(), Boom>(())
            }
        });

        // Scaled down to one VU while three are mid-iteration.
        tokio::time::sleep(Duration::from_millis(3600)).await;
        assert_eq!(handle.state().active_vus(), 1);
        assert!(handle.state().live_vus() > 1);

        let state = handle.state().clone();
        let report = handle.wait().await.unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(state.live_vus(), 0);
        assert_eq!(report.interrupted_iterations, 0);
        assert_eq!(report.iterations, started.load(Ordering::Relaxed));

        let snap = ctx.metrics().snapshot(report.elapsed);
        let Some(stampede_metrics::CollectorSnapshot::Counter(c)) = snap.get("iterations") else {
            panic!("expected iterations counter");
        };
        assert_eq!(c.count as u64, report.iterations);
        let Some(stampede_metrics::CollectorSnapshot::Trend(t)) = snap.get("iteration_duration")
        else {
            panic!("expected iteration_duration trend");
        };
        assert_eq!(t.count, report.iterations);
    }

    #[tokio::test(start_paused = true)]
    async fn graceful_stop_interrupts_long_iterations() {
        let ctx = RunContext::new().unwrap_or_else(|e| panic!("{e}"));
        let plan = StagePlan::constant(2, secs(1)).unwrap_or_else(|e| panic!("{e}"));
        let options = RunOptions {
            graceful_stop: Some(Duration::from_millis(500)),
            ..RunOptions::default()
        };

        let handle = start(&plan, &options, &ctx, |_ctx| async {
            tokio::time::sleep(secs(30)).await;
            Ok::<(), Boom>(())
        });
        let report = handle.wait().await.unwrap_or_else(|e| panic!("{e}"));

        assert_eq!(report.interrupted_iterations, 2);
        assert_eq!(report.iterations, 0);
        assert!(report.elapsed < secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_vu_is_a_fault() {
        let ctx = RunContext::new().unwrap_or_else(|e| panic!("{e}"));
        let plan = StagePlan::constant(2, secs(10)).unwrap_or_else(|e| panic!("{e}"));

        let handle = start(&plan, &RunOptions::default(), &ctx, |ctx: IterationContext| async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if ctx.vu_id() == 2 && ctx.iteration() == 3 {
                panic!("vu exploded");
            }
            Ok::<(), Boom>(())
        });

        match handle.wait().await {
            Err(Error::SchedulerFault(_)) => {}
            other => panic!("expected scheduler fault, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn think_time_spaces_iterations() {
        let ctx = RunContext::new().unwrap_or_else(|e| panic!("{e}"));
        let plan = StagePlan::constant(1, secs(10)).unwrap_or_else(|e| panic!("{e}"));
        let options = RunOptions {
            think_time: secs(1),
            ..RunOptions::default()
        };

        let handle = start(&plan, &options, &ctx, |_ctx| async { Ok::<(), Boom>(()) });
        let report = handle.wait().await.unwrap_or_else(|e| panic!("{e}"));

        assert!((9..=11).contains(&report.iterations), "{}", report.iterations);
        assert!(report.elapsed < Duration::from_millis(10_500));
    }
}
