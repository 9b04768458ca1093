use std::time::Duration;

use crate::error::{Error, Result};
use crate::thresholds::ThresholdSpec;

pub const MIN_CONTROL_TICK: Duration = Duration::from_millis(10);
pub const MAX_CONTROL_TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: u64,
}

impl Stage {
    pub fn new(duration: Duration, target: u64) -> Self {
        Self { duration, target }
    }
}

/// Validated, immutable list of stages plus the VU count at `t = 0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagePlan {
    start_vus: u64,
    stages: Vec<Stage>,
}

impl StagePlan {
    pub fn new(start_vus: u64, stages: Vec<Stage>) -> Result<Self> {
        if stages.is_empty() {
            return Err(Error::InvalidStages);
        }

        let total = stages
            .iter()
            .fold(Duration::ZERO, |acc, st| acc.saturating_add(st.duration));
        if total.is_zero() {
            return Err(Error::InvalidStages);
        }

        let max_stage = stages.iter().map(|st| st.target).max().unwrap_or(0);
        if max_stage.max(start_vus) == 0 {
            return Err(Error::InvalidVus);
        }

        Ok(Self { start_vus, stages })
    }

    /// `vus` VUs from the first instant until `duration` has elapsed.
    pub fn constant(vus: u64, duration: Duration) -> Result<Self> {
        Self::new(vus, vec![Stage::new(duration, vus)])
    }

    pub fn start_vus(&self) -> u64 {
        self.start_vus
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn total_duration(&self) -> Duration {
        self.stages
            .iter()
            .fold(Duration::ZERO, |acc, st| acc.saturating_add(st.duration))
    }

    pub fn max_vus(&self) -> u64 {
        self.stages
            .iter()
            .map(|st| st.target)
            .fold(self.start_vus, u64::max)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// How often the scheduler recomputes the VU target.
    pub control_tick: Duration,

    /// Pause between two iterations of the same VU.
    pub think_time: Duration,

    /// How long VUs still inside an iteration may run after the plan ends
    /// or a stop is requested. `None` waits for them indefinitely.
    pub graceful_stop: Option<Duration>,

    /// Period of progress updates and windowed threshold checks.
    pub monitor_interval: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            control_tick: Duration::from_millis(100),
            think_time: Duration::ZERO,
            graceful_stop: None,
            monitor_interval: Duration::from_secs(1),
        }
    }
}

impl RunOptions {
    pub fn validate(&self) -> Result<()> {
        if !(MIN_CONTROL_TICK..=MAX_CONTROL_TICK).contains(&self.control_tick) {
            return Err(Error::InvalidControlTick(self.control_tick));
        }
        if self.monitor_interval.is_zero() {
            return Err(Error::InvalidMonitorInterval);
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub plan: StagePlan,
    pub thresholds: Vec<ThresholdSpec>,
    pub options: RunOptions,
}

impl RunConfig {
    pub fn new(plan: StagePlan) -> Self {
        Self {
            plan,
            thresholds: Vec::new(),
            options: RunOptions::default(),
        }
    }

    #[must_use]
    pub fn with_thresholds(mut self, thresholds: Vec<ThresholdSpec>) -> Self {
        self.thresholds = thresholds;
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }
}
