use std::sync::Arc;
use std::time::Duration;

use crate::schedule::StageSnapshot;

#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// Monotonic tick counter (1-based) for progress emissions.
    pub tick: u64,
    pub elapsed: Duration,
    pub total_duration: Duration,
    pub stage: Option<StageSnapshot>,
    pub target_vus: u64,
    pub active_vus: u64,
    pub iterations_total: u64,
    /// Iterations/sec observed during the last progress interval.
    pub iterations_per_sec_now: f64,
    /// Names of thresholds that have failed a periodic evaluation so far.
    pub failed_thresholds: Vec<String>,
}

pub type ProgressFn = Arc<dyn Fn(ProgressUpdate) + Send + Sync + 'static>;
