use std::time::Duration;

use crate::config::{Stage, StagePlan};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSnapshot {
    /// 0-based stage index.
    pub index: usize,
    pub count: usize,
    pub stage_elapsed: Duration,
    pub stage_remaining: Duration,
    pub start_target: u64,
    pub end_target: u64,
    pub current_target: u64,
}

/// Piecewise-linear VU target over a [`StagePlan`].
#[derive(Debug, Clone)]
pub struct RampingSchedule {
    start: u64,
    stages: Vec<Stage>,
    cumulative_ends: Vec<Duration>,
}

impl RampingSchedule {
    pub fn new(plan: &StagePlan) -> Self {
        let mut cumulative_ends = Vec::with_capacity(plan.stages().len());
        let mut acc = Duration::ZERO;
        for s in plan.stages() {
            acc = acc.saturating_add(s.duration);
            cumulative_ends.push(acc);
        }

        Self {
            start: plan.start_vus(),
            stages: plan.stages().to_vec(),
            cumulative_ends,
        }
    }

    pub fn total_duration(&self) -> Duration {
        self.cumulative_ends
            .last()
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    pub fn is_done(&self, elapsed: Duration) -> bool {
        elapsed >= self.total_duration()
    }

    fn start_target_of(&self, idx: usize) -> u64 {
        if idx == 0 {
            self.start
        } else {
            self.stages[idx - 1].target
        }
    }

    fn stage_start(&self, idx: usize) -> Duration {
        if idx == 0 {
            Duration::ZERO
        } else {
            self.cumulative_ends[idx - 1]
        }
    }

    /// Stage whose window contains `elapsed`, or `None` once the plan is over.
    ///
    /// When `elapsed` sits exactly on a boundary the stage ending there is
    /// returned; with several zero-length stages on the same boundary, the
    /// last of them.
    fn stage_index_at(&self, elapsed: Duration) -> Option<usize> {
        if elapsed > self.total_duration() {
            return None;
        }
        let ended = self.cumulative_ends.partition_point(|end| *end <= elapsed);
        if ended > 0 && self.cumulative_ends[ended - 1] == elapsed {
            return Some(ended - 1);
        }
        (ended < self.stages.len()).then_some(ended)
    }

    /// Target VU count at `elapsed`, rounded half-up. Equals the declared
    /// target exactly at every stage boundary.
    pub fn target_at(&self, elapsed: Duration) -> u64 {
        let Some(idx) = self.stage_index_at(elapsed) else {
            return self.stages.last().map(|s| s.target).unwrap_or(self.start);
        };

        let stage_start = self.stage_start(idx);
        let stage_end = self.cumulative_ends[idx];
        let end_target = self.stages[idx].target;

        if elapsed == stage_end {
            return end_target;
        }

        let start_target = self.start_target_of(idx);
        if start_target == end_target {
            return end_target;
        }

        // Linear interpolation across the stage, in nanoseconds.
        let start_i = start_target as i128;
        let delta = end_target as i128 - start_i;
        let num = elapsed.saturating_sub(stage_start).as_nanos() as i128;
        let den = stage_end.saturating_sub(stage_start).as_nanos().max(1) as i128;

        // round(start + delta * num / den) == floor((2 * (start * den + delta * num) + den) / (2 * den))
        let scaled = start_i
            .saturating_mul(den)
            .saturating_add(delta.saturating_mul(num));
        let rounded = scaled
            .saturating_mul(2)
            .saturating_add(den)
            .div_euclid(den.saturating_mul(2));
        rounded.clamp(0, u64::MAX as i128) as u64
    }

    pub fn stage_snapshot_at(&self, elapsed: Duration) -> Option<StageSnapshot> {
        let idx = self.stage_index_at(elapsed)?;
        let stage_start = self.stage_start(idx);
        let stage_end = self.cumulative_ends[idx];

        Some(StageSnapshot {
            index: idx,
            count: self.stages.len(),
            stage_elapsed: elapsed.saturating_sub(stage_start),
            stage_remaining: stage_end.saturating_sub(elapsed),
            start_target: self.start_target_of(idx),
            end_target: self.stages[idx].target,
            current_target: self.target_at(elapsed),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn schedule(start: u64, stages: &[(u64, u64)]) -> RampingSchedule {
        let stages = stages
            .iter()
            .map(|(d, t)| Stage::new(secs(*d), *t))
            .collect();
        let plan = StagePlan::new(start, stages).unwrap_or_else(|e| panic!("{e}"));
        RampingSchedule::new(&plan)
    }

    #[test]
    fn boundaries_are_exact() {
        let s = schedule(0, &[(30, 5), (60, 5), (60, 0), (7, 3), (13, 11)]);
        assert_eq!(s.target_at(Duration::ZERO), 0);
        assert_eq!(s.target_at(secs(30)), 5);
        assert_eq!(s.target_at(secs(90)), 5);
        assert_eq!(s.target_at(secs(150)), 0);
        assert_eq!(s.target_at(secs(157)), 3);
        assert_eq!(s.target_at(secs(170)), 11);
        assert_eq!(s.target_at(secs(500)), 11);
    }

    #[test]
    fn interpolates_and_rounds_to_nearest() {
        let s = schedule(0, &[(30, 5)]);
        assert_eq!(s.target_at(secs(3)), 1); // 0.5 rounds up
        assert_eq!(s.target_at(Duration::from_millis(2999)), 0);
        assert_eq!(s.target_at(secs(15)), 3); // 2.5 rounds up
        assert_eq!(s.target_at(secs(12)), 2);

        let down = schedule(10, &[(10, 0)]);
        assert_eq!(down.target_at(secs(1)), 9);
        assert_eq!(down.target_at(Duration::from_millis(5500)), 5); // 4.5 rounds up
    }

    #[test]
    fn zero_length_stage_jumps_at_its_boundary() {
        let s = schedule(2, &[(10, 2), (0, 8), (10, 8)]);
        assert_eq!(s.target_at(Duration::from_millis(9999)), 2);
        assert_eq!(s.target_at(secs(10)), 8);
        assert_eq!(s.target_at(secs(15)), 8);

        let leading = schedule(0, &[(0, 4), (10, 4)]);
        assert_eq!(leading.target_at(Duration::ZERO), 4);
    }

    #[test]
    fn start_vus_used_before_first_stage_moves() {
        let s = schedule(4, &[(10, 8)]);
        assert_eq!(s.target_at(Duration::ZERO), 4);
        assert_eq!(s.target_at(secs(5)), 6);
    }

    #[test]
    fn stage_snapshot_reports_position() {
        let s = schedule(0, &[(30, 5), (60, 5), (60, 0)]);
        let snap = s.stage_snapshot_at(secs(45)).unwrap_or_else(|| panic!("snapshot"));
        assert_eq!(snap.index, 1);
        assert_eq!(snap.count, 3);
        assert_eq!(snap.stage_elapsed, secs(15));
        assert_eq!(snap.stage_remaining, secs(45));
        assert_eq!(snap.start_target, 5);
        assert_eq!(snap.current_target, 5);

        assert!(s.stage_snapshot_at(secs(151)).is_none());
        assert_eq!(
            s.stage_snapshot_at(secs(150)).map(|s| s.index),
            Some(2)
        );
    }
}
