use serde::Serialize;
use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;

use stampede_core::{ProgressFn, ProgressUpdate, RunSummary, StagePlan};

use super::OutputFormatter;

pub(crate) struct JsonOutput;

impl OutputFormatter for JsonOutput {
    fn print_header(&self, _scenario_path: &Path, _plan: &StagePlan) {}

    fn progress(&self) -> Option<ProgressFn> {
        Some(Arc::new(move |u| {
            emit_json_line(&build_progress_line(&u));
        }))
    }

    fn print_summary(&self, summary: &RunSummary) -> anyhow::Result<()> {
        emit_json_line(&JsonSummaryLine {
            kind: "summary",
            summary,
        });
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonProgressLine<'a> {
    pub kind: &'static str,
    pub tick: u64,
    pub elapsed_secs: f64,
    pub total_secs: f64,
    pub stage: Option<usize>,
    pub stages: Option<usize>,
    pub target_vus: u64,
    pub active_vus: u64,
    pub iterations_total: u64,
    pub iterations_per_sec: f64,
    pub failed_thresholds: &'a [String],
}

fn build_progress_line(u: &ProgressUpdate) -> JsonProgressLine<'_> {
    JsonProgressLine {
        kind: "progress",
        tick: u.tick,
        elapsed_secs: u.elapsed.as_secs_f64(),
        total_secs: u.total_duration.as_secs_f64(),
        stage: u.stage.as_ref().map(|s| s.index + 1),
        stages: u.stage.as_ref().map(|s| s.count),
        target_vus: u.target_vus,
        active_vus: u.active_vus,
        iterations_total: u.iterations_total,
        iterations_per_sec: u.iterations_per_sec_now,
        failed_thresholds: &u.failed_thresholds,
    }
}

/// The summary document with a `kind` discriminator in front.
#[derive(Debug, Serialize)]
pub(crate) struct JsonSummaryLine<'a> {
    pub kind: &'static str,
    #[serde(flatten)]
    pub summary: &'a RunSummary,
}

fn emit_json_line<T: Serialize>(line: &T) {
    let mut out = std::io::stdout().lock();
    if serde_json::to_writer(&mut out, line).is_ok() {
        let _ = writeln!(out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::collections::BTreeMap;
    use std::time::Duration;

    use stampede_core::RunState;

    #[test]
    fn progress_line_has_kind_and_stage() {
        let u = ProgressUpdate {
            tick: 2,
            elapsed: Duration::from_millis(1500),
            total_duration: Duration::from_secs(10),
            stage: None,
            target_vus: 5,
            active_vus: 5,
            iterations_total: 30,
            iterations_per_sec_now: 20.0,
            failed_thresholds: vec!["checks: rate>0.9".to_string()],
        };

        let v = serde_json::to_value(build_progress_line(&u)).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(v.get("kind").and_then(Value::as_str), Some("progress"));
        assert_eq!(v.get("elapsed_secs").and_then(Value::as_f64), Some(1.5));
        assert_eq!(v.get("stage"), Some(&Value::Null));
        assert_eq!(
            v.pointer("/failed_thresholds/0").and_then(Value::as_str),
            Some("checks: rate>0.9")
        );
    }

    #[test]
    fn summary_line_flattens_the_summary() {
        let summary = RunSummary {
            state: RunState::AbortedByThreshold,
            duration: Duration::from_millis(2500),
            iterations: 7,
            interrupted_iterations: 1,
            vus_max: 3,
            metrics: BTreeMap::new(),
            thresholds: BTreeMap::new(),
            ingest_errors: BTreeMap::new(),
        };
        let line = JsonSummaryLine {
            kind: "summary",
            summary: &summary,
        };

        let v = serde_json::to_value(&line).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(v.get("kind").and_then(Value::as_str), Some("summary"));
        assert_eq!(v.get("state").and_then(Value::as_str), Some("aborted_by_threshold"));
        assert_eq!(v.get("duration").and_then(Value::as_f64), Some(2500.0));
        assert_eq!(v.get("iterations").and_then(Value::as_u64), Some(7));
    }
}
