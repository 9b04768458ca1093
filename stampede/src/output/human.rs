use std::path::Path;
use std::sync::Arc;

mod progress;

use stampede_core::{ProgressFn, ProgressUpdate, RunSummary, StagePlan};

use super::OutputFormatter;
use super::format::{format_duration, format_number, format_rate};
use super::text::render;
use progress::HumanProgress;

pub(crate) struct HumanReadableOutput {
    progress: Arc<HumanProgress>,
}

impl HumanReadableOutput {
    pub(crate) fn new() -> Self {
        Self {
            progress: Arc::new(HumanProgress::new()),
        }
    }
}

impl OutputFormatter for HumanReadableOutput {
    fn print_header(&self, scenario_path: &Path, plan: &StagePlan) {
        println!("scenario: {}", scenario_path.display());
        println!(
            "plan: start_vus={} max_vus={} duration={}",
            plan.start_vus(),
            plan.max_vus(),
            format_duration(plan.total_duration())
        );
        for (i, stage) in plan.stages().iter().enumerate() {
            println!(
                "  stage {}: {} -> {} vus",
                i + 1,
                format_duration(stage.duration),
                stage.target
            );
        }
        println!();
    }

    fn progress(&self) -> Option<ProgressFn> {
        let progress = self.progress.clone();
        Some(Arc::new(move |u| {
            progress.update(u.total_duration, u.elapsed, progress_message(&u));
        }))
    }

    fn print_summary(&self, summary: &RunSummary) -> anyhow::Result<()> {
        self.progress.finish();
        print!("{}", render(summary));

        let failed = summary.failed_thresholds().collect::<Vec<_>>();
        if !failed.is_empty() {
            eprintln!("thresholds failed:");
            for (name, t) in failed {
                match t.observed {
                    Some(obs) => eprintln!("  {name} (observed {})", format_number(obs)),
                    None => eprintln!("  {name} (no data)"),
                }
            }
        }

        Ok(())
    }
}

fn progress_message(u: &ProgressUpdate) -> String {
    let mut msg = match &u.stage {
        Some(stage) => format!(
            "stage={}/{} target={} stage_remaining={} ",
            stage.index + 1,
            stage.count,
            stage.current_target,
            format_duration(stage.stage_remaining)
        ),
        None => format!("target={} ", u.target_vus),
    };
    msg.push_str(&format!(
        "vus={} iters={} iters/s={} elapsed={}",
        u.active_vus,
        u.iterations_total,
        format_rate(u.iterations_per_sec_now),
        format_duration(u.elapsed)
    ));
    if !u.failed_thresholds.is_empty() {
        msg.push_str(&format!(" thresholds_failed={}", u.failed_thresholds.len()));
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use stampede_core::StageSnapshot;

    fn update(stage: Option<StageSnapshot>) -> ProgressUpdate {
        ProgressUpdate {
            tick: 3,
            elapsed: Duration::from_secs(3),
            total_duration: Duration::from_secs(10),
            stage,
            target_vus: 4,
            active_vus: 3,
            iterations_total: 120,
            iterations_per_sec_now: 41.6,
            failed_thresholds: Vec::new(),
        }
    }

    #[test]
    fn message_includes_stage_position() {
        let msg = progress_message(&update(Some(StageSnapshot {
            index: 1,
            count: 3,
            stage_elapsed: Duration::from_secs(1),
            stage_remaining: Duration::from_secs(4),
            start_target: 2,
            end_target: 6,
            current_target: 4,
        })));
        assert_eq!(
            msg,
            "stage=2/3 target=4 stage_remaining=4s vus=3 iters=120 iters/s=42 elapsed=3s"
        );
    }

    #[test]
    fn message_without_stage_reports_failed_thresholds() {
        let mut u = update(None);
        u.failed_thresholds = vec!["http_req_failed: rate<0.01".to_string()];
        assert_eq!(
            progress_message(&u),
            "target=4 vus=3 iters=120 iters/s=42 elapsed=3s thresholds_failed=1"
        );
    }
}
