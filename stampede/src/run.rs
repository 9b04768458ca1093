use anyhow::Context as _;
use std::path::Path;

use stampede_core::{
    JsonExporter, RunConfig, RunContext, RunOptions, StagePlan, SummaryExporter,
    write_summary_files,
};

use crate::cli::RunArgs;
use crate::env::merged_env;
use crate::exit_codes::ExitCode;
use crate::output::{self, text::TextExporter};
use crate::run_error::RunError;
use crate::scenario::{self, Scenario};
use crate::workload::Workload;

pub async fn run(args: RunArgs) -> Result<ExitCode, RunError> {
    let out = output::formatter(args.output);

    let env = merged_env(&args.env).map_err(RunError::InvalidInput)?;
    let scenario = scenario::load(&args.scenario, &env)
        .await
        .map_err(RunError::InvalidInput)?;

    let plan = stage_plan(&args, &scenario).map_err(RunError::InvalidInput)?;
    let options = run_options(&args, &scenario);
    let thresholds = scenario.threshold_specs().map_err(RunError::InvalidInput)?;

    let ctx = RunContext::new().map_err(|e| RunError::from_core("failed to set up metrics", e))?;
    let workload = Workload::build(&scenario, &ctx).map_err(RunError::InvalidInput)?;

    let stop = ctx.stop_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; stopping run");
            stop.cancel();
        }
    });

    out.print_header(&args.scenario, &plan);
    tracing::info!(
        scenario = %args.scenario.display(),
        requests = scenario.requests.len(),
        "scenario loaded"
    );

    let config = RunConfig::new(plan)
        .with_thresholds(thresholds)
        .with_options(options);
    let result = stampede_core::run(
        config,
        &ctx,
        move |it| workload.clone().iteration(it),
        out.progress(),
    )
    .await;
    interrupt.abort();

    let summary = result.map_err(|e| RunError::from_core("run failed", e))?;

    out.print_summary(&summary).map_err(RunError::RuntimeError)?;

    write_outputs(Path::new("."), &args, &scenario, &summary)?;

    Ok(ExitCode::for_summary(&summary))
}

/// `--stage` wins over `--vus`/`--duration`, which win over the scenario.
fn stage_plan(args: &RunArgs, scenario: &Scenario) -> anyhow::Result<StagePlan> {
    let plan = if !args.stages.is_empty() {
        StagePlan::new(scenario.start_vus, args.stages.clone())
    } else {
        match (args.vus, args.duration) {
            (Some(vus), Some(duration)) => StagePlan::constant(vus, duration),
            (None, None) => return scenario.plan(),
            _ => anyhow::bail!("--vus and --duration must be given together"),
        }
    };
    plan.context("invalid stage plan")
}

fn run_options(args: &RunArgs, scenario: &Scenario) -> RunOptions {
    let defaults = RunOptions::default();
    RunOptions {
        think_time: args
            .think_time
            .or(scenario.think_time.map(|d| d.into_inner()))
            .unwrap_or(defaults.think_time),
        graceful_stop: args
            .graceful_stop
            .or(scenario.graceful_stop.map(|d| d.into_inner())),
        ..defaults
    }
}

fn write_outputs(
    base_dir: &Path,
    args: &RunArgs,
    scenario: &Scenario,
    summary: &stampede_core::RunSummary,
) -> Result<(), RunError> {
    let json = JsonExporter::pretty();
    let text = TextExporter;

    let mut outputs: Vec<(&str, &dyn SummaryExporter)> = Vec::new();
    if let Some(path) = &scenario.summary.json {
        outputs.push((path.as_str(), &json));
    }
    if let Some(path) = &scenario.summary.text {
        outputs.push((path.as_str(), &text));
    }
    if let Some(path) = &args.summary_export {
        outputs.push((path.as_str(), &json));
    }
    if outputs.is_empty() {
        return Ok(());
    }

    write_summary_files(base_dir, summary, &outputs)
        .map(|_| ())
        .map_err(|e| RunError::from_core("failed to write summary", e))
}
