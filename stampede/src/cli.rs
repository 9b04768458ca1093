use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use stampede_core::Stage;

pub(crate) fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s)
        .map_err(|err| format!("invalid duration '{s}': {err} (expected e.g. 10s, 250ms, 1m30s)"))
}

/// `DURATION:TARGET`, e.g. `30s:5`.
fn parse_stage(input: &str) -> Result<Stage, String> {
    let (duration, target) = input
        .split_once(':')
        .ok_or_else(|| format!("invalid stage '{input}' (expected DURATION:TARGET, e.g. 30s:5)"))?;
    let duration = parse_duration(duration)?;
    let target = target
        .trim()
        .parse::<u64>()
        .map_err(|_| format!("invalid stage target in '{input}' (expected a VU count)"))?;
    Ok(Stage::new(duration, target))
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum OutputFormat {
    /// Progress bar on stderr and a text summary on stdout.
    HumanReadable,
    /// Emit JSON progress and summary lines (NDJSON) to stdout.
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "stampede",
    author,
    version,
    about = "Staged HTTP load testing with thresholds",
    long_about = "stampede runs an HTTP scenario with a staged virtual-user ramp, aggregates request metrics and evaluates pass/fail thresholds.\n\nScenarios are YAML files; `${VAR}` and `${VAR:-default}` are expanded from the process environment and `--env KEY=VALUE` overrides.",
    after_help = "Examples:\n  stampede run demos/httpbin.yaml\n  stampede run demos/httpbin.yaml --vus 10 --duration 30s\n  stampede run demos/httpbin.yaml --stage 10s:5 --stage 20s:5 --stage 10s:0\n  stampede run demos/httpbin.yaml --env BASE_URL=http://localhost:8080 --output json\n  stampede report summary.json"
)]
pub struct Cli {
    /// Log filter (e.g. info, stampede_core=debug). Defaults to RUST_LOG, then `warn`.
    #[arg(long, global = true, value_name = "FILTER", env = "STAMPEDE_LOG")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a load test scenario
    #[command(
        long_about = "Run a scenario file.\n\nCLI flags override the scenario: `--vus` with `--duration` runs a constant load, `--stage` replaces the stage list."
    )]
    Run(RunArgs),

    /// Render a saved JSON summary as text
    Report(ReportArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Path to the scenario (.yaml)
    pub scenario: PathBuf,

    /// Constant number of virtual users (requires --duration)
    #[arg(long)]
    pub vus: Option<u64>,

    /// Constant-load duration (e.g. 10s, 250ms, 1m; requires --vus)
    #[arg(long, value_parser = parse_duration)]
    pub duration: Option<Duration>,

    /// Replace the scenario stages (repeatable, DURATION:TARGET)
    #[arg(long = "stage", value_name = "DURATION:TARGET", value_parser = parse_stage)]
    pub stages: Vec<Stage>,

    /// Pause between iterations of each VU
    #[arg(long, value_parser = parse_duration)]
    pub think_time: Option<Duration>,

    /// How long in-flight iterations may finish after the run ends
    #[arg(long, value_parser = parse_duration)]
    pub graceful_stop: Option<Duration>,

    /// Add/override env vars used for `${VAR}` expansion (repeatable, KEY=VALUE)
    #[arg(long = "env", value_name = "KEY=VALUE")]
    pub env: Vec<String>,

    /// Also write the JSON summary to this relative path
    #[arg(long, value_name = "PATH")]
    pub summary_export: Option<String>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::HumanReadable)]
    pub output: OutputFormat,
}

#[derive(Debug, Args)]
pub struct ReportArgs {
    /// Summary produced by `run` (JSON)
    pub summary: PathBuf,
}
