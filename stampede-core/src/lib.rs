mod config;
mod context;
mod error;
mod outputs;
mod progress;
mod run;
mod schedule;
mod scheduler;
mod summary;
mod thresholds;
mod vu;

pub use config::{MAX_CONTROL_TICK, MIN_CONTROL_TICK, RunConfig, RunOptions, Stage, StagePlan};
pub use context::{BuiltinMetrics, CHECKS, ITERATION_DURATION, ITERATIONS, RunContext, SUCCESS};
pub use error::{Error, Result};
pub use outputs::{sanitize_relative_output_path, write_summary_files};
pub use progress::{ProgressFn, ProgressUpdate};
pub use run::run;
pub use schedule::{RampingSchedule, StageSnapshot};
pub use scheduler::{SchedulerHandle, SchedulerReport, SchedulerState, start as start_scheduler};
pub use summary::{JsonExporter, RunState, RunSummary, SummaryExporter, summary_from_json};
pub use thresholds::{
    CompiledThreshold, ThresholdAgg, ThresholdError, ThresholdExpr, ThresholdOp, ThresholdResult,
    ThresholdSpec, compile_thresholds, evaluate_thresholds, parse_threshold_expr,
};
pub use vu::{CHECK_TAG, GROUP_TAG, IterationContext};

pub use stampede_metrics as metrics;
