use std::time::Duration;

use crate::thresholds::ThresholdError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("metrics error: {0}")]
    Metrics(#[from] stampede_metrics::Error),

    #[error(transparent)]
    Threshold(#[from] ThresholdError),

    /// A virtual user's task died. The run is aborted and no summary is produced.
    #[error("scheduler fault: {0}")]
    SchedulerFault(String),

    #[error("`stages` must be a non-empty array of {{ duration, target }} with a positive total duration")]
    InvalidStages,

    #[error("the stage plan must reach a positive VU target")]
    InvalidVus,

    #[error("`control_tick` must be between 10ms and 1s, got {0:?}")]
    InvalidControlTick(Duration),

    #[error("`monitor_interval` must be a positive duration")]
    InvalidMonitorInterval,

    #[error("invalid output path: `{0}`")]
    InvalidOutputPath(String),
}
