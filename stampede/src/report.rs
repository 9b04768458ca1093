use anyhow::Context as _;

use crate::cli::ReportArgs;
use crate::output::text::render;
use crate::run_error::RunError;

/// Prints a summary saved by `run` as text.
pub async fn report(args: ReportArgs) -> Result<(), RunError> {
    let raw = tokio::fs::read_to_string(&args.summary)
        .await
        .with_context(|| format!("failed to read summary: {}", args.summary.display()))
        .map_err(RunError::InvalidInput)?;

    let summary = stampede_core::summary_from_json(&raw)
        .with_context(|| format!("invalid summary: {}", args.summary.display()))
        .map_err(RunError::InvalidInput)?;

    print!("{}", render(&summary));
    Ok(())
}
