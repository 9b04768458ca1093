use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};
use crate::summary::{RunSummary, SummaryExporter};

/// Rejects absolute paths and any `..` component.
pub fn sanitize_relative_output_path(rel: &str) -> Result<PathBuf> {
    if Path::new(rel).is_absolute() {
        return Err(Error::InvalidOutputPath(rel.to_string()));
    }

    let mut clean = PathBuf::new();
    for c in Path::new(rel).components() {
        match c {
            Component::CurDir => {}
            Component::Normal(p) => clean.push(p),
            _ => return Err(Error::InvalidOutputPath(rel.to_string())),
        }
    }

    if clean.as_os_str().is_empty() {
        return Err(Error::InvalidOutputPath(rel.to_string()));
    }

    Ok(clean)
}

/// Renders `summary` with each exporter and writes the result under
/// `base_dir`. Every path is validated and rendered before anything is
/// written. Returns the written paths.
pub fn write_summary_files(
    base_dir: &Path,
    summary: &RunSummary,
    outputs: &[(&str, &dyn SummaryExporter)],
) -> Result<Vec<PathBuf>> {
    let mut rendered = Vec::with_capacity(outputs.len());
    for (rel, exporter) in outputs {
        let rel = sanitize_relative_output_path(rel)?;
        rendered.push((base_dir.join(rel), exporter.format(), exporter.export(summary)?));
    }

    let mut written = Vec::with_capacity(rendered.len());
    for (path, format, content) in rendered {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        tracing::info!(path = %path.display(), format, "summary written");
        written.push(path);
    }

    Ok(written)
}
