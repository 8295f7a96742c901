//! Loading definition files from disk.

use std::path::{Path, PathBuf};

use apigw_core::{AdapterError, Result};
use apigw_sync::Orchestrator;
use tracing::{info, warn};

/// Outcome of [`load_directory`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoadSummary {
    /// Files that changed at least one label.
    pub applied: Vec<PathBuf>,
    /// Files identical to an already deployed definition.
    pub unchanged: Vec<PathBuf>,
    /// Files that could not be read or parsed.
    pub failed: Vec<PathBuf>,
}

/// Submit every `*.json` file of `dir`, in file name order.
///
/// A file that cannot be read or parsed is logged and skipped; only an
/// unreadable directory or a refused submission (shutdown) is an error.
pub fn load_directory(orchestrator: &Orchestrator, dir: &Path) -> Result<LoadSummary> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        AdapterError::Configuration(format!("cannot read definitions in {}: {e}", dir.display()))
    })?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();

    let mut summary = LoadSummary::default();
    for path in files {
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "cannot read definition");
                summary.failed.push(path);
                continue;
            }
        };
        match orchestrator.submit_definition(&bytes) {
            Ok(report) if report.changed => summary.applied.push(path),
            Ok(_) => summary.unchanged.push(path),
            Err(AdapterError::Shutdown) => return Err(AdapterError::Shutdown),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping definition");
                summary.failed.push(path);
            }
        }
    }

    info!(
        dir = %dir.display(),
        applied = summary.applied.len(),
        unchanged = summary.unchanged.len(),
        failed = summary.failed.len(),
        "definitions loaded"
    );
    Ok(summary)
}
