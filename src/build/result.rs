//! Build result types.
//!
//! A [`BuildReport`] holds exactly one [`BuildOutcome`] per discovered source,
//! keyed by source path, so results can be merged in any order.

use crate::build::WriteError;
use crate::transforms::TransformError;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Why a single file failed.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FileError {
    /// The source could not be read
    #[error("Failed to read {}: {source}", path.display())]
    Read { path: PathBuf, source: std::io::Error },
    /// A transform stage failed
    #[error(transparent)]
    Transform(#[from] TransformError),
    /// The output could not be written
    #[error(transparent)]
    Write(#[from] WriteError),
}

/// Outcome for a single source file.
#[derive(Debug)]
pub enum BuildOutcome {
    /// Output written (or already up to date) at this path
    Written(PathBuf),
    /// Processing failed
    Failed(FileError),
}

impl BuildOutcome {
    /// Check if the outcome is a success.
    pub fn is_success(&self) -> bool {
        matches!(self, BuildOutcome::Written(_))
    }

    /// Check if the outcome is a failure.
    pub fn is_failure(&self) -> bool {
        matches!(self, BuildOutcome::Failed(_))
    }

    /// Destination path, for written outcomes.
    pub fn destination(&self) -> Option<&Path> {
        match self {
            BuildOutcome::Written(path) => Some(path),
            BuildOutcome::Failed(_) => None,
        }
    }

    /// Error, for failed outcomes.
    pub fn error(&self) -> Option<&FileError> {
        match self {
            BuildOutcome::Written(_) => None,
            BuildOutcome::Failed(err) => Some(err),
        }
    }
}

impl std::fmt::Display for BuildOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildOutcome::Written(path) => write!(f, "written: {}", path.display()),
            BuildOutcome::Failed(err) => write!(f, "failed: {}", err),
        }
    }
}

/// Result of one build pass.
#[derive(Debug, Default)]
pub struct BuildReport {
    /// Outcome per source path
    pub files: BTreeMap<PathBuf, BuildOutcome>,
    /// Sources whose previous output was still current
    pub reused: BTreeSet<PathBuf>,
    /// Total build duration
    pub duration: Duration,
    /// Whether this was a dry run (nothing written)
    pub dry_run: bool,
}

impl BuildReport {
    /// Create a new empty report.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome for a source.
    ///
    /// Returns the previous outcome if the source was already recorded.
    pub fn insert(&mut self, source: PathBuf, outcome: BuildOutcome) -> Option<BuildOutcome> {
        self.files.insert(source, outcome)
    }

    /// Record that a written source reused its previous output.
    pub fn mark_reused(&mut self, source: PathBuf) {
        self.reused.insert(source);
    }

    /// Merge another report into this one.
    pub fn merge(&mut self, other: BuildReport) {
        self.files.extend(other.files);
        self.reused.extend(other.reused);
        self.duration = self.duration.max(other.duration);
    }

    /// Set the total duration.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Outcome for a source.
    pub fn outcome(&self, source: &Path) -> Option<&BuildOutcome> {
        self.files.get(source)
    }

    /// Number of files in the pass.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Check if the pass had no files.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Number of files written (including reused outputs).
    pub fn written_count(&self) -> usize {
        self.files.values().filter(|o| o.is_success()).count()
    }

    /// Number of written files that reused their previous output.
    pub fn reused_count(&self) -> usize {
        self.reused.len()
    }

    /// Number of failed files.
    pub fn failed_count(&self) -> usize {
        self.files.values().filter(|o| o.is_failure()).count()
    }

    /// The build succeeded iff no file failed.
    pub fn is_success(&self) -> bool {
        self.failed_count() == 0
    }

    /// Failed sources with their errors, in path order.
    pub fn failures(&self) -> Vec<(&PathBuf, &FileError)> {
        self.files.iter().filter_map(|(path, o)| o.error().map(|e| (path, e))).collect()
    }

    /// Paths of failed sources.
    pub fn failed_paths(&self) -> BTreeSet<PathBuf> {
        self.failures().into_iter().map(|(path, _)| path.clone()).collect()
    }

    /// All destination paths written.
    pub fn outputs(&self) -> Vec<&Path> {
        self.files.values().filter_map(|o| o.destination()).collect()
    }

    /// Format a summary of the build result.
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();

        let written = self.written_count();
        let reused = self.reused_count();
        let failed = self.failed_count();
        let total = self.len();

        if failed > 0 {
            lines.push(format!(
                "Build failed: {} written, {} failed ({} total)",
                written, failed, total
            ));
            for (path, error) in self.failures() {
                lines.push(format!("  - {}: {}", path.display(), error));
            }
        } else if self.dry_run {
            lines.push(format!("Dry run: {} file{} would be written", total, plural(total)));
        } else {
            let mut line = format!(
                "Build succeeded: {} written ({} total) in {:?}",
                written, total, self.duration
            );
            if reused > 0 {
                line.push_str(&format!(", {} unchanged", reused));
            }
            lines.push(line);
        }

        lines.join("\n")
    }
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}
