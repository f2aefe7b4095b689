//! Transform stages and the pipeline that chains them.
//!
//! A [`TransformStage`] is a pure function from bytes to bytes. A [`Pipeline`]
//! applies its stages in order, feeding each stage's output to the next one
//! verbatim. The first stage that fails aborts the pipeline for that file.
//!
//! Stages are `Send + Sync` and must not keep per-file mutable state, so the
//! same pipeline can be shared by every worker of a build. A stage that needs
//! context about other files gets it through its constructor.
//!
//! # Example
//!
//! ```ignore
//! use srcpipe::transforms::{CommandStage, IdentityStage, Pipeline};
//!
//! let pipeline = Pipeline::new()
//!     .with_stage(CommandStage::new("ts2dart", vec!["--stdin".into()]))
//!     .with_stage(IdentityStage);
//! let output = pipeline.run(&source)?;
//! ```

pub mod stages;

pub use stages::*;

use crate::build::SourceFile;
use std::path::Path;
use thiserror::Error;

/// Why a single stage rejected its input.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StageError {
    /// IO failure while talking to an external program
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// External program exited unsuccessfully
    #[error("`{program}` exited with {status}{}", format_stderr(.stderr))]
    CommandFailed { program: String, status: String, stderr: String },
    /// Stage requires UTF-8 text
    #[error("input is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
    /// Free-form failure reported by a stage
    #[error("{0}")]
    Message(String),
}

impl StageError {
    /// Create a free-form stage error.
    pub fn message(msg: impl Into<String>) -> Self {
        StageError::Message(msg.into())
    }
}

fn format_stderr(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {}", trimmed)
    }
}

/// A pipeline failure, naming the stage that failed.
#[derive(Debug, Error)]
#[error("stage {index} ({stage}) failed: {cause}")]
pub struct TransformError {
    /// Zero-based position of the failing stage
    pub index: usize,
    /// Name of the failing stage
    pub stage: String,
    /// Underlying stage error
    #[source]
    pub cause: StageError,
}

/// One unit of transformation in a [`Pipeline`].
pub trait TransformStage: Send + Sync {
    /// Stage name used in diagnostics.
    fn name(&self) -> &str;

    /// Transform `input`. `path` is the source path, for diagnostics only.
    fn transform(&self, input: &[u8], path: &Path) -> Result<Vec<u8>, StageError>;

    /// Identifies the stage's behavior for incremental builds.
    ///
    /// Two stages with equal fingerprints must produce equal output for
    /// equal input. Defaults to the stage name.
    fn fingerprint(&self) -> String {
        self.name().to_string()
    }
}

/// Ordered sequence of transform stages.
#[derive(Default)]
pub struct Pipeline {
    stages: Vec<Box<dyn TransformStage>>,
}

impl Pipeline {
    /// Create an empty pipeline (the identity transform).
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage.
    pub fn with_stage(mut self, stage: impl TransformStage + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// Append an already boxed stage.
    pub fn push(&mut self, stage: Box<dyn TransformStage>) {
        self.stages.push(stage);
    }

    /// Number of stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Check if the pipeline has no stages.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Names of the stages, in order.
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Fingerprint of the whole stage list.
    pub fn fingerprint(&self) -> String {
        self.stages.iter().map(|s| s.fingerprint()).collect::<Vec<_>>().join("\u{1f}")
    }

    /// Run every stage over the file's contents.
    pub fn run(&self, file: &SourceFile) -> Result<Vec<u8>, TransformError> {
        self.run_bytes(&file.contents, &file.path)
    }

    /// Run every stage over raw bytes.
    pub fn run_bytes(&self, input: &[u8], path: &Path) -> Result<Vec<u8>, TransformError> {
        let mut current = input.to_vec();
        for (index, stage) in self.stages.iter().enumerate() {
            tracing::debug!(stage = stage.name(), index, path = %path.display(), "running stage");
            current = stage.transform(&current, path).map_err(|cause| TransformError {
                index,
                stage: stage.name().to_string(),
                cause,
            })?;
        }
        Ok(current)
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline").field("stages", &self.stage_names()).finish()
    }
}
