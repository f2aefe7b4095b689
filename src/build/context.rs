//! Build context containing configuration and state for a build.

use crate::build::{effective_jobs, normalize_path, resolve_pattern};
use crate::config::SrcpipeConfig;
use std::path::{Path, PathBuf};

/// Build context containing configuration and paths for a build operation.
///
/// The context provides access to all information needed to execute a build,
/// including the configuration, project root, and output directory.
#[derive(Debug, Clone)]
pub struct BuildContext {
    /// The loaded configuration
    config: SrcpipeConfig,
    /// Project root directory (where srcpipe.toml is located)
    project_root: PathBuf,
    /// Whether to run in verbose mode
    verbose: bool,
}

impl BuildContext {
    /// Create a new build context.
    ///
    /// # Arguments
    /// - `config` - The loaded configuration
    /// - `project_root` - The project root directory
    pub fn new(config: SrcpipeConfig, project_root: PathBuf) -> Self {
        Self { config, project_root, verbose: false }
    }

    /// Get the configuration.
    pub fn config(&self) -> &SrcpipeConfig {
        &self.config
    }

    /// Get the project root directory.
    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// The input glob, relative to the project root.
    pub fn input_pattern(&self) -> &str {
        &self.config.project.input
    }

    /// Directory the input glob is rooted at.
    ///
    /// Output paths mirror the structure below this directory.
    pub fn input_base(&self) -> PathBuf {
        resolve_pattern(&self.project_root, self.input_pattern()).0
    }

    /// Get the output directory (resolved to absolute path).
    pub fn out_dir(&self) -> PathBuf {
        normalize_path(&self.resolve_path(&self.config.project.out))
    }

    /// Number of parallel file workers.
    pub fn jobs(&self) -> usize {
        effective_jobs(self.config.build.concurrency)
    }

    /// Whether verbose mode is enabled.
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Set verbose mode.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Resolve a path relative to the project root.
    ///
    /// If the path is absolute, returns it unchanged.
    /// If relative, joins it with the project root.
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        crate::config::resolve_path(&self.project_root, path)
    }
}
