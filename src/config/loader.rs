//! Configuration loading and discovery for `srcpipe.toml`
//!
//! Provides functions to find, load, and merge configuration.

use super::schema::SrcpipeConfig;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Config file name looked up by [`find_config`].
pub const CONFIG_FILENAME: &str = "srcpipe.toml";

/// Configuration loading error
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// File I/O error
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parsing error
    #[error("Failed to parse srcpipe.toml: {0}")]
    Parse(#[from] toml::de::Error),
    /// Validation error
    #[error("Config validation failed:\n{}", .0.iter().map(|e| format!("  - {}", e)).collect::<Vec<_>>().join("\n"))]
    Validation(Vec<String>),
}

/// CLI arguments that can override config values
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    /// Override the input glob
    pub input: Option<String>,
    /// Override output directory
    pub out: Option<PathBuf>,
    /// Override the output extension
    pub extension: Option<String>,
    /// Number of parallel jobs
    pub jobs: Option<usize>,
    /// Override the watch debounce window
    pub debounce_ms: Option<u32>,
    /// Allow globs that match nothing
    pub allow_empty: Option<bool>,
    /// Disable incremental builds
    pub force: Option<bool>,
    /// Clear the terminal between watch rebuilds
    pub clear_screen: Option<bool>,
}

/// Find srcpipe.toml by walking up from the current working directory.
pub fn find_config() -> Option<PathBuf> {
    let cwd = env::current_dir().ok()?;
    find_config_from(cwd)
}

/// Find srcpipe.toml by walking up from a specific directory.
pub fn find_config_from(start: PathBuf) -> Option<PathBuf> {
    let mut current = start;

    loop {
        let config_path = current.join(CONFIG_FILENAME);
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            return None;
        }
    }
}

/// Load configuration from a srcpipe.toml file.
///
/// If a path is provided, loads from that file. Otherwise, uses `find_config()`
/// to locate the config file. If no config file is found, returns the default
/// configuration.
pub fn load_config(path: Option<&Path>) -> Result<SrcpipeConfig, ConfigError> {
    let config_path = match path {
        Some(p) => Some(p.to_path_buf()),
        None => find_config(),
    };

    match config_path {
        Some(p) => load_config_file(&p),
        None => Ok(default_config()),
    }
}

/// Load configuration from a specific file path.
fn load_config_file(path: &Path) -> Result<SrcpipeConfig, ConfigError> {
    let contents = fs::read_to_string(path)?;
    let config: SrcpipeConfig = toml::from_str(&contents)?;
    check(&config)?;
    tracing::debug!(path = %path.display(), stages = config.stages.len(), "loaded config");
    Ok(config)
}

/// Validate a configuration, turning problems into a [`ConfigError`].
pub fn check(config: &SrcpipeConfig) -> Result<(), ConfigError> {
    let errors = config.validate();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Validation(errors.into_iter().map(|e| e.to_string()).collect()))
    }
}

/// Configuration used when no srcpipe.toml is found.
pub fn default_config() -> SrcpipeConfig {
    SrcpipeConfig::default()
}

/// Merge CLI overrides into a configuration.
///
/// CLI arguments take precedence over config file values.
pub fn merge_cli_overrides(config: &mut SrcpipeConfig, overrides: &CliOverrides) {
    if let Some(ref input) = overrides.input {
        config.project.input = input.clone();
    }

    if let Some(ref out) = overrides.out {
        config.project.out = out.clone();
    }

    if let Some(ref extension) = overrides.extension {
        config.project.extension = Some(extension.clone());
    }

    if let Some(jobs) = overrides.jobs {
        config.build.concurrency = jobs;
    }

    if let Some(debounce_ms) = overrides.debounce_ms {
        config.watch.debounce_ms = debounce_ms;
    }

    if let Some(allow_empty) = overrides.allow_empty {
        config.build.fail_on_empty_match = !allow_empty;
    }

    if let Some(true) = overrides.force {
        config.build.incremental = false;
    }

    if let Some(clear_screen) = overrides.clear_screen {
        config.watch.clear_screen = clear_screen;
    }
}

/// Get the project root directory from a config file path.
pub fn project_root(config_path: &Path) -> Option<&Path> {
    config_path.parent()
}

/// Resolve a path relative to the project root.
///
/// If the path is absolute, returns it unchanged.
/// If relative, joins it with the project root.
pub fn resolve_path(project_root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        project_root.join(path)
    }
}
