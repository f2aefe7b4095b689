//! Configuration schema types for `srcpipe.toml`
//!
//! Defines the structure and validation rules for srcpipe project configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Project section: what to read and where to write
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Glob selecting the input files, relative to the project root
    #[serde(default = "default_input")]
    pub input: String,
    /// Output root directory
    #[serde(default = "default_out")]
    pub out: PathBuf,
    /// Rewrite output file extensions (e.g. "dart"), without the dot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
}

fn default_input() -> String {
    "src/**/*".to_string()
}

fn default_out() -> PathBuf {
    PathBuf::from("build")
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self { input: default_input(), out: default_out(), extension: None }
    }
}

/// Build behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Maximum parallel file workers (0 = available parallelism)
    #[serde(default)]
    pub concurrency: usize,
    /// Treat a glob that matches nothing as an error
    #[serde(default = "default_true")]
    pub fail_on_empty_match: bool,
    /// Skip files whose content and pipeline are unchanged since the last build
    #[serde(default = "default_true")]
    pub incremental: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self { concurrency: 0, fail_on_empty_match: true, incremental: true }
    }
}

/// Watch mode configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Debounce delay in milliseconds
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u32,
    /// Clear terminal between rebuilds
    #[serde(default = "default_true")]
    pub clear_screen: bool,
}

fn default_debounce_ms() -> u32 {
    100
}

fn default_true() -> bool {
    true
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self { debounce_ms: 100, clear_screen: true }
    }
}

/// One entry of the `[[stages]]` list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StageConfig {
    /// Pass contents through unchanged
    Identity {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    /// Pipe contents through an external program
    Command {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
    /// Regular-expression find/replace
    Replace {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        pattern: String,
        #[serde(default)]
        replacement: String,
    },
}

/// Complete srcpipe.toml configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SrcpipeConfig {
    /// Inputs and outputs
    #[serde(default)]
    pub project: ProjectConfig,
    /// Build settings
    #[serde(default)]
    pub build: BuildConfig,
    /// Watch mode settings
    #[serde(default)]
    pub watch: WatchConfig,
    /// Ordered transform stages
    #[serde(default)]
    pub stages: Vec<StageConfig>,
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    /// Path to the invalid field (e.g., "stages[0].program")
    pub field: String,
    /// Error message
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "srcpipe.toml: '{}' {}", self.field, self.message)
    }
}

impl SrcpipeConfig {
    /// Validate the configuration and return any errors
    pub fn validate(&self) -> Vec<ConfigValidationError> {
        let mut errors = Vec::new();
        let mut push = |field: String, message: String| {
            errors.push(ConfigValidationError { field, message });
        };

        if self.project.input.trim().is_empty() {
            push("project.input".to_string(), "must be a non-empty glob pattern".to_string());
        } else if let Err(e) = glob::Pattern::new(&self.project.input) {
            push("project.input".to_string(), format!("is not a valid glob: {}", e));
        }

        if self.project.out.as_os_str().is_empty() {
            push("project.out".to_string(), "must be a non-empty path".to_string());
        }

        if let Some(ext) = &self.project.extension {
            let ext = ext.trim_start_matches('.');
            if ext.is_empty() || ext.contains(['/', '\\']) {
                push(
                    "project.extension".to_string(),
                    "must be a bare file extension such as \"dart\"".to_string(),
                );
            }
        }

        if self.watch.debounce_ms == 0 {
            push("watch.debounce_ms".to_string(), "must be a positive integer".to_string());
        }

        for (i, stage) in self.stages.iter().enumerate() {
            match stage {
                StageConfig::Identity { .. } => {}
                StageConfig::Command { program, .. } => {
                    if program.trim().is_empty() {
                        push(format!("stages[{}].program", i), "must be non-empty".to_string());
                    }
                }
                StageConfig::Replace { pattern, .. } => {
                    if let Err(e) = regex::Regex::new(pattern) {
                        push(format!("stages[{}].pattern", i), format!("is not a valid regex: {}", e));
                    }
                }
            }
        }

        errors
    }

    /// Check if validation passed
    pub fn is_valid(&self) -> bool {
        self.validate().is_empty()
    }

    /// Output extension without a leading dot, if configured
    pub fn output_extension(&self) -> Option<&str> {
        self.project.extension.as_deref().map(|e| e.trim_start_matches('.'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_parse() {
        let config: SrcpipeConfig = toml::from_str("").unwrap();
        assert_eq!(config.project.input, "src/**/*");
        assert_eq!(config.project.out, PathBuf::from("build"));
        assert_eq!(config.build.concurrency, 0);
        assert!(config.build.fail_on_empty_match);
        assert!(config.build.incremental);
        assert_eq!(config.watch.debounce_ms, 100);
        assert!(config.stages.is_empty());
        assert!(config.is_valid());
    }

    #[test]
    fn test_full_config_parse() {
        let toml = r#"
[project]
input = "src/*.ts"
out = "lib/src"
extension = "dart"

[build]
concurrency = 4
fail_on_empty_match = false
incremental = false

[watch]
debounce_ms = 250
clear_screen = false

[[stages]]
kind = "command"
name = "transpile"
program = "ts2dart"
args = ["--stdin", "--source={path}"]

[[stages]]
kind = "replace"
pattern = "[ \t]+$"

[[stages]]
kind = "identity"
"#;
        let config: SrcpipeConfig = toml::from_str(toml).unwrap();

        assert_eq!(config.project.input, "src/*.ts");
        assert_eq!(config.project.out, PathBuf::from("lib/src"));
        assert_eq!(config.output_extension(), Some("dart"));
        assert_eq!(config.build.concurrency, 4);
        assert!(!config.build.fail_on_empty_match);
        assert!(!config.build.incremental);
        assert_eq!(config.watch.debounce_ms, 250);
        assert!(!config.watch.clear_screen);

        assert_eq!(config.stages.len(), 3);
        assert_eq!(
            config.stages[0],
            StageConfig::Command {
                name: Some("transpile".to_string()),
                program: "ts2dart".to_string(),
                args: vec!["--stdin".to_string(), "--source={path}".to_string()],
            }
        );
        assert_eq!(
            config.stages[1],
            StageConfig::Replace {
                name: None,
                pattern: "[ \t]+$".to_string(),
                replacement: String::new(),
            }
        );
        assert_eq!(config.stages[2], StageConfig::Identity { name: None });
        assert!(config.is_valid());
    }

    #[test]
    fn test_unknown_stage_kind_rejected() {
        let toml = r#"
[[stages]]
kind = "minify"
"#;
        assert!(toml::from_str::<SrcpipeConfig>(toml).is_err());
    }

    #[test]
    fn test_validation_bad_glob() {
        let mut config = SrcpipeConfig::default();
        config.project.input = "src/[*.ts".to_string();
        let errors = config.validate();
        assert!(errors.iter().any(|e| e.field == "project.input"));
    }

    #[test]
    fn test_validation_zero_debounce() {
        let mut config = SrcpipeConfig::default();
        config.watch.debounce_ms = 0;
        assert!(config.validate().iter().any(|e| e.field == "watch.debounce_ms"));
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let mut config = SrcpipeConfig::default();
        config.project.input = String::new();
        config.project.out = PathBuf::new();
        config.project.extension = Some("a/b".to_string());
        config.stages = vec![
            StageConfig::Command { name: None, program: " ".to_string(), args: vec![] },
            StageConfig::Replace { name: None, pattern: "(".to_string(), replacement: String::new() },
        ];

        let fields: Vec<String> = config.validate().into_iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec![
                "project.input",
                "project.out",
                "project.extension",
                "stages[0].program",
                "stages[1].pattern"
            ]
        );
    }

    #[test]
    fn test_output_extension_strips_dot() {
        let mut config = SrcpipeConfig::default();
        config.project.extension = Some(".dart".to_string());
        assert_eq!(config.output_extension(), Some("dart"));
        assert!(config.is_valid());
    }
}
