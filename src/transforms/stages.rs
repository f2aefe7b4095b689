//! Built-in transform stages.
//!
//! - [`IdentityStage`]: passes bytes through unchanged
//! - [`CommandStage`]: pipes bytes through an external program (stdin → stdout)
//! - [`ReplaceStage`]: regular-expression find/replace over UTF-8 text

use super::{Pipeline, StageError, TransformStage};
use crate::config::{ConfigError, StageConfig};
use regex::Regex;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Placeholder replaced by the source path in command arguments.
pub const PATH_PLACEHOLDER: &str = "{path}";

/// Returns its input unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityStage;

impl TransformStage for IdentityStage {
    fn name(&self) -> &str {
        "identity"
    }

    fn transform(&self, input: &[u8], _path: &Path) -> Result<Vec<u8>, StageError> {
        Ok(input.to_vec())
    }
}

/// Pipes the file contents through an external program.
///
/// The program receives the bytes on stdin and its stdout becomes the stage
/// output. A non-zero exit status fails the stage with the captured stderr.
#[derive(Debug, Clone)]
pub struct CommandStage {
    name: String,
    program: String,
    args: Vec<String>,
    current_dir: Option<PathBuf>,
}

impl CommandStage {
    /// Create a command stage named after its program.
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        let program = program.into();
        Self { name: program.clone(), program, args, current_dir: None }
    }

    /// Override the stage name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Run the program from this directory.
    pub fn with_current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Arguments with `{path}` expanded for the given source.
    fn expand_args(&self, path: &Path) -> Vec<String> {
        let path = path.to_string_lossy();
        self.args.iter().map(|a| a.replace(PATH_PLACEHOLDER, &path)).collect()
    }
}

impl TransformStage for CommandStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn transform(&self, input: &[u8], path: &Path) -> Result<Vec<u8>, StageError> {
        let mut command = Command::new(&self.program);
        command
            .args(self.expand_args(path))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| {
            StageError::Io(std::io::Error::new(
                e.kind(),
                format!("failed to spawn `{}`: {}", self.program, e),
            ))
        })?;

        // Feed stdin from a separate thread so a program that writes a lot
        // before draining its input cannot deadlock against us.
        let stdin = child.stdin.take();
        let output = std::thread::scope(|s| {
            let writer = s.spawn(move || -> std::io::Result<()> {
                if let Some(mut stdin) = stdin {
                    match stdin.write_all(input) {
                        Err(e) if e.kind() == ErrorKind::BrokenPipe => {}
                        other => other?,
                    }
                }
                Ok(())
            });
            let output = child.wait_with_output();
            let written = writer
                .join()
                .unwrap_or_else(|_| Err(std::io::Error::other("stdin writer panicked")));
            output.and_then(|o| written.map(|_| o))
        })?;

        if !output.status.success() {
            return Err(StageError::CommandFailed {
                program: self.program.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        Ok(output.stdout)
    }

    fn fingerprint(&self) -> String {
        format!("command:{} {}", self.program, self.args.join(" "))
    }
}

/// Regular-expression find/replace over UTF-8 text.
#[derive(Debug, Clone)]
pub struct ReplaceStage {
    name: String,
    regex: Regex,
    replacement: String,
}

impl ReplaceStage {
    /// Compile a replace stage. The replacement may use `$1`-style groups.
    pub fn new(pattern: &str, replacement: impl Into<String>) -> Result<Self, regex::Error> {
        Ok(Self {
            name: "replace".to_string(),
            regex: Regex::new(pattern)?,
            replacement: replacement.into(),
        })
    }

    /// Override the stage name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl TransformStage for ReplaceStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn transform(&self, input: &[u8], _path: &Path) -> Result<Vec<u8>, StageError> {
        let text = String::from_utf8(input.to_vec())?;
        Ok(self.regex.replace_all(&text, self.replacement.as_str()).into_owned().into_bytes())
    }

    fn fingerprint(&self) -> String {
        format!("replace:{}=>{}", self.regex.as_str(), self.replacement)
    }
}

impl Pipeline {
    /// Build a pipeline from configured stages.
    ///
    /// Command stages run from `project_root`.
    pub fn from_config(stages: &[StageConfig], project_root: &Path) -> Result<Self, ConfigError> {
        let mut pipeline = Pipeline::new();
        let mut errors = Vec::new();

        for (i, config) in stages.iter().enumerate() {
            match config {
                StageConfig::Identity { name } => match name {
                    Some(name) => pipeline.push(Box::new(NamedIdentity(name.clone()))),
                    None => pipeline.push(Box::new(IdentityStage)),
                },
                StageConfig::Command { name, program, args } => {
                    let mut stage = CommandStage::new(program.clone(), args.clone())
                        .with_current_dir(project_root);
                    if let Some(name) = name {
                        stage = stage.with_name(name.clone());
                    }
                    pipeline.push(Box::new(stage));
                }
                StageConfig::Replace { name, pattern, replacement } => {
                    match ReplaceStage::new(pattern, replacement.clone()) {
                        Ok(mut stage) => {
                            if let Some(name) = name {
                                stage = stage.with_name(name.clone());
                            }
                            pipeline.push(Box::new(stage));
                        }
                        Err(e) => errors.push(format!("stages[{}].pattern: {}", i, e)),
                    }
                }
            }
        }

        if errors.is_empty() {
            Ok(pipeline)
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

/// Identity stage carrying a user-chosen name.
#[derive(Debug, Clone)]
struct NamedIdentity(String);

impl TransformStage for NamedIdentity {
    fn name(&self) -> &str {
        &self.0
    }

    fn transform(&self, input: &[u8], _path: &Path) -> Result<Vec<u8>, StageError> {
        Ok(input.to_vec())
    }

    fn fingerprint(&self) -> String {
        "identity".to_string()
    }
}
