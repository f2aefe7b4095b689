//! Source files as read for one build pass.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// A source file's contents, read once per build pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Absolute path (the file's identity)
    pub path: PathBuf,
    /// Path relative to the input glob's base directory
    pub relative: PathBuf,
    /// Raw contents
    pub contents: Vec<u8>,
    /// Modification time, when the platform reports one
    pub modified: Option<SystemTime>,
}

impl SourceFile {
    /// Read a source file from disk.
    pub fn read(path: &Path, relative: &Path) -> io::Result<Self> {
        let contents = fs::read(path)?;
        let modified = fs::metadata(path).and_then(|m| m.modified()).ok();
        Ok(Self { path: path.to_path_buf(), relative: relative.to_path_buf(), contents, modified })
    }

    /// Build a source file from in-memory contents.
    pub fn from_bytes(path: impl Into<PathBuf>, relative: impl Into<PathBuf>, contents: Vec<u8>) -> Self {
        Self { path: path.into(), relative: relative.into(), contents, modified: None }
    }
}
