//! Output writing.
//!
//! Every output is written atomically: the bytes go to a temporary file in
//! the destination directory, which is then renamed over the destination.
//! Readers of the output tree see either the previous file or the complete
//! new one, never a partial write.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Error writing an output file.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WriteError {
    /// Relative path escapes the output root
    #[error("Refusing to write outside the output root: {}", .0.display())]
    InvalidPath(PathBuf),
    /// Could not create the destination directory
    #[error("Failed to create directory {}: {source}", path.display())]
    CreateDir { path: PathBuf, source: std::io::Error },
    /// Could not write the temporary file
    #[error("Failed to write {}: {source}", path.display())]
    Write { path: PathBuf, source: std::io::Error },
    /// Could not move the temporary file into place
    #[error("Failed to rename {} into place: {source}", path.display())]
    Rename { path: PathBuf, source: std::io::Error },
    /// Another source in the same pass maps to this destination
    #[error("{} is already produced by {}", dest.display(), other.display())]
    Conflict { dest: PathBuf, other: PathBuf },
    /// Destination is used by srcpipe itself
    #[error("{} is reserved for the build manifest", .0.display())]
    Reserved(PathBuf),
}

/// Compute the path of an output relative to the output root.
///
/// Keeps the subdirectory structure of `relative` and optionally swaps the
/// file extension (`a/b.ts` + `dart` → `a/b.dart`).
pub fn output_relative_path(relative: &Path, extension: Option<&str>) -> PathBuf {
    match extension {
        Some(ext) => relative.with_extension(ext),
        None => relative.to_path_buf(),
    }
}

/// Check that a relative path stays inside the root it is joined to.
fn is_contained(relative: &Path) -> bool {
    !relative.as_os_str().is_empty()
        && relative.components().all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// A staged write: the bytes are on disk next to the destination but not
/// yet visible under its name.
///
/// Dropping a `PendingWrite` without calling [`commit`](Self::commit)
/// removes the temporary file and leaves the destination untouched.
#[derive(Debug)]
pub struct PendingWrite {
    temp: PathBuf,
    dest: PathBuf,
    committed: bool,
}

impl PendingWrite {
    /// Write `bytes` to a temporary file beside `dest_root/relative`.
    ///
    /// Creates intermediate directories; existing directories are fine.
    pub fn stage(dest_root: &Path, relative: &Path, bytes: &[u8]) -> Result<Self, WriteError> {
        if !is_contained(relative) {
            return Err(WriteError::InvalidPath(relative.to_path_buf()));
        }

        let dest = dest_root.join(relative);
        let parent = dest.parent().unwrap_or(dest_root).to_path_buf();
        fs::create_dir_all(&parent)
            .map_err(|source| WriteError::CreateDir { path: parent.clone(), source })?;

        let file_name = dest.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let temp = parent.join(format!(
            ".{}.{}.{}.tmp",
            file_name,
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));

        // From here on the temp file exists and Drop cleans it up on failure.
        let pending = Self { temp, dest, committed: false };
        pending.write_temp(bytes)?;
        Ok(pending)
    }

    fn write_temp(&self, bytes: &[u8]) -> Result<(), WriteError> {
        let write = || -> std::io::Result<()> {
            let mut file = OpenOptions::new().write(true).create_new(true).open(&self.temp)?;
            file.write_all(bytes)?;
            file.sync_all()
        };
        write().map_err(|source| WriteError::Write { path: self.temp.clone(), source })
    }

    /// Temporary file holding the staged bytes.
    pub fn temp_path(&self) -> &Path {
        &self.temp
    }

    /// Final destination.
    pub fn destination(&self) -> &Path {
        &self.dest
    }

    /// Rename the temporary file over the destination.
    pub fn commit(mut self) -> Result<PathBuf, WriteError> {
        fs::rename(&self.temp, &self.dest)
            .map_err(|source| WriteError::Rename { path: self.dest.clone(), source })?;
        self.committed = true;
        Ok(self.dest.clone())
    }
}

impl Drop for PendingWrite {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.temp);
        }
    }
}

/// Atomically write `bytes` to `dest_root/relative`.
///
/// Returns the absolute destination path.
pub fn write_output(dest_root: &Path, relative: &Path, bytes: &[u8]) -> Result<PathBuf, WriteError> {
    PendingWrite::stage(dest_root, relative, bytes)?.commit()
}
