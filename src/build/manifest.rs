//! Build manifest for incremental builds.
//!
//! The manifest records, for each source written by the last build, the
//! SHA-256 of its contents and the output it produced, together with a hash
//! of the pipeline's stage list. A source is up to date when its content
//! hash, destination and pipeline hash all match and the output still exists.
//!
//! The manifest is stored as JSON in `.srcpipe-manifest.json` in the output
//! directory:
//!
//! ```json
//! {
//!   "version": 1,
//!   "pipeline": "3b1f…",
//!   "files": {
//!     "/project/src/a.ts": { "source_hash": "9f86…", "output": "/project/lib/src/a.dart" }
//!   }
//! }
//! ```

use crate::build::write_output;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// Current manifest format version.
const MANIFEST_VERSION: u32 = 1;

/// Default manifest filename.
pub const MANIFEST_FILENAME: &str = ".srcpipe-manifest.json";

/// Error during manifest operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ManifestError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// Writing the manifest failed
    #[error("{0}")]
    Write(#[from] crate::build::WriteError),
    /// Version mismatch
    #[error("Manifest version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

/// What the last build recorded for one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// SHA-256 of the source contents
    pub source_hash: String,
    /// Output written for it
    pub output: PathBuf,
}

/// Build manifest tracking the sources of the last build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildManifest {
    /// Manifest format version
    pub version: u32,
    /// Hash of the pipeline fingerprint the entries were built with
    pub pipeline: String,
    /// Entries keyed by source path
    pub files: BTreeMap<String, FileEntry>,
}

impl Default for BuildManifest {
    fn default() -> Self {
        Self::new()
    }
}

impl BuildManifest {
    /// Create a new empty manifest.
    pub fn new() -> Self {
        Self { version: MANIFEST_VERSION, pipeline: String::new(), files: BTreeMap::new() }
    }

    /// Create an empty manifest for a pipeline fingerprint.
    pub fn for_pipeline(fingerprint: &str) -> Self {
        Self { pipeline: hash_bytes(fingerprint.as_bytes()), ..Self::new() }
    }

    /// Load a manifest from a file.
    ///
    /// Returns `Ok(None)` if the file doesn't exist.
    pub fn load(path: &Path) -> Result<Option<Self>, ManifestError> {
        if !path.exists() {
            return Ok(None);
        }

        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let manifest: BuildManifest = serde_json::from_reader(reader)?;

        if manifest.version != MANIFEST_VERSION {
            return Err(ManifestError::VersionMismatch {
                expected: MANIFEST_VERSION,
                found: manifest.version,
            });
        }

        Ok(Some(manifest))
    }

    /// Load the manifest from an output directory for the given pipeline.
    ///
    /// A missing, unreadable or outdated manifest, or one recorded for a
    /// different pipeline, yields an empty manifest.
    pub fn load_for_pipeline(out_dir: &Path, fingerprint: &str) -> Self {
        let fresh = Self::for_pipeline(fingerprint);
        match Self::load(&out_dir.join(MANIFEST_FILENAME)) {
            Ok(Some(manifest)) if manifest.pipeline == fresh.pipeline => manifest,
            Ok(Some(_)) => {
                tracing::debug!("pipeline changed since last build, rebuilding everything");
                fresh
            }
            Ok(None) => fresh,
            Err(e) => {
                tracing::warn!("ignoring build manifest: {}", e);
                fresh
            }
        }
    }

    /// Save the manifest to the default location in the output directory.
    pub fn save_to_dir(&self, out_dir: &Path) -> Result<PathBuf, ManifestError> {
        let json = serde_json::to_vec_pretty(self)?;
        Ok(write_output(out_dir, Path::new(MANIFEST_FILENAME), &json)?)
    }

    /// Check if a source is unchanged since it was last written to `output`.
    pub fn is_fresh(&self, source: &Path, source_hash: &str, output: &Path) -> bool {
        match self.files.get(&key(source)) {
            Some(entry) => {
                entry.source_hash == source_hash && entry.output == output && output.exists()
            }
            None => false,
        }
    }

    /// Record a written source.
    pub fn record(&mut self, source: &Path, source_hash: String, output: PathBuf) {
        self.files.insert(key(source), FileEntry { source_hash, output });
    }

    /// Forget a source (e.g. after it failed).
    pub fn remove(&mut self, source: &Path) {
        self.files.remove(&key(source));
    }

    /// Drop entries for sources that are no longer part of the build.
    pub fn retain_sources(&mut self, sources: &[PathBuf]) {
        let keep: BTreeSet<String> = sources.iter().map(|s| key(s)).collect();
        self.files.retain(|k, _| keep.contains(k));
    }

    /// Number of recorded sources.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Check if nothing is recorded.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn key(source: &Path) -> String {
    source.to_string_lossy().into_owned()
}

/// Hex-encoded SHA-256 of some bytes.
pub fn hash_bytes(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}
