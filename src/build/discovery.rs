//! Source file discovery for the build system.
//!
//! Expands the configured input glob into a sorted, deduplicated list of
//! files. Directories are skipped; symlinks are followed when deciding
//! whether an entry is a file, but the matched path is kept as the file's
//! identity so the output tree mirrors the input tree.

use crate::build::BuildContext;
use glob::{glob, Pattern};
use std::fs;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Error during source discovery.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DiscoveryError {
    /// Invalid glob pattern
    #[error("Invalid glob pattern '{0}': {1}")]
    InvalidPattern(String, #[source] glob::PatternError),
    /// Pattern matched no files and empty matches are an error
    #[error("No files matched '{0}'")]
    NoMatch(String),
    /// IO error during file enumeration
    #[error("IO error during discovery: {0}")]
    Io(#[from] std::io::Error),
}

/// Files found for one build pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveredSources {
    /// Directory the glob is rooted at (absolute)
    pub base: PathBuf,
    /// Matched files, absolute and sorted
    pub files: Vec<PathBuf>,
}

impl DiscoveredSources {
    /// Path of `file` relative to the glob base.
    ///
    /// Falls back to the bare file name for paths outside the base.
    pub fn relative(&self, file: &Path) -> PathBuf {
        match file.strip_prefix(&self.base) {
            Ok(rel) if !rel.as_os_str().is_empty() => rel.to_path_buf(),
            _ => file.file_name().map(PathBuf::from).unwrap_or_default(),
        }
    }

    /// Number of files found.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Check if nothing was found.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Check if a path component contains glob metacharacters.
fn has_glob_meta(component: &str) -> bool {
    component.contains(['*', '?', '['])
}

/// Split a glob pattern into its literal directory prefix and the rest.
///
/// `src/**/*.ts` → (`src`, `**/*.ts`); a fully literal pattern keeps its
/// file name in the rest, so `src/main.ts` → (`src`, `main.ts`).
pub fn split_pattern(pattern: &str) -> (PathBuf, PathBuf) {
    let mut prefix = PathBuf::new();
    let mut components = Path::new(pattern).components().peekable();

    while let Some(component) = components.peek() {
        match component {
            Component::CurDir => {}
            Component::Normal(part) if has_glob_meta(&part.to_string_lossy()) => break,
            other => prefix.push(other.as_os_str()),
        }
        components.next();
    }

    let mut rest: PathBuf = components.collect();
    if rest.as_os_str().is_empty() {
        // A literal pattern names a single file; its base is the parent directory.
        if let Some(name) = prefix.file_name().map(PathBuf::from) {
            prefix.pop();
            rest = name;
        }
    }
    (prefix, rest)
}

/// Literal directory prefix of a glob pattern.
///
/// `src/**/*.ts` → `src`, `*.ts` → `` and `src/main.ts` → `src`.
pub fn glob_base(pattern: &str) -> PathBuf {
    split_pattern(pattern).0
}

/// Resolve `.` and `..` components without touching the file system.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match normalized.components().next_back() {
                Some(Component::Normal(_)) => {
                    normalized.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => normalized.push(".."),
            },
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// Anchor `pattern` at `root`.
///
/// Returns the normalized absolute glob base and the full pattern with that
/// base escaped, so the literal prefix never acts as a glob.
pub fn resolve_pattern(root: &Path, pattern: &str) -> (PathBuf, String) {
    let (prefix, rest) = split_pattern(pattern);
    let base = normalize_path(&crate::config::resolve_path(root, &prefix));
    let full = PathBuf::from(Pattern::escape(&base.to_string_lossy())).join(rest);
    (base, full.to_string_lossy().into_owned())
}

/// Discover files matching a glob pattern.
///
/// # Arguments
/// - `base_dir` - Base directory to resolve patterns from
/// - `pattern` - Glob pattern to match
///
/// # Returns
/// Matching file paths, sorted and without duplicates.
pub fn discover_files(base_dir: &Path, pattern: &str) -> Result<Vec<PathBuf>, DiscoveryError> {
    Pattern::new(pattern).map_err(|e| DiscoveryError::InvalidPattern(pattern.to_string(), e))?;

    let (_, pattern_str) = resolve_pattern(base_dir, pattern);

    let paths =
        glob(&pattern_str).map_err(|e| DiscoveryError::InvalidPattern(pattern.to_string(), e))?;

    let mut files = Vec::new();
    for entry in paths {
        match entry {
            Ok(path) => {
                // metadata() follows symlinks; dangling links fail and are skipped
                if fs::metadata(&path).map(|m| m.is_file()).unwrap_or(false) {
                    files.push(path);
                }
            }
            Err(e) => {
                tracing::warn!("error reading path during discovery: {}", e);
            }
        }
    }

    files.sort();
    files.dedup();
    Ok(files)
}

/// Discover the source files for a build.
///
/// Resolves the input glob against the (canonicalized) project root, drops
/// anything inside the output directory, and applies the empty-match policy.
pub fn discover_sources(ctx: &BuildContext) -> Result<DiscoveredSources, DiscoveryError> {
    let pattern = ctx.input_pattern();
    let root = fs::canonicalize(ctx.project_root())
        .unwrap_or_else(|_| ctx.project_root().to_path_buf());
    let (base, _) = resolve_pattern(&root, pattern);

    let out_dir = normalize_path(&crate::config::resolve_path(&root, &ctx.config().project.out));
    let out_dir = fs::canonicalize(&out_dir).unwrap_or(out_dir);

    let files: Vec<PathBuf> = discover_files(&root, pattern)?
        .into_iter()
        .filter(|path| !path.starts_with(&out_dir))
        .collect();

    if files.is_empty() {
        if ctx.config().build.fail_on_empty_match {
            return Err(DiscoveryError::NoMatch(pattern.to_string()));
        }
        tracing::warn!(pattern, "no files matched input glob");
    } else {
        tracing::debug!(pattern, count = files.len(), "discovered sources");
    }

    Ok(DiscoveredSources { base, files })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_config;
    use std::fs::{self, File};
    use std::io::Write;
    use tempfile::TempDir;

    fn create_test_file(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        File::create(&path).unwrap().write_all(b"{}").unwrap();
        path
    }

    fn context(root: &Path, input: &str) -> BuildContext {
        let mut config = default_config();
        config.project.input = input.to_string();
        config.project.out = PathBuf::from("out");
        BuildContext::new(config, root.to_path_buf())
    }

    #[test]
    fn test_discover_files_simple() {
        let temp = TempDir::new().unwrap();
        create_test_file(temp.path(), "a.ts");
        create_test_file(temp.path(), "other.txt");

        let files = discover_files(temp.path(), "*.ts").unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("a.ts"));
    }

    #[test]
    fn test_discover_files_recursive_sorted() {
        let temp = TempDir::new().unwrap();
        create_test_file(temp.path(), "sub/deep/c.ts");
        create_test_file(temp.path(), "b.ts");
        create_test_file(temp.path(), "sub/a.ts");

        let files = discover_files(temp.path(), "**/*.ts").unwrap();
        assert_eq!(files.len(), 3);
        let mut sorted = files.clone();
        sorted.sort();
        assert_eq!(files, sorted);
    }

    #[test]
    fn test_discover_files_deterministic() {
        let temp = TempDir::new().unwrap();
        for name in ["z.ts", "m.ts", "a.ts", "dir/q.ts"] {
            create_test_file(temp.path(), name);
        }

        let first = discover_files(temp.path(), "**/*.ts").unwrap();
        let second = discover_files(temp.path(), "**/*.ts").unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 4);
    }

    #[test]
    fn test_discover_files_skips_directories() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("folder.ts")).unwrap();
        create_test_file(temp.path(), "file.ts");

        let files = discover_files(temp.path(), "*.ts").unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("file.ts"));
    }

    #[cfg(unix)]
    #[test]
    fn test_discover_files_follows_file_symlinks() {
        let temp = TempDir::new().unwrap();
        let target = create_test_file(temp.path(), "real/target.txt");
        std::os::unix::fs::symlink(&target, temp.path().join("link.ts")).unwrap();
        std::os::unix::fs::symlink(temp.path().join("missing"), temp.path().join("dangling.ts"))
            .unwrap();

        let files = discover_files(temp.path(), "*.ts").unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("link.ts"));
    }

    #[test]
    fn test_discover_files_no_match() {
        let temp = TempDir::new().unwrap();
        create_test_file(temp.path(), "a.png");

        let files = discover_files(temp.path(), "*.ts").unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn test_discover_files_invalid_pattern() {
        let temp = TempDir::new().unwrap();
        let err = discover_files(temp.path(), "src/[*.ts").unwrap_err();
        assert!(matches!(err, DiscoveryError::InvalidPattern(ref p, _) if p == "src/[*.ts"));
    }

    #[test]
    fn test_glob_base() {
        assert_eq!(glob_base("src/*.ts"), PathBuf::from("src"));
        assert_eq!(glob_base("src/**/*.ts"), PathBuf::from("src"));
        assert_eq!(glob_base("./src/lib/*.ts"), PathBuf::from("src/lib"));
        assert_eq!(glob_base("*.ts"), PathBuf::new());
        assert_eq!(glob_base("src/main.ts"), PathBuf::from("src"));
        assert_eq!(glob_base("src/a?/x.ts"), PathBuf::from("src"));
    }

    #[test]
    fn test_split_pattern() {
        assert_eq!(split_pattern("src/**/*.ts"), (PathBuf::from("src"), PathBuf::from("**/*.ts")));
        assert_eq!(split_pattern("src/main.ts"), (PathBuf::from("src"), PathBuf::from("main.ts")));
        assert_eq!(split_pattern("*.ts"), (PathBuf::new(), PathBuf::from("*.ts")));
        assert_eq!(
            split_pattern("../shared/*/x.ts"),
            (PathBuf::from("../shared"), PathBuf::from("*/x.ts"))
        );
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path(Path::new("/a/b/../c/./d")), PathBuf::from("/a/c/d"));
        assert_eq!(normalize_path(Path::new("/../a")), PathBuf::from("/a"));
        assert_eq!(normalize_path(Path::new("../a/../../b")), PathBuf::from("../../b"));
    }

    #[test]
    fn test_discover_files_parent_relative_pattern_normalized() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().canonicalize().unwrap();
        fs::create_dir_all(root.join("proj")).unwrap();
        create_test_file(&root, "shared/a.src");

        let files = discover_files(&root.join("proj"), "../shared/*.src").unwrap();
        assert_eq!(files, vec![root.join("shared/a.src")]);
    }

    #[test]
    fn test_discover_sources_parent_relative_keys_match_base() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().canonicalize().unwrap();
        fs::create_dir_all(root.join("proj")).unwrap();
        create_test_file(&root, "shared/nested/a.src");

        let found = discover_sources(&context(&root.join("proj"), "../shared/**/*.src")).unwrap();
        assert_eq!(found.base, root.join("shared"));
        assert_eq!(found.files, vec![root.join("shared/nested/a.src")]);
        assert_eq!(found.relative(&found.files[0]), PathBuf::from("nested/a.src"));
    }

    #[test]
    fn test_discover_sources_relative_paths() {
        let temp = TempDir::new().unwrap();
        create_test_file(temp.path(), "src/a.ts");
        create_test_file(temp.path(), "src/nested/b.ts");

        let found = discover_sources(&context(temp.path(), "src/**/*.ts")).unwrap();
        assert_eq!(found.len(), 2);
        let relative: Vec<PathBuf> = found.files.iter().map(|f| found.relative(f)).collect();
        assert_eq!(relative, vec![PathBuf::from("a.ts"), PathBuf::from("nested/b.ts")]);
    }

    #[test]
    fn test_discover_sources_excludes_output_dir() {
        let temp = TempDir::new().unwrap();
        create_test_file(temp.path(), "a.src");
        create_test_file(temp.path(), "out/a.src");

        let found = discover_sources(&context(temp.path(), "**/*.src")).unwrap();
        assert_eq!(found.len(), 1);
        assert!(found.files[0].ends_with("a.src"));
        assert!(!found.files[0].parent().unwrap().ends_with("out"));
    }

    #[test]
    fn test_discover_sources_empty_is_error_by_default() {
        let temp = TempDir::new().unwrap();
        let err = discover_sources(&context(temp.path(), "src/*.ts")).unwrap_err();
        assert!(matches!(err, DiscoveryError::NoMatch(_)));
    }

    #[test]
    fn test_discover_sources_empty_allowed() {
        let temp = TempDir::new().unwrap();
        let mut ctx = context(temp.path(), "src/*.ts");
        let mut config = ctx.config().clone();
        config.build.fail_on_empty_match = false;
        ctx = BuildContext::new(config, ctx.project_root().to_path_buf());

        let found = discover_sources(&ctx).unwrap();
        assert!(found.is_empty());
    }
}
