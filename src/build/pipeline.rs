//! Build pipeline orchestration.
//!
//! A build pass discovers the sources, plans one destination per source,
//! runs the transform pipeline and writes each output on a bounded worker
//! pool, then assembles a [`BuildReport`]. Per-file failures are recorded in
//! the report and never abort the pass; only discovery and setup errors are
//! returned as `Err`.

use crate::build::{
    discover_sources, execute, hash_bytes, output_relative_path, write_output, BuildContext,
    BuildManifest, BuildOutcome, BuildReport, DiscoveredSources, DiscoveryError, FileError,
    SourceFile, WriteError, MANIFEST_FILENAME,
};
use crate::config::ConfigError;
use crate::transforms::Pipeline;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;
use thiserror::Error;

/// Error that aborts a whole build pass.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BuildError {
    /// Discovery error
    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),
    /// Pipeline configuration error
    #[error("{0}")]
    Config(#[from] ConfigError),
    /// Worker pool could not be created
    #[error("Failed to start worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// One source and where its output goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedFile {
    /// Absolute source path
    pub source: PathBuf,
    /// Source path relative to the glob base
    pub relative: PathBuf,
    /// Output path relative to the output root
    pub output_relative: PathBuf,
    /// Absolute output path
    pub output: PathBuf,
}

/// Map discovered sources to destinations.
///
/// When several sources map to the same destination, the first one in path
/// order keeps it and the others are returned as conflicts. The manifest
/// path in the output root is never handed out.
pub fn plan_outputs(
    ctx: &BuildContext,
    sources: &DiscoveredSources,
) -> (Vec<PlannedFile>, Vec<(PathBuf, WriteError)>) {
    let out_dir = ctx.out_dir();
    let extension = ctx.config().output_extension();

    let manifest_path = out_dir.join(MANIFEST_FILENAME);
    let mut claimed: HashMap<PathBuf, PathBuf> = HashMap::new();
    let mut planned = Vec::with_capacity(sources.len());
    let mut conflicts = Vec::new();

    for source in &sources.files {
        let relative = sources.relative(source);
        let output_relative = output_relative_path(&relative, extension);
        let output = out_dir.join(&output_relative);

        if output == manifest_path {
            conflicts.push((source.clone(), WriteError::Reserved(output)));
            continue;
        }
        if let Some(other) = claimed.get(&output) {
            conflicts.push((
                source.clone(),
                WriteError::Conflict { dest: output.clone(), other: other.clone() },
            ));
            continue;
        }

        claimed.insert(output.clone(), source.clone());
        planned.push(PlannedFile { source: source.clone(), relative, output_relative, output });
    }

    (planned, conflicts)
}

/// What a worker produced for one file.
struct FileResult {
    source: PathBuf,
    outcome: BuildOutcome,
    source_hash: Option<String>,
    reused: bool,
}

/// Build pipeline for executing builds.
pub struct BuildPipeline {
    /// Build context
    context: BuildContext,
    /// Transform stages applied to every file
    pipeline: Pipeline,
    /// Ignore the manifest and rebuild everything
    force: bool,
    /// Plan only; read and write nothing
    dry_run: bool,
    /// Serializes passes against the output directory
    lock: Mutex<()>,
}

impl BuildPipeline {
    /// Create a build pipeline with explicit stages.
    pub fn new(context: BuildContext, pipeline: Pipeline) -> Self {
        Self { context, pipeline, force: false, dry_run: false, lock: Mutex::new(()) }
    }

    /// Create a build pipeline with the stages listed in the configuration.
    pub fn from_context(context: BuildContext) -> Result<Self, BuildError> {
        let pipeline = Pipeline::from_config(&context.config().stages, context.project_root())?;
        Ok(Self::new(context, pipeline))
    }

    /// Set force mode (ignore the incremental manifest).
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Set dry-run mode (don't actually build).
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Get the build context.
    pub fn context(&self) -> &BuildContext {
        &self.context
    }

    /// Get the transform pipeline.
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    fn is_incremental(&self) -> bool {
        self.context.config().build.incremental && !self.force && !self.dry_run
    }

    /// Run one build pass.
    ///
    /// Passes on the same `BuildPipeline` never overlap; a second caller
    /// waits for the running pass to finish.
    pub fn build(&self) -> Result<BuildReport, BuildError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let start = Instant::now();

        let discovered = discover_sources(&self.context)?;
        let (planned, conflicts) = plan_outputs(&self.context, &discovered);

        let mut report = BuildReport::new();

        if self.dry_run {
            report.dry_run = true;
            for file in planned {
                report.insert(file.source, BuildOutcome::Written(file.output));
            }
            for (source, err) in conflicts {
                report.insert(source, BuildOutcome::Failed(FileError::Write(err)));
            }
            report.duration = start.elapsed();
            return Ok(report);
        }

        let out_dir = self.context.out_dir();
        let mut manifest = if self.is_incremental() {
            Some(BuildManifest::load_for_pipeline(&out_dir, &self.pipeline.fingerprint()))
        } else {
            None
        };

        let jobs = self.context.jobs();
        tracing::info!(files = planned.len(), jobs, stages = self.pipeline.len(), "building");

        let results = execute(&planned, jobs, |file| self.process(file, manifest.as_ref()))?;

        for result in results {
            if let Some(manifest) = manifest.as_mut() {
                match (&result.outcome, result.source_hash) {
                    (BuildOutcome::Written(output), Some(hash)) => {
                        manifest.record(&result.source, hash, output.clone())
                    }
                    _ => manifest.remove(&result.source),
                }
            }
            if result.reused {
                report.mark_reused(result.source.clone());
            }
            report.insert(result.source, result.outcome);
        }

        for (source, err) in conflicts {
            tracing::warn!(source = %source.display(), "{}", err);
            if let Some(manifest) = manifest.as_mut() {
                manifest.remove(&source);
            }
            report.insert(source, BuildOutcome::Failed(FileError::Write(err)));
        }

        if let Some(manifest) = manifest.as_mut() {
            manifest.retain_sources(&discovered.files);
            if !planned.is_empty() || out_dir.exists() {
                if let Err(e) = manifest.save_to_dir(&out_dir) {
                    tracing::warn!("failed to save build manifest: {}", e);
                }
            }
        }

        report.duration = start.elapsed();
        tracing::info!(
            written = report.written_count(),
            reused = report.reused_count(),
            failed = report.failed_count(),
            duration_ms = report.duration.as_millis() as u64,
            "build finished"
        );
        Ok(report)
    }

    /// Read, transform and write a single file.
    fn process(&self, file: &PlannedFile, manifest: Option<&BuildManifest>) -> FileResult {
        let failed = |error: FileError, source_hash: Option<String>| {
            tracing::debug!(source = %file.source.display(), "failed: {}", error);
            FileResult {
                source: file.source.clone(),
                outcome: BuildOutcome::Failed(error),
                source_hash,
                reused: false,
            }
        };

        let source = match SourceFile::read(&file.source, &file.relative) {
            Ok(source) => source,
            Err(e) => return failed(FileError::Read { path: file.source.clone(), source: e }, None),
        };

        let source_hash = manifest.map(|_| hash_bytes(&source.contents));
        if let (Some(manifest), Some(hash)) = (manifest, source_hash.as_deref()) {
            if manifest.is_fresh(&file.source, hash, &file.output) {
                tracing::debug!(source = %file.source.display(), "unchanged, skipping");
                return FileResult {
                    source: file.source.clone(),
                    outcome: BuildOutcome::Written(file.output.clone()),
                    source_hash,
                    reused: true,
                };
            }
        }

        let bytes = match self.pipeline.run(&source) {
            Ok(bytes) => bytes,
            Err(e) => return failed(FileError::Transform(e), source_hash),
        };

        match write_output(&self.context.out_dir(), &file.output_relative, &bytes) {
            Ok(output) => {
                tracing::debug!(
                    source = %file.source.display(),
                    output = %output.display(),
                    bytes = bytes.len(),
                    "written"
                );
                FileResult {
                    source: file.source.clone(),
                    outcome: BuildOutcome::Written(output),
                    source_hash,
                    reused: false,
                }
            }
            Err(e) => failed(FileError::Write(e), source_hash),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_config;
    use crate::transforms::{IdentityStage, StageError, TransformStage};
    use std::fs;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Upper;

    impl TransformStage for Upper {
        fn name(&self) -> &str {
            "upper"
        }

        fn transform(&self, input: &[u8], _path: &Path) -> Result<Vec<u8>, StageError> {
            Ok(input.to_ascii_uppercase())
        }
    }

    /// Fails for files whose name starts with the given prefix.
    struct FailFor(&'static str);

    impl TransformStage for FailFor {
        fn name(&self) -> &str {
            "fail-for"
        }

        fn transform(&self, input: &[u8], path: &Path) -> Result<Vec<u8>, StageError> {
            let name = path.file_name().unwrap_or_default().to_string_lossy();
            if name.starts_with(self.0) {
                Err(StageError::message(format!("cannot handle {}", name)))
            } else {
                Ok(input.to_vec())
            }
        }
    }

    struct Counting(Arc<AtomicUsize>);

    impl TransformStage for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn transform(&self, input: &[u8], _path: &Path) -> Result<Vec<u8>, StageError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(input.to_vec())
        }
    }

    fn project(files: &[(&str, &str)]) -> TempDir {
        let temp = TempDir::new().unwrap();
        for (name, contents) in files {
            let path = temp.path().join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, contents).unwrap();
        }
        temp
    }

    fn context(root: &Path, input: &str) -> BuildContext {
        let mut config = default_config();
        config.project.input = input.to_string();
        config.project.out = PathBuf::from("out");
        BuildContext::new(config, root.to_path_buf())
    }

    #[test]
    fn test_build_writes_transformed_outputs() {
        let temp = project(&[("src/a.ts", "a"), ("src/lib/b.ts", "b")]);
        let pipeline = Pipeline::new().with_stage(Upper);
        let build = BuildPipeline::new(context(temp.path(), "src/**/*.ts"), pipeline);

        let report = build.build().unwrap();
        assert!(report.is_success());
        assert_eq!(report.len(), 2);
        assert_eq!(fs::read_to_string(temp.path().join("out/a.ts")).unwrap(), "A");
        assert_eq!(fs::read_to_string(temp.path().join("out/lib/b.ts")).unwrap(), "B");
    }

    #[test]
    fn test_build_rewrites_extension() {
        let temp = project(&[("src/a.ts", "a")]);
        let mut ctx = context(temp.path(), "src/*.ts");
        let mut config = ctx.config().clone();
        config.project.extension = Some("dart".to_string());
        ctx = BuildContext::new(config, ctx.project_root().to_path_buf());

        let report = BuildPipeline::new(ctx, Pipeline::new()).build().unwrap();
        assert!(report.is_success());
        assert!(temp.path().join("out/a.dart").exists());
        assert!(!temp.path().join("out/a.ts").exists());
    }

    #[test]
    fn test_failure_isolated_to_one_file() {
        let temp = project(&[("a.src", "a"), ("b.src", "b"), ("c.src", "c")]);
        let pipeline = Pipeline::new().with_stage(IdentityStage).with_stage(FailFor("b"));
        let report = BuildPipeline::new(context(temp.path(), "*.src"), pipeline).build().unwrap();

        assert!(!report.is_success());
        assert_eq!(report.written_count(), 2);
        assert_eq!(report.failed_count(), 1);

        let (path, err) = report.failures()[0];
        assert!(path.ends_with("b.src"));
        match err {
            FileError::Transform(e) => {
                assert_eq!(e.index, 1);
                assert_eq!(e.stage, "fail-for");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(temp.path().join("out/a.src").exists());
        assert!(temp.path().join("out/c.src").exists());
        assert!(!temp.path().join("out/b.src").exists());
    }

    #[test]
    fn test_conflicting_destinations() {
        let temp = project(&[("src/a.js", "js"), ("src/a.ts", "ts")]);
        let mut config = default_config();
        config.project.input = "src/*".to_string();
        config.project.out = PathBuf::from("out");
        config.project.extension = Some("dart".to_string());
        let ctx = BuildContext::new(config, temp.path().to_path_buf());

        let report = BuildPipeline::new(ctx, Pipeline::new()).build().unwrap();
        assert_eq!(report.written_count(), 1);
        assert_eq!(report.failed_count(), 1);
        assert!(matches!(report.failures()[0].1, FileError::Write(WriteError::Conflict { .. })));
        assert_eq!(fs::read_to_string(temp.path().join("out/a.dart")).unwrap(), "js");
    }

    #[test]
    fn test_manifest_path_is_reserved() {
        let temp = project(&[("src/.srcpipe-manifest.json", "USER DATA"), ("src/a.src", "a")]);
        let build = BuildPipeline::new(context(temp.path(), "src/*"), Pipeline::new());
        let report = build.build().unwrap();

        assert_eq!(report.written_count(), 1);
        let (path, err) = report.failures()[0];
        assert!(path.ends_with(MANIFEST_FILENAME));
        assert!(matches!(err, FileError::Write(WriteError::Reserved(_))));

        let manifest = fs::read_to_string(temp.path().join("out").join(MANIFEST_FILENAME)).unwrap();
        assert!(!manifest.contains("USER DATA"));
    }

    /// Tracks how many transforms run at once across every pass.
    struct Overlap {
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl TransformStage for Overlap {
        fn name(&self) -> &str {
            "overlap"
        }

        fn transform(&self, input: &[u8], _path: &Path) -> Result<Vec<u8>, StageError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(20));
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(input.to_vec())
        }
    }

    #[test]
    fn test_concurrent_builds_run_one_at_a_time() {
        let temp = project(&[("a.src", "a"), ("b.src", "b"), ("c.src", "c")]);
        let mut ctx = context(temp.path(), "*.src");
        let mut config = ctx.config().clone();
        config.build.concurrency = 1;
        config.build.incremental = false;
        ctx = BuildContext::new(config, ctx.project_root().to_path_buf());

        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let stage = Overlap { active: Arc::clone(&active), peak: Arc::clone(&peak) };
        let build = BuildPipeline::new(ctx, Pipeline::new().with_stage(stage));

        let reports: Vec<BuildReport> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..2).map(|_| scope.spawn(|| build.build().unwrap())).collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(reports.iter().all(|r| r.is_success() && r.written_count() == 3));
        // One worker per pass: any overlap between passes shows up as 2.
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(active.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_incremental_skips_unchanged_files() {
        let temp = project(&[("a.src", "a"), ("b.src", "b")]);
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = Pipeline::new().with_stage(Counting(Arc::clone(&calls)));
        let build = BuildPipeline::new(context(temp.path(), "*.src"), pipeline);

        let first = build.build().unwrap();
        assert_eq!(first.reused_count(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        fs::write(temp.path().join("b.src"), "b2").unwrap();
        let second = build.build().unwrap();
        assert!(second.is_success());
        assert_eq!(second.written_count(), 2);
        assert_eq!(second.reused_count(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(fs::read_to_string(temp.path().join("out/b.src")).unwrap(), "b2");
    }

    #[test]
    fn test_incremental_rebuilds_missing_output() {
        let temp = project(&[("a.src", "a")]);
        let build = BuildPipeline::new(context(temp.path(), "*.src"), Pipeline::new());

        build.build().unwrap();
        fs::remove_file(temp.path().join("out/a.src")).unwrap();
        let report = build.build().unwrap();
        assert_eq!(report.reused_count(), 0);
        assert!(temp.path().join("out/a.src").exists());
    }

    #[test]
    fn test_force_ignores_manifest() {
        let temp = project(&[("a.src", "a")]);
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = Pipeline::new().with_stage(Counting(Arc::clone(&calls)));
        let build = BuildPipeline::new(context(temp.path(), "*.src"), pipeline).with_force(true);

        build.build().unwrap();
        let report = build.build().unwrap();
        assert_eq!(report.reused_count(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let temp = project(&[("a.src", "a")]);
        let build =
            BuildPipeline::new(context(temp.path(), "*.src"), Pipeline::new()).with_dry_run(true);

        let report = build.build().unwrap();
        assert!(report.dry_run);
        assert_eq!(report.len(), 1);
        assert!(!temp.path().join("out").exists());
    }

    #[test]
    fn test_invalid_pattern_is_fatal() {
        let temp = project(&[("a.src", "a")]);
        let err = BuildPipeline::new(context(temp.path(), "[*.src"), Pipeline::new())
            .build()
            .unwrap_err();
        assert!(matches!(err, BuildError::Discovery(DiscoveryError::InvalidPattern(..))));
    }

    #[test]
    fn test_plan_outputs_mirrors_structure() {
        let temp = project(&[("src/a.ts", ""), ("src/x/b.ts", "")]);
        let ctx = context(temp.path(), "src/**/*.ts");
        let discovered = discover_sources(&ctx).unwrap();

        let (planned, conflicts) = plan_outputs(&ctx, &discovered);
        assert!(conflicts.is_empty());
        let rel: Vec<_> = planned.iter().map(|p| p.output_relative.clone()).collect();
        assert_eq!(rel, vec![PathBuf::from("a.ts"), PathBuf::from("x/b.ts")]);
        assert!(planned.iter().all(|p| p.output.starts_with(ctx.out_dir())));
    }

    #[test]
    fn test_from_context_uses_configured_stages() {
        let temp = project(&[("a.src", "a  \n")]);
        let mut config = default_config();
        config.project.input = "*.src".to_string();
        config.project.out = PathBuf::from("out");
        config.stages = vec![crate::config::StageConfig::Replace {
            name: Some("trim".to_string()),
            pattern: "(?m)[ \t]+$".to_string(),
            replacement: String::new(),
        }];
        let build =
            BuildPipeline::from_context(BuildContext::new(config, temp.path().to_path_buf()))
                .unwrap();

        assert_eq!(build.pipeline().stage_names(), vec!["trim"]);
        build.build().unwrap();
        assert_eq!(fs::read_to_string(temp.path().join("out/a.src")).unwrap(), "a\n");
    }
}
