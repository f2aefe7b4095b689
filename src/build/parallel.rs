//! Parallel build execution.
//!
//! Per-file work is independent, so a pass maps a worker function over the
//! planned files on a rayon thread pool sized to the configured number of
//! jobs. Results come back in input order; callers key them by source path,
//! so worker completion order never affects the report.
//!
//! # Example
//!
//! ```ignore
//! use srcpipe::build::execute;
//!
//! let lengths = execute(&paths, 4, |path| std::fs::read(path).map(|b| b.len()))?;
//! ```

use rayon::prelude::*;

/// Default number of parallel jobs (uses available parallelism).
pub fn default_jobs() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

/// Resolve a configured concurrency (0 = auto) into a worker count.
pub fn effective_jobs(concurrency: usize) -> usize {
    if concurrency == 0 {
        default_jobs()
    } else {
        concurrency
    }
}

/// Apply `work` to every item using at most `jobs` workers.
///
/// With one job, or at most one item, runs on the calling thread.
pub fn execute<T, R, F>(items: &[T], jobs: usize, work: F) -> Result<Vec<R>, rayon::ThreadPoolBuildError>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync,
{
    let jobs = jobs.max(1);
    if jobs == 1 || items.len() <= 1 {
        return Ok(items.iter().map(work).collect());
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs.min(items.len()))
        .thread_name(|i| format!("srcpipe-worker-{}", i))
        .build()?;

    Ok(pool.install(|| items.par_iter().map(&work).collect()))
}
