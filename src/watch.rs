//! Watch mode for automatic rebuilds on file changes
//!
//! The watcher is split in two. [`Debouncer`] is a pure state machine that
//! turns a stream of change notifications into build triggers, driven by
//! explicit timestamps. [`WatchSession`] owns the file system subscription
//! and a channel of [`WatchMessage`]s, and runs the loop that feeds the
//! debouncer and calls back into the build.

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::build::{
    normalize_path, resolve_pattern, split_pattern, BuildContext, BuildError, BuildPipeline,
    BuildReport, DiscoveryError,
};
use crate::config::schema::WatchConfig;

/// Error during watch mode
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WatchError {
    /// Failed to initialize file watcher
    #[error("Failed to initialize file watcher: {0}")]
    WatcherInit(#[source] notify::Error),
    /// Failed to add watch path
    #[error("Failed to watch {}: {source}", path.display())]
    WatchPath { path: PathBuf, source: notify::Error },
    /// Channel receive error
    #[error("Watch channel error: {0}")]
    Channel(String),
    /// The build could not be set up
    #[error(transparent)]
    Build(#[from] BuildError),
}

/// Debouncer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    /// Not started; changes are ignored
    Idle,
    /// Waiting for changes
    Watching,
    /// A change arrived; a build fires at `deadline` unless more arrive
    Debouncing { deadline: Instant },
    /// Terminal; all input is ignored
    Stopped,
}

/// A request to run one build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trigger {
    /// When the debounce window expired
    pub at: Instant,
    /// Number of change notifications folded into this trigger
    pub changes: usize,
}

/// Coalesces bursts of changes into single build triggers.
///
/// Every change restarts the window, so a trigger fires `window` after the
/// last change of a burst. Time is passed in, never read.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    state: WatchState,
    pending: usize,
}

impl Debouncer {
    /// Create an idle debouncer.
    pub fn new(window: Duration) -> Self {
        Self { window, state: WatchState::Idle, pending: 0 }
    }

    /// The debounce window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Current state.
    pub fn state(&self) -> WatchState {
        self.state
    }

    /// Start accepting changes.
    pub fn start(&mut self) {
        if self.state == WatchState::Idle {
            self.state = WatchState::Watching;
        }
    }

    /// Record a change at `now`.
    ///
    /// Returns `false` if the change was ignored (not started, or stopped).
    pub fn on_change(&mut self, now: Instant) -> bool {
        match self.state {
            WatchState::Watching | WatchState::Debouncing { .. } => {
                self.state = WatchState::Debouncing { deadline: now + self.window };
                self.pending += 1;
                true
            }
            WatchState::Idle | WatchState::Stopped => false,
        }
    }

    /// Fire a trigger if the deadline has passed.
    pub fn poll(&mut self, now: Instant) -> Option<Trigger> {
        match self.state {
            WatchState::Debouncing { deadline } if now >= deadline => {
                self.state = WatchState::Watching;
                let changes = std::mem::take(&mut self.pending);
                Some(Trigger { at: now, changes })
            }
            _ => None,
        }
    }

    /// When the pending trigger is due, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        match self.state {
            WatchState::Debouncing { deadline } => Some(deadline),
            _ => None,
        }
    }

    /// Stop, cancelling any pending trigger.
    pub fn stop(&mut self) {
        self.state = WatchState::Stopped;
        self.pending = 0;
    }

    /// Whether the debouncer has been stopped.
    pub fn is_stopped(&self) -> bool {
        self.state == WatchState::Stopped
    }
}

/// Message delivered to a [`WatchSession`] loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchMessage {
    /// Paths touched by a file system event
    Change(Vec<PathBuf>),
    /// The subscription reported an error
    Error(String),
    /// End the session
    Stop,
}

/// Stops a running [`WatchSession`] from any thread.
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Sender<WatchMessage>,
}

impl StopHandle {
    /// Ask the session to stop.
    ///
    /// A pending trigger is cancelled; a build already running finishes.
    pub fn stop(&self) {
        let _ = self.tx.send(WatchMessage::Stop);
    }
}

/// Decides which changed paths count as source changes.
///
/// Matches with the same rules discovery uses: the glob is anchored at its
/// canonical base directory and `*` never crosses a path separator.
#[derive(Debug, Clone)]
pub struct ChangeFilter {
    pattern: glob::Pattern,
    out_dir: PathBuf,
}

const MATCH_OPTIONS: glob::MatchOptions = glob::MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

impl ChangeFilter {
    /// Match `input` (relative to `root`, or absolute), excluding anything
    /// under `out_dir`.
    pub fn new(root: &Path, input: &str, out_dir: &Path) -> Result<Self, glob::PatternError> {
        glob::Pattern::new(input)?;
        let (_, rest) = split_pattern(input);
        let (base, _) = resolve_pattern(&canonical_or_same(root), input);
        let anchored =
            PathBuf::from(glob::Pattern::escape(&canonical_or_same(&base).to_string_lossy()))
                .join(rest);
        Ok(Self {
            pattern: glob::Pattern::new(&anchored.to_string_lossy())?,
            out_dir: canonical_or_same(&normalize_path(out_dir)),
        })
    }

    /// Filter for the sources of a build.
    pub fn from_context(ctx: &BuildContext) -> Result<Self, glob::PatternError> {
        Self::new(ctx.project_root(), ctx.input_pattern(), &ctx.out_dir())
    }

    /// Whether a change to `path` should trigger a rebuild.
    pub fn is_relevant(&self, path: &Path) -> bool {
        !path.starts_with(&self.out_dir) && self.pattern.matches_path_with(path, MATCH_OPTIONS)
    }
}

fn canonical_or_same(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// An owned watch session.
///
/// Holds the file system subscription (once [`subscribe`](Self::subscribe)
/// is called), the message channel and the debouncer. Dropping the session
/// drops the subscription.
pub struct WatchSession {
    tx: Sender<WatchMessage>,
    rx: Receiver<WatchMessage>,
    debouncer: Debouncer,
    filter: ChangeFilter,
    changed: BTreeSet<PathBuf>,
    watcher: Option<RecommendedWatcher>,
}

impl WatchSession {
    /// Create a session that has not subscribed to anything yet.
    pub fn new(filter: ChangeFilter, debounce: Duration) -> Self {
        let (tx, rx) = channel();
        Self {
            tx,
            rx,
            debouncer: Debouncer::new(debounce),
            filter,
            changed: BTreeSet::new(),
            watcher: None,
        }
    }

    /// Watch `path` recursively.
    pub fn subscribe(&mut self, path: &Path) -> Result<(), WatchError> {
        if self.watcher.is_none() {
            let tx = self.tx.clone();
            let watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
                let message = match res {
                    Ok(event) if matches!(event.kind, EventKind::Access(_)) => return,
                    Ok(event) => WatchMessage::Change(event.paths),
                    Err(e) => WatchMessage::Error(e.to_string()),
                };
                let _ = tx.send(message);
            })
            .map_err(WatchError::WatcherInit)?;
            self.watcher = Some(watcher);
        }

        if let Some(watcher) = self.watcher.as_mut() {
            watcher
                .watch(path, RecursiveMode::Recursive)
                .map_err(|source| WatchError::WatchPath { path: path.to_path_buf(), source })?;
        }
        tracing::debug!(path = %path.display(), "subscribed");
        Ok(())
    }

    /// Sender for injecting messages, as the file system callback does.
    pub fn sender(&self) -> Sender<WatchMessage> {
        self.tx.clone()
    }

    /// Handle for stopping the session from another thread.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle { tx: self.tx.clone() }
    }

    /// Current debouncer state.
    pub fn state(&self) -> WatchState {
        self.debouncer.state()
    }

    /// Run until stopped, calling `on_trigger` with the changed paths for
    /// every debounced burst.
    ///
    /// `on_trigger` runs on this thread, so triggers never overlap; changes
    /// arriving meanwhile wait in the channel and lead to one follow-up.
    pub fn run<F>(&mut self, mut on_trigger: F) -> Result<(), WatchError>
    where
        F: FnMut(&Trigger, &[PathBuf]),
    {
        self.debouncer.start();

        loop {
            let message = match self.debouncer.next_deadline() {
                Some(deadline) => {
                    let timeout = deadline.saturating_duration_since(Instant::now());
                    match self.rx.recv_timeout(timeout) {
                        Ok(message) => Some(message),
                        Err(RecvTimeoutError::Timeout) => None,
                        Err(RecvTimeoutError::Disconnected) => {
                            return Err(WatchError::Channel("event channel disconnected".into()))
                        }
                    }
                }
                None => Some(self.rx.recv().map_err(|e| WatchError::Channel(e.to_string()))?),
            };

            if let Some(message) = message {
                self.handle(message, Instant::now());
            }
            if self.debouncer.is_stopped() {
                tracing::debug!("watch session stopped");
                return Ok(());
            }

            if let Some(trigger) = self.debouncer.poll(Instant::now()) {
                let changed: Vec<PathBuf> = std::mem::take(&mut self.changed).into_iter().collect();
                tracing::debug!(changes = trigger.changes, files = changed.len(), "rebuilding");
                on_trigger(&trigger, &changed);
            }
        }
    }

    fn handle(&mut self, message: WatchMessage, now: Instant) {
        match message {
            WatchMessage::Change(paths) => {
                let relevant: Vec<PathBuf> =
                    paths.into_iter().filter(|p| self.filter.is_relevant(p)).collect();
                if !relevant.is_empty() && self.debouncer.on_change(now) {
                    self.changed.extend(relevant);
                }
            }
            WatchMessage::Error(error) => {
                tracing::warn!("watch error: {}", error);
                eprintln!("[{}] Watch error: {}", timestamp(), error);
                eprintln!("[{}] Continuing to watch...", timestamp());
            }
            WatchMessage::Stop => {
                self.debouncer.stop();
                self.changed.clear();
            }
        }
    }
}

/// Tracks files with errors across build iterations for recovery detection
#[derive(Debug, Default)]
pub struct ErrorTracker {
    /// Files that had errors in the previous build
    files_with_errors: HashSet<PathBuf>,
}

impl ErrorTracker {
    /// Create a new error tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Update tracker with new build report, returns list of fixed files
    pub fn update(&mut self, report: &BuildReport) -> Vec<PathBuf> {
        let current: HashSet<PathBuf> = report.failed_paths().into_iter().collect();

        let mut fixed: Vec<PathBuf> = self
            .files_with_errors
            .difference(&current)
            .filter(|path| report.outcome(path).is_some_and(|o| o.is_success()))
            .cloned()
            .collect();
        fixed.sort();

        self.files_with_errors = current;
        fixed
    }

    /// Check if there are any tracked errors
    pub fn has_errors(&self) -> bool {
        !self.files_with_errors.is_empty()
    }

    /// Get the number of files with errors
    pub fn error_count(&self) -> usize {
        self.files_with_errors.len()
    }
}

/// Clear the terminal screen
fn clear_screen() {
    if atty::is(atty::Stream::Stdout) {
        // ANSI escape code to clear screen and move cursor to top-left
        print!("\x1B[2J\x1B[1;1H");
    }
}

/// Format duration for display
fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis < 1000 {
        format!("{}ms", millis)
    } else {
        format!("{:.2}s", duration.as_secs_f64())
    }
}

/// Get current timestamp for logging
fn timestamp() -> String {
    use std::time::SystemTime;
    let now = SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default();
    let secs = now.as_secs() % 86400;
    let hours = (secs / 3600) % 24;
    let minutes = (secs / 60) % 60;
    let seconds = secs % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

fn display_name(path: &Path) -> String {
    path.file_name().unwrap_or(path.as_os_str()).to_string_lossy().into_owned()
}

/// Run one build pass and print the outcome. Failures never stop watching.
fn rebuild(pipeline: &BuildPipeline, tracker: &mut ErrorTracker) {
    println!("[{}] Building...", timestamp());
    match pipeline.build() {
        Ok(report) => {
            let fixed = tracker.update(&report);
            print_build_report(&report, &fixed);
        }
        Err(e) => {
            tracing::warn!("build pass failed: {}", e);
            eprintln!("[{}] Build error: {}", timestamp(), e);
        }
    }
}

/// Print build report to console with fixed file notifications
fn print_build_report(report: &BuildReport, fixed_files: &[PathBuf]) {
    for fixed in fixed_files {
        println!("[{}] Fixed: {}", timestamp(), display_name(fixed));
    }

    if report.is_success() {
        println!(
            "[{}] Build complete ({}) - Written: {} | Unchanged: {}",
            timestamp(),
            format_duration(report.duration),
            report.written_count() - report.reused_count(),
            report.reused_count()
        );
    } else {
        let error_count = report.failed_count();
        println!(
            "[{}] Build failed ({}) - {} error{}",
            timestamp(),
            format_duration(report.duration),
            error_count,
            if error_count == 1 { "" } else { "s" }
        );
        for (path, error) in report.failures() {
            eprintln!("[{}] Error in {}: {}", timestamp(), display_name(path), error);
        }
    }
}

/// Build once, then watch the sources and rebuild on change.
///
/// Blocks until the process is interrupted. Build failures are printed
/// and watching continues; only setup and subscription errors return.
pub fn watch_and_rebuild(pipeline: BuildPipeline, config: &WatchConfig) -> Result<(), WatchError> {
    let ctx = pipeline.context();
    let mut tracker = ErrorTracker::new();

    if config.clear_screen {
        clear_screen();
    }
    rebuild(&pipeline, &mut tracker);

    let filter = ChangeFilter::from_context(ctx).map_err(|e| {
        BuildError::Discovery(DiscoveryError::InvalidPattern(ctx.input_pattern().to_string(), e))
    })?;
    let mut session = WatchSession::new(filter, Duration::from_millis(config.debounce_ms as u64));

    let input_base = ctx.input_base();
    let watch_root = if input_base.is_dir() { input_base } else { ctx.project_root().to_path_buf() };
    session.subscribe(&canonical_or_same(&watch_root))?;
    println!("[{}] Watching {} for changes...", timestamp(), watch_root.display());

    session.run(|_trigger, changed| {
        for path in changed {
            println!("[{}] Changed: {}", timestamp(), display_name(path));
        }
        if config.clear_screen {
            clear_screen();
        }
        rebuild(&pipeline, &mut tracker);
        println!("[{}] Watching {} for changes...", timestamp(), watch_root.display());
    })
}

/// Create the build pipeline for a context and watch it.
pub fn watch_project(context: BuildContext, force: bool) -> Result<(), WatchError> {
    let config = context.config().watch.clone();
    let pipeline = BuildPipeline::from_context(context)?.with_force(force);
    watch_and_rebuild(pipeline, &config)
}
