//! Command-line interface implementation
//!
//! This module provides the CLI entry point and dispatches to submodules
//! for specific command implementations.

mod build;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use crate::config::CliOverrides;

/// Exit codes
pub(crate) const EXIT_SUCCESS: u8 = 0;
pub(crate) const EXIT_ERROR: u8 = 1;
pub(crate) const EXIT_INVALID_ARGS: u8 = 2;

/// srcpipe - Discover source files, run them through transform stages and write the results
#[derive(Parser, Debug)]
#[command(name = "srcpipe")]
#[command(about = "srcpipe - Incremental build pipeline: discover, transform and write source files")]
#[command(version)]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Options for the default `build` command
    #[command(flatten)]
    pub build: BuildArgs,
}

impl Cli {
    /// Whether verbose output was requested for the selected command.
    pub fn verbose(&self) -> bool {
        match &self.command {
            Some(Commands::Build(args)) => args.verbose,
            Some(Commands::Watch { args, .. }) => args.verbose,
            None => self.build.verbose,
        }
    }
}

/// Options shared by `build` and `watch`.
#[derive(Args, Debug, Clone, Default)]
pub struct BuildArgs {
    /// Path to srcpipe.toml (default: search upward from the current directory)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override the input glob
    #[arg(short, long)]
    pub input: Option<String>,

    /// Override output directory
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    /// Rewrite output file extensions (e.g. "dart")
    #[arg(short, long)]
    pub extension: Option<String>,

    /// Maximum number of parallel file workers (0 = one per CPU)
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Force rebuild of all files (ignore the build manifest)
    #[arg(short, long)]
    pub force: bool,

    /// Dry run (show what would be built without building)
    #[arg(long)]
    pub dry_run: bool,

    /// Succeed when the input glob matches no files
    #[arg(long)]
    pub allow_empty: bool,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl BuildArgs {
    /// Configuration overrides carried by these arguments.
    pub fn overrides(&self) -> CliOverrides {
        CliOverrides {
            input: self.input.clone(),
            out: self.out.clone(),
            extension: self.extension.clone(),
            jobs: self.jobs,
            allow_empty: self.allow_empty.then_some(true),
            force: self.force.then_some(true),
            ..Default::default()
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build all sources according to srcpipe.toml (the default command)
    Build(BuildArgs),

    /// Build, then rebuild whenever a source changes
    Watch {
        #[command(flatten)]
        args: BuildArgs,

        /// Debounce window in milliseconds
        #[arg(long)]
        debounce_ms: Option<u32>,

        /// Don't clear the screen before each rebuild
        #[arg(long)]
        no_clear: bool,
    },
}

/// Run the CLI application
pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Some(Commands::Build(args)) => build::run_build(&args),
        Some(Commands::Watch { args, debounce_ms, no_clear }) => {
            build::run_watch(&args, debounce_ms, no_clear)
        }
        None => build::run_build(&cli.build),
    }
}
