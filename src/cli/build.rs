//! Build command implementations (build, watch)

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use super::{BuildArgs, EXIT_ERROR, EXIT_INVALID_ARGS, EXIT_SUCCESS};
use crate::build::{BuildContext, BuildPipeline, BuildReport};
use crate::config::loader::project_root;
use crate::config::{
    check, default_config, find_config, load_config, merge_cli_overrides, CliOverrides,
    ConfigError,
};

/// Load the configuration, apply CLI overrides and set up the build context.
///
/// On failure the error has been printed and the exit code is returned.
fn load_context(args: &BuildArgs, extra: &CliOverrides) -> Result<BuildContext, ExitCode> {
    let config_path = match &args.config {
        Some(path) if !path.is_file() => {
            eprintln!("Error: Config file not found: {}", path.display());
            return Err(ExitCode::from(EXIT_INVALID_ARGS));
        }
        Some(path) => Some(path.clone()),
        None => find_config(),
    };

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let (mut config, root) = match config_path {
        Some(path) => {
            if args.verbose {
                println!("Using config: {}", path.display());
            }
            let config = load_config(Some(&path)).map_err(config_error)?;
            let root = project_root(&path)
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| cwd.clone());
            (config, root)
        }
        None => {
            if args.verbose {
                println!("No srcpipe.toml found, using defaults");
            }
            (default_config(), cwd)
        }
    };

    merge_cli_overrides(&mut config, &args.overrides());
    merge_cli_overrides(&mut config, extra);
    check(&config).map_err(config_error)?;

    Ok(BuildContext::new(config, root).with_verbose(args.verbose))
}

fn config_error(err: ConfigError) -> ExitCode {
    eprintln!("Error loading config: {}", err);
    match err {
        ConfigError::Io(_) => ExitCode::from(EXIT_ERROR),
        _ => ExitCode::from(EXIT_INVALID_ARGS),
    }
}

fn print_outcomes(report: &BuildReport) {
    for (source, outcome) in &report.files {
        match outcome.destination() {
            Some(dest) => println!("  {} -> {}", source.display(), dest.display()),
            None => println!("  {} (failed)", source.display()),
        }
    }
}

/// Run the build command
pub fn run_build(args: &BuildArgs) -> ExitCode {
    let context = match load_context(args, &CliOverrides::default()) {
        Ok(context) => context,
        Err(code) => return code,
    };

    if args.dry_run {
        println!("Dry run - would build:");
        println!("  Input: {}", context.input_pattern());
        println!("  Output: {}", context.out_dir().display());
    } else if args.force {
        println!("Building (force rebuild, ignoring manifest)...");
    } else {
        println!("Building {} -> {}...", context.input_pattern(), context.out_dir().display());
    }

    let verbose = context.is_verbose();
    let pipeline = match BuildPipeline::from_context(context) {
        Ok(pipeline) => pipeline.with_force(args.force).with_dry_run(args.dry_run),
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(EXIT_INVALID_ARGS);
        }
    };

    match pipeline.build() {
        Ok(report) => {
            if verbose || report.dry_run {
                print_outcomes(&report);
            }
            if report.is_success() {
                println!("{}", report.summary());
                ExitCode::from(EXIT_SUCCESS)
            } else {
                eprintln!("{}", report.summary());
                ExitCode::from(EXIT_ERROR)
            }
        }
        Err(e) => {
            eprintln!("Build error: {}", e);
            ExitCode::from(EXIT_ERROR)
        }
    }
}

/// Run the watch command
pub fn run_watch(args: &BuildArgs, debounce_ms: Option<u32>, no_clear: bool) -> ExitCode {
    if args.dry_run {
        return run_build(args);
    }

    let extra = CliOverrides {
        debounce_ms,
        clear_screen: no_clear.then_some(false),
        ..Default::default()
    };
    let context = match load_context(args, &extra) {
        Ok(context) => context,
        Err(code) => return code,
    };

    println!("Starting watch mode...");
    if args.force {
        println!("Force mode: manifest disabled");
    }
    println!("Press Ctrl+C to stop");
    println!();

    match crate::watch::watch_project(context, args.force) {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(e) => {
            eprintln!("Watch error: {}", e);
            ExitCode::from(EXIT_ERROR)
        }
    }
}
