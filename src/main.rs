//! srcpipe - Command-line tool for transforming and watching source trees

use std::process::ExitCode;

use clap::Parser;
use srcpipe::cli::{self, Cli};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Diagnostics go to stderr; reports are printed on stdout by the commands.
    let filter = if cli.verbose() {
        EnvFilter::new("srcpipe=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("srcpipe=warn"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    cli::run(cli)
}
