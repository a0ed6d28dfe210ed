mod cli;
mod commands;
mod context;
mod output;

use clap::Parser;
use cli::{Cli, Command};
use libhoard_core::HoardError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_logging(cli: &Cli) {
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("HOARD_LOG").unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli);

    let result = match &cli.command {
        Command::Init { bucket, prefix, algorithm } => {
            commands::init::run(&cli, bucket, prefix.clone(), algorithm)
        }
        Command::Track { paths, modified } => commands::track::run(&cli, paths, *modified),
        Command::Checkout { paths, all } => commands::checkout::run(&cli, paths, *all),
        Command::Ls { paths, all, long } => commands::ls::run(&cli, paths, *all, *long),
        Command::Remove { paths, purge } => commands::remove::run(&cli, paths, *purge),
        Command::Cleanup { force } => commands::cleanup::run(&cli, *force),
    };

    if let Err(e) = result {
        // Reports already carry their failure in the JSON envelope
        let reported = cli.json && matches!(e, HoardError::PartialFailure { .. });
        if !reported {
            output::output_error(&cli, &e);
        }
        std::process::exit(e.exit_code());
    }
}
