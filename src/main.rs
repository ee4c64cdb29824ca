// ABOUTME: Entry point for the devpush CLI application.
// ABOUTME: Parses arguments, wires signal handling, and dispatches to command handlers.

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands, ConfigAction};
use devpush::abort::{self, AbortHandle};
use devpush::config::Config;
use devpush::error::Result;
use devpush::output::{Output, OutputMode};
use tokio::signal::unix::{SignalKind, signal};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // RUST_LOG takes precedence over the verbose flag
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("warn")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let mode = OutputMode::from_flags(cli.json, cli.quiet);
    let result = run(cli, mode).await;

    if let Err(e) = result {
        Output::new(mode).error(&e.to_string());
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli, mode: OutputMode) -> Result<()> {
    let config = Config::load_or_default(&cli.config)?;
    let output = Output::new(mode);

    match cli.command {
        Commands::Upgrade { target, force } => {
            let (handle, signal) = abort::channel();
            listen_for_abort(handle);
            commands::upgrade(config, &target, force, signal, output).await
        }
        Commands::Status => commands::status(config, output).await,
        Commands::Config { action } => match action {
            ConfigAction::Get { key } => commands::config_get(config, key.as_deref(), output).await,
            ConfigAction::Set { key, value } => {
                commands::config_set(config, &key, &value, output).await
            }
        },
    }
}

/// Trip the abort signal on Ctrl-C or SIGTERM. The upgrade stops at its next
/// safe point and rolls back anything not yet switched.
fn listen_for_abort(handle: AbortHandle) {
    tokio::spawn(async move {
        let terminate = async {
            match signal(SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate => {}
        }
        tracing::warn!("Abort requested, stopping at the next safe point");
        handle.abort();
    });
}
