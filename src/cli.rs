// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Defines all subcommands and their arguments.

use clap::{Parser, Subcommand};
use devpush::config::DEFAULT_CONFIG_PATH;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "devpush")]
#[command(about = "Versioned upgrades with blue-green rollouts for a self-hosted devpush install")]
#[command(version)]
pub struct Cli {
    /// Orchestrator settings file (defaults are used when it does not exist)
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print only final results
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Upgrade the installation to a target version
    Upgrade {
        /// Version to upgrade to (e.g. 1.4.0 or v1.4.0-rc.1)
        #[arg(short, long)]
        target: String,

        /// Break an existing upgrade lock
        #[arg(long)]
        force: bool,
    },

    /// Show installed version, rollout state, and lock holder
    Status,

    /// Read or update the persisted configuration document
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the whole document, or a single key
    Get { key: Option<String> },

    /// Set a key; the value is parsed as JSON, falling back to a string
    Set { key: String, value: String },
}
