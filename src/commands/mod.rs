// ABOUTME: Command module aggregator for the devpush CLI.
// ABOUTME: Re-exports upgrade, status, and config command handlers.

mod config;
mod status;
mod upgrade;

pub use config::{config_get, config_set};
pub use status::status;
pub use upgrade::upgrade;

use devpush::config::Config;
use devpush::privilege::PrivilegeGate;
use devpush::rollout::{CommandProvisioner, CommandRouter};
use devpush::upgrade::UpgradeOrchestrator;
use std::sync::Arc;

/// The orchestrator used by the CLI: configured shell commands behind the privilege gate.
fn orchestrator(config: &Config) -> UpgradeOrchestrator<CommandProvisioner, CommandRouter> {
    let gate: Arc<dyn PrivilegeGate> = Arc::new(config.privilege.gate(config.app_owner));
    let provisioner = CommandProvisioner::new(
        Arc::clone(&gate),
        config.provisioner.clone(),
        config.data_dir.clone(),
        config.app_dir.clone(),
    );
    let router = CommandRouter::new(
        Arc::clone(&gate),
        config.router.clone(),
        config.data_dir.clone(),
        config.app_dir.clone(),
    );
    UpgradeOrchestrator::new(config, gate, provisioner, router)
}
