// ABOUTME: Status command implementation.
// ABOUTME: Prints the installed version, rollout state per service, and the upgrade lock holder.

use devpush::config::Config;
use devpush::error::Result;
use devpush::output::Output;

pub async fn status(config: Config, output: Output) -> Result<()> {
    let status = super::orchestrator(&config).status().await?;
    output.document(&status);

    match &status.installed_version {
        Some(version) => output.line(&format!("Installed version: {version}")),
        None => output.line("Installed version: unknown (no version.json)"),
    }

    for service in &status.services {
        match &service.state {
            Some(state) => {
                let active = state
                    .active_generation_id()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "none".to_string());
                let mut line = format!("  {}: {} (active: {active})", service.service, state.phase());
                if let Some(candidate) = state.candidate_generation_id() {
                    line.push_str(&format!(", candidate: {candidate}"));
                }
                if let Some(error) = state.last_error() {
                    line.push_str(&format!(", last error: {error}"));
                }
                output.line(&line);
            }
            None => output.line(&format!("  {}: never rolled out", service.service)),
        }
    }

    match &status.upgrade_lock {
        Some(lock) => output.line(&format!(
            "Upgrade in progress: {} (pid {}) since {}",
            lock.holder, lock.pid, lock.started_at
        )),
        None => output.line("No upgrade in progress"),
    }
    Ok(())
}
