// ABOUTME: Upgrade command implementation.
// ABOUTME: Runs the orchestrator and turns its report into output and an exit status.

use devpush::abort::AbortSignal;
use devpush::config::Config;
use devpush::error::{Error, Result};
use devpush::output::Output;
use devpush::upgrade::{UpgradeOptions, UpgradeOutcome};
use devpush::version::Version;

/// Upgrade the installation to `target`.
pub async fn upgrade(
    config: Config,
    target: &str,
    force: bool,
    abort: AbortSignal,
    mut output: Output,
) -> Result<()> {
    let target = Version::parse(target)?;
    output.start_timer();

    let orchestrator = super::orchestrator(&config);
    output.progress(&format!("Upgrading to {target}"));
    let report = orchestrator
        .upgrade(&target, &UpgradeOptions { force }, &abort)
        .await?;

    output.progress(&format!(
        "  → Hooks: {} attempted, {} succeeded, {} failed, {} skipped",
        report.hooks.attempted, report.hooks.succeeded, report.hooks.failed, report.hooks.skipped
    ));
    for (index, wave) in report.waves.iter().enumerate() {
        for service in &wave.services {
            output.progress(&format!(
                "  → Wave {}: {} {}",
                index + 1,
                service.service,
                service.outcome
            ));
        }
    }

    for warning in &report.warnings {
        output.warning(&warning.message);
    }
    output.document(&report);

    match report.outcome {
        UpgradeOutcome::Clean => {
            output.success(&format!("Upgraded {} → {}", report.from_version, report.installed_version));
            Ok(())
        }
        UpgradeOutcome::CommittedWithHookFailures => {
            output.success(&format!(
                "Upgraded {} → {} with {} failed hook(s)",
                report.from_version, report.installed_version, report.hooks.failed
            ));
            Ok(())
        }
        UpgradeOutcome::RolledBack => Err(Error::RolledBack),
        UpgradeOutcome::Aborted => Err(Error::Aborted),
    }
}
