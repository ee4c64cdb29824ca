// ABOUTME: Upgrade orchestration: resolve versions, run hooks, roll out waves, commit.
// ABOUTME: The installed version only advances after every wave committed.

mod error;
mod report;

pub use error::UpgradeError;
pub use report::{HookSummary, UpgradeOutcome, UpgradeReport};

use nonempty::NonEmpty;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use crate::abort::AbortSignal;
use crate::config::Config;
use crate::diagnostics::Diagnostics;
use crate::hooks::{HookContext, HookRegistry, UpgradeExecutor};
use crate::lock::{LockInfo, LockManager, LockScope};
use crate::privilege::PrivilegeGate;
use crate::rollout::{BlueGreenController, HealthPolicy, Provisioner, Router, RolloutState};
use crate::state::{StateError, StateStore};
use crate::types::ServiceName;
use crate::version::Version;

/// Options for one upgrade run.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpgradeOptions {
    /// Break an existing upgrade lock.
    pub force: bool,
}

/// Snapshot of the installation for `devpush status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub installed_version: Option<Version>,
    pub services: Vec<ServiceStatus>,
    pub upgrade_lock: Option<LockInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub service: ServiceName,
    pub state: Option<RolloutState>,
}

/// Advances an installation from its installed version to a target.
pub struct UpgradeOrchestrator<P, R> {
    store: Arc<StateStore>,
    gate: Arc<dyn PrivilegeGate>,
    locks: LockManager,
    registry: HookRegistry,
    executor: UpgradeExecutor,
    controller: BlueGreenController<P, R>,
    waves: NonEmpty<NonEmpty<ServiceName>>,
    data_dir: PathBuf,
    app_dir: PathBuf,
    enforce_app_ownership: bool,
}

impl<P: Provisioner, R: Router> UpgradeOrchestrator<P, R> {
    /// Wire an orchestrator from configuration.
    pub fn new(config: &Config, gate: Arc<dyn PrivilegeGate>, provisioner: P, router: R) -> Self {
        let store = Arc::new(StateStore::new(Arc::clone(&gate), &config.data_dir));
        let locks = LockManager::new(
            Arc::clone(&gate),
            config.lock_dir(),
            config.locks.stale_after,
        );
        let policy = HealthPolicy {
            check: config.healthcheck.clone(),
            timeout: config.health_timeout,
        };
        let controller = BlueGreenController::new(
            provisioner,
            router,
            Arc::clone(&store),
            locks.clone(),
            policy,
            config.drain.grace_period,
        );

        Self {
            store,
            executor: UpgradeExecutor::new(Arc::clone(&gate)),
            gate,
            locks,
            registry: HookRegistry::new(config.hooks_dir()),
            controller,
            waves: config.rollout.waves.clone(),
            data_dir: config.data_dir.clone(),
            app_dir: config.app_dir.clone(),
            enforce_app_ownership: config.privilege.enforce_app_ownership,
        }
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// Upgrade to `target` under the global upgrade lock.
    ///
    /// # Errors
    ///
    /// Fails fast with `LockContention` if another upgrade is running.
    /// State, privilege, and downgrade errors are fatal and leave every
    /// persisted document as it was. Hook failures and rollbacks are not
    /// errors: they are reported in the returned `UpgradeReport`.
    pub async fn upgrade(
        &self,
        target: &Version,
        options: &UpgradeOptions,
        abort: &AbortSignal,
    ) -> Result<UpgradeReport, UpgradeError> {
        self.locks
            .with_lock(
                LockScope::Upgrade,
                options.force,
                self.run(target, abort),
            )
            .await
    }

    async fn run(&self, target: &Version, abort: &AbortSignal) -> Result<UpgradeReport, UpgradeError> {
        let mut diagnostics = Diagnostics::default();

        let installed = self.store.installed_version().await?;
        if target < &installed {
            return Err(UpgradeError::Downgrade {
                installed,
                target: target.clone(),
            });
        }
        tracing::info!(from = %installed, to = %target, "Starting upgrade");

        let hooks = self
            .registry
            .applicable_hooks(&installed, target, &mut diagnostics)?;
        let context = HookContext {
            from: installed.clone(),
            to: target.clone(),
            data_dir: self.data_dir.clone(),
            app_dir: self.app_dir.clone(),
        };
        let execution = self
            .executor
            .run(&hooks, &context, abort, &mut diagnostics)
            .await?;
        let hook_failures = execution.has_failures();

        let mut report = UpgradeReport {
            outcome: UpgradeOutcome::Aborted,
            from_version: installed.clone(),
            target_version: target.clone(),
            installed_version: installed,
            hooks: execution.into(),
            waves: Vec::new(),
            warnings: Vec::new(),
        };

        if report.hooks.skipped > 0 || abort.is_aborted() {
            tracing::warn!("Upgrade aborted by operator before rollout");
            report.warnings = diagnostics.into_warnings();
            return Ok(report);
        }

        if self.enforce_app_ownership {
            self.gate
                .ensure_app_ownership(&self.app_dir)
                .await
                .map_err(UpgradeError::Ownership)?;
        }

        for (index, wave) in self.waves.iter().enumerate() {
            if abort.is_aborted() {
                tracing::warn!(wave = index + 1, "Upgrade aborted by operator between waves");
                report.warnings = diagnostics.into_warnings();
                return Ok(report);
            }
            let wave_report = self
                .controller
                .rollout_wave(wave, target, abort, &mut diagnostics)
                .await
                .map_err(|source| UpgradeError::Rollout {
                    wave: index + 1,
                    source,
                })?;
            let committed = wave_report.committed();
            let aborted = wave_report.aborted;
            report.waves.push(wave_report);

            if !committed {
                report.outcome = if aborted {
                    UpgradeOutcome::Aborted
                } else {
                    UpgradeOutcome::RolledBack
                };
                tracing::warn!(wave = index + 1, "Rollout did not commit, keeping installed version");
                report.warnings = diagnostics.into_warnings();
                return Ok(report);
            }
        }

        self.store.commit_version(target).await?;
        report.installed_version = target.normalized();
        report.outcome = if hook_failures {
            UpgradeOutcome::CommittedWithHookFailures
        } else {
            UpgradeOutcome::Clean
        };
        report.warnings = diagnostics.into_warnings();
        tracing::info!(version = %report.installed_version, "Upgrade complete");
        Ok(report)
    }

    /// Installed version, rollout state per configured service, and the upgrade lock holder.
    pub async fn status(&self) -> Result<StatusReport, UpgradeError> {
        let installed_version = match self.store.installed_version().await {
            Ok(version) => Some(version),
            Err(StateError::NotFound(_)) => None,
            Err(e) => return Err(e.into()),
        };

        let mut services = Vec::new();
        for service in self.waves.iter().flat_map(|wave| wave.iter()) {
            services.push(ServiceStatus {
                service: service.clone(),
                state: self.controller.state(service).await?,
            });
        }

        let upgrade_lock = self.locks.holder(&LockScope::Upgrade).await?;

        Ok(StatusReport {
            installed_version,
            services,
            upgrade_lock,
        })
    }
}
