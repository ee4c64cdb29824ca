// ABOUTME: Drives blue-green rollouts of service waves under per-service locks.
// ABOUTME: Wave members are checked concurrently and swapped only once all are healthy.

use futures::future::join_all;
use nonempty::NonEmpty;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use super::record::{RolloutJournal, RolloutState};
use super::state::{Committed, Provisioning, RolledBack, Swapping};
use super::transitions::HealthPolicy;
use super::{Provisioner, Rollout, RolloutError, Router};
use crate::abort::AbortSignal;
use crate::diagnostics::{Diagnostics, Warning};
use crate::lock::{HeldLock, LockManager, LockScope};
use crate::state::{StateError, StateStore};
use crate::types::ServiceName;
use crate::version::Version;

/// Final result of one service's rollout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RolloutOutcome {
    Committed {
        generation: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        previous: Option<String>,
    },
    RolledBack {
        reason: String,
    },
    /// Traffic moved but the committed state could not be recorded.
    Failed {
        reason: String,
    },
}

impl std::fmt::Display for RolloutOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RolloutOutcome::Committed { generation, .. } => write!(f, "committed {generation}"),
            RolloutOutcome::RolledBack { reason } => write!(f, "rolled back ({reason})"),
            RolloutOutcome::Failed { reason } => write!(f, "failed ({reason})"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceReport {
    pub service: ServiceName,
    #[serde(flatten)]
    pub outcome: RolloutOutcome,
}

impl ServiceReport {
    pub fn is_committed(&self) -> bool {
        matches!(self.outcome, RolloutOutcome::Committed { .. })
    }
}

/// Outcome of a wave.
#[derive(Debug, Clone, Serialize)]
pub struct WaveReport {
    pub services: Vec<ServiceReport>,
    /// Operator abort caused the rollback.
    pub aborted: bool,
}

impl WaveReport {
    /// True when every member committed.
    pub fn committed(&self) -> bool {
        self.services.iter().all(ServiceReport::is_committed)
    }
}

/// Runs rollouts against a provisioner and router.
pub struct BlueGreenController<P, R> {
    provisioner: P,
    router: R,
    journal: RolloutJournal,
    locks: LockManager,
    policy: HealthPolicy,
    grace_period: Duration,
}

impl<P: Provisioner, R: Router> BlueGreenController<P, R> {
    pub fn new(
        provisioner: P,
        router: R,
        store: Arc<StateStore>,
        locks: LockManager,
        policy: HealthPolicy,
        grace_period: Duration,
    ) -> Self {
        Self {
            provisioner,
            router,
            journal: RolloutJournal::new(store),
            locks,
            policy,
            grace_period,
        }
    }

    /// Persisted rollout state of `service`.
    pub async fn state(&self, service: &ServiceName) -> Result<Option<RolloutState>, StateError> {
        self.journal.load(service).await
    }

    /// Roll out a single service.
    pub async fn rollout(
        &self,
        service: &ServiceName,
        version: &Version,
        abort: &AbortSignal,
        diagnostics: &mut Diagnostics,
    ) -> Result<ServiceReport, RolloutError> {
        let wave = NonEmpty::new(service.clone());
        let mut report = self.rollout_wave(&wave, version, abort, diagnostics).await?;
        Ok(report.services.remove(0))
    }

    /// Roll out every member of a wave to `version`.
    ///
    /// Fails without touching anything if a member's lock is held or its state
    /// cannot be read. Once started, failures are reported per service in the
    /// returned report: if any member fails before the swap, all members roll
    /// back; no member's traffic moves until every member is healthy. If a
    /// switch is refused, that member and the ones not yet switched roll back,
    /// while members already switched are finalized on the new generation.
    pub async fn rollout_wave(
        &self,
        services: &NonEmpty<ServiceName>,
        version: &Version,
        abort: &AbortSignal,
        diagnostics: &mut Diagnostics,
    ) -> Result<WaveReport, RolloutError> {
        let locks = self.acquire_all(services).await?;
        let result = self.run_wave(services, version, abort, diagnostics).await;
        for lock in locks {
            let scope = lock.scope().to_string();
            if let Err(e) = lock.release().await {
                diagnostics.warn(Warning::lock_release(format!(
                    "failed to release {scope} lock: {e}"
                )));
            }
        }
        result
    }

    async fn acquire_all(&self, services: &NonEmpty<ServiceName>) -> Result<Vec<HeldLock>, RolloutError> {
        let mut held = Vec::with_capacity(services.len());
        for service in services.iter() {
            match self
                .locks
                .acquire(LockScope::Rollout(service.clone()), false)
                .await
            {
                Ok(lock) => held.push(lock),
                Err(e) => {
                    for lock in held {
                        if let Err(release) = lock.release().await {
                            tracing::warn!("Failed to release lock: {}", release);
                        }
                    }
                    return Err(e.into());
                }
            }
        }
        Ok(held)
    }

    async fn run_wave(
        &self,
        services: &NonEmpty<ServiceName>,
        version: &Version,
        abort: &AbortSignal,
        diagnostics: &mut Diagnostics,
    ) -> Result<WaveReport, RolloutError> {
        // Read everything before the first write.
        let mut idle = Vec::with_capacity(services.len());
        for service in services.iter() {
            let previous = self.journal.load(service).await?;
            if let Some(state) = previous.as_ref().filter(|s| s.phase().is_in_flight()) {
                tracing::warn!(
                    service = %service,
                    phase = %state.phase(),
                    "previous rollout did not finish, starting over"
                );
            }
            idle.push(Rollout::new(service.clone(), version.clone(), previous.as_ref()));
        }

        let mut provisioning = Vec::with_capacity(idle.len());
        for rollout in idle {
            let failed = rollout.service().clone();
            match rollout.begin(&self.journal).await {
                Ok(started) => provisioning.push(started),
                Err(e) => {
                    let rolled_back = self
                        .rollback_all(provisioning, &failed, diagnostics)
                        .await;
                    return Ok(self.wave_failed(services, rolled_back, Some((failed, e)), false));
                }
            }
        }

        // Provision and health-check all members concurrently.
        let prepared = join_all(
            provisioning
                .into_iter()
                .map(|rollout| self.prepare(rollout, abort)),
        )
        .await;

        let mut ready = Vec::new();
        let mut rolled_back = Vec::new();
        let mut first_failure: Option<(ServiceName, RolloutError)> = None;
        for (result, member_diagnostics) in prepared {
            diagnostics.absorb(member_diagnostics);
            match result {
                Ok(swapping) => ready.push(swapping),
                Err((rollout, e)) => {
                    if first_failure.is_none() {
                        first_failure = Some((rollout.service().clone(), e));
                    }
                    rolled_back.push(rollout);
                }
            }
        }

        // Abort is honored up to this barrier, never once swapping has begun.
        let aborted =
            abort.is_aborted() || first_failure.as_ref().is_some_and(|(_, e)| e.is_abort());
        if aborted || first_failure.is_some() {
            let reason = match first_failure {
                Some((failed, _)) if !aborted => RolloutError::SiblingFailed(failed),
                _ => RolloutError::Aborted,
            };
            for rollout in ready {
                rolled_back.push(
                    rollout
                        .rollback(&self.provisioner, &self.journal, &reason, diagnostics)
                        .await,
                );
            }
            return Ok(self.wave_failed(services, rolled_back, None, aborted));
        }

        // Every member is healthy: swap one by one.
        let mut switched: Vec<Rollout<Committed>> = Vec::with_capacity(ready.len());
        let mut pending = ready.into_iter();
        while let Some(rollout) = pending.next() {
            match rollout.switch(&self.router).await {
                Ok(committed) => switched.push(committed),
                Err((rollout, e)) => {
                    let failed = rollout.service().clone();
                    let mut rolled_back = vec![
                        rollout
                            .rollback(&self.provisioner, &self.journal, &e, diagnostics)
                            .await,
                    ];
                    let reason = RolloutError::SiblingFailed(failed);
                    for rollout in pending {
                        rolled_back.push(
                            rollout
                                .rollback(&self.provisioner, &self.journal, &reason, diagnostics)
                                .await,
                        );
                    }
                    // Traffic already moved for these members; they only go forward.
                    let mut report = self.wave_failed(services, rolled_back, None, false);
                    for (service, outcome) in self.finalize_all(switched, diagnostics).await {
                        set_outcome(&mut report, &service, outcome);
                    }
                    return Ok(report);
                }
            }
        }

        let mut report = WaveReport {
            services: Vec::with_capacity(services.len()),
            aborted: false,
        };
        for (service, outcome) in self.finalize_all(switched, diagnostics).await {
            report.services.push(ServiceReport { service, outcome });
        }
        Ok(report)
    }

    /// Provision and health-check one member, rolling it back on failure.
    async fn prepare(
        &self,
        rollout: Rollout<Provisioning>,
        abort: &AbortSignal,
    ) -> (
        Result<Rollout<Swapping>, (Rollout<RolledBack>, RolloutError)>,
        Diagnostics,
    ) {
        let mut diagnostics = Diagnostics::default();

        let checking = match rollout.provision(&self.provisioner, &self.journal, abort).await {
            Ok(checking) => checking,
            Err((rollout, e)) => {
                let rolled_back = rollout
                    .rollback(&self.provisioner, &self.journal, &e, &mut diagnostics)
                    .await;
                return (Err((rolled_back, e)), diagnostics);
            }
        };

        let result = match checking
            .health_check(&self.provisioner, &self.policy, &self.journal, abort)
            .await
        {
            Ok(swapping) => Ok(swapping),
            Err((rollout, e)) => {
                let rolled_back = rollout
                    .rollback(&self.provisioner, &self.journal, &e, &mut diagnostics)
                    .await;
                Err((rolled_back, e))
            }
        };
        (result, diagnostics)
    }

    async fn rollback_all(
        &self,
        rollouts: Vec<Rollout<Provisioning>>,
        failed: &ServiceName,
        diagnostics: &mut Diagnostics,
    ) -> Vec<Rollout<RolledBack>> {
        let reason = RolloutError::SiblingFailed(failed.clone());
        let mut rolled_back = Vec::with_capacity(rollouts.len());
        for rollout in rollouts {
            rolled_back.push(
                rollout
                    .rollback(&self.provisioner, &self.journal, &reason, diagnostics)
                    .await,
            );
        }
        rolled_back
    }

    async fn finalize_all(
        &self,
        rollouts: Vec<Rollout<Committed>>,
        diagnostics: &mut Diagnostics,
    ) -> Vec<(ServiceName, RolloutOutcome)> {
        let finalized = join_all(rollouts.into_iter().map(|rollout| async move {
            let mut member_diagnostics = Diagnostics::default();
            let service = rollout.service().clone();
            let previous = rollout.active().map(|a| a.id.to_string());
            let outcome = match rollout
                .finalize(
                    &self.provisioner,
                    self.grace_period,
                    &self.journal,
                    &mut member_diagnostics,
                )
                .await
            {
                Ok(active) => RolloutOutcome::Committed {
                    generation: active.id.to_string(),
                    previous,
                },
                Err(e) => {
                    tracing::error!(service = %service, "failed to record committed rollout: {}", e);
                    RolloutOutcome::Failed {
                        reason: e.to_string(),
                    }
                }
            };
            (service, outcome, member_diagnostics)
        }))
        .await;

        finalized
            .into_iter()
            .map(|(service, outcome, member_diagnostics)| {
                diagnostics.absorb(member_diagnostics);
                (service, outcome)
            })
            .collect()
    }

    fn wave_failed(
        &self,
        services: &NonEmpty<ServiceName>,
        rolled_back: Vec<Rollout<RolledBack>>,
        failed_to_start: Option<(ServiceName, RolloutError)>,
        aborted: bool,
    ) -> WaveReport {
        let mut report = WaveReport {
            services: Vec::with_capacity(services.len()),
            aborted,
        };
        for service in services.iter() {
            let outcome = rolled_back
                .iter()
                .find(|r| r.service() == service)
                .map(|r| RolloutOutcome::RolledBack {
                    reason: r.reason().to_string(),
                })
                .or_else(|| {
                    failed_to_start
                        .as_ref()
                        .filter(|(failed, _)| failed == service)
                        .map(|(_, e)| RolloutOutcome::RolledBack {
                            reason: e.to_string(),
                        })
                })
                .unwrap_or_else(|| RolloutOutcome::RolledBack {
                    reason: "not started because another wave member failed".to_string(),
                });
            report.services.push(ServiceReport {
                service: service.clone(),
                outcome,
            });
        }
        report
    }
}

fn set_outcome(report: &mut WaveReport, service: &ServiceName, outcome: RolloutOutcome) {
    if let Some(entry) = report.services.iter_mut().find(|s| &s.service == service) {
        entry.outcome = outcome;
    }
}
