// ABOUTME: State transition methods for blue-green rollouts.
// ABOUTME: Each method consumes self, persists the new phase, and returns the next state.

use std::time::Duration;

use super::record::{InFlightPhase, RolloutJournal, RolloutState};
use super::state::{Committed, HealthChecking, Idle, InFlight, Provisioning, RolledBack, Swapping};
use super::{Generation, HealthStatus, Provisioner, Rollout, RolloutError, Router};
use crate::abort::AbortSignal;
use crate::config::HealthcheckConfig;
use crate::diagnostics::{Diagnostics, Warning};
use crate::state::StateError;

/// Result type for transitions that may need rollback on failure.
pub type TransitionResult<T, S> = Result<Rollout<T>, (Rollout<S>, RolloutError)>;

/// How long and how often to probe a candidate.
#[derive(Debug, Clone)]
pub struct HealthPolicy {
    pub check: HealthcheckConfig,
    /// Overall budget, start period included.
    pub timeout: Duration,
}

// =============================================================================
// Internal Helpers
// =============================================================================

impl<S> Rollout<S> {
    /// Internal helper to transition to a new state.
    fn transition<T>(self, state: T) -> Rollout<T> {
        Rollout {
            service: self.service,
            target: self.target,
            active: self.active,
            started_at: self.started_at,
            state,
        }
    }

    fn in_flight_record(&self, candidate: &Generation, phase: InFlightPhase) -> RolloutState {
        RolloutState::in_flight(
            self.service.clone(),
            self.active.as_ref().map(|a| a.id.clone()),
            candidate.id.clone(),
            phase,
            self.started_at,
            self.active.as_ref().and_then(|a| a.version.clone()),
        )
    }

    /// Internal helper for rollback: stop the candidate and record the reason.
    /// The former active generation is left untouched.
    async fn discard_candidate<P: Provisioner + ?Sized>(
        self,
        candidate: &Generation,
        provisioner: &P,
        journal: &RolloutJournal,
        reason: &RolloutError,
        diagnostics: &mut Diagnostics,
    ) -> Rollout<RolledBack> {
        tracing::warn!(service = %self.service, candidate = %candidate, "Rolling back: {}", reason);

        if let Err(e) = provisioner.stop_generation(candidate).await {
            diagnostics.warn(Warning::teardown(format!(
                "failed to stop candidate {candidate}: {e}"
            )));
        }

        let record = RolloutState::idle(
            self.service.clone(),
            self.active.as_ref().map(|a| a.id.clone()),
            self.active.as_ref().and_then(|a| a.version.clone()),
            Some(reason.to_string()),
        );
        if let Err(e) = journal.save(&record).await {
            tracing::error!(service = %self.service, "failed to record rollback: {}", e);
        }

        self.transition(RolledBack {
            reason: reason.to_string(),
        })
    }
}

impl<S: InFlight> Rollout<S> {
    /// Rollback: stop the candidate, keep the active generation.
    #[must_use = "rollout state must be used"]
    pub async fn rollback<P: Provisioner + ?Sized>(
        self,
        provisioner: &P,
        journal: &RolloutJournal,
        reason: &RolloutError,
        diagnostics: &mut Diagnostics,
    ) -> Rollout<RolledBack> {
        let candidate = self.state.candidate().clone();
        self.discard_candidate(&candidate, provisioner, journal, reason, diagnostics)
            .await
    }
}

// =============================================================================
// Idle -> Provisioning
// =============================================================================

impl Rollout<Idle> {
    /// Choose the candidate generation and record the rollout as started.
    ///
    /// # Errors
    ///
    /// Returns `RolloutError::State` if the rollout cannot be recorded;
    /// nothing has been started in that case.
    #[must_use = "rollout state must be used"]
    pub async fn begin(self, journal: &RolloutJournal) -> Result<Rollout<Provisioning>, RolloutError> {
        let candidate = Generation::candidate(&self.service, &self.target, self.active.as_ref());
        journal
            .save(&self.in_flight_record(&candidate, InFlightPhase::Provisioning))
            .await?;
        tracing::info!(service = %self.service, candidate = %candidate, "Starting rollout");
        Ok(self.transition(Provisioning { candidate }))
    }
}

// =============================================================================
// Provisioning -> HealthChecking
// =============================================================================

impl Rollout<Provisioning> {
    /// Start the candidate generation.
    ///
    /// The start call always runs to completion: stopping a generation whose
    /// start is still in progress would leave it running afterwards. Abort is
    /// checked once the start has returned.
    ///
    /// # Errors
    ///
    /// Returns `(self, error)` on failure or operator abort to allow rollback.
    #[must_use = "rollout state must be used"]
    pub async fn provision<P: Provisioner + ?Sized>(
        self,
        provisioner: &P,
        journal: &RolloutJournal,
        abort: &AbortSignal,
    ) -> TransitionResult<HealthChecking, Provisioning> {
        let candidate = &self.state.candidate;

        if abort.is_aborted() {
            return Err((self, RolloutError::Aborted));
        }
        if let Err(source) = provisioner.start_generation(candidate).await {
            let generation = candidate.id.to_string();
            return Err((self, RolloutError::ProvisionFailed { generation, source }));
        }
        if abort.is_aborted() {
            tracing::info!(candidate = %candidate, "abort requested while starting, rolling back");
            return Err((self, RolloutError::Aborted));
        }

        let record = self.in_flight_record(candidate, InFlightPhase::HealthChecking);
        if let Err(e) = journal.save(&record).await {
            return Err((self, e.into()));
        }

        let candidate = self.state.candidate.clone();
        Ok(self.transition(HealthChecking { candidate }))
    }
}

// =============================================================================
// HealthChecking -> Swapping
// =============================================================================

impl Rollout<HealthChecking> {
    /// Wait for the candidate to report healthy.
    ///
    /// Waits for the start period, then probes with exponential backoff.
    /// `Starting` answers do not use up retries; `Failed` ends the check
    /// immediately. The whole check is bounded by `policy.timeout`.
    ///
    /// # Errors
    ///
    /// Returns `(self, error)` on failure, timeout, or abort to allow rollback.
    #[must_use = "rollout state must be used"]
    pub async fn health_check<P: Provisioner + ?Sized>(
        self,
        provisioner: &P,
        policy: &HealthPolicy,
        journal: &RolloutJournal,
        abort: &AbortSignal,
    ) -> TransitionResult<Swapping, HealthChecking> {
        let candidate = &self.state.candidate;

        let probe = async {
            tokio::time::timeout(policy.timeout, poll_health(provisioner, candidate, &policy.check))
                .await
                .unwrap_or(Err(RolloutError::HealthCheckTimeout(policy.timeout)))
        };
        let healthy = tokio::select! {
            biased;
            _ = abort.aborted() => Err(RolloutError::Aborted),
            result = probe => result,
        };
        if let Err(e) = healthy {
            return Err((self, e));
        }
        tracing::info!(candidate = %candidate, "candidate is healthy");

        let record = self.in_flight_record(candidate, InFlightPhase::Swapping);
        if let Err(e) = journal.save(&record).await {
            return Err((self, e.into()));
        }

        let candidate = self.state.candidate.clone();
        Ok(self.transition(Swapping { candidate }))
    }
}

async fn poll_health<P: Provisioner + ?Sized>(
    provisioner: &P,
    candidate: &Generation,
    check: &HealthcheckConfig,
) -> Result<(), RolloutError> {
    if !check.start_period.is_zero() {
        tokio::time::sleep(check.start_period).await;
    }

    let mut failures = 0u32;
    let mut attempt = 0u32;
    loop {
        let last_failure = match tokio::time::timeout(
            check.timeout,
            provisioner.health_status(candidate),
        )
        .await
        {
            Ok(Ok(HealthStatus::Healthy)) => return Ok(()),
            Ok(Ok(HealthStatus::Starting)) => None,
            Ok(Ok(HealthStatus::Failed(reason))) => {
                return Err(RolloutError::HealthCheckFailed(format!(
                    "{candidate} failed: {reason}"
                )));
            }
            Ok(Ok(HealthStatus::Unhealthy)) => Some("reported unhealthy".to_string()),
            Ok(Err(e)) => Some(format!("probe failed: {e}")),
            Err(_elapsed) => Some("probe timed out".to_string()),
        };

        if let Some(failure) = last_failure {
            failures += 1;
            tracing::debug!(candidate = %candidate, failures, "health probe: {}", failure);
            if failures > check.retries {
                return Err(RolloutError::HealthCheckFailed(format!(
                    "{candidate} {failure} after {failures} attempts"
                )));
            }
        }

        tokio::time::sleep(check.backoff(attempt)).await;
        attempt = attempt.saturating_add(1);
    }
}

// =============================================================================
// Swapping -> Committed
// =============================================================================

impl Rollout<Swapping> {
    /// Switch traffic to the candidate.
    ///
    /// # Errors
    ///
    /// Returns `(self, error)` if the router refuses; traffic is still on the
    /// former generation, so the caller rolls back.
    #[must_use = "rollout state must be used"]
    pub async fn switch<R: Router + ?Sized>(self, router: &R) -> TransitionResult<Committed, Swapping> {
        if let Err(source) = router.switch_active(&self.state.candidate).await {
            let generation = self.state.candidate.id.to_string();
            return Err((self, RolloutError::SwitchFailed { generation, source }));
        }
        tracing::info!(service = %self.service, active = %self.state.candidate, "Switched traffic");

        let candidate = self.state.candidate.clone();
        Ok(self.transition(Committed { candidate }))
    }
}

// =============================================================================
// Committed - Terminal State
// =============================================================================

impl Rollout<Committed> {
    /// Drain and stop the former generation, then record the candidate as active.
    ///
    /// A former generation that cannot be stopped is a warning only; traffic
    /// has already moved.
    ///
    /// # Errors
    ///
    /// Returns `StateError` if the committed state cannot be recorded.
    pub async fn finalize<P: Provisioner + ?Sized>(
        self,
        provisioner: &P,
        grace_period: std::time::Duration,
        journal: &RolloutJournal,
        diagnostics: &mut Diagnostics,
    ) -> Result<Generation, StateError> {
        if let Some(former) = &self.active {
            if !grace_period.is_zero() {
                tokio::time::sleep(grace_period).await;
            }
            if let Err(e) = provisioner.stop_generation(former).await {
                diagnostics.warn(Warning::teardown(format!(
                    "failed to stop former generation {former}: {e}"
                )));
            }
        }

        let candidate = self.state.candidate;
        journal
            .save(&RolloutState::committed(
                self.service,
                candidate.id.clone(),
                self.target,
                self.started_at,
            ))
            .await?;
        Ok(candidate)
    }
}
