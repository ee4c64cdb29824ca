// ABOUTME: Error types for rollout operations.
// ABOUTME: Covers provisioning, health check, traffic switch, lock, and state failures.

use std::time::Duration;

use super::CollaboratorError;
use crate::lock::LockError;
use crate::state::StateError;
use crate::types::ServiceName;

/// Errors that can occur during rollout state transitions.
#[derive(Debug, thiserror::Error)]
pub enum RolloutError {
    /// Starting the candidate failed.
    #[error("failed to provision {generation}: {source}")]
    ProvisionFailed {
        generation: String,
        #[source]
        source: CollaboratorError,
    },

    /// Candidate reported unhealthy after retries were exhausted, or failed outright.
    #[error("health check failed: {0}")]
    HealthCheckFailed(String),

    /// Candidate did not become healthy within the overall budget.
    #[error("health check timed out after {}s", .0.as_secs())]
    HealthCheckTimeout(Duration),

    /// Operator aborted before traffic was switched.
    #[error("rollout aborted by operator")]
    Aborted,

    /// The router refused the switch; traffic stays on the former generation.
    #[error("failed to switch traffic to {generation}: {source}")]
    SwitchFailed {
        generation: String,
        #[source]
        source: CollaboratorError,
    },

    /// Another member of the same wave failed.
    #[error("rolled back because {0} in the same wave failed")]
    SiblingFailed(ServiceName),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    State(#[from] StateError),
}

impl RolloutError {
    pub fn is_abort(&self) -> bool {
        matches!(self, RolloutError::Aborted)
    }

    /// Another rollout of the same service holds its lock.
    pub fn is_lock_contention(&self) -> bool {
        matches!(self, RolloutError::Lock(e) if e.is_contention())
    }
}
