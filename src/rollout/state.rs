// ABOUTME: Rollout state marker types for the type state pattern.
// ABOUTME: In-flight markers carry the candidate generation, so it exists exactly when it must.

use super::Generation;
use super::record::InFlightPhase;

/// No rollout in flight.
/// Available actions: `begin()`
#[derive(Debug, Clone, Copy, Default)]
pub struct Idle;

/// Candidate chosen and recorded, not yet started.
/// Available actions: `provision()`, `rollback()`
#[derive(Debug, Clone)]
pub struct Provisioning {
    pub(crate) candidate: Generation,
}

/// Candidate started, waiting for it to become healthy.
/// Available actions: `health_check()`, `rollback()`
#[derive(Debug, Clone)]
pub struct HealthChecking {
    pub(crate) candidate: Generation,
}

/// Candidate healthy, traffic not yet switched.
/// Available actions: `switch()`, `rollback()`
#[derive(Debug, Clone)]
pub struct Swapping {
    pub(crate) candidate: Generation,
}

/// Traffic switched to the candidate.
/// Available actions: `finalize()`
#[derive(Debug, Clone)]
pub struct Committed {
    pub(crate) candidate: Generation,
}

/// Candidate stopped, former active generation untouched.
/// Available actions: `reason()`
#[derive(Debug, Clone)]
pub struct RolledBack {
    pub(crate) reason: String,
}

/// States in which a candidate exists but does not serve traffic.
pub trait InFlight {
    const PHASE: InFlightPhase;

    fn candidate(&self) -> &Generation;
}

impl InFlight for Provisioning {
    const PHASE: InFlightPhase = InFlightPhase::Provisioning;

    fn candidate(&self) -> &Generation {
        &self.candidate
    }
}

impl InFlight for HealthChecking {
    const PHASE: InFlightPhase = InFlightPhase::HealthChecking;

    fn candidate(&self) -> &Generation {
        &self.candidate
    }
}

impl InFlight for Swapping {
    const PHASE: InFlightPhase = InFlightPhase::Swapping;

    fn candidate(&self) -> &Generation {
        &self.candidate
    }
}
