// ABOUTME: Generic rollout struct parameterized by state marker.
// ABOUTME: State types carry the candidate generation for compile-time guarantees.

use chrono::{DateTime, Utc};

use super::Generation;
use super::record::RolloutState;
use super::state::{Committed, Idle, InFlight, RolledBack};
use crate::types::ServiceName;
use crate::version::Version;

/// A rollout of one service in progress, parameterized by its current state.
///
/// The state type parameter `S` carries state-specific data (the candidate
/// generation) directly, so a candidate can only be touched in states where
/// one exists.
#[derive(Debug)]
pub struct Rollout<S> {
    pub(crate) service: ServiceName,
    pub(crate) target: Version,
    pub(crate) active: Option<Generation>,
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) state: S,
}

impl Rollout<Idle> {
    /// Start from the persisted state of `service` (`None` before its first rollout).
    pub fn new(service: ServiceName, target: Version, previous: Option<&RolloutState>) -> Self {
        let active = previous.and_then(|state| {
            state.active_generation_id().map(|id| Generation {
                service: service.clone(),
                id: id.clone(),
                version: state.version().cloned(),
            })
        });
        Rollout {
            service,
            target,
            active,
            started_at: Utc::now(),
            state: Idle,
        }
    }
}

impl<S> Rollout<S> {
    pub fn service(&self) -> &ServiceName {
        &self.service
    }

    /// Version being rolled out.
    pub fn target(&self) -> &Version {
        &self.target
    }

    /// Generation serving traffic before this rollout (None on first rollout).
    pub fn active(&self) -> Option<&Generation> {
        self.active.as_ref()
    }
}

impl<S: InFlight> Rollout<S> {
    pub fn candidate(&self) -> &Generation {
        self.state.candidate()
    }
}

impl Rollout<Committed> {
    /// The generation now serving traffic.
    pub fn candidate(&self) -> &Generation {
        &self.state.candidate
    }
}

impl Rollout<RolledBack> {
    pub fn reason(&self) -> &str {
        &self.state.reason
    }
}
