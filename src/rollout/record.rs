// ABOUTME: Persisted per-service rollout state and its journal in rollout.json.
// ABOUTME: A candidate generation is present exactly while a rollout is in flight.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::state::{ROLLOUT_FILE, StateError, StateStore};
use crate::types::{GenerationId, ServiceName};
use crate::version::Version;

/// Rollout phase as persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Provisioning,
    HealthChecking,
    Swapping,
    Committed,
    RolledBack,
}

impl Phase {
    /// Phases that carry a candidate generation.
    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            Phase::Provisioning | Phase::HealthChecking | Phase::Swapping
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Provisioning => "provisioning",
            Phase::HealthChecking => "health_checking",
            Phase::Swapping => "swapping",
            Phase::Committed => "committed",
            Phase::RolledBack => "rolled_back",
        };
        f.write_str(name)
    }
}

/// Persisted state of one service.
///
/// Fields are private: the constructors are the only way to build one, and
/// deserialization goes through the same check, so `candidate_generation_id`
/// is set if and only if the phase is in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawRolloutState")]
pub struct RolloutState {
    service: ServiceName,
    active_generation_id: Option<GenerationId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    candidate_generation_id: Option<GenerationId>,
    phase: Phase,
    started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_error: Option<String>,
    /// Version of the active generation.
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<Version>,
}

#[derive(Deserialize)]
struct RawRolloutState {
    service: ServiceName,
    #[serde(default)]
    active_generation_id: Option<GenerationId>,
    #[serde(default)]
    candidate_generation_id: Option<GenerationId>,
    phase: Phase,
    started_at: DateTime<Utc>,
    #[serde(default)]
    last_error: Option<String>,
    #[serde(default)]
    version: Option<Version>,
}

impl TryFrom<RawRolloutState> for RolloutState {
    type Error = String;

    fn try_from(raw: RawRolloutState) -> Result<Self, Self::Error> {
        if raw.phase.is_in_flight() != raw.candidate_generation_id.is_some() {
            return Err(format!(
                "phase {} {} a candidate generation",
                raw.phase,
                if raw.phase.is_in_flight() {
                    "requires"
                } else {
                    "must not have"
                }
            ));
        }
        Ok(Self {
            service: raw.service,
            active_generation_id: raw.active_generation_id,
            candidate_generation_id: raw.candidate_generation_id,
            phase: raw.phase,
            started_at: raw.started_at,
            last_error: raw.last_error,
            version: raw.version,
        })
    }
}

/// In-flight phases accepted by [`RolloutState::in_flight`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InFlightPhase {
    Provisioning,
    HealthChecking,
    Swapping,
}

impl From<InFlightPhase> for Phase {
    fn from(phase: InFlightPhase) -> Self {
        match phase {
            InFlightPhase::Provisioning => Phase::Provisioning,
            InFlightPhase::HealthChecking => Phase::HealthChecking,
            InFlightPhase::Swapping => Phase::Swapping,
        }
    }
}

impl RolloutState {
    /// No rollout in flight. `last_error` records why the previous one rolled back.
    pub fn idle(
        service: ServiceName,
        active: Option<GenerationId>,
        version: Option<Version>,
        last_error: Option<String>,
    ) -> Self {
        Self {
            service,
            active_generation_id: active,
            candidate_generation_id: None,
            phase: Phase::Idle,
            started_at: Utc::now(),
            last_error,
            version,
        }
    }

    /// A rollout towards `candidate` is underway.
    pub fn in_flight(
        service: ServiceName,
        active: Option<GenerationId>,
        candidate: GenerationId,
        phase: InFlightPhase,
        started_at: DateTime<Utc>,
        version: Option<Version>,
    ) -> Self {
        Self {
            service,
            active_generation_id: active,
            candidate_generation_id: Some(candidate),
            phase: phase.into(),
            started_at,
            last_error: None,
            version,
        }
    }

    /// `active` now serves traffic at `version`.
    pub fn committed(
        service: ServiceName,
        active: GenerationId,
        version: Version,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            service,
            active_generation_id: Some(active),
            candidate_generation_id: None,
            phase: Phase::Committed,
            started_at,
            last_error: None,
            version: Some(version),
        }
    }

    pub fn service(&self) -> &ServiceName {
        &self.service
    }

    /// `None` only before the service's first committed rollout.
    pub fn active_generation_id(&self) -> Option<&GenerationId> {
        self.active_generation_id.as_ref()
    }

    pub fn candidate_generation_id(&self) -> Option<&GenerationId> {
        self.candidate_generation_id.as_ref()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn version(&self) -> Option<&Version> {
        self.version.as_ref()
    }
}

/// Reads and writes [`RolloutState`] entries of `rollout.json`.
#[derive(Debug, Clone)]
pub struct RolloutJournal {
    store: Arc<StateStore>,
}

impl RolloutJournal {
    pub fn new(store: Arc<StateStore>) -> Self {
        Self { store }
    }

    pub async fn load(&self, service: &ServiceName) -> Result<Option<RolloutState>, StateError> {
        let path = self.store.path(ROLLOUT_FILE);
        self.store.read_entry(&path, service.as_str()).await
    }

    pub async fn save(&self, state: &RolloutState) -> Result<(), StateError> {
        let path = self.store.path(ROLLOUT_FILE);
        self.store
            .merge_entry(&path, state.service().as_str(), state)
            .await?;
        tracing::debug!(service = %state.service(), phase = %state.phase(), "persisted rollout state");
        Ok(())
    }
}
