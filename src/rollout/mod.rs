// ABOUTME: Blue-green rollouts using the type state pattern.
// ABOUTME: Exports state markers, the Rollout struct, collaborators, and the wave controller.

mod collaborators;
mod command;
mod controller;
mod error;
mod generation;
mod machine;
mod record;
mod state;
mod transitions;

pub use collaborators::{CollaboratorError, HealthStatus, Provisioner, Router};
pub use command::{CommandProvisioner, CommandRouter, EXIT_STARTING};
pub use controller::{BlueGreenController, RolloutOutcome, ServiceReport, WaveReport};
pub use error::RolloutError;
pub use generation::{Generation, Slot};
pub use machine::Rollout;
pub use record::{InFlightPhase, Phase, RolloutJournal, RolloutState};
pub use state::{Committed, HealthChecking, Idle, InFlight, Provisioning, RolledBack, Swapping};
pub use transitions::{HealthPolicy, TransitionResult};
