// ABOUTME: Traits for the external systems a rollout drives.
// ABOUTME: A Provisioner runs generations; a Router decides which one receives traffic.

use async_trait::async_trait;
use thiserror::Error;

use super::Generation;
use crate::privilege::PrivilegeError;

/// What a health probe reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    /// Still booting; does not count against the retry budget.
    Starting,
    Unhealthy,
    /// Will never become healthy; roll back without further probes.
    Failed(String),
}

/// Errors reported by collaborators.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("{operation} for {generation} failed: {message}")]
    Command {
        operation: &'static str,
        generation: String,
        message: String,
    },

    #[error(transparent)]
    Privilege(#[from] PrivilegeError),
}

/// Starts, probes, and stops service generations.
#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn start_generation(&self, generation: &Generation) -> Result<(), CollaboratorError>;

    async fn health_status(&self, generation: &Generation)
    -> Result<HealthStatus, CollaboratorError>;

    async fn stop_generation(&self, generation: &Generation) -> Result<(), CollaboratorError>;
}

/// Switches live traffic for a service.
#[async_trait]
pub trait Router: Send + Sync {
    /// Point traffic for `generation.service` at `generation`. On error,
    /// traffic must still be on the previously active generation.
    async fn switch_active(&self, generation: &Generation) -> Result<(), CollaboratorError>;
}

#[async_trait]
impl<T: Provisioner + ?Sized> Provisioner for std::sync::Arc<T> {
    async fn start_generation(&self, generation: &Generation) -> Result<(), CollaboratorError> {
        (**self).start_generation(generation).await
    }

    async fn health_status(
        &self,
        generation: &Generation,
    ) -> Result<HealthStatus, CollaboratorError> {
        (**self).health_status(generation).await
    }

    async fn stop_generation(&self, generation: &Generation) -> Result<(), CollaboratorError> {
        (**self).stop_generation(generation).await
    }
}

#[async_trait]
impl<T: Router + ?Sized> Router for std::sync::Arc<T> {
    async fn switch_active(&self, generation: &Generation) -> Result<(), CollaboratorError> {
        (**self).switch_active(generation).await
    }
}
