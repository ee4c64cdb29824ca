// ABOUTME: Fatal upgrade errors, raised before or instead of committing a version.
// ABOUTME: Non-fatal problems travel in the UpgradeReport instead.

use thiserror::Error;

use crate::hooks::HookError;
use crate::lock::LockError;
use crate::privilege::PrivilegeError;
use crate::rollout::RolloutError;
use crate::state::StateError;
use crate::version::Version;

#[derive(Debug, Error)]
pub enum UpgradeError {
    /// Another upgrade holds the global lock.
    #[error("another upgrade is in progress: {0}")]
    LockContention(#[source] LockError),

    #[error("failed to manage upgrade lock: {0}")]
    Lock(#[source] LockError),

    #[error(transparent)]
    State(#[from] StateError),

    /// Target is older than the installed version.
    #[error("refusing to downgrade from {installed} to {target}")]
    Downgrade { installed: Version, target: Version },

    #[error(transparent)]
    Hooks(#[from] HookError),

    #[error("failed to hand the application tree to its owner: {0}")]
    Ownership(#[source] PrivilegeError),

    /// A wave could not start (lock held or unreadable state).
    #[error("rollout wave {wave} could not start: {source}")]
    Rollout {
        wave: usize,
        #[source]
        source: RolloutError,
    },
}

impl From<LockError> for UpgradeError {
    fn from(err: LockError) -> Self {
        if err.is_contention() {
            UpgradeError::LockContention(err)
        } else {
            UpgradeError::Lock(err)
        }
    }
}

impl UpgradeError {
    /// True when the upgrade did not run because something else holds a lock.
    pub fn is_lock_contention(&self) -> bool {
        match self {
            UpgradeError::LockContention(_) => true,
            UpgradeError::Rollout { source, .. } => source.is_lock_contention(),
            _ => false,
        }
    }
}
