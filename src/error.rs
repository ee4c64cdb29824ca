// ABOUTME: Application-wide error type for the devpush CLI.
// ABOUTME: Wraps module errors and maps them to process exit codes.

use thiserror::Error;

use crate::lock::LockError;
use crate::state::StateError;
use crate::upgrade::UpgradeError;
use crate::version::MalformedVersionError;

/// Exit code for fatal errors without a more specific code.
pub const EXIT_FAILURE: i32 = 1;
/// Exit code when another upgrade holds a lock.
pub const EXIT_LOCK_CONTENTION: i32 = 3;
/// Exit code when a rollout rolled back.
pub const EXIT_ROLLED_BACK: i32 = 4;
/// Exit code when the operator aborted the upgrade.
pub const EXIT_ABORTED: i32 = 5;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Version(#[from] MalformedVersionError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Upgrade(#[from] UpgradeError),

    /// The upgrade ran but a wave rolled back.
    #[error("rollout rolled back, installed version unchanged")]
    RolledBack,

    /// The operator interrupted the upgrade.
    #[error("upgrade aborted by operator")]
    Aborted,
}

impl Error {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::RolledBack => EXIT_ROLLED_BACK,
            Error::Aborted => EXIT_ABORTED,
            Error::Upgrade(e) if e.is_lock_contention() => EXIT_LOCK_CONTENTION,
            Error::Lock(e) if e.is_contention() => EXIT_LOCK_CONTENTION,
            _ => EXIT_FAILURE,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
