// ABOUTME: Version-gated upgrade hooks: discovery, selection, and execution.
// ABOUTME: Hooks are idempotent scripts named after the version that introduces them.

mod executor;
mod registry;

pub use executor::{ExecutionReport, HookContext, HookOutcome, HookStatus, UpgradeExecutor};
pub use registry::{HookRegistry, UpgradeHook, select};

use std::path::PathBuf;
use thiserror::Error;

use crate::privilege::PrivilegeError;

#[derive(Debug, Error)]
pub enum HookError {
    #[error("failed to read hooks directory {}: {source}", path.display())]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Hooks cannot run at all without privilege.
    #[error("cannot run upgrade hooks: {0}")]
    Privilege(#[source] PrivilegeError),
}
