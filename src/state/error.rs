// ABOUTME: Error types for persisted state documents.
// ABOUTME: Distinguishes missing, corrupt, and regressing state from privilege and I/O failures.

use std::path::PathBuf;
use thiserror::Error;

use crate::privilege::PrivilegeError;
use crate::version::Version;

/// Errors reading or writing state documents.
#[derive(Debug, Error)]
pub enum StateError {
    /// Document does not exist.
    #[error("state document not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Document exists but is not a JSON object of the expected shape.
    #[error("state document {} is corrupt: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    /// Committing would move the installed version backwards.
    #[error("refusing to move installed version from {current} back to {requested}")]
    Regression { current: Version, requested: Version },

    #[error(transparent)]
    Privilege(#[from] PrivilegeError),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize state: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl StateError {
    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        StateError::Corrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
