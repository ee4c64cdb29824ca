// ABOUTME: Privilege error types with SNAFU pattern.
// ABOUTME: Separates missing elevation from I/O failures for programmatic handling.

use snafu::Snafu;
use std::path::PathBuf;

/// Failure crossing the root/unprivileged boundary.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum PrivilegeError {
    #[snafu(display(
        "{operation} on {} requires root and no elevation mechanism is available",
        path.display()
    ))]
    Unavailable {
        operation: &'static str,
        path: PathBuf,
    },

    #[snafu(display("failed to run elevation program {program}: {source}"))]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[snafu(display("elevated {operation} on {} failed: {message}", path.display()))]
    Elevation {
        operation: &'static str,
        path: PathBuf,
        message: String,
    },

    #[snafu(display("{operation} on {} failed: {source}", path.display()))]
    Io {
        operation: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Error kind for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivilegeErrorKind {
    /// Not privileged and no way to become privileged.
    Unavailable,
    /// The elevation program could not be run or refused the operation.
    Elevation,
    /// The operation itself failed (missing program, permissions, disk).
    Io,
}

impl PrivilegeError {
    /// Returns the error kind for programmatic handling.
    pub fn kind(&self) -> PrivilegeErrorKind {
        match self {
            PrivilegeError::Unavailable { .. } => PrivilegeErrorKind::Unavailable,
            PrivilegeError::Spawn { .. } | PrivilegeError::Elevation { .. } => {
                PrivilegeErrorKind::Elevation
            }
            PrivilegeError::Io { .. } => PrivilegeErrorKind::Io,
        }
    }

    /// True when no privileged operation can succeed in this process.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind(),
            PrivilegeErrorKind::Unavailable | PrivilegeErrorKind::Elevation
        )
    }
}
