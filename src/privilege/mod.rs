// ABOUTME: Capability-scoped gate for every operation on the root-owned tree.
// ABOUTME: Passes through when already root, otherwise escalates via a configured program.

mod error;
mod system;

pub use error::{PrivilegeError, PrivilegeErrorKind};
pub use system::{GateMode, SystemGate};

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Mode for directories in the root-owned tree.
pub const ROOT_DIR_MODE: u32 = 0o755;

/// Mode for files in the root-owned tree.
pub const ROOT_FILE_MODE: u32 = 0o644;

/// Fixed owner of the unprivileged application tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AppOwner {
    pub uid: u32,
    pub gid: u32,
}

impl Default for AppOwner {
    fn default() -> Self {
        Self {
            uid: 1000,
            gid: 1000,
        }
    }
}

/// A process to run with root privileges.
#[derive(Debug, Clone)]
pub struct PrivilegedCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub current_dir: Option<PathBuf>,
}

impl PrivilegedCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            current_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn envs(mut self, vars: BTreeMap<String, String>) -> Self {
        self.env.extend(vars);
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }
}

/// Captured result of a privileged process.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl From<std::process::Output> for CommandOutput {
    fn from(output: std::process::Output) -> Self {
        Self {
            success: output.status.success(),
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

/// All access to root-owned paths goes through this trait.
///
/// Implementations must never partially apply a write: `write_privileged`
/// replaces the target atomically or not at all.
#[async_trait]
pub trait PrivilegeGate: Send + Sync {
    /// Whether operations run without escalation.
    fn is_privileged(&self) -> bool;

    /// Read a root-owned file. `Ok(None)` when it does not exist.
    async fn read_privileged(&self, path: &Path) -> Result<Option<Vec<u8>>, PrivilegeError>;

    /// Atomically replace a root-owned file (mode 0644, parent 0755).
    async fn write_privileged(&self, path: &Path, bytes: &[u8]) -> Result<(), PrivilegeError>;

    /// Run a process as root.
    async fn exec_privileged(
        &self,
        command: &PrivilegedCommand,
    ) -> Result<CommandOutput, PrivilegeError>;

    /// Create a root-owned file only if absent. `Ok(false)` if it already exists.
    async fn create_exclusive(&self, path: &Path, bytes: &[u8]) -> Result<bool, PrivilegeError>;

    /// Remove a root-owned file; missing files are not an error.
    async fn remove_privileged(&self, path: &Path) -> Result<(), PrivilegeError>;

    /// Recursively hand `path` to the application owner.
    async fn ensure_app_ownership(&self, path: &Path) -> Result<(), PrivilegeError>;
}
