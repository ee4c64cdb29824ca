// ABOUTME: Process-level PrivilegeGate that detects root and otherwise wraps sudo-style elevation.
// ABOUTME: Each elevated file operation is a small POSIX sh script run under the elevation program.

use async_trait::async_trait;
use snafu::ResultExt;
use std::fs;
use std::io;
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::error::{ElevationSnafu, IoSnafu, SpawnSnafu, UnavailableSnafu};
use super::{
    AppOwner, CommandOutput, PrivilegeError, PrivilegeGate, PrivilegedCommand, ROOT_DIR_MODE,
    ROOT_FILE_MODE,
};
use crate::atomic;

/// Exit code the read script uses for a missing file.
const EXIT_NOT_FOUND: i32 = 44;

/// Exit code the exclusive-create script uses for an existing file.
const EXIT_EXISTS: i32 = 45;

const READ_SCRIPT: &str = r#"[ -e "$1" ] || exit 44
cat -- "$1""#;

const WRITE_SCRIPT: &str = r#"set -e
dir=$(dirname -- "$1")
mkdir -p -- "$dir"
chmod 0755 -- "$dir"
tmp=$(mktemp "$1.XXXXXX")
trap 'rm -f -- "$tmp"' EXIT
cat > "$tmp"
chmod 0644 -- "$tmp"
mv -f -- "$tmp" "$1"
trap - EXIT"#;

const CREATE_SCRIPT: &str = r#"mkdir -p -- "$(dirname -- "$1")" || exit 1
tmp=$(mktemp "$1.XXXXXX") || exit 1
if ! cat > "$tmp"; then rm -f -- "$tmp"; exit 1; fi
chmod 0644 -- "$tmp"
if ln -- "$tmp" "$1" 2>/dev/null; then rm -f -- "$tmp"; exit 0; fi
rm -f -- "$tmp"
[ -e "$1" ] && exit 45
exit 1"#;

const REMOVE_SCRIPT: &str = r#"rm -f -- "$1""#;

const CHOWN_SCRIPT: &str = r#"chown -R -h "$2" -- "$1""#;

/// How the gate reaches root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateMode {
    /// Already privileged: operations run directly.
    Root,
    /// Each operation is wrapped in this program (e.g. `sudo -n`).
    Elevate { program: String, args: Vec<String> },
    /// Not privileged and no elevation configured.
    Unavailable,
}

/// The gate used by the CLI.
#[derive(Debug, Clone)]
pub struct SystemGate {
    mode: GateMode,
    owner: AppOwner,
}

impl SystemGate {
    pub fn new(mode: GateMode, owner: AppOwner) -> Self {
        Self { mode, owner }
    }

    /// Pick the mode from the effective uid and the configured elevation program.
    pub fn detect(elevation: &[String], owner: AppOwner) -> Self {
        let mode = if nix::unistd::geteuid().is_root() {
            GateMode::Root
        } else {
            match elevation.split_first() {
                Some((program, args)) => GateMode::Elevate {
                    program: program.clone(),
                    args: args.to_vec(),
                },
                None => GateMode::Unavailable,
            }
        };
        tracing::debug!(?mode, "selected privilege mode");
        Self::new(mode, owner)
    }

    pub fn mode(&self) -> &GateMode {
        &self.mode
    }

    /// Run `script` under the elevation program with `path` as `$1`.
    async fn run_script(
        program: &str,
        prefix: &[String],
        script: &str,
        args: &[&str],
        stdin: Option<&[u8]>,
    ) -> Result<std::process::Output, PrivilegeError> {
        let mut command = Command::new(program);
        command
            .args(prefix)
            .args(["sh", "-c", script, "sh"])
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn().context(SpawnSnafu { program })?;

        if let (Some(bytes), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(bytes).await.context(SpawnSnafu { program })?;
            drop(pipe);
        }

        child.wait_with_output().await.context(SpawnSnafu { program })
    }
}

fn failure_message(output: &std::process::Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    match output.status.code() {
        Some(code) if stderr.is_empty() => format!("exit code {code}"),
        Some(code) => format!("exit code {code}: {stderr}"),
        None => "terminated by signal".to_string(),
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[async_trait]
impl PrivilegeGate for SystemGate {
    fn is_privileged(&self) -> bool {
        self.mode == GateMode::Root
    }

    async fn read_privileged(&self, path: &Path) -> Result<Option<Vec<u8>>, PrivilegeError> {
        match &self.mode {
            GateMode::Root => match fs::read(path) {
                Ok(bytes) => Ok(Some(bytes)),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e).context(IoSnafu {
                    operation: "read",
                    path,
                }),
            },
            GateMode::Elevate { program, args } => {
                let output = Self::run_script(
                    program,
                    args,
                    READ_SCRIPT,
                    &[&path_arg(path)],
                    None,
                )
                .await?;
                match output.status.code() {
                    Some(0) => Ok(Some(output.stdout)),
                    Some(EXIT_NOT_FOUND) => Ok(None),
                    _ => ElevationSnafu {
                        operation: "read",
                        path,
                        message: failure_message(&output),
                    }
                    .fail(),
                }
            }
            GateMode::Unavailable => UnavailableSnafu {
                operation: "read",
                path,
            }
            .fail(),
        }
    }

    async fn write_privileged(&self, path: &Path, bytes: &[u8]) -> Result<(), PrivilegeError> {
        match &self.mode {
            GateMode::Root => {
                if let Some(parent) = path.parent() {
                    atomic::ensure_dir(parent, ROOT_DIR_MODE).context(IoSnafu {
                        operation: "create directory",
                        path: parent,
                    })?;
                }
                atomic::write_atomic(path, bytes, ROOT_FILE_MODE).context(IoSnafu {
                    operation: "write",
                    path,
                })
            }
            GateMode::Elevate { program, args } => {
                let output = Self::run_script(
                    program,
                    args,
                    WRITE_SCRIPT,
                    &[&path_arg(path)],
                    Some(bytes),
                )
                .await?;
                if output.status.success() {
                    Ok(())
                } else {
                    ElevationSnafu {
                        operation: "write",
                        path,
                        message: failure_message(&output),
                    }
                    .fail()
                }
            }
            GateMode::Unavailable => UnavailableSnafu {
                operation: "write",
                path,
            }
            .fail(),
        }
    }

    async fn exec_privileged(
        &self,
        command: &PrivilegedCommand,
    ) -> Result<CommandOutput, PrivilegeError> {
        let mut process = match &self.mode {
            GateMode::Root => {
                let mut process = Command::new(&command.program);
                process.args(&command.args).envs(&command.env);
                process
            }
            GateMode::Elevate { program, args } => {
                // sudo resets the environment, so pass it through env(1).
                let mut process = Command::new(program);
                process.args(args).arg("env");
                for (key, value) in &command.env {
                    process.arg(format!("{key}={value}"));
                }
                process.arg(&command.program).args(&command.args);
                process
            }
            GateMode::Unavailable => {
                return UnavailableSnafu {
                    operation: "exec",
                    path: command.program.as_path(),
                }
                .fail();
            }
        };

        if let Some(dir) = &command.current_dir {
            process.current_dir(dir);
        }
        // Own process group: a terminal Ctrl-C reaches devpush only, and the
        // running step is left to finish before the rollback.
        process
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);

        let output = match &self.mode {
            GateMode::Elevate { program, .. } => {
                process.output().await.context(SpawnSnafu { program })?
            }
            _ => process.output().await.context(IoSnafu {
                operation: "exec",
                path: command.program.as_path(),
            })?,
        };
        Ok(output.into())
    }

    async fn create_exclusive(&self, path: &Path, bytes: &[u8]) -> Result<bool, PrivilegeError> {
        match &self.mode {
            GateMode::Root => {
                if let Some(parent) = path.parent() {
                    atomic::ensure_dir(parent, ROOT_DIR_MODE).context(IoSnafu {
                        operation: "create directory",
                        path: parent,
                    })?;
                }
                atomic::create_exclusive(path, bytes, ROOT_FILE_MODE).context(IoSnafu {
                    operation: "create",
                    path,
                })
            }
            GateMode::Elevate { program, args } => {
                let output = Self::run_script(
                    program,
                    args,
                    CREATE_SCRIPT,
                    &[&path_arg(path)],
                    Some(bytes),
                )
                .await?;
                match output.status.code() {
                    Some(0) => Ok(true),
                    Some(EXIT_EXISTS) => Ok(false),
                    _ => ElevationSnafu {
                        operation: "create",
                        path,
                        message: failure_message(&output),
                    }
                    .fail(),
                }
            }
            GateMode::Unavailable => UnavailableSnafu {
                operation: "create",
                path,
            }
            .fail(),
        }
    }

    async fn remove_privileged(&self, path: &Path) -> Result<(), PrivilegeError> {
        match &self.mode {
            GateMode::Root => match fs::remove_file(path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e).context(IoSnafu {
                    operation: "remove",
                    path,
                }),
            },
            GateMode::Elevate { program, args } => {
                let output = Self::run_script(
                    program,
                    args,
                    REMOVE_SCRIPT,
                    &[&path_arg(path)],
                    None,
                )
                .await?;
                if output.status.success() {
                    Ok(())
                } else {
                    ElevationSnafu {
                        operation: "remove",
                        path,
                        message: failure_message(&output),
                    }
                    .fail()
                }
            }
            GateMode::Unavailable => UnavailableSnafu {
                operation: "remove",
                path,
            }
            .fail(),
        }
    }

    async fn ensure_app_ownership(&self, path: &Path) -> Result<(), PrivilegeError> {
        match &self.mode {
            GateMode::Root => chown_recursive(path, self.owner).context(IoSnafu {
                operation: "chown",
                path,
            }),
            GateMode::Elevate { program, args } => {
                let owner = format!("{}:{}", self.owner.uid, self.owner.gid);
                let output = Self::run_script(
                    program,
                    args,
                    CHOWN_SCRIPT,
                    &[&path_arg(path), &owner],
                    None,
                )
                .await?;
                if output.status.success() {
                    Ok(())
                } else {
                    ElevationSnafu {
                        operation: "chown",
                        path,
                        message: failure_message(&output),
                    }
                    .fail()
                }
            }
            GateMode::Unavailable => UnavailableSnafu {
                operation: "chown",
                path,
            }
            .fail(),
        }
    }
}

/// Hand `path` and everything below it to `owner` without following symlinks.
fn chown_recursive(path: &Path, owner: AppOwner) -> io::Result<()> {
    std::os::unix::fs::lchown(path, Some(owner.uid), Some(owner.gid))?;

    let metadata = fs::symlink_metadata(path)?;
    if metadata.is_dir() {
        for entry in fs::read_dir(path)? {
            chown_recursive(&entry?.path(), owner)?;
        }
    }
    Ok(())
}
