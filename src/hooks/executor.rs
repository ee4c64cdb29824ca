// ABOUTME: Runs selected upgrade hooks in order through the PrivilegeGate.
// ABOUTME: A failing hook is recorded and the run continues; only lost privilege stops it.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use super::{HookError, UpgradeHook};
use crate::abort::AbortSignal;
use crate::diagnostics::{Diagnostics, Warning};
use crate::privilege::{PrivilegeGate, PrivilegedCommand};
use crate::version::Version;

/// Number of trailing stderr lines kept per failed hook.
const STDERR_TAIL_LINES: usize = 20;

/// Context passed to hooks via environment variables.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub from: Version,
    pub to: Version,
    pub data_dir: PathBuf,
    pub app_dir: PathBuf,
}

impl HookContext {
    /// Convert context to environment variables for `hook`.
    pub fn to_env(&self, hook: &UpgradeHook) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert(
            "DEVPUSH_HOOK_VERSION".to_string(),
            hook.version().to_string(),
        );
        env.insert("DEVPUSH_FROM_VERSION".to_string(), self.from.to_string());
        env.insert("DEVPUSH_TO_VERSION".to_string(), self.to.to_string());
        env.insert(
            "DEVPUSH_DATA_DIR".to_string(),
            self.data_dir.display().to_string(),
        );
        env.insert(
            "DEVPUSH_APP_DIR".to_string(),
            self.app_dir.display().to_string(),
        );
        env
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HookStatus {
    Succeeded,
    Failed,
    /// Not started because the operator aborted.
    Skipped,
}

/// What happened to one hook.
#[derive(Debug, Clone, Serialize)]
pub struct HookOutcome {
    pub version: Version,
    pub path: PathBuf,
    pub status: HookStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr_tail: Option<String>,
    pub duration_ms: u64,
}

/// Outcomes of one executor run, in execution order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionReport {
    pub outcomes: Vec<HookOutcome>,
    /// The operator aborted before every hook had started.
    pub cancelled: bool,
}

impl ExecutionReport {
    fn count(&self, status: HookStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    /// Hooks that were started.
    pub fn attempted(&self) -> usize {
        self.outcomes.len() - self.skipped()
    }

    pub fn succeeded(&self) -> usize {
        self.count(HookStatus::Succeeded)
    }

    pub fn failed(&self) -> usize {
        self.count(HookStatus::Failed)
    }

    pub fn skipped(&self) -> usize {
        self.count(HookStatus::Skipped)
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }
}

/// Runs hooks one after another.
pub struct UpgradeExecutor {
    gate: Arc<dyn PrivilegeGate>,
}

impl UpgradeExecutor {
    pub fn new(gate: Arc<dyn PrivilegeGate>) -> Self {
        Self { gate }
    }

    /// Run `hooks` in the given order.
    ///
    /// The abort signal is checked before each hook; a hook that has started
    /// always runs to completion. Returns `Err` only when privileged execution
    /// is impossible altogether.
    pub async fn run(
        &self,
        hooks: &[UpgradeHook],
        context: &HookContext,
        abort: &AbortSignal,
        diagnostics: &mut Diagnostics,
    ) -> Result<ExecutionReport, HookError> {
        let mut report = ExecutionReport::default();

        for hook in hooks {
            if abort.is_aborted() {
                if !report.cancelled {
                    tracing::warn!(next = %hook.version(), "abort requested, not starting further hooks");
                }
                report.cancelled = true;
                report.outcomes.push(HookOutcome {
                    version: hook.version().clone(),
                    path: hook.path().to_path_buf(),
                    status: HookStatus::Skipped,
                    exit_code: None,
                    stderr_tail: None,
                    duration_ms: 0,
                });
                continue;
            }

            let outcome = self.run_one(hook, context, diagnostics).await?;
            report.outcomes.push(outcome);
        }

        Ok(report)
    }

    async fn run_one(
        &self,
        hook: &UpgradeHook,
        context: &HookContext,
        diagnostics: &mut Diagnostics,
    ) -> Result<HookOutcome, HookError> {
        tracing::info!(version = %hook.version(), "Running upgrade hook: {}", hook.path().display());

        let command = if hook.is_shell_script() {
            PrivilegedCommand::new("sh").arg(hook.path().display().to_string())
        } else {
            PrivilegedCommand::new(hook.path())
        };
        let command = command
            .envs(context.to_env(hook))
            .current_dir(&context.app_dir);

        let started = Instant::now();
        let result = self.gate.exec_privileged(&command).await;
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let (status, exit_code, tail) = match result {
            Ok(output) if output.success => {
                tracing::info!(version = %hook.version(), "upgrade hook completed successfully");
                (HookStatus::Succeeded, output.exit_code, None)
            }
            Ok(output) => {
                let tail = stderr_tail(&output.stderr);
                let code = output
                    .exit_code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string());
                diagnostics.warn(Warning::hook_failed(format!(
                    "upgrade hook {} failed with exit code {code}{}",
                    hook.version(),
                    tail.as_deref()
                        .map(|t| format!(": {t}"))
                        .unwrap_or_default()
                )));
                (HookStatus::Failed, output.exit_code, tail)
            }
            Err(e) if e.is_fatal() => return Err(HookError::Privilege(e)),
            Err(e) => {
                diagnostics.warn(Warning::hook_failed(format!(
                    "upgrade hook {} could not be started: {e}",
                    hook.version()
                )));
                (HookStatus::Failed, None, Some(e.to_string()))
            }
        };

        Ok(HookOutcome {
            version: hook.version().clone(),
            path: hook.path().to_path_buf(),
            status,
            exit_code,
            stderr_tail: tail,
            duration_ms,
        })
    }
}

fn stderr_tail(stderr: &str) -> Option<String> {
    let lines: Vec<&str> = stderr.trim_end().lines().collect();
    if lines.is_empty() {
        return None;
    }
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    Some(lines[start..].join("\n"))
}
