// ABOUTME: Structured result of an upgrade run.
// ABOUTME: Summarizes hooks, per-service rollout outcomes, the final version, and warnings.

use serde::Serialize;

use crate::diagnostics::Warning;
use crate::hooks::{ExecutionReport, HookOutcome};
use crate::rollout::WaveReport;
use crate::version::Version;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpgradeOutcome {
    /// Every hook succeeded and every wave committed.
    Clean,
    /// Version committed, but at least one hook failed.
    CommittedWithHookFailures,
    /// A wave rolled back; the installed version did not change.
    RolledBack,
    /// The operator aborted; the installed version did not change.
    Aborted,
}

impl UpgradeOutcome {
    pub fn is_committed(self) -> bool {
        matches!(
            self,
            UpgradeOutcome::Clean | UpgradeOutcome::CommittedWithHookFailures
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HookSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub outcomes: Vec<HookOutcome>,
}

impl From<ExecutionReport> for HookSummary {
    fn from(report: ExecutionReport) -> Self {
        Self {
            attempted: report.attempted(),
            succeeded: report.succeeded(),
            failed: report.failed(),
            skipped: report.skipped(),
            outcomes: report.outcomes,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UpgradeReport {
    pub outcome: UpgradeOutcome,
    pub from_version: Version,
    pub target_version: Version,
    /// Installed version after the run.
    pub installed_version: Version,
    pub hooks: HookSummary,
    pub waves: Vec<WaveReport>,
    pub warnings: Vec<Warning>,
}
