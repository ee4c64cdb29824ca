// ABOUTME: Diagnostics accumulator for non-fatal warnings during an upgrade.
// ABOUTME: Collects warnings that shouldn't fail the upgrade but should be shown to operators.

use serde::Serialize;

/// Collects non-fatal warnings during upgrade operations.
#[derive(Debug, Default)]
pub struct Diagnostics {
    warnings: Vec<Warning>,
}

impl Diagnostics {
    /// Record a warning, auto-logging it via tracing.
    pub fn warn(&mut self, warning: Warning) {
        tracing::warn!(kind = ?warning.kind, "{}", warning.message);
        self.warnings.push(warning);
    }

    /// Take over warnings already logged elsewhere.
    pub fn absorb(&mut self, other: Diagnostics) {
        self.warnings.extend(other.warnings);
    }

    /// Get all collected warnings.
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    /// Check if any warnings were collected.
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn into_warnings(self) -> Vec<Warning> {
        self.warnings
    }
}

/// A non-fatal warning collected during an upgrade.
#[derive(Debug, Clone, Serialize)]
pub struct Warning {
    pub kind: WarningKind,
    pub message: String,
}

impl Warning {
    fn new(kind: WarningKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Create a lock release warning.
    pub fn lock_release(message: impl Into<String>) -> Self {
        Self::new(WarningKind::LockRelease, message)
    }

    /// Create a warning for a hook file that was not selectable.
    pub fn hook_skipped(message: impl Into<String>) -> Self {
        Self::new(WarningKind::HookSkipped, message)
    }

    /// Create a warning for a missing hooks directory.
    pub fn hooks_missing(message: impl Into<String>) -> Self {
        Self::new(WarningKind::HooksMissing, message)
    }

    /// Create a warning for a hook that exited non-zero.
    pub fn hook_failed(message: impl Into<String>) -> Self {
        Self::new(WarningKind::HookFailed, message)
    }

    /// Create a warning for a generation that could not be stopped.
    pub fn teardown(message: impl Into<String>) -> Self {
        Self::new(WarningKind::Teardown, message)
    }
}

/// Categories of warnings that can occur during an upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// Failed to release a lock (lock file may remain).
    LockRelease,
    /// Hook file ignored: malformed, prerelease, or duplicate name.
    HookSkipped,
    /// Hooks directory does not exist.
    HooksMissing,
    /// Hook exited non-zero or could not be spawned.
    HookFailed,
    /// Former or candidate generation could not be stopped.
    Teardown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostics_starts_empty() {
        let diag = Diagnostics::default();
        assert!(!diag.has_warnings());
        assert!(diag.warnings().is_empty());
    }

    #[test]
    fn diagnostics_collects_warnings() {
        let mut diag = Diagnostics::default();

        diag.warn(Warning::lock_release("failed to remove lock file"));
        diag.warn(Warning::hook_failed("0.1.1 exited with code 1"));

        assert!(diag.has_warnings());
        assert_eq!(diag.warnings().len(), 2);
    }

    #[test]
    fn absorb_keeps_order() {
        let mut first = Diagnostics::default();
        first.warn(Warning::hooks_missing("no hooks"));
        let mut second = Diagnostics::default();
        second.warn(Warning::teardown("stop failed"));

        first.absorb(second);

        let kinds: Vec<_> = first.warnings().iter().map(|w| w.kind).collect();
        assert_eq!(kinds, [WarningKind::HooksMissing, WarningKind::Teardown]);
    }

    #[test]
    fn warning_constructors_set_correct_kind() {
        assert_eq!(Warning::lock_release("x").kind, WarningKind::LockRelease);
        assert_eq!(Warning::hook_skipped("x").kind, WarningKind::HookSkipped);
        assert_eq!(Warning::teardown("x").kind, WarningKind::Teardown);
    }
}
