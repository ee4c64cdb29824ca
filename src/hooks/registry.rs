// ABOUTME: Discovers version-named upgrade hooks and selects the ones an upgrade crosses.
// ABOUTME: Malformed, prerelease, and duplicate names are skipped with a warning.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::HookError;
use crate::diagnostics::{Diagnostics, Warning};
use crate::version::Version;

/// A migration step that runs when an upgrade crosses `version`.
///
/// # Idempotency
///
/// A hook may run more than once against the same state: a previous upgrade
/// may have failed after the hook succeeded, or the hook itself may have
/// failed halfway. Its body must converge, so running it again on state it
/// already migrated leaves that state unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeHook {
    version: Version,
    path: PathBuf,
}

impl UpgradeHook {
    pub fn new(version: Version, path: impl Into<PathBuf>) -> Self {
        Self {
            version,
            path: path.into(),
        }
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Hooks with a `.sh` extension run through `sh`; anything else is executed directly.
    pub fn is_shell_script(&self) -> bool {
        self.path.extension().is_some_and(|ext| ext == "sh")
    }
}

/// Hooks in one directory, named `MAJOR.MINOR.PATCH` with an optional `.sh` extension.
#[derive(Debug, Clone)]
pub struct HookRegistry {
    dir: PathBuf,
}

impl HookRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// All selectable hooks, ascending by version.
    ///
    /// A missing directory yields no hooks. Hidden files and directories are
    /// ignored silently; other unusable names produce a warning.
    pub fn discover(&self, diagnostics: &mut Diagnostics) -> Result<Vec<UpgradeHook>, HookError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                diagnostics.warn(Warning::hooks_missing(format!(
                    "hooks directory {} does not exist, no hooks will run",
                    self.dir.display()
                )));
                return Ok(Vec::new());
            }
            Err(source) => {
                return Err(HookError::ReadDir {
                    path: self.dir.clone(),
                    source,
                });
            }
        };

        let mut candidates = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| HookError::ReadDir {
                path: self.dir.clone(),
                source,
            })?;
            let path = entry.path();
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                diagnostics.warn(Warning::hook_skipped(format!(
                    "skipping hook {} with non UTF-8 name",
                    path.display()
                )));
                continue;
            };
            if name.starts_with('.') || !path.is_file() {
                continue;
            }
            candidates.push((name, path));
        }
        // Deterministic tie-breaking for duplicates: `1.0.0` wins over `1.0.0.sh`.
        candidates.sort();

        let mut hooks: BTreeMap<Version, UpgradeHook> = BTreeMap::new();
        for (name, path) in candidates {
            let Some(version) = hook_version(&name, diagnostics) else {
                continue;
            };
            if let Some(existing) = hooks.get(&version) {
                diagnostics.warn(Warning::hook_skipped(format!(
                    "skipping hook {name}: duplicate of {}",
                    existing.path().display()
                )));
                continue;
            }
            hooks.insert(version.clone(), UpgradeHook::new(version, path));
        }

        tracing::debug!(dir = %self.dir.display(), count = hooks.len(), "discovered upgrade hooks");
        Ok(hooks.into_values().collect())
    }

    /// Hooks with `current < version <= target`, ascending.
    pub fn applicable_hooks(
        &self,
        current: &Version,
        target: &Version,
        diagnostics: &mut Diagnostics,
    ) -> Result<Vec<UpgradeHook>, HookError> {
        let hooks = self.discover(diagnostics)?;
        Ok(select(&hooks, current, target))
    }
}

/// Select from hooks already sorted ascending. Empty when `current >= target`.
pub fn select(hooks: &[UpgradeHook], current: &Version, target: &Version) -> Vec<UpgradeHook> {
    if current >= target {
        return Vec::new();
    }
    hooks
        .iter()
        .skip_while(|hook| hook.version() <= current)
        .take_while(|hook| hook.version() <= target)
        .cloned()
        .collect()
}

fn hook_version(name: &str, diagnostics: &mut Diagnostics) -> Option<Version> {
    let stem = name.strip_suffix(".sh").unwrap_or(name);
    let version = match Version::parse(stem) {
        Ok(version) if stem == version.to_string() => version,
        Ok(_) | Err(_) => {
            diagnostics.warn(Warning::hook_skipped(format!(
                "skipping hook {name}: name is not MAJOR.MINOR.PATCH"
            )));
            return None;
        }
    };
    if !version.is_stable() {
        diagnostics.warn(Warning::hook_skipped(format!(
            "skipping hook {name}: prerelease hooks are not supported"
        )));
        return None;
    }
    Some(version)
}
