// ABOUTME: Upgrade and per-service rollout locks backed by exclusively created files.
// ABOUTME: Lock files carry holder info so contention reports who is running.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;

use crate::flock::{self, FileGuard};
use crate::privilege::{PrivilegeError, PrivilegeGate};
use crate::types::{LockId, ServiceName};

static LOCK_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// What a lock protects.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LockScope {
    /// One upgrade orchestration system-wide.
    Upgrade,
    /// One rollout per service.
    Rollout(ServiceName),
}

impl LockScope {
    /// File name of the lock inside the lock directory.
    pub fn file_name(&self) -> String {
        match self {
            LockScope::Upgrade => "upgrade.lock".to_string(),
            LockScope::Rollout(service) => format!("rollout-{service}.lock"),
        }
    }
}

impl fmt::Display for LockScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockScope::Upgrade => write!(f, "upgrade"),
            LockScope::Rollout(service) => write!(f, "rollout of {service}"),
        }
    }
}

/// Information about who holds a lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    /// Token identifying this acquisition.
    pub token: LockId,
    /// Hostname of the machine that holds the lock.
    pub holder: String,
    /// Process ID of the lock holder.
    pub pid: u32,
    /// When the lock was acquired.
    pub started_at: DateTime<Utc>,
    /// Human-readable scope.
    pub scope: String,
}

impl LockInfo {
    /// Create new lock info for the current process.
    pub fn new(scope: &LockScope) -> Self {
        let holder = gethostname::gethostname().to_string_lossy().into_owned();
        let pid = std::process::id();
        let sequence = LOCK_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        Self {
            token: LockId::new(format!("{holder}-{pid}-{sequence}")),
            holder,
            pid,
            started_at: Utc::now(),
            scope: scope.to_string(),
        }
    }

    /// Check if this lock is older than `max_age`.
    pub fn is_stale(&self, max_age: Duration) -> bool {
        let age = Utc::now() - self.started_at;
        age.to_std().map(|age| age >= max_age).unwrap_or(false)
    }
}

/// Errors from lock acquisition and release.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another process holds the lock.
    #[error("{scope} lock held by {holder} (pid {pid}) since {started_at}")]
    Held {
        scope: String,
        holder: String,
        pid: u32,
        started_at: DateTime<Utc>,
    },

    /// The lock was re-acquired by someone else while breaking it.
    #[error("{0} lock acquired by another process while breaking a stale lock")]
    Raced(String),

    #[error("failed to lock {}: {source}", path.display())]
    Guard {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize lock info: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error(transparent)]
    Privilege(#[from] PrivilegeError),
}

impl LockError {
    /// True when the failure is contention rather than an I/O problem.
    pub fn is_contention(&self) -> bool {
        matches!(self, LockError::Held { .. } | LockError::Raced(_))
    }
}

/// Creates and inspects lock files in the root-owned lock directory.
#[derive(Clone)]
pub struct LockManager {
    gate: Arc<dyn PrivilegeGate>,
    dir: PathBuf,
    stale_after: Duration,
}

impl fmt::Debug for LockManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockManager")
            .field("dir", &self.dir)
            .field("stale_after", &self.stale_after)
            .finish()
    }
}

impl LockManager {
    pub fn new(gate: Arc<dyn PrivilegeGate>, dir: PathBuf, stale_after: Duration) -> Self {
        Self {
            gate,
            dir,
            stale_after,
        }
    }

    /// Path to the lock file for a scope.
    pub fn lock_path(&self, scope: &LockScope) -> PathBuf {
        self.dir.join(scope.file_name())
    }

    /// Acquire a lock without waiting.
    ///
    /// Fails immediately with `LockError::Held` if another holder is active.
    /// Stale locks (older than the configured age) and unreadable lock files
    /// are broken with a warning; `force` breaks any existing lock.
    ///
    /// Breaking and releasing happen under the directory guard, so a lock
    /// file is only ever removed by the process that just read it and found
    /// it breakable. Of several processes breaking the same stale lock,
    /// exactly one ends up holding it.
    pub async fn acquire(&self, scope: LockScope, force: bool) -> Result<HeldLock, LockError> {
        let path = self.lock_path(&scope);
        let info = LockInfo::new(&scope);
        let bytes = serde_json::to_vec(&info)?;

        if self.gate.create_exclusive(&path, &bytes).await? {
            tracing::debug!(lock = %path.display(), "acquired {scope} lock");
            return Ok(self.held(scope, path, info));
        }

        let _guard = lock_guard(self.gate.as_ref(), &self.dir).await?;
        if let Some(existing) = self.gate.read_privileged(&path).await? {
            self.check_breakable(&scope, &existing, force)?;
            tracing::debug!("Removing stale/forced lock at {}", path.display());
            self.gate.remove_privileged(&path).await?;
        }

        if !self.gate.create_exclusive(&path, &bytes).await? {
            return Err(LockError::Raced(scope.to_string()));
        }
        tracing::debug!(lock = %path.display(), "acquired {scope} lock");
        Ok(self.held(scope, path, info))
    }

    /// Read the current holder of a lock, if any.
    pub async fn holder(&self, scope: &LockScope) -> Result<Option<LockInfo>, LockError> {
        let path = self.lock_path(scope);
        let Some(bytes) = self.gate.read_privileged(&path).await? else {
            return Ok(None);
        };
        Ok(serde_json::from_slice(&bytes).ok())
    }

    /// Run `work` while holding the lock for `scope`, releasing it afterwards
    /// whether `work` succeeded or failed.
    pub async fn with_lock<T, E, F>(&self, scope: LockScope, force: bool, work: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: From<LockError>,
    {
        let lock = self.acquire(scope, force).await?;
        let result = work.await;
        if let Err(e) = lock.release().await {
            tracing::warn!("Failed to release lock: {}", e);
        }
        result
    }

    fn held(&self, scope: LockScope, path: PathBuf, info: LockInfo) -> HeldLock {
        HeldLock {
            gate: Arc::clone(&self.gate),
            dir: self.dir.clone(),
            scope,
            path,
            info,
        }
    }

    /// `Ok` if the existing lock may be broken (stale, forced, or corrupted),
    /// `LockError::Held` otherwise.
    fn check_breakable(&self, scope: &LockScope, existing: &[u8], force: bool) -> Result<(), LockError> {
        match serde_json::from_slice::<LockInfo>(existing) {
            Ok(existing) => {
                if force {
                    tracing::warn!(
                        "Breaking {} lock held by {} (pid {}) since {}",
                        scope,
                        existing.holder,
                        existing.pid,
                        existing.started_at
                    );
                    Ok(())
                } else if existing.is_stale(self.stale_after) {
                    tracing::warn!(
                        "Auto-breaking stale {} lock held by {} (pid {}) since {}",
                        scope,
                        existing.holder,
                        existing.pid,
                        existing.started_at
                    );
                    Ok(())
                } else {
                    Err(LockError::Held {
                        scope: scope.to_string(),
                        holder: existing.holder,
                        pid: existing.pid,
                        started_at: existing.started_at,
                    })
                }
            }
            Err(_) => {
                tracing::warn!("{} lock info corrupted, breaking lock", scope);
                Ok(())
            }
        }
    }
}

/// Name of the flock(2) guard inside the lock directory.
const GUARD_FILE: &str = ".guard";

/// Serialize lock breaking and release across processes.
async fn lock_guard(gate: &dyn PrivilegeGate, dir: &Path) -> Result<FileGuard, LockError> {
    let path = dir.join(GUARD_FILE);
    if !path.exists() {
        gate.create_exclusive(&path, b"").await?;
    }
    flock::lock_exclusive(&path)
        .await
        .map_err(|source| LockError::Guard { path, source })
}

/// A held lock. Release it explicitly; `LockManager::with_lock` does so for you.
#[must_use = "a held lock must be released"]
pub struct HeldLock {
    gate: Arc<dyn PrivilegeGate>,
    dir: PathBuf,
    scope: LockScope,
    path: PathBuf,
    info: LockInfo,
}

impl fmt::Debug for HeldLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeldLock")
            .field("scope", &self.scope)
            .field("path", &self.path)
            .finish()
    }
}

impl HeldLock {
    pub fn scope(&self) -> &LockScope {
        &self.scope
    }

    pub fn info(&self) -> &LockInfo {
        &self.info
    }

    /// Release the lock. A lock file that now belongs to someone else
    /// (it was force-broken) is left alone.
    pub async fn release(self) -> Result<(), LockError> {
        let _guard = lock_guard(self.gate.as_ref(), &self.dir).await?;
        if let Some(bytes) = self.gate.read_privileged(&self.path).await? {
            match serde_json::from_slice::<LockInfo>(&bytes) {
                Ok(current) if current.token != self.info.token => {
                    tracing::warn!(
                        "{} lock was taken over by {} (pid {}), not removing it",
                        self.scope,
                        current.holder,
                        current.pid
                    );
                    return Ok(());
                }
                _ => {}
            }
        }
        self.gate.remove_privileged(&self.path).await?;
        tracing::debug!(lock = %self.path.display(), "released {} lock", self.scope);
        Ok(())
    }
}
