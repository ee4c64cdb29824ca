// ABOUTME: Persisted JSON state documents with read-merge-write semantics.
// ABOUTME: Root-owned paths go through the PrivilegeGate; writes are atomic renames.

mod error;

pub use error::StateError;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::atomic;
use crate::flock::{self, FileGuard};
use crate::privilege::{PrivilegeGate, ROOT_FILE_MODE};
use crate::version::Version;

/// Installed version document: `{ "version": "<string>" }`.
pub const VERSION_FILE: &str = "version.json";

/// Open configuration document, only ever merged.
pub const CONFIG_FILE: &str = "config.json";

/// Per-service rollout state, keyed by service name.
pub const ROLLOUT_FILE: &str = "rollout.json";

/// A state document: an open JSON object.
pub type Document = serde_json::Map<String, Value>;

/// Reads and merges state documents.
///
/// Merges hold an advisory lock on a hidden sidecar of the document
/// (`.config.json.lock` for `config.json`), so concurrent updates to
/// different keys never lose each other's writes, whether they come from
/// this store, another store, or another process.
pub struct StateStore {
    gate: Arc<dyn PrivilegeGate>,
    system_dir: PathBuf,
    merge_lock: Mutex<()>,
}

impl fmt::Debug for StateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateStore")
            .field("system_dir", &self.system_dir)
            .finish()
    }
}

impl StateStore {
    pub fn new(gate: Arc<dyn PrivilegeGate>, system_dir: impl Into<PathBuf>) -> Self {
        Self {
            gate,
            system_dir: system_dir.into(),
            merge_lock: Mutex::new(()),
        }
    }

    /// The root-owned directory.
    pub fn system_dir(&self) -> &Path {
        &self.system_dir
    }

    /// Path of a named document in the system directory.
    pub fn path(&self, name: &str) -> PathBuf {
        self.system_dir.join(name)
    }

    fn is_root_owned(&self, path: &Path) -> bool {
        path.starts_with(&self.system_dir)
    }

    async fn load(&self, path: &Path) -> Result<Option<Vec<u8>>, StateError> {
        if self.is_root_owned(path) {
            return Ok(self.gate.read_privileged(path).await?);
        }
        match std::fs::read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StateError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    async fn store(&self, path: &Path, document: &Document) -> Result<(), StateError> {
        let mut bytes = serde_json::to_vec_pretty(document)?;
        bytes.push(b'\n');

        if self.is_root_owned(path) {
            return Ok(self.gate.write_privileged(path, &bytes).await?);
        }
        let io_err = |source| StateError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        atomic::write_atomic(path, &bytes, ROOT_FILE_MODE).map_err(io_err)
    }

    /// Take the cross-process merge lock for `path`, creating its sidecar if needed.
    async fn lock_document(&self, path: &Path) -> Result<FileGuard, StateError> {
        let guard_path = merge_guard_path(path);
        let io_err = |source| StateError::Io {
            path: guard_path.clone(),
            source,
        };

        if !guard_path.exists() {
            if self.is_root_owned(path) {
                // Root-owned and world-readable, so unprivileged runs can still lock it.
                self.gate.create_exclusive(&guard_path, b"").await?;
            } else {
                if let Some(parent) = guard_path.parent() {
                    std::fs::create_dir_all(parent).map_err(io_err)?;
                }
                std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&guard_path)
                    .map_err(io_err)?;
            }
        }
        flock::lock_exclusive(&guard_path).await.map_err(io_err)
    }

    fn parse(path: &Path, bytes: &[u8]) -> Result<Document, StateError> {
        match serde_json::from_slice::<Value>(bytes) {
            Ok(Value::Object(document)) => Ok(document),
            Ok(_) => Err(StateError::corrupt(path, "expected a JSON object")),
            Err(e) => Err(StateError::corrupt(path, e.to_string())),
        }
    }

    /// Read a document. Fails with `NotFound` if absent, `Corrupt` if unparseable.
    pub async fn read(&self, path: &Path) -> Result<Document, StateError> {
        self.read_optional(path)
            .await?
            .ok_or_else(|| StateError::NotFound(path.to_path_buf()))
    }

    /// Read a document, `None` if absent.
    pub async fn read_optional(&self, path: &Path) -> Result<Option<Document>, StateError> {
        match self.load(path).await? {
            Some(bytes) => Self::parse(path, &bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Shallow-merge `patch` over the document at `path` (empty if absent)
    /// and write the result atomically. Keys not named in `patch` survive.
    pub async fn merge(&self, path: &Path, patch: Document) -> Result<Document, StateError> {
        self.update(path, |_| Ok(patch)).await
    }

    /// Serialized read-modify-write: `patch_for` sees the current document
    /// and returns the keys to overwrite.
    async fn update<F>(&self, path: &Path, patch_for: F) -> Result<Document, StateError>
    where
        F: FnOnce(&Document) -> Result<Document, StateError>,
    {
        let _guard = self.merge_lock.lock().await;
        let _document_guard = self.lock_document(path).await?;

        let mut document = self.read_optional(path).await?.unwrap_or_default();
        let patch = patch_for(&document)?;
        for (key, value) in patch {
            document.insert(key, value);
        }
        self.store(path, &document).await?;
        Ok(document)
    }

    /// The installed version, normalized.
    pub async fn installed_version(&self) -> Result<Version, StateError> {
        let path = self.path(VERSION_FILE);
        let document = self.read(&path).await?;
        parse_version_document(&path, &document)
    }

    /// Record `version` (normalized) as installed. Refuses to go backwards.
    pub async fn commit_version(&self, version: &Version) -> Result<(), StateError> {
        let path = self.path(VERSION_FILE);
        let requested = version.normalized();

        self.update(&path, |existing| {
            if existing.contains_key("version") {
                let current = parse_version_document(&path, existing)?;
                if requested < current {
                    return Err(StateError::Regression {
                        current,
                        requested: requested.clone(),
                    });
                }
            }
            let mut patch = Document::new();
            patch.insert("version".to_string(), Value::String(requested.to_string()));
            Ok(patch)
        })
        .await?;

        tracing::info!(version = %requested, "committed installed version");
        Ok(())
    }

    /// The configuration document (empty if it does not exist yet).
    pub async fn config(&self) -> Result<Document, StateError> {
        Ok(self
            .read_optional(&self.path(CONFIG_FILE))
            .await?
            .unwrap_or_default())
    }

    /// Merge keys into the configuration document.
    pub async fn merge_config(&self, patch: Document) -> Result<Document, StateError> {
        self.merge(&self.path(CONFIG_FILE), patch).await
    }

    /// Read one typed entry of a keyed document.
    pub async fn read_entry<T: DeserializeOwned>(
        &self,
        path: &Path,
        key: &str,
    ) -> Result<Option<T>, StateError> {
        let Some(document) = self.read_optional(path).await? else {
            return Ok(None);
        };
        match document.get(key) {
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| StateError::corrupt(path, format!("entry '{key}': {e}"))),
            None => Ok(None),
        }
    }

    /// Replace one typed entry of a keyed document, keeping the others.
    pub async fn merge_entry<T: Serialize>(
        &self,
        path: &Path,
        key: &str,
        value: &T,
    ) -> Result<(), StateError> {
        let mut patch = Document::new();
        patch.insert(key.to_string(), serde_json::to_value(value)?);
        self.merge(path, patch).await.map(|_| ())
    }
}

fn merge_guard_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.lock"))
}

fn parse_version_document(path: &Path, document: &Document) -> Result<Version, StateError> {
    let raw = document
        .get("version")
        .and_then(Value::as_str)
        .ok_or_else(|| StateError::corrupt(path, "missing string field 'version'"))?;
    Version::parse(raw)
        .map(|v| v.normalized())
        .map_err(|e| StateError::corrupt(path, e.to_string()))
}
