// ABOUTME: Cross-process advisory locks on sidecar files via flock(2).
// ABOUTME: The kernel drops the lock when the holder exits, so a crash never leaves it behind.

use nix::fcntl::{Flock, FlockArg};
use std::fs::File;
use std::io;
use std::path::Path;

/// An exclusive advisory lock, released on drop.
#[derive(Debug)]
pub struct FileGuard {
    _lock: Flock<File>,
}

/// Wait until `path` is exclusively locked.
///
/// The file is opened read-only, so it may belong to root while the caller
/// is unprivileged. It must already exist. Two opens of the same file
/// contend even within one process.
pub async fn lock_exclusive(path: &Path) -> io::Result<FileGuard> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let file = File::open(&path)?;
        let lock = Flock::lock(file, FlockArg::LockExclusive)
            .map_err(|(_, errno)| io::Error::from(errno))?;
        Ok(FileGuard { _lock: lock })
    })
    .await
    .map_err(io::Error::other)?
}
