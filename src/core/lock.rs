//! Advisory lock file guarding target-database writes.
//!
//! SQLite serializes writers per connection, but nothing stops two sync runs
//! from interleaving table transactions against the same target. The lock
//! file closes that gap: `O_CREAT|O_EXCL` semantics, removed on drop.

use crate::core::error::DriftguardError;
use std::io::Write;
use std::path::{Path, PathBuf};

pub struct LockGuard {
    path: PathBuf,
}

/// Acquire the advisory lock beside `db_path` (`<name>.sync.lock`).
///
/// A held lock is a caller-visible error, not a wait: the caller decides
/// whether to retry. A crashed holder leaves the file behind; the error
/// message names the path so an operator can remove it.
pub fn acquire_sync_lock(db_path: &Path) -> Result<LockGuard, DriftguardError> {
    let mut name = db_path.as_os_str().to_owned();
    name.push(".sync.lock");
    let lock_path = PathBuf::from(name);

    match std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&lock_path)
    {
        Ok(mut f) => {
            let _ = writeln!(f, "pid={}", std::process::id());
            Ok(LockGuard { path: lock_path })
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            Err(DriftguardError::LockHeld(format!(
                "sync already running against this target (lock file {})",
                lock_path.display()
            )))
        }
        Err(e) => Err(DriftguardError::IoError(e)),
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
