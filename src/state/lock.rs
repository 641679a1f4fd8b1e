use std::fs::{self, File, TryLockError};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::errors::{AppError, AppResult};

const LOCK_FILE: &str = "state.lock";

/// Exclusive claim on one account's state for the length of a run.
///
/// Held as an OS advisory lock on `state.lock`, so it is released when the
/// handle closes, including when the process dies without unwinding. A
/// leftover file on its own means nothing. The file is never removed, since
/// another run may already have it open.
#[derive(Debug)]
pub struct StateLock {
    path: PathBuf,
    file: File,
}

impl StateLock {
    /// Never waits: `LockBusy` when another live run holds the account.
    pub fn acquire(dir: &Path) -> AppResult<Self> {
        fs::create_dir_all(dir)
            .map_err(|e| AppError::Unexpected(format!("creating {}: {e}", dir.display())))?;
        let path = dir.join(LOCK_FILE);

        let mut file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| AppError::Unexpected(format!("opening lock {}: {e}", path.display())))?;
        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => {
                return Err(AppError::LockBusy(path.display().to_string()));
            }
            Err(TryLockError::Error(e)) => {
                return Err(AppError::Unexpected(format!(
                    "locking {}: {e}",
                    path.display()
                )));
            }
        }

        if let Err(e) = write_owner(&mut file) {
            warn!(path = %path.display(), error = %e, "Could not record lock owner");
        }
        debug!(path = %path.display(), "State lock acquired");
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Replace the file contents with our pid, for whoever inspects a busy lock.
fn write_owner(file: &mut File) -> io::Result<()> {
    file.set_len(0)?;
    writeln!(file, "{}", std::process::id())?;
    file.flush()
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            warn!(path = %self.path.display(), error = %e, "Failed to release state lock");
        }
    }
}
