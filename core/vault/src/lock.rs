//! Advisory lock record next to a container.
//!
//! The lock is a sibling file created with exclusive-create semantics: the
//! process that manages to create it holds the lock, and it writes its
//! identity into the file so contenders can report who is in the way.
//! There is no lease or heartbeat. A holder that crashes leaves the record
//! behind until it is removed with [`AdvisoryLock::break_lock`].

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use gmanvault_common::{Error, Identity, Result};

/// Lock record location for a single container.
#[derive(Debug, Clone)]
pub struct AdvisoryLock {
    path: PathBuf,
}

/// Guard for a claimed lock. Removes the record when released or dropped.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    holder: Identity,
    released: bool,
}

impl AdvisoryLock {
    /// Lock record at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the lock record.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Atomically create the lock record and write `identity` into it.
    ///
    /// # Errors
    /// - `Error::Busy` with the recorded holder if the record already exists
    /// - `Error::Io` for any other filesystem failure
    pub fn claim(&self, identity: &Identity) -> Result<LockGuard> {
        // A holder may release between our failed create and the read of its
        // identity; one retry covers that window.
        for _ in 0..2 {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.path)
            {
                Ok(mut file) => {
                    if let Err(e) = file.write_all(identity.as_str().as_bytes()) {
                        drop(file);
                        let _ = fs::remove_file(&self.path);
                        return Err(Error::Io(e));
                    }
                    debug!(path = %self.path.display(), holder = %identity, "Lock claimed");
                    return Ok(LockGuard {
                        path: self.path.clone(),
                        holder: identity.clone(),
                        released: false,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if let Some(holder) = self.holder()? {
                        info!(path = %self.path.display(), holder = %holder, "Lock is held");
                        return Err(Error::Busy { holder });
                    }
                }
                Err(e) => return Err(Error::Io(e)),
            }
        }

        Err(Error::Busy {
            holder: Identity::UNKNOWN.to_string(),
        })
    }

    /// Identity recorded in the lock record, if the record exists.
    pub fn holder(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(content) => {
                let holder = content.trim();
                if holder.is_empty() {
                    Ok(Some(Identity::UNKNOWN.to_string()))
                } else {
                    Ok(Some(holder.to_string()))
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Remove a lock record regardless of who holds it.
    ///
    /// Meant for clearing records orphaned by a crashed session. Returns the
    /// identity that was recorded, or `None` if there was no record.
    pub fn break_lock(&self) -> Result<Option<String>> {
        let holder = self.holder()?;
        if let Some(holder) = &holder {
            match fs::remove_file(&self.path) {
                Ok(()) => warn!(path = %self.path.display(), holder = %holder, "Lock broken"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(Error::Io(e)),
            }
        }
        Ok(holder)
    }
}

impl LockGuard {
    /// Path of the lock record.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Identity this lock was claimed with.
    pub fn holder(&self) -> &Identity {
        &self.holder
    }

    /// Remove the lock record.
    pub fn release(mut self) -> Result<()> {
        self.remove()
    }

    fn remove(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "Lock released");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(path = %self.path.display(), "Lock record already gone");
                Ok(())
            }
            Err(e) => Err(Error::Io(e)),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = self.remove() {
            warn!(path = %self.path.display(), error = %e, "Failed to release lock");
        }
    }
}
