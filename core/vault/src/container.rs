//! Container file format.
//!
//! A container is `[salt: 25 bytes][token: 0..N bytes]`. The salt is written
//! once when the container is born and never changes; an empty token region
//! marks a container that has not been sealed with data yet.

use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::config::VaultOptions;
use crate::lock::AdvisoryLock;
use gmanvault_common::{Error, Result};
use gmanvault_crypto::{Salt, SALT_LENGTH};

/// Handle on a container file and its persisted salt.
#[derive(Debug, Clone)]
pub struct Container {
    path: PathBuf,
    salt: Salt,
}

/// Summary of a container on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    /// Total file size in bytes.
    pub size: u64,
    /// Whether the token region is empty.
    pub fresh: bool,
    /// Identity recorded in the lock record, if locked.
    pub lock_holder: Option<String>,
}

impl Container {
    /// Open the container at `path`, creating it with a new salt if it does
    /// not exist yet.
    ///
    /// Returns the container and whether this call created it. A new
    /// container is staged in a temporary sibling and linked into place
    /// only if `path` is still free, so a concurrent opener never sees a
    /// partially written header.
    pub fn open_or_create(path: impl AsRef<Path>) -> Result<(Self, bool)> {
        let path = path.as_ref().to_path_buf();

        let salt = Salt::generate();
        let mut tmp = NamedTempFile::new_in(parent_dir(&path))?;
        tmp.write_all(salt.as_bytes())?;
        tmp.as_file().sync_all()?;

        match tmp.persist_noclobber(&path) {
            Ok(_) => {
                info!(path = %path.display(), "Created new container");
                Ok((Self { path, salt }, true))
            }
            Err(e) if e.error.kind() == ErrorKind::AlreadyExists => {
                Ok((Self::open(path)?, false))
            }
            Err(e) => Err(Error::Io(e.error)),
        }
    }

    /// Open an existing container, reading its salt.
    ///
    /// # Errors
    /// - `Error::Io` if the file cannot be read
    /// - `Error::InvalidInput` if the file is shorter than the salt
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut header = Vec::with_capacity(SALT_LENGTH);
        fs::File::open(&path)?
            .take(SALT_LENGTH as u64)
            .read_to_end(&mut header)?;
        let salt = Salt::from_prefix(&header)?;
        debug!(path = %path.display(), "Opened container");
        Ok(Self { path, salt })
    }

    /// Container file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persisted salt.
    pub fn salt(&self) -> &Salt {
        &self.salt
    }

    /// Read the token region (everything after the salt).
    pub fn read_token(&self) -> Result<Vec<u8>> {
        let data = fs::read(&self.path)?;
        let salt = Salt::from_prefix(&data)?;
        if salt != self.salt {
            return Err(Error::InvalidInput(format!(
                "Container salt changed on disk: {}",
                self.path.display()
            )));
        }
        Ok(data[SALT_LENGTH..].to_vec())
    }

    /// Replace the container contents with `[salt][token]`.
    ///
    /// The new contents are written to a temporary sibling and renamed over
    /// the container, so a crash leaves either the old or the new version.
    pub fn write_token(&self, token: &[u8]) -> Result<()> {
        let mut tmp = NamedTempFile::new_in(parent_dir(&self.path))?;
        tmp.write_all(self.salt.as_bytes())?;
        tmp.write_all(token)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| Error::Io(e.error))?;

        debug!(path = %self.path.display(), bytes = token.len(), "Container rewritten");
        Ok(())
    }

    /// Remove a container that was never sealed.
    ///
    /// Only a file still holding nothing but this container's salt is
    /// removed; anything else is left alone.
    pub fn discard(self) -> Result<()> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(Error::Io(e)),
        };
        if data != self.salt.as_bytes() {
            return Err(Error::InvalidState(format!(
                "Container is no longer fresh, keeping it: {}",
                self.path.display()
            )));
        }

        fs::remove_file(&self.path)?;
        debug!(path = %self.path.display(), "Discarded fresh container");
        Ok(())
    }

    /// Describe the container at `path` without opening a session.
    pub fn inspect(path: impl AsRef<Path>, options: &VaultOptions) -> Result<ContainerInfo> {
        let path = path.as_ref();
        let metadata = match fs::metadata(path) {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::NotFound(format!(
                    "Container not found: {}",
                    path.display()
                )))
            }
            Err(e) => return Err(Error::Io(e)),
        };
        if metadata.len() < SALT_LENGTH as u64 {
            return Err(Error::InvalidInput(format!(
                "Not a container, too short: {}",
                path.display()
            )));
        }

        let lock_holder = AdvisoryLock::new(options.lock_path(path)).holder()?;

        Ok(ContainerInfo {
            size: metadata.len(),
            fresh: metadata.len() == SALT_LENGTH as u64,
            lock_holder,
        })
    }
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}
