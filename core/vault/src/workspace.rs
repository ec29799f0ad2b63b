//! Private scratch directory holding the decrypted payload.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;
use zeroize::Zeroizing;

use crate::config::VaultOptions;
use gmanvault_common::{Error, Identity, Result};

/// Scratch directory owned by one open session.
///
/// The directory name is random, so two workspaces never collide even for
/// the same identity. Only the payload file name is deterministic.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
    payload: PathBuf,
}

impl Workspace {
    /// Allocate a fresh scratch directory for `identity`.
    pub fn create(options: &VaultOptions, identity: &Identity) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.suffix(&options.workspace_suffix);
        let dir = match &options.workspace_root {
            Some(root) => builder.tempdir_in(root)?,
            None => builder.tempdir()?,
        };
        restrict_dir(dir.path())?;

        let payload = dir.path().join(options.payload_file_name(identity));
        debug!(dir = %dir.path().display(), "Workspace created");

        Ok(Self { dir, payload })
    }

    /// Scratch directory path.
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Path of the plaintext payload file.
    pub fn payload_path(&self) -> &Path {
        &self.payload
    }

    /// Write the plaintext payload, readable by the owner only.
    pub fn write_payload(&self, data: &[u8]) -> Result<()> {
        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&self.payload)?;
        file.write_all(data)?;
        file.sync_all()?;
        Ok(())
    }

    /// Read the plaintext payload. A payload that was never written reads
    /// as empty.
    pub fn read_payload(&self) -> Result<Zeroizing<Vec<u8>>> {
        match fs::read(&self.payload) {
            Ok(data) => Ok(Zeroizing::new(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Zeroizing::new(Vec::new())),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Remove the directory and everything in it.
    pub fn destroy(self) -> Result<()> {
        let path = self.dir.path().to_path_buf();
        self.dir.close()?;
        debug!(dir = %path.display(), "Workspace destroyed");
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_dir(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o700))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_dir(_path: &Path) -> Result<()> {
    Ok(())
}
