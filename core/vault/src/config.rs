//! Session options and on-disk naming conventions.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use gmanvault_common::{Error, Identity, Result};
use gmanvault_crypto::KdfParams;

/// Conventional extension for container files.
pub const CONTAINER_EXTENSION: &str = "gmandb";

/// Default extension of the lock record next to a container.
pub const LOCK_EXTENSION: &str = "lock";

/// Default extension of the decrypted payload file.
pub const PAYLOAD_EXTENSION: &str = "sqlite";

/// Default suffix of scratch directory names.
pub const WORKSPACE_SUFFIX: &str = "-gman";

/// Prefix of the plaintext file inside a workspace.
pub const PAYLOAD_PREFIX: &str = "gman";

/// Options controlling how a vault session lays out its files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultOptions {
    /// Extension used for the lock record.
    pub lock_extension: String,
    /// Extension of the plaintext payload inside the workspace.
    pub payload_extension: String,
    /// Suffix for scratch directory names.
    pub workspace_suffix: String,
    /// Parent directory for scratch directories (system temp dir if unset).
    pub workspace_root: Option<PathBuf>,
    /// Identity override; the current user is used if unset.
    pub identity: Option<Identity>,
    /// Password key derivation parameters.
    pub kdf: KdfParams,
    /// Create a missing keyfile instead of failing.
    pub provision_keyfile: bool,
}

impl Default for VaultOptions {
    fn default() -> Self {
        Self {
            lock_extension: LOCK_EXTENSION.to_string(),
            payload_extension: PAYLOAD_EXTENSION.to_string(),
            workspace_suffix: WORKSPACE_SUFFIX.to_string(),
            workspace_root: None,
            identity: None,
            kdf: KdfParams::default(),
            provision_keyfile: true,
        }
    }
}

impl VaultOptions {
    /// Identity this session will claim the lock with.
    pub fn resolve_identity(&self) -> Identity {
        self.identity.clone().unwrap_or_else(Identity::current)
    }

    /// Path of the lock record for `container`.
    pub fn lock_path(&self, container: &Path) -> PathBuf {
        container.with_extension(&self.lock_extension)
    }

    /// File name of the plaintext payload for `identity`.
    pub fn payload_file_name(&self, identity: &Identity) -> String {
        format!("{}-{}.{}", PAYLOAD_PREFIX, identity, self.payload_extension)
    }

    /// Check the options for values that would produce clashing paths.
    ///
    /// # Errors
    /// - Empty lock or payload extension
    /// - Lock extension equal to the container extension
    pub fn validate(&self) -> Result<()> {
        if self.lock_extension.is_empty() {
            return Err(Error::Configuration(
                "Lock extension cannot be empty".to_string(),
            ));
        }
        if self.lock_extension == CONTAINER_EXTENSION {
            return Err(Error::Configuration(format!(
                "Lock extension cannot be '{}'",
                CONTAINER_EXTENSION
            )));
        }
        if self.payload_extension.is_empty() {
            return Err(Error::Configuration(
                "Payload extension cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Serialize options to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Configuration(e.to_string()))
    }

    /// Deserialize options from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let options: Self =
            serde_json::from_str(json).map_err(|e| Error::Configuration(e.to_string()))?;
        options.validate()?;
        Ok(options)
    }
}
