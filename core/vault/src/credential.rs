//! Credential resolution.
//!
//! A session is unlocked with exactly one of a keyfile or a password. Both
//! paths end in a [`SealedKey`]; the clear key never outlives this module.

use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::config::VaultOptions;
use gmanvault_common::{Error, Result};
use gmanvault_crypto::{derive_key, MasterKey, Salt, SealedKey, KEY_LENGTH};

/// Secret used to unlock a container.
pub enum Credential {
    /// Raw key material stored in a file.
    Keyfile(PathBuf),
    /// Password stretched with the container salt.
    Password(Zeroizing<String>),
}

impl Credential {
    /// Keyfile credential.
    pub fn keyfile(path: impl Into<PathBuf>) -> Self {
        Credential::Keyfile(path.into())
    }

    /// Password credential.
    pub fn password(password: impl Into<String>) -> Self {
        Credential::Password(Zeroizing::new(password.into()))
    }

    /// Build a credential from optional parts, as collected from a form or
    /// command line.
    ///
    /// # Errors
    /// - `Error::Configuration` unless exactly one part is supplied
    pub fn from_parts(keyfile: Option<PathBuf>, password: Option<String>) -> Result<Self> {
        match (keyfile, password) {
            (Some(path), None) => Ok(Self::keyfile(path)),
            (None, Some(password)) => Ok(Self::password(password)),
            (Some(_), Some(password)) => {
                drop(Zeroizing::new(password));
                Err(Error::Configuration(
                    "Provide either a keyfile or a password, not both".to_string(),
                ))
            }
            (None, None) => Err(Error::Configuration(
                "You must provide a keyfile or a password".to_string(),
            )),
        }
    }

    /// Turn this credential into a sealed key for a container with `salt`.
    pub fn resolve(&self, salt: &Salt, options: &VaultOptions) -> Result<SealedKey> {
        let key = match self {
            Credential::Keyfile(path) => {
                if !path.exists() {
                    if !options.provision_keyfile {
                        return Err(Error::NotFound(format!(
                            "Keyfile not found: {}",
                            path.display()
                        )));
                    }
                    provision_keyfile(path)?;
                }
                load_keyfile(path)?
            }
            Credential::Password(password) => {
                debug!(iterations = options.kdf.iterations, "Deriving key from password");
                derive_key(password.as_bytes(), salt, &options.kdf)?
            }
        };
        SealedKey::seal(key)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Keyfile(path) => f.debug_tuple("Keyfile").field(path).finish(),
            Credential::Password(_) => write!(f, "Password([REDACTED])"),
        }
    }
}

/// Write a new random key to `path`.
///
/// # Errors
/// - `Error::Io` with `AlreadyExists` if the file exists; keyfiles are never
///   overwritten
pub fn create_keyfile(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let key = MasterKey::generate();

    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(key.as_bytes())?;
    file.sync_all()?;

    warn!(path = %path.display(), "Created new keyfile; losing it makes the vault unrecoverable");
    Ok(())
}

fn provision_keyfile(path: &Path) -> Result<()> {
    match create_keyfile(path) {
        Err(Error::Io(e)) if e.kind() == ErrorKind::AlreadyExists => Ok(()),
        other => other,
    }
}

/// Read a key from a keyfile.
///
/// Accepts raw 32-byte key material or the URL-safe base64 encoding of it.
pub fn load_keyfile(path: impl AsRef<Path>) -> Result<MasterKey> {
    let path = path.as_ref();
    let data = Zeroizing::new(fs::read(path)?);

    if data.len() == KEY_LENGTH {
        return MasterKey::from_slice(&data);
    }

    let encoded = data.trim_ascii();
    let decoded = URL_SAFE
        .decode(encoded)
        .map(Zeroizing::new)
        .map_err(|_| invalid_keyfile(path))?;
    if decoded.len() != KEY_LENGTH {
        return Err(invalid_keyfile(path));
    }
    MasterKey::from_slice(&decoded)
}

fn invalid_keyfile(path: &Path) -> Error {
    Error::Configuration(format!("Keyfile does not contain a valid key: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gmanvault_crypto::{KdfParams, SALT_LENGTH};
    use tempfile::tempdir;

    fn fast_options() -> VaultOptions {
        VaultOptions {
            kdf: KdfParams::new(1_000),
            ..Default::default()
        }
    }

    #[test]
    fn test_from_parts_exactly_one() {
        assert!(matches!(
            Credential::from_parts(Some("k.key".into()), None),
            Ok(Credential::Keyfile(_))
        ));
        assert!(matches!(
            Credential::from_parts(None, Some("pw".into())),
            Ok(Credential::Password(_))
        ));
        assert!(matches!(
            Credential::from_parts(None, None),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            Credential::from_parts(Some("k.key".into()), Some("pw".into())),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_password_debug_redacted() {
        let credential = Credential::password("Sn0wman!");
        assert_eq!(format!("{:?}", credential), "Password([REDACTED])");
    }

    #[test]
    fn test_password_resolution_deterministic() {
        let salt = Salt::from_bytes([5u8; SALT_LENGTH]);
        let credential = Credential::password("Sn0wman!");

        let a = credential.resolve(&salt, &fast_options()).unwrap();
        let b = credential.resolve(&salt, &fast_options()).unwrap();

        assert_eq!(a.unseal().unwrap().as_bytes(), b.unseal().unwrap().as_bytes());
    }

    #[test]
    fn test_empty_password_rejected() {
        let salt = Salt::generate();
        let result = Credential::password("").resolve(&salt, &fast_options());
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_missing_keyfile_is_provisioned() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vault.key");
        let credential = Credential::keyfile(&path);

        let first = credential.resolve(&Salt::generate(), &fast_options()).unwrap();
        assert_eq!(fs::read(&path).unwrap().len(), KEY_LENGTH);

        // Keyfile key does not depend on the salt.
        let second = credential.resolve(&Salt::generate(), &fast_options()).unwrap();
        assert_eq!(
            first.unseal().unwrap().as_bytes(),
            second.unseal().unwrap().as_bytes()
        );
    }

    #[test]
    fn test_missing_keyfile_without_provisioning() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("typo.key");
        let options = VaultOptions {
            provision_keyfile: false,
            ..fast_options()
        };

        let result = Credential::keyfile(&path).resolve(&Salt::generate(), &options);

        assert!(matches!(result, Err(Error::NotFound(_))));
        assert!(!path.exists());
    }

    #[test]
    fn test_create_keyfile_refuses_overwrite() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vault.key");

        create_keyfile(&path).unwrap();
        let original = fs::read(&path).unwrap();

        assert!(matches!(create_keyfile(&path), Err(Error::Io(_))));
        assert_eq!(fs::read(&path).unwrap(), original);
    }

    #[test]
    fn test_load_raw_keyfile() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("raw.key");
        fs::write(&path, [0x11u8; KEY_LENGTH]).unwrap();

        assert_eq!(load_keyfile(&path).unwrap().as_bytes(), &[0x11u8; KEY_LENGTH]);
    }

    #[test]
    fn test_load_base64_keyfile() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("legacy.key");
        let encoded = URL_SAFE.encode([0x22u8; KEY_LENGTH]);
        assert_eq!(encoded.len(), 44);
        fs::write(&path, format!("{}\n", encoded)).unwrap();

        assert_eq!(load_keyfile(&path).unwrap().as_bytes(), &[0x22u8; KEY_LENGTH]);
    }

    #[test]
    fn test_load_invalid_keyfile() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.key");
        fs::write(&path, b"not a key at all").unwrap();

        assert!(matches!(load_keyfile(&path), Err(Error::Configuration(_))));
    }
}
