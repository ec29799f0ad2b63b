//! Vault session management.
//!
//! A session turns a container into a locked, single-writer working copy:
//! `open` claims the lock and prepares a workspace, `decrypt` places the
//! plaintext payload in the workspace, and `encrypt` seals it back into the
//! container and releases the lock.
//!
//! ```text
//! open() -> Locked --decrypt()--> Open --encrypt()--> Closed
//!             |                     |
//!             +------release()------+-------------> Closed
//! ```
//!
//! A failed `decrypt` leaves the session `Locked`. Dropping a session that
//! is not `Closed` runs `release`, so the lock record is never leaked by an
//! early return.

use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

use crate::config::VaultOptions;
use crate::container::Container;
use crate::credential::Credential;
use crate::lock::{AdvisoryLock, LockGuard};
use crate::workspace::Workspace;
use gmanvault_common::{Error, Identity, Result};
use gmanvault_crypto::{aead, SealedKey};

/// State of the vault session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Lock held, payload not decrypted yet.
    Locked,
    /// Payload decrypted into the workspace.
    Open,
    /// Lock released. Terminal.
    Closed,
}

/// Open vault session over one container.
pub struct VaultSession {
    /// Container being worked on.
    container: Container,
    /// Identity written into the lock record.
    identity: Identity,
    /// Key for the container, sealed while at rest in memory.
    key: SealedKey,
    /// Held lock; `None` once released.
    lock: Option<LockGuard>,
    /// Scratch directory holding the plaintext; `None` once destroyed.
    workspace: Option<Workspace>,
    /// Current state.
    state: SessionState,
}

impl VaultSession {
    /// Open a session on `container_path`, creating the container if needed.
    ///
    /// # Postconditions
    /// - Session is `Locked`; call [`decrypt`](Self::decrypt) next
    /// - The lock record carries this session's identity
    ///
    /// # Errors
    /// - `Error::Configuration` for unusable options or credentials
    /// - `Error::Busy` if another session holds the lock; nothing is left
    ///   behind in that case
    /// - `Error::Io` for filesystem failures
    ///
    /// A container created by this call is removed again if the credential
    /// cannot be resolved.
    pub fn open(
        container_path: impl AsRef<Path>,
        credential: &Credential,
        options: &VaultOptions,
    ) -> Result<Self> {
        options.validate()?;
        let container_path = container_path.as_ref();
        let lock_path = options.lock_path(container_path);
        if lock_path == container_path {
            return Err(Error::Configuration(format!(
                "Container path collides with its lock record: {}",
                container_path.display()
            )));
        }

        let (container, created) = Container::open_or_create(container_path)?;
        let key = match credential.resolve(container.salt(), options) {
            Ok(key) => key,
            Err(e) => {
                if created {
                    if let Err(cleanup) = container.discard() {
                        warn!(error = %cleanup, "Failed to remove unused container");
                    }
                }
                return Err(e);
            }
        };

        let identity = options.resolve_identity();
        let lock = AdvisoryLock::new(lock_path).claim(&identity)?;
        // The guard releases the lock if this fails.
        let workspace = Workspace::create(options, &identity)?;

        info!(
            path = %container_path.display(),
            identity = %identity,
            "Vault session opened"
        );

        Ok(Self {
            container,
            identity,
            key,
            lock: Some(lock),
            workspace: Some(workspace),
            state: SessionState::Locked,
        })
    }

    /// Decrypt the container into the workspace.
    ///
    /// Returns the path of the plaintext file. A fresh container has nothing
    /// to decrypt and leaves the file absent. Calling this again while
    /// `Open` returns the same path without touching the container.
    ///
    /// # Errors
    /// - `Error::Decryption` for a wrong key or damaged container; the
    ///   session stays `Locked`
    /// - `Error::InvalidState` after the session is closed
    pub fn decrypt(&mut self) -> Result<PathBuf> {
        match self.state {
            SessionState::Locked => {}
            SessionState::Open => return self.workspace_payload(),
            SessionState::Closed => {
                return Err(Error::InvalidState("Session is closed".to_string()))
            }
        }

        let token = self.container.read_token()?;
        if token.is_empty() {
            debug!(
                path = %self.container.path().display(),
                "Fresh container, nothing to decrypt"
            );
        } else {
            let workspace = self.workspace()?;
            let plaintext = self.key.with_key(|key| aead::decrypt(key.as_bytes(), &token));
            let plaintext = match plaintext {
                Ok(p) => Zeroizing::new(p),
                Err(e) => {
                    warn!(
                        path = %self.container.path().display(),
                        "Container could not be decrypted"
                    );
                    return Err(e);
                }
            };
            workspace.write_payload(&plaintext)?;
        }

        self.state = SessionState::Open;
        info!(path = %self.container.path().display(), "Vault decrypted");
        self.workspace_payload()
    }

    /// Seal the workspace payload into the container and close the session.
    ///
    /// Steps, in order: read the payload, destroy the workspace, encrypt,
    /// replace the container, release the lock. Once the workspace is gone
    /// the session ends up `Closed` whatever happens next; if the container
    /// rewrite fails, the previous container contents stay in place and the
    /// unsealed edits are lost.
    ///
    /// # Errors
    /// - `Error::InvalidState` unless the session is `Open`
    pub fn encrypt(&mut self) -> Result<()> {
        if self.state != SessionState::Open {
            return Err(Error::InvalidState(format!(
                "Cannot seal a session in state {:?}",
                self.state
            )));
        }

        let workspace = self
            .workspace
            .take()
            .ok_or_else(|| Error::InvalidState("Workspace already destroyed".to_string()))?;
        let plaintext = match workspace.read_payload() {
            Ok(p) => p,
            Err(e) => {
                self.workspace = Some(workspace);
                return Err(e);
            }
        };

        let destroyed = workspace.destroy();
        let sealed = self
            .key
            .with_key(|key| aead::encrypt(key.as_bytes(), &plaintext))
            .and_then(|token| self.container.write_token(&token));
        drop(plaintext);
        let released = self.release_lock();
        self.state = SessionState::Closed;

        if let Err(e) = &sealed {
            error!(
                path = %self.container.path().display(),
                error = %e,
                "Failed to seal vault"
            );
        }
        sealed?;
        destroyed?;
        released?;

        info!(path = %self.container.path().display(), "Vault sealed");
        Ok(())
    }

    /// Close the session without sealing.
    ///
    /// Destroys the workspace (discarding any unsealed plaintext) and
    /// releases the lock. The container is left untouched. Calling this on a
    /// closed session does nothing.
    pub fn release(&mut self) -> Result<()> {
        if self.state == SessionState::Closed {
            return Ok(());
        }

        let destroyed = match self.workspace.take() {
            Some(workspace) => workspace.destroy(),
            None => Ok(()),
        };
        let released = self.release_lock();
        self.state = SessionState::Closed;

        info!(
            path = %self.container.path().display(),
            "Vault session released without sealing"
        );
        destroyed?;
        released
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the payload is decrypted and editable.
    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }

    /// Plaintext file path while `Open`.
    pub fn plaintext_path(&self) -> Option<&Path> {
        match self.state {
            SessionState::Open => self.workspace.as_ref().map(|w| w.payload_path()),
            _ => None,
        }
    }

    /// Container file path.
    pub fn container_path(&self) -> &Path {
        self.container.path()
    }

    /// Identity this session holds the lock under.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    fn workspace(&self) -> Result<&Workspace> {
        self.workspace
            .as_ref()
            .ok_or_else(|| Error::InvalidState("Workspace already destroyed".to_string()))
    }

    fn workspace_payload(&self) -> Result<PathBuf> {
        Ok(self.workspace()?.payload_path().to_path_buf())
    }

    fn release_lock(&mut self) -> Result<()> {
        match self.lock.take() {
            Some(lock) => lock.release(),
            None => Ok(()),
        }
    }
}

impl Drop for VaultSession {
    fn drop(&mut self) {
        if self.state != SessionState::Closed {
            warn!(
                path = %self.container.path().display(),
                state = ?self.state,
                "Vault session dropped without sealing, discarding workspace"
            );
            if let Err(e) = self.release() {
                warn!(error = %e, "Cleanup of dropped session failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gmanvault_crypto::{KdfParams, SALT_LENGTH};
    use proptest::prelude::*;
    use std::fs;
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        dir: TempDir,
        scratch: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                dir: tempdir().unwrap(),
                scratch: tempdir().unwrap(),
            }
        }

        fn container(&self) -> PathBuf {
            self.dir.path().join("v1.vault")
        }

        fn options(&self, identity: &str) -> VaultOptions {
            VaultOptions {
                workspace_root: Some(self.scratch.path().to_path_buf()),
                identity: Some(Identity::new(identity).unwrap()),
                kdf: KdfParams::new(1_000),
                ..Default::default()
            }
        }

        fn open(&self, credential: &Credential, identity: &str) -> Result<VaultSession> {
            VaultSession::open(self.container(), credential, &self.options(identity))
        }

        fn lock_path(&self) -> PathBuf {
            self.dir.path().join("v1.lock")
        }

        fn seal(&self, credential: &Credential, payload: &[u8]) {
            let mut session = self.open(credential, "alice").unwrap();
            let path = session.decrypt().unwrap();
            fs::write(&path, payload).unwrap();
            session.encrypt().unwrap();
        }

        fn read(&self, credential: &Credential) -> Result<Vec<u8>> {
            let mut session = self.open(credential, "alice")?;
            let path = session.decrypt()?;
            let data = fs::read(&path).unwrap_or_default();
            session.release()?;
            Ok(data)
        }

        fn scratch_is_empty(&self) -> bool {
            fs::read_dir(self.scratch.path()).unwrap().next().is_none()
        }
    }

    #[test]
    fn test_fresh_container() {
        let fx = Fixture::new();
        let credential = Credential::password("Sn0wman!");

        let mut session = fx.open(&credential, "alice").unwrap();
        assert_eq!(session.state(), SessionState::Locked);
        assert_eq!(fs::metadata(fx.container()).unwrap().len(), SALT_LENGTH as u64);

        let path = session.decrypt().unwrap();
        assert!(session.is_open());
        assert!(!path.exists());
        assert_eq!(path.file_name().unwrap(), "gman-alice.sqlite");
        assert_eq!(session.plaintext_path(), Some(path.as_path()));
    }

    #[test]
    fn test_password_scenario() {
        let fx = Fixture::new();
        let good = Credential::password("Sn0wman!");

        fx.seal(&good, b"grades=42");
        let salt_before = fs::read(fx.container()).unwrap()[..SALT_LENGTH].to_vec();

        assert_eq!(fx.read(&good).unwrap(), b"grades=42");

        let err = fx.read(&Credential::password("wrong")).unwrap_err();
        assert!(matches!(err, Error::Decryption(_)));

        let salt_after = fs::read(fx.container()).unwrap()[..SALT_LENGTH].to_vec();
        assert_eq!(salt_before, salt_after);
    }

    #[test]
    fn test_keyfile_roundtrip_and_wrong_keyfile() {
        let fx = Fixture::new();
        let keyfile = fx.dir.path().join("v1.key");
        let other = fx.dir.path().join("other.key");
        let credential = Credential::keyfile(&keyfile);

        fx.seal(&credential, b"keyfile payload");
        assert!(keyfile.exists());

        assert_eq!(fx.read(&credential).unwrap(), b"keyfile payload");

        let err = fx.read(&Credential::keyfile(&other)).unwrap_err();
        assert!(matches!(err, Error::Decryption(_)));
    }

    #[test]
    fn test_decrypt_failure_keeps_lock_until_release() {
        let fx = Fixture::new();
        fx.seal(&Credential::password("right"), b"data");

        let mut session = fx.open(&Credential::password("wrong"), "alice").unwrap();
        assert!(matches!(session.decrypt(), Err(Error::Decryption(_))));
        assert_eq!(session.state(), SessionState::Locked);
        assert!(fx.lock_path().exists());
        assert!(matches!(session.encrypt(), Err(Error::InvalidState(_))));

        session.release().unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!fx.lock_path().exists());
        assert!(fx.scratch_is_empty());
    }

    #[test]
    fn test_lock_exclusivity() {
        let fx = Fixture::new();
        let credential = Credential::password("Sn0wman!");

        let mut first = fx.open(&credential, "alice").unwrap();
        first.decrypt().unwrap();

        let err = fx.open(&credential, "bob").err().unwrap();
        assert_eq!(err.holder(), Some("alice"));
        assert_eq!(
            fs::read_to_string(fx.lock_path()).unwrap(),
            "alice"
        );

        first.encrypt().unwrap();

        let second = fx.open(&credential, "bob").unwrap();
        assert_eq!(second.identity().as_str(), "bob");
    }

    #[test]
    fn test_busy_open_allocates_no_workspace() {
        let fx = Fixture::new();
        let credential = Credential::password("Sn0wman!");

        let _first = fx.open(&credential, "alice").unwrap();
        let entries_before = fs::read_dir(fx.scratch.path()).unwrap().count();

        assert!(fx.open(&credential, "bob").is_err());
        assert_eq!(fs::read_dir(fx.scratch.path()).unwrap().count(), entries_before);
    }

    #[test]
    fn test_encrypt_cleans_up() {
        let fx = Fixture::new();
        let mut session = fx.open(&Credential::password("pw"), "alice").unwrap();
        let path = session.decrypt().unwrap();
        fs::write(&path, b"payload").unwrap();

        session.encrypt().unwrap();

        assert_eq!(session.state(), SessionState::Closed);
        assert!(!path.exists());
        assert!(fx.scratch_is_empty());
        assert!(!fx.lock_path().exists());
        assert_eq!(session.plaintext_path(), None);
    }

    #[test]
    fn test_closed_is_terminal() {
        let fx = Fixture::new();
        let mut session = fx.open(&Credential::password("pw"), "alice").unwrap();
        session.decrypt().unwrap();
        session.encrypt().unwrap();

        assert!(matches!(session.decrypt(), Err(Error::InvalidState(_))));
        assert!(matches!(session.encrypt(), Err(Error::InvalidState(_))));
        assert!(session.release().is_ok());
    }

    #[test]
    fn test_decrypt_twice_returns_same_path() {
        let fx = Fixture::new();
        fx.seal(&Credential::password("pw"), b"original");

        let mut session = fx.open(&Credential::password("pw"), "alice").unwrap();
        let path = session.decrypt().unwrap();
        fs::write(&path, b"edited").unwrap();

        assert_eq!(session.decrypt().unwrap(), path);
        assert_eq!(fs::read(&path).unwrap(), b"edited");
    }

    #[test]
    fn test_sealing_untouched_fresh_container() {
        let fx = Fixture::new();
        let credential = Credential::password("pw");
        let mut session = fx.open(&credential, "alice").unwrap();
        session.decrypt().unwrap();
        session.encrypt().unwrap();

        assert!(fs::metadata(fx.container()).unwrap().len() > SALT_LENGTH as u64);
        assert_eq!(fx.read(&credential).unwrap(), b"");
    }

    #[test]
    fn test_release_discards_edits() {
        let fx = Fixture::new();
        let credential = Credential::password("pw");
        fx.seal(&credential, b"kept");

        let mut session = fx.open(&credential, "alice").unwrap();
        let path = session.decrypt().unwrap();
        fs::write(&path, b"discarded").unwrap();
        session.release().unwrap();

        assert_eq!(fx.read(&credential).unwrap(), b"kept");
    }

    #[test]
    fn test_drop_releases_lock_and_workspace() {
        let fx = Fixture::new();
        let credential = Credential::password("pw");
        {
            let mut session = fx.open(&credential, "alice").unwrap();
            session.decrypt().unwrap();
        }

        assert!(!fx.lock_path().exists());
        assert!(fx.scratch_is_empty());
        assert!(fx.open(&credential, "bob").is_ok());
    }

    #[test]
    fn test_orphaned_lock_blocks_open() {
        let fx = Fixture::new();
        fs::write(fx.lock_path(), "crashed").unwrap();

        let err = fx.open(&Credential::password("pw"), "alice").err().unwrap();
        assert_eq!(err.holder(), Some("crashed"));

        AdvisoryLock::new(fx.lock_path()).break_lock().unwrap();
        assert!(fx.open(&Credential::password("pw"), "alice").is_ok());
    }

    #[test]
    fn test_lock_path_collision_rejected() {
        let fx = Fixture::new();
        let container = fx.lock_path();

        let credential = Credential::password("pw");
        let result = VaultSession::open(&container, &credential, &fx.options("alice"));

        assert!(matches!(result, Err(Error::Configuration(_))));
        assert!(!container.exists());
    }

    #[test]
    fn test_failed_credential_removes_new_container() {
        let fx = Fixture::new();

        let err = fx.open(&Credential::password(""), "alice").err().unwrap();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(!fx.container().exists());

        let missing = Credential::keyfile(fx.dir.path().join("typo.key"));
        let options = VaultOptions {
            provision_keyfile: false,
            ..fx.options("alice")
        };
        let err = VaultSession::open(fx.container(), &missing, &options).err().unwrap();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(!fx.container().exists());
        assert!(!fx.lock_path().exists());
        assert!(fx.scratch_is_empty());
    }

    #[test]
    fn test_failed_credential_keeps_existing_container() {
        let fx = Fixture::new();
        let credential = Credential::password("pw");
        fx.seal(&credential, b"kept");

        assert!(fx.open(&Credential::password(""), "alice").is_err());

        assert!(fx.container().exists());
        assert_eq!(fx.read(&credential).unwrap(), b"kept");
    }

    #[test]
    fn test_failed_rewrite_still_closes_session() {
        let fx = Fixture::new();
        let credential = Credential::password("pw");
        let mut session = fx.open(&credential, "alice").unwrap();
        let path = session.decrypt().unwrap();
        fs::write(&path, b"unsealed edits").unwrap();

        // A non-empty directory at the container path makes the final rename fail.
        fs::remove_file(fx.container()).unwrap();
        fs::create_dir(fx.container()).unwrap();
        fs::write(fx.container().join("keep"), b"old").unwrap();

        assert!(matches!(session.encrypt(), Err(Error::Io(_))));

        assert_eq!(session.state(), SessionState::Closed);
        assert!(!fx.lock_path().exists());
        assert!(fx.scratch_is_empty());
        assert_eq!(fs::read(fx.container().join("keep")).unwrap(), b"old");
        let entries: Vec<_> = fs::read_dir(fx.dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, ["v1.vault"]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn test_roundtrip_any_payload(payload in proptest::collection::vec(any::<u8>(), 0..2048)) {
            let fx = Fixture::new();
            let credential = Credential::password("Sn0wman!");

            fx.seal(&credential, &payload);

            prop_assert_eq!(fx.read(&credential).unwrap(), payload);
        }
    }
}
