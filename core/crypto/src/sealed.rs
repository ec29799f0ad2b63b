//! In-memory key wrapping.
//!
//! A `SealedKey` keeps the container key encrypted under an ephemeral
//! wrapping key that is generated per instance and never written anywhere.
//! The clear key only exists inside [`SealedKey::with_key`] or as the
//! short-lived [`MasterKey`] returned by [`SealedKey::unseal`], both of which
//! zeroize on drop.

use std::fmt;
use zeroize::Zeroizing;

use crate::aead;
use crate::keys::MasterKey;
use gmanvault_common::Result;

/// A symmetric key held wrapped under a process-local ephemeral key.
pub struct SealedKey {
    wrapping_key: MasterKey,
    token: Vec<u8>,
}

impl SealedKey {
    /// Wrap `key`, consuming it so the clear copy is dropped (and zeroized)
    /// before this returns.
    pub fn seal(key: MasterKey) -> Result<Self> {
        let wrapping_key = MasterKey::generate();
        let token = aead::encrypt(wrapping_key.as_bytes(), key.as_bytes())?;
        drop(key);
        Ok(Self {
            wrapping_key,
            token,
        })
    }

    /// Unwrap the key.
    ///
    /// # Security
    /// The returned key must be dropped as soon as the single operation it
    /// was unwrapped for is done.
    pub fn unseal(&self) -> Result<MasterKey> {
        let raw = Zeroizing::new(aead::decrypt(self.wrapping_key.as_bytes(), &self.token)?);
        MasterKey::from_slice(&raw)
    }

    /// Run `f` with the unwrapped key, dropping it afterwards.
    pub fn with_key<T>(&self, f: impl FnOnce(&MasterKey) -> Result<T>) -> Result<T> {
        let key = self.unseal()?;
        f(&key)
    }
}

impl fmt::Debug for SealedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SealedKey([REDACTED])")
    }
}
