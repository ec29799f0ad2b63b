//! Key derivation using PBKDF2-HMAC-SHA256.
//!
//! The iteration count and salt length are part of the container format:
//! changing either makes existing containers unreadable.

use pbkdf2::pbkdf2_hmac;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::keys::{MasterKey, Salt, KEY_LENGTH};
use gmanvault_common::{Error, Result};

/// Iteration count used by every container written so far.
pub const DEFAULT_ITERATIONS: u32 = 150_000;

/// Parameters for PBKDF2 key derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Number of HMAC-SHA256 iterations.
    pub iterations: u32,
}

impl KdfParams {
    /// Parameters with a custom iteration count.
    pub fn new(iterations: u32) -> Self {
        Self { iterations }
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::new(DEFAULT_ITERATIONS)
    }
}

/// Derive a master key from a password and the container salt.
///
/// # Preconditions
/// - `password` must not be empty
/// - `params.iterations` must be at least 1
///
/// # Postconditions
/// - The derived key is deterministic given the same inputs
///
/// # Security
/// - Password is not stored or logged
pub fn derive_key(password: &[u8], salt: &Salt, params: &KdfParams) -> Result<MasterKey> {
    if password.is_empty() {
        return Err(Error::Configuration("Password cannot be empty".to_string()));
    }
    if params.iterations == 0 {
        return Err(Error::Configuration(
            "KDF iteration count must be positive".to_string(),
        ));
    }

    let mut key_bytes = pbkdf2_sha256(password, salt.as_bytes(), params.iterations);
    let key = MasterKey::from_bytes(key_bytes);
    key_bytes.zeroize();

    Ok(key)
}

fn pbkdf2_sha256(password: &[u8], salt: &[u8], iterations: u32) -> [u8; KEY_LENGTH] {
    let mut out = [0u8; KEY_LENGTH];
    pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut out);
    out
}
