//! Authenticated encryption using XChaCha20-Poly1305.
//!
//! Every token produced here is self-describing: the random 24-byte nonce
//! travels in front of the ciphertext, so a token plus the key is all that
//! is needed to decrypt it.

use chacha20poly1305::{
    aead::{generic_array::GenericArray, Aead, AeadCore, KeyInit, OsRng},
    XChaCha20Poly1305,
};

use crate::keys::KEY_LENGTH;
use gmanvault_common::{Error, Result};

/// Nonce size for XChaCha20-Poly1305 (24 bytes).
pub const NONCE_SIZE: usize = 24;

/// Authentication tag size (16 bytes).
pub const TAG_SIZE: usize = 16;

/// Smallest possible token: nonce and tag around an empty plaintext.
pub const MIN_TOKEN_SIZE: usize = NONCE_SIZE + TAG_SIZE;

fn cipher_for(key: &[u8]) -> Result<XChaCha20Poly1305> {
    if key.len() != KEY_LENGTH {
        return Err(Error::Crypto(format!(
            "Invalid key length: expected {}, got {}",
            KEY_LENGTH,
            key.len()
        )));
    }
    Ok(XChaCha20Poly1305::new(GenericArray::from_slice(key)))
}

/// Encrypt plaintext into a token.
///
/// # Postconditions
/// - Returns nonce || ciphertext || tag
/// - The nonce is randomly generated
/// - The token length is plaintext length + MIN_TOKEN_SIZE
///
/// # Errors
/// - Returns error if key length is incorrect
pub fn encrypt(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = cipher_for(key)?;
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))?;

    let mut token = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    token.extend_from_slice(&nonce);
    token.extend_from_slice(&ciphertext);

    Ok(token)
}

/// Authenticate and decrypt a token.
///
/// # Errors
/// - `Error::Crypto` if key length is incorrect
/// - `Error::Decryption` if the token is truncated, was produced under a
///   different key, or has been modified
pub fn decrypt(key: &[u8], token: &[u8]) -> Result<Vec<u8>> {
    let cipher = cipher_for(key)?;

    if token.len() < MIN_TOKEN_SIZE {
        return Err(Error::Decryption(format!(
            "Token too short: {} bytes",
            token.len()
        )));
    }

    let (nonce_bytes, encrypted) = token.split_at(NONCE_SIZE);
    let nonce = GenericArray::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, encrypted)
        .map_err(|_| Error::Decryption("Authentication failed".to_string()))
}
