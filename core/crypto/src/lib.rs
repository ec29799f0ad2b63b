//! Cryptographic primitives for gmanvault.
//!
//! This module provides:
//! - Key derivation using PBKDF2-HMAC-SHA256
//! - Authenticated encryption using XChaCha20-Poly1305
//! - Key types with automatic zeroization
//! - `SealedKey`, which keeps a key wrapped in memory between uses
//!
//! # Security Guarantees
//! - All key material is zeroized on drop
//! - No plaintext or key material is ever logged
//! - `SealedKey` only hides keys from casual inspection; it is no defence
//!   against code running inside the same process

pub mod aead;
pub mod kdf;
pub mod keys;
pub mod sealed;

pub use aead::{decrypt, encrypt};
pub use kdf::{derive_key, KdfParams, DEFAULT_ITERATIONS};
pub use keys::{MasterKey, Salt, KEY_LENGTH, SALT_LENGTH};
pub use sealed::SealedKey;
