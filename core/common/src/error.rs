//! Common error types for gmanvault.

use thiserror::Error;

/// Top-level error type for vault operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Caller supplied an unusable setup (credentials, options, keyfile).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The container is locked by another session.
    #[error("Vault is locked by {holder}")]
    Busy {
        /// Identity recorded in the lock file by the current holder.
        holder: String,
    },

    /// Ciphertext could not be authenticated: wrong key or damaged data.
    #[error("Decryption failed: {0}")]
    Decryption(String),

    /// Cryptographic primitive was misused (bad key length and similar).
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Operation is not valid in the current session state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),
}

impl Error {
    /// Whether this error reports lock contention.
    pub fn is_busy(&self) -> bool {
        matches!(self, Error::Busy { .. })
    }

    /// Identity of the lock holder, for `Busy` errors.
    pub fn holder(&self) -> Option<&str> {
        match self {
            Error::Busy { holder } => Some(holder),
            _ => None,
        }
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
