//! Encrypted vault sessions for gmanvault.
//!
//! This module provides:
//! - The container format (`[salt][token]`) with crash-safe rewrites
//! - Credential resolution from keyfiles or passwords
//! - An advisory lock record that keeps a container single-writer
//! - A private workspace holding the decrypted payload while a session is open
//! - `VaultSession`, which ties these together into open/decrypt/encrypt
//!
//! # Architecture
//! Everything here is synchronous blocking file I/O. Password derivation is
//! CPU-heavy; interactive callers should run [`VaultSession::open`] off
//! their UI thread.

pub mod config;
pub mod container;
pub mod credential;
pub mod lock;
pub mod session;
pub mod workspace;

pub use config::{VaultOptions, CONTAINER_EXTENSION};
pub use container::{Container, ContainerInfo};
pub use credential::{create_keyfile, load_keyfile, Credential};
pub use lock::{AdvisoryLock, LockGuard};
pub use session::{SessionState, VaultSession};
pub use workspace::Workspace;
