//! Common utilities and types shared across the gmanvault crates.
//!
//! This module provides the error taxonomy every vault operation reports
//! through, plus the small value types that cross crate boundaries.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::Identity;
