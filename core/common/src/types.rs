//! Common types used throughout gmanvault.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the operating user, as written into lock records and used to
/// name the plaintext workspace file.
///
/// Deserializing goes through [`Identity::new`], so names loaded from
/// configuration are checked the same way.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);

impl Identity {
    /// Fallback when no user name can be determined.
    pub const UNKNOWN: &'static str = "unknown";

    /// Create a new Identity from a string.
    ///
    /// # Preconditions
    /// - `name` must be non-empty
    /// - `name` must not contain path separators
    ///
    /// # Errors
    /// - Returns error if the name is empty or contains separators
    pub fn new(name: impl Into<String>) -> crate::Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(crate::Error::InvalidInput(
                "Identity cannot be empty".to_string(),
            ));
        }
        if name.contains('/') || name.contains('\\') {
            return Err(crate::Error::InvalidInput(
                "Identity cannot contain separators".to_string(),
            ));
        }
        Ok(Self(name))
    }

    /// Identity of the user running this process.
    ///
    /// Reads `USER`, `LOGNAME` and `USERNAME` in that order; separators are
    /// replaced so the result is always usable in a file name.
    pub fn current() -> Self {
        let name = ["USER", "LOGNAME", "USERNAME"]
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .map(|v| v.trim().replace(['/', '\\'], "_"))
            .find(|v| !v.is_empty())
            .unwrap_or_else(|| Self::UNKNOWN.to_string());
        Self(name)
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Identity {
    type Error = crate::Error;

    fn try_from(name: String) -> crate::Result<Self> {
        Self::new(name)
    }
}

impl From<Identity> for String {
    fn from(identity: Identity) -> Self {
        identity.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
