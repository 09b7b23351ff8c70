//! Acting principal identity.

use std::fmt;

use serde::{Deserialize, Serialize};

/// An authenticated identity (user or service) performing an action.
///
/// Identity resolution happens outside the core; the core only consumes the
/// resolved name and the admin flag. Admin principals bypass per-tag
/// authorization checks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal {
    /// Resolved principal name.
    pub name: String,
    /// Whether the principal is an administrator.
    #[serde(default)]
    pub admin: bool,
}

impl Principal {
    /// A regular principal.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            admin: false,
        }
    }

    /// An administrator principal.
    pub fn admin(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            admin: true,
        }
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}
