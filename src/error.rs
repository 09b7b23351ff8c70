//! Error taxonomy shared by the resolver, tagging engine and tracker.

/// Error produced by core tracker operations.
///
/// Validation errors (`NotFound`, `InvalidInput`, `Forbidden`, `Conflict`)
/// are detected before any mutation: a failing operation has no partial
/// effect and emits no event. Emission failures after a successful commit
/// never surface here; the emitter degrades to log-and-continue.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TrackerError {
    /// A referenced compose, tag or parent does not exist.
    #[error("{what} not found: {id}")]
    NotFound {
        /// Kind of entity that was looked up.
        what: &'static str,
        /// The missing identifier.
        id: String,
    },
    /// Uniqueness or idempotency race.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Principal lacks tagging/untagging authorization.
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// Malformed metadata, duplicate parent IDs, self-referential respin.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Storage backend failure.
    #[error("store error: {0}")]
    Store(String),
}

impl TrackerError {
    /// Missing compose.
    pub fn compose_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            what: "compose",
            id: id.into(),
        }
    }

    /// Missing parent compose.
    pub fn parent_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            what: "parent compose",
            id: id.into(),
        }
    }

    /// Missing tag.
    pub fn tag_not_found(name: impl Into<String>) -> Self {
        Self::NotFound {
            what: "tag",
            id: name.into(),
        }
    }

    /// Collapse a backend error into the store variant.
    pub fn from_store<E: std::error::Error>(e: E) -> Self {
        Self::Store(e.to_string())
    }

    /// Machine-readable code for structured error responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::Store(_) => "STORE_ERROR",
        }
    }
}
