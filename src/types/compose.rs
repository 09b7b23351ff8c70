//! Compose types: identity, build metadata, stored record, full representation.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata schema version accepted by this service.
pub const COMPOSE_INFO_VERSION: &str = "1.2";

/// Unique identifier for a compose.
///
/// Derived from build metadata (see [`ComposeInfo::compose_id`]) and
/// immutable once assigned. Implements `Ord` for deterministic ordering.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComposeId(String);

impl ComposeId {
    /// Create a ComposeId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ComposeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ComposeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ComposeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Kind of compose produced by the build pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComposeType {
    /// Released production compose.
    Production,
    /// Nightly compose.
    Nightly,
    /// Test compose.
    Test,
    /// CI compose.
    Ci,
}

impl ComposeType {
    /// Parse compose type from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "production" => Some(Self::Production),
            "nightly" => Some(Self::Nightly),
            "test" => Some(Self::Test),
            "ci" => Some(Self::Ci),
            _ => None,
        }
    }

    /// Suffix used in derived compose IDs.
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Production => "",
            Self::Nightly => ".n",
            Self::Test => ".t",
            Self::Ci => ".ci",
        }
    }
}

impl Default for ComposeType {
    fn default() -> Self {
        Self::Production
    }
}

impl fmt::Display for ComposeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Production => write!(f, "production"),
            Self::Nightly => write!(f, "nightly"),
            Self::Test => write!(f, "test"),
            Self::Ci => write!(f, "ci"),
        }
    }
}

/// Schema-versioned build metadata supplied by the builder.
///
/// The typed core exists so the compose ID can be derived; everything else
/// arrives in `extra` and is carried verbatim, never interpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposeInfo {
    /// Metadata schema version. Must match [`COMPOSE_INFO_VERSION`].
    pub version: String,
    /// Short release identifier, e.g. "Fedora".
    pub release_short: String,
    /// Release version, e.g. "Rawhide" or "33".
    pub release_version: String,
    /// Compose date as YYYYMMDD.
    pub date: String,
    /// Compose type.
    #[serde(rename = "type")]
    pub compose_type: ComposeType,
    /// Respin counter for this release/date.
    pub respin: u32,
    /// Optional compose label, e.g. "Beta-1.2".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Opaque metadata passed through untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Error for malformed compose metadata.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ComposeInfoError {
    /// Schema version not supported.
    #[error("unsupported compose_info version: {0}")]
    UnsupportedVersion(String),
    /// A required field is empty.
    #[error("compose_info field must not be empty: {0}")]
    EmptyField(&'static str),
    /// Date is not YYYYMMDD.
    #[error("compose_info date must be YYYYMMDD: {0}")]
    BadDate(String),
}

impl ComposeInfo {
    /// Derive the compose ID from the metadata.
    ///
    /// Format: `{release_short}-{release_version}-{date}{type_suffix}.{respin}`,
    /// e.g. `Fedora-Rawhide-20200517.n.1`.
    pub fn compose_id(&self) -> ComposeId {
        ComposeId::new(format!(
            "{}-{}-{}{}.{}",
            self.release_short,
            self.release_version,
            self.date,
            self.compose_type.suffix(),
            self.respin,
        ))
    }

    /// Release stream identifier, e.g. `Fedora-Rawhide`.
    pub fn release(&self) -> String {
        format!("{}-{}", self.release_short, self.release_version)
    }

    /// Release-scoped date.respin key, expected unique per release stream.
    pub fn release_date_respin(&self) -> String {
        format!("{}-{}.{}", self.release(), self.date, self.respin)
    }

    /// Validate the typed core of the metadata.
    pub fn validate(&self) -> Result<(), ComposeInfoError> {
        if self.version != COMPOSE_INFO_VERSION {
            return Err(ComposeInfoError::UnsupportedVersion(self.version.clone()));
        }
        if self.release_short.is_empty() {
            return Err(ComposeInfoError::EmptyField("release_short"));
        }
        if self.release_version.is_empty() {
            return Err(ComposeInfoError::EmptyField("release_version"));
        }
        if self.date.len() != 8 || !self.date.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ComposeInfoError::BadDate(self.date.clone()));
        }
        Ok(())
    }

    /// Increment the respin counter, used on derived-ID collision.
    pub fn bump_respin(&mut self) {
        self.respin += 1;
    }
}

/// Stored forward state of a compose.
///
/// Holds only forward edges (`parents`, `respin_of`); the inverse relations
/// are derived by reverse lookup and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposeRecord {
    /// Derived compose ID.
    pub id: ComposeId,
    /// Name of the user account (service) which built the compose.
    pub builder: String,
    /// Build metadata.
    pub info: ComposeInfo,
    /// Creation time, UTC.
    pub created_at: DateTime<Utc>,
    /// Parent compose IDs, in request order.
    pub parents: Vec<ComposeId>,
    /// Compose this one supersedes, if any.
    pub respin_of: Option<ComposeId>,
    /// Current URL to the top level directory of this compose.
    pub compose_url: Option<String>,
}

/// Full REST representation of a compose.
///
/// `children`, `respun_by` and `tags` are recomputed on read from the
/// forward edges and the membership relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Compose {
    /// Compose ID.
    pub id: ComposeId,
    /// Builder account name.
    pub builder: String,
    /// Names of tags currently attached.
    pub tags: Vec<String>,
    /// Parent compose IDs.
    pub parents: Vec<ComposeId>,
    /// Composes listing this one as a parent (derived).
    pub children: Vec<ComposeId>,
    /// Compose this one supersedes.
    pub respin_of: Option<ComposeId>,
    /// Composes superseding this one (derived).
    pub respun_by: Vec<ComposeId>,
    /// Build metadata.
    pub compose_info: ComposeInfo,
    /// Current URL to the top level directory of this compose.
    pub compose_url: Option<String>,
}

/// Audit action recorded for a compose mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    /// Compose was created.
    Created,
    /// A tag was attached.
    Tagged,
    /// A tag was detached.
    Untagged,
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Tagged => write!(f, "tagged"),
            Self::Untagged => write!(f, "untagged"),
        }
    }
}

/// One committed compose mutation, kept for auditing.
///
/// Audit rows are store-local; they are not events and never reach the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposeChange {
    /// Time of the change, UTC.
    pub time: DateTime<Utc>,
    /// What happened.
    pub action: ChangeAction,
    /// Acting principal.
    pub agent: String,
    /// Human-readable summary.
    pub message: Option<String>,
}
