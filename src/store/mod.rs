//! Tracker storage backends.

pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{ComposeChange, ComposeId, ComposeRecord, ComposeType, NewTag, Tag, TagUpdate};

/// Outcome of a compose insertion attempt.
///
/// ID collisions are reported distinctly so the creation loop can bump the
/// respin counter and retry instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The record was inserted.
    Inserted,
    /// A compose with this ID (or release/date/respin key) already exists.
    IdExists,
}

/// A single tag term in a compose listing filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TagTerm {
    /// Only composes carrying this tag.
    Has(String),
    /// Only composes not carrying this tag.
    Not(String),
    /// Only composes with no tags at all.
    Untagged,
}

impl TagTerm {
    /// Parse a request-level tag term: `name`, `-name`, or the empty string
    /// selecting untagged composes.
    pub fn parse(raw: &str) -> Self {
        if raw.is_empty() {
            Self::Untagged
        } else if let Some(name) = raw.strip_prefix('-') {
            Self::Not(name.to_string())
        } else {
            Self::Has(raw.to_string())
        }
    }
}

/// Equality and range predicates for compose listings.
///
/// `None` fields do not constrain the result. All predicates are ANDed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComposeFilter {
    /// Exact compose ID.
    pub id: Option<String>,
    /// Exact compose date (YYYYMMDD).
    pub date: Option<String>,
    /// Composes strictly before this date.
    pub date_before: Option<String>,
    /// Composes strictly after this date.
    pub date_after: Option<String>,
    /// Exact respin counter.
    pub respin: Option<u32>,
    /// Compose type.
    pub compose_type: Option<ComposeType>,
    /// Exact label.
    pub label: Option<String>,
    /// Short release identifier.
    pub release_short: Option<String>,
    /// Release version.
    pub release_version: Option<String>,
    /// Builder account name.
    pub builder: Option<String>,
    /// Tag membership terms, ANDed.
    #[serde(default)]
    pub tags: Vec<TagTerm>,
}

impl ComposeFilter {
    /// True when no predicate is set.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Orderable compose listing keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKey {
    /// Compose ID.
    Id,
    /// Compose date.
    Date,
    /// Respin counter.
    Respin,
    /// Builder account name.
    Builder,
    /// Creation time.
    CreatedAt,
}

impl OrderKey {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "id" => Some(Self::Id),
            "date" => Some(Self::Date),
            "respin" => Some(Self::Respin),
            "builder" => Some(Self::Builder),
            "created_at" => Some(Self::CreatedAt),
            _ => None,
        }
    }
}

/// One ordering term for compose listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposeOrder {
    /// Key to order by.
    pub key: OrderKey,
    /// Descending when true.
    pub descending: bool,
}

impl ComposeOrder {
    /// Ascending order by `key`.
    pub fn asc(key: OrderKey) -> Self {
        Self {
            key,
            descending: false,
        }
    }

    /// Descending order by `key`.
    pub fn desc(key: OrderKey) -> Self {
        Self {
            key,
            descending: true,
        }
    }

    /// Parse a request-level ordering term. A `-` prefix selects descending
    /// order. Returns `None` for unknown keys.
    pub fn parse(raw: &str) -> Option<Self> {
        let (name, descending) = match raw.strip_prefix('-') {
            Some(rest) if !rest.is_empty() => (rest, true),
            _ => (raw, false),
        };
        OrderKey::from_name(name).map(|key| Self { key, descending })
    }

    /// Default listing order: creation time ascending.
    pub fn default_order() -> Vec<Self> {
        vec![Self::asc(OrderKey::CreatedAt)]
    }
}

/// Name filter for tag listings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagFilter {
    /// Exact tag name.
    pub name: Option<String>,
}

/// Trait for tracker storage backends.
///
/// Backends own referential integrity for forward edges and the uniqueness
/// of compose IDs and tag names. Every mutating method is atomic: a failed
/// call leaves no partial state. Derived relations (`children`,
/// `respun_by`, membership) are answered by reverse lookup, never stored
/// redundantly.
#[async_trait]
pub trait TrackerStore: Send + Sync {
    /// Error type for store operations.
    type Error: std::error::Error + Send + Sync;

    /// Insert a compose with its forward edges.
    ///
    /// Reports [`InsertOutcome::IdExists`] instead of failing when the ID
    /// or release/date/respin key is taken. Never mutates existing rows.
    async fn insert_compose(&self, record: ComposeRecord) -> Result<InsertOutcome, Self::Error>;

    /// Fetch a compose by ID.
    async fn get_compose(&self, id: &ComposeId) -> Result<Option<ComposeRecord>, Self::Error>;

    /// List composes matching `filter`, ordered by `order` (creation time
    /// ascending when `order` is empty). Finite and restartable.
    async fn list_composes(
        &self,
        filter: &ComposeFilter,
        order: &[ComposeOrder],
    ) -> Result<Vec<ComposeRecord>, Self::Error>;

    /// Composes listing `id` as a parent, ordered by ID.
    async fn children(&self, id: &ComposeId) -> Result<Vec<ComposeId>, Self::Error>;

    /// Composes superseding `id` via `respin_of`, ordered by ID.
    async fn respun_by(&self, id: &ComposeId) -> Result<Vec<ComposeId>, Self::Error>;

    /// Insert a tag. Returns `None` when the name is already taken.
    async fn insert_tag(&self, tag: NewTag) -> Result<Option<Tag>, Self::Error>;

    /// Fetch a tag by name.
    async fn get_tag(&self, name: &str) -> Result<Option<Tag>, Self::Error>;

    /// Apply a partial update. Returns `None` when the tag does not exist.
    async fn update_tag(&self, name: &str, update: &TagUpdate)
        -> Result<Option<Tag>, Self::Error>;

    /// List tags matching `filter`, ordered by numeric ID.
    async fn list_tags(&self, filter: &TagFilter) -> Result<Vec<Tag>, Self::Error>;

    /// Names of tags currently attached to `id`, sorted.
    async fn compose_tags(&self, id: &ComposeId) -> Result<Vec<String>, Self::Error>;

    /// Attach `tag` to `id`. Returns whether membership actually changed.
    async fn add_tag_to_compose(&self, id: &ComposeId, tag: &str) -> Result<bool, Self::Error>;

    /// Detach `tag` from `id`. Returns whether membership actually changed.
    async fn remove_tag_from_compose(&self, id: &ComposeId, tag: &str)
        -> Result<bool, Self::Error>;

    /// Append an audit row for `id`.
    async fn record_compose_change(
        &self,
        id: &ComposeId,
        change: ComposeChange,
    ) -> Result<(), Self::Error>;

    /// Audit rows for `id` in append order.
    async fn compose_changes(&self, id: &ComposeId) -> Result<Vec<ComposeChange>, Self::Error>;
}

pub use memory::InMemoryTrackerStore;

#[cfg(feature = "postgres")]
pub use postgres::PostgresTrackerStore;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_term_parsing() {
        assert_eq!(TagTerm::parse("periodic"), TagTerm::Has("periodic".into()));
        assert_eq!(TagTerm::parse("-nightly"), TagTerm::Not("nightly".into()));
        assert_eq!(TagTerm::parse(""), TagTerm::Untagged);
    }

    #[test]
    fn test_order_parsing() {
        assert_eq!(
            ComposeOrder::parse("-date"),
            Some(ComposeOrder::desc(OrderKey::Date))
        );
        assert_eq!(
            ComposeOrder::parse("id"),
            Some(ComposeOrder::asc(OrderKey::Id))
        );
        assert_eq!(ComposeOrder::parse("popularity"), None);
        // A bare "-" is not an ordering term.
        assert_eq!(ComposeOrder::parse("-"), None);
    }
}
