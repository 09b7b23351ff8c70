//! In-memory tracker store for testing and small deployments.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::types::{ComposeChange, ComposeId, ComposeRecord, NewTag, Tag, TagUpdate};

use super::{ComposeFilter, ComposeOrder, InsertOutcome, OrderKey, TagFilter, TagTerm, TrackerStore};

/// Error type for the in-memory store.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InMemoryError {
    /// Compose not found.
    #[error("compose not found: {0}")]
    MissingCompose(ComposeId),
    /// Tag not found.
    #[error("tag not found: {0}")]
    MissingTag(String),
}

#[derive(Debug, Default)]
struct Inner {
    /// Composes by ID.
    composes: BTreeMap<ComposeId, ComposeRecord>,
    /// Insertion order, used for commit-order ties.
    insertion: Vec<ComposeId>,
    /// release-date-respin keys, unique per release stream.
    release_keys: BTreeSet<String>,
    /// Parent -> children reverse index.
    children: BTreeMap<ComposeId, BTreeSet<ComposeId>>,
    /// respin_of -> respun_by reverse index.
    respun_by: BTreeMap<ComposeId, BTreeSet<ComposeId>>,
    /// Tags by name.
    tags: BTreeMap<String, Tag>,
    next_tag_id: u64,
    /// Compose -> attached tag names.
    memberships: BTreeMap<ComposeId, BTreeSet<String>>,
    /// Audit rows per compose, append order.
    changes: BTreeMap<ComposeId, Vec<ComposeChange>>,
}

/// In-memory tracker store.
///
/// Uses BTreeMap/BTreeSet for deterministic iteration order. Mutations take
/// the write lock, which serializes membership check-and-set against the
/// same (compose, tag) pair.
#[derive(Debug, Default)]
pub struct InMemoryTrackerStore {
    inner: RwLock<Inner>,
}

impl InMemoryTrackerStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored composes.
    pub fn num_composes(&self) -> usize {
        self.inner.read().composes.len()
    }

    /// Number of registered tags.
    pub fn num_tags(&self) -> usize {
        self.inner.read().tags.len()
    }
}

fn matches(record: &ComposeRecord, tags: &BTreeSet<String>, filter: &ComposeFilter) -> bool {
    if let Some(ref id) = filter.id {
        if record.id.as_str() != id {
            return false;
        }
    }
    if let Some(ref date) = filter.date {
        if record.info.date != *date {
            return false;
        }
    }
    if let Some(ref before) = filter.date_before {
        if record.info.date.as_str() >= before.as_str() {
            return false;
        }
    }
    if let Some(ref after) = filter.date_after {
        if record.info.date.as_str() <= after.as_str() {
            return false;
        }
    }
    if let Some(respin) = filter.respin {
        if record.info.respin != respin {
            return false;
        }
    }
    if let Some(compose_type) = filter.compose_type {
        if record.info.compose_type != compose_type {
            return false;
        }
    }
    if let Some(ref label) = filter.label {
        if record.info.label.as_deref() != Some(label.as_str()) {
            return false;
        }
    }
    if let Some(ref short) = filter.release_short {
        if record.info.release_short != *short {
            return false;
        }
    }
    if let Some(ref version) = filter.release_version {
        if record.info.release_version != *version {
            return false;
        }
    }
    if let Some(ref builder) = filter.builder {
        if record.builder != *builder {
            return false;
        }
    }
    for term in &filter.tags {
        let ok = match term {
            TagTerm::Has(name) => tags.contains(name),
            TagTerm::Not(name) => !tags.contains(name),
            TagTerm::Untagged => tags.is_empty(),
        };
        if !ok {
            return false;
        }
    }
    true
}

fn compare(a: &ComposeRecord, b: &ComposeRecord, order: &[ComposeOrder]) -> Ordering {
    for term in order {
        let ord = match term.key {
            OrderKey::Id => a.id.cmp(&b.id),
            OrderKey::Date => a.info.date.cmp(&b.info.date),
            OrderKey::Respin => a.info.respin.cmp(&b.info.respin),
            OrderKey::Builder => a.builder.cmp(&b.builder),
            OrderKey::CreatedAt => a.created_at.cmp(&b.created_at),
        };
        let ord = if term.descending { ord.reverse() } else { ord };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

#[async_trait]
impl TrackerStore for InMemoryTrackerStore {
    type Error = InMemoryError;

    async fn insert_compose(&self, record: ComposeRecord) -> Result<InsertOutcome, Self::Error> {
        let mut inner = self.inner.write();
        let release_key = record.info.release_date_respin();
        if inner.composes.contains_key(&record.id) || inner.release_keys.contains(&release_key) {
            return Ok(InsertOutcome::IdExists);
        }
        for parent in &record.parents {
            if !inner.composes.contains_key(parent) {
                return Err(InMemoryError::MissingCompose(parent.clone()));
            }
        }
        if let Some(ref respin_of) = record.respin_of {
            if !inner.composes.contains_key(respin_of) {
                return Err(InMemoryError::MissingCompose(respin_of.clone()));
            }
        }

        for parent in &record.parents {
            inner
                .children
                .entry(parent.clone())
                .or_default()
                .insert(record.id.clone());
        }
        if let Some(ref respin_of) = record.respin_of {
            inner
                .respun_by
                .entry(respin_of.clone())
                .or_default()
                .insert(record.id.clone());
        }
        inner.release_keys.insert(release_key);
        inner.insertion.push(record.id.clone());
        inner.composes.insert(record.id.clone(), record);
        Ok(InsertOutcome::Inserted)
    }

    async fn get_compose(&self, id: &ComposeId) -> Result<Option<ComposeRecord>, Self::Error> {
        Ok(self.inner.read().composes.get(id).cloned())
    }

    async fn list_composes(
        &self,
        filter: &ComposeFilter,
        order: &[ComposeOrder],
    ) -> Result<Vec<ComposeRecord>, Self::Error> {
        let inner = self.inner.read();
        let empty = BTreeSet::new();
        // Walk in insertion order so equal sort keys keep commit order.
        let mut records: Vec<&ComposeRecord> = inner
            .insertion
            .iter()
            .filter_map(|id| inner.composes.get(id))
            .filter(|record| {
                let tags = inner.memberships.get(&record.id).unwrap_or(&empty);
                matches(record, tags, filter)
            })
            .collect();
        let order = if order.is_empty() {
            ComposeOrder::default_order()
        } else {
            order.to_vec()
        };
        records.sort_by(|a, b| compare(a, b, &order));
        Ok(records.into_iter().cloned().collect())
    }

    async fn children(&self, id: &ComposeId) -> Result<Vec<ComposeId>, Self::Error> {
        Ok(self
            .inner
            .read()
            .children
            .get(id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn respun_by(&self, id: &ComposeId) -> Result<Vec<ComposeId>, Self::Error> {
        Ok(self
            .inner
            .read()
            .respun_by
            .get(id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn insert_tag(&self, tag: NewTag) -> Result<Option<Tag>, Self::Error> {
        let mut inner = self.inner.write();
        if inner.tags.contains_key(&tag.name) {
            return Ok(None);
        }
        inner.next_tag_id += 1;
        let stored = Tag {
            id: inner.next_tag_id,
            name: tag.name.clone(),
            description: tag.description,
            documentation: tag.documentation,
            taggers: tag.taggers,
            untaggers: tag.untaggers,
        };
        inner.tags.insert(tag.name, stored.clone());
        Ok(Some(stored))
    }

    async fn get_tag(&self, name: &str) -> Result<Option<Tag>, Self::Error> {
        Ok(self.inner.read().tags.get(name).cloned())
    }

    async fn update_tag(
        &self,
        name: &str,
        update: &TagUpdate,
    ) -> Result<Option<Tag>, Self::Error> {
        let mut inner = self.inner.write();
        match inner.tags.get_mut(name) {
            Some(tag) => {
                update.apply_to(tag);
                Ok(Some(tag.clone()))
            }
            None => Ok(None),
        }
    }

    async fn list_tags(&self, filter: &TagFilter) -> Result<Vec<Tag>, Self::Error> {
        let inner = self.inner.read();
        let mut tags: Vec<Tag> = inner
            .tags
            .values()
            .filter(|tag| match filter.name {
                Some(ref name) => tag.name == *name,
                None => true,
            })
            .cloned()
            .collect();
        tags.sort_by_key(|tag| tag.id);
        Ok(tags)
    }

    async fn compose_tags(&self, id: &ComposeId) -> Result<Vec<String>, Self::Error> {
        Ok(self
            .inner
            .read()
            .memberships
            .get(id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn add_tag_to_compose(&self, id: &ComposeId, tag: &str) -> Result<bool, Self::Error> {
        let mut inner = self.inner.write();
        if !inner.composes.contains_key(id) {
            return Err(InMemoryError::MissingCompose(id.clone()));
        }
        if !inner.tags.contains_key(tag) {
            return Err(InMemoryError::MissingTag(tag.to_string()));
        }
        Ok(inner
            .memberships
            .entry(id.clone())
            .or_default()
            .insert(tag.to_string()))
    }

    async fn remove_tag_from_compose(
        &self,
        id: &ComposeId,
        tag: &str,
    ) -> Result<bool, Self::Error> {
        let mut inner = self.inner.write();
        if !inner.composes.contains_key(id) {
            return Err(InMemoryError::MissingCompose(id.clone()));
        }
        Ok(inner
            .memberships
            .get_mut(id)
            .map(|set| set.remove(tag))
            .unwrap_or(false))
    }

    async fn record_compose_change(
        &self,
        id: &ComposeId,
        change: ComposeChange,
    ) -> Result<(), Self::Error> {
        let mut inner = self.inner.write();
        if !inner.composes.contains_key(id) {
            return Err(InMemoryError::MissingCompose(id.clone()));
        }
        inner.changes.entry(id.clone()).or_default().push(change);
        Ok(())
    }

    async fn compose_changes(&self, id: &ComposeId) -> Result<Vec<ComposeChange>, Self::Error> {
        Ok(self
            .inner
            .read()
            .changes
            .get(id)
            .cloned()
            .unwrap_or_default())
    }
}
