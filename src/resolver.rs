//! Relationship resolver.
//!
//! Validates graph-forming operations before they reach durable storage and
//! derives the inverse relations (`children`, `respun_by`) on read. Edges
//! only ever point at composes that already exist, strictly earlier in
//! creation order, so cycles are structurally impossible; the resolver's
//! real job is existence checking and duplicate detection.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::TrackerError;
use crate::store::TrackerStore;
use crate::types::{Compose, ComposeId, ComposeRecord};

/// Validates compose graph edges and assembles full representations.
pub struct RelationshipResolver<S: TrackerStore> {
    store: Arc<S>,
}

impl<S: TrackerStore> RelationshipResolver<S> {
    /// Create a resolver over a store.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Validate the parent list of a compose about to be created.
    ///
    /// Fails `InvalidInput` on duplicate IDs and `NotFound` naming the
    /// first missing parent. `candidate` is the ID the new compose would
    /// receive; referencing it before it exists is a self-edge.
    pub async fn validate_parents(
        &self,
        parent_ids: &[ComposeId],
        candidate: &ComposeId,
    ) -> Result<(), TrackerError> {
        let mut seen = BTreeSet::new();
        for parent_id in parent_ids {
            if !seen.insert(parent_id) {
                return Err(TrackerError::InvalidInput(format!(
                    "duplicate parent compose ID: {parent_id}"
                )));
            }
        }
        for parent_id in parent_ids {
            let exists = self
                .store
                .get_compose(parent_id)
                .await
                .map_err(TrackerError::from_store)?
                .is_some();
            if !exists {
                if parent_id == candidate {
                    return Err(TrackerError::InvalidInput(format!(
                        "compose cannot be its own parent: {parent_id}"
                    )));
                }
                return Err(TrackerError::parent_not_found(parent_id.as_str()));
            }
        }
        Ok(())
    }

    /// Validate the `respin_of` reference of a compose about to be created.
    pub async fn validate_respin_of(
        &self,
        respin_of: &ComposeId,
        candidate: &ComposeId,
    ) -> Result<(), TrackerError> {
        let exists = self
            .store
            .get_compose(respin_of)
            .await
            .map_err(TrackerError::from_store)?
            .is_some();
        if !exists {
            if respin_of == candidate {
                return Err(TrackerError::InvalidInput(format!(
                    "compose cannot respin itself: {respin_of}"
                )));
            }
            return Err(TrackerError::NotFound {
                what: "respin_of compose",
                id: respin_of.to_string(),
            });
        }
        Ok(())
    }

    /// Composes listing `id` as a parent.
    pub async fn children(&self, id: &ComposeId) -> Result<Vec<ComposeId>, TrackerError> {
        self.store
            .children(id)
            .await
            .map_err(TrackerError::from_store)
    }

    /// Composes superseding `id`.
    pub async fn respun_by(&self, id: &ComposeId) -> Result<Vec<ComposeId>, TrackerError> {
        self.store
            .respun_by(id)
            .await
            .map_err(TrackerError::from_store)
    }

    /// Assemble the full representation of a stored compose.
    ///
    /// Forward fields come from the record; `children`, `respun_by` and
    /// `tags` are recomputed from the reverse indexes and the membership
    /// relation at read time.
    pub async fn assemble(&self, record: ComposeRecord) -> Result<Compose, TrackerError> {
        let children = self.children(&record.id).await?;
        let respun_by = self.respun_by(&record.id).await?;
        let tags = self
            .store
            .compose_tags(&record.id)
            .await
            .map_err(TrackerError::from_store)?;
        Ok(Compose {
            id: record.id,
            builder: record.builder,
            tags,
            parents: record.parents,
            children,
            respin_of: record.respin_of,
            respun_by,
            compose_info: record.info,
            compose_url: record.compose_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryTrackerStore, InsertOutcome};
    use crate::types::{ComposeInfo, ComposeType, COMPOSE_INFO_VERSION};
    use chrono::Utc;

    fn record(date: &str) -> ComposeRecord {
        let info = ComposeInfo {
            version: COMPOSE_INFO_VERSION.to_string(),
            release_short: "Fedora".to_string(),
            release_version: "Rawhide".to_string(),
            date: date.to_string(),
            compose_type: ComposeType::Nightly,
            respin: 1,
            label: None,
            extra: serde_json::Map::new(),
        };
        ComposeRecord {
            id: info.compose_id(),
            builder: "odcs".to_string(),
            info,
            created_at: Utc::now(),
            parents: vec![],
            respin_of: None,
            compose_url: None,
        }
    }

    #[tokio::test]
    async fn test_duplicate_parents_rejected() {
        let store = Arc::new(InMemoryTrackerStore::new());
        let resolver = RelationshipResolver::new(Arc::clone(&store));
        let existing = record("20200517");
        let existing_id = existing.id.clone();
        store.insert_compose(existing).await.unwrap();

        let candidate = ComposeId::new("Fedora-Rawhide-20200518.n.1");
        let err = resolver
            .validate_parents(
                &[existing_id.clone(), existing_id.clone()],
                &candidate,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TrackerError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_missing_parent_named() {
        let store = Arc::new(InMemoryTrackerStore::new());
        let resolver = RelationshipResolver::new(store);
        let candidate = ComposeId::new("Fedora-Rawhide-20200518.n.1");
        let missing = ComposeId::new("Fedora-Rawhide-20200501.n.1");
        match resolver
            .validate_parents(&[missing.clone()], &candidate)
            .await
            .unwrap_err()
        {
            TrackerError::NotFound { id, .. } => assert_eq!(id, missing.to_string()),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_self_parent_rejected_as_invalid_input() {
        let store = Arc::new(InMemoryTrackerStore::new());
        let resolver = RelationshipResolver::new(store);
        let candidate = ComposeId::new("Fedora-Rawhide-20200518.n.1");
        let err = resolver
            .validate_parents(&[candidate.clone()], &candidate)
            .await
            .unwrap_err();
        assert!(matches!(err, TrackerError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_assemble_derives_inverse_relations() {
        let store = Arc::new(InMemoryTrackerStore::new());
        let resolver = RelationshipResolver::new(Arc::clone(&store));

        let parent = record("20200517");
        let parent_id = parent.id.clone();
        store.insert_compose(parent.clone()).await.unwrap();

        let mut child = record("20200518");
        child.parents = vec![parent_id.clone()];
        child.respin_of = Some(parent_id.clone());
        let child_id = child.id.clone();
        assert_eq!(
            store.insert_compose(child).await.unwrap(),
            InsertOutcome::Inserted
        );

        let assembled = resolver.assemble(parent).await.unwrap();
        assert_eq!(assembled.children, vec![child_id.clone()]);
        assert_eq!(assembled.respun_by, vec![child_id]);
        assert!(assembled.parents.is_empty());
    }
}
