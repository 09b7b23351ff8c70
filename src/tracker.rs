//! Compose tracker orchestration.
//!
//! Wires validation, storage, auditing and event emission into the
//! operations the REST layer calls. Every mutating operation validates
//! against committed state, applies one atomic store mutation, and only
//! then hands exactly one event to the emitter.

use std::sync::Arc;

use chrono::Utc;

use crate::emitter::EventEmitter;
use crate::error::TrackerError;
use crate::resolver::RelationshipResolver;
use crate::store::{ComposeFilter, ComposeOrder, InsertOutcome, TagFilter, TrackerStore};
use crate::tagging::TaggingEngine;
use crate::types::{
    ChangeAction, Compose, ComposeChange, ComposeId, ComposeInfo, ComposeRecord, Event, NewTag,
    Principal, Tag, TagUpdate,
};

/// Bound on respin bumps when hunting for a free compose ID.
const MAX_ID_ATTEMPTS: u32 = 100;

/// Request to create a compose.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct NewCompose {
    /// Build metadata; the compose ID is derived from it.
    pub compose_info: ComposeInfo,
    /// Parent compose IDs. Must already exist.
    #[serde(default)]
    pub parent_compose_ids: Vec<ComposeId>,
    /// Compose this one supersedes. Must already exist.
    #[serde(default)]
    pub respin_of: Option<ComposeId>,
    /// Current URL to the top level directory of this compose.
    #[serde(default)]
    pub compose_url: Option<String>,
}

/// Orchestrates compose and tag operations over a store.
pub struct ComposeTracker<S: TrackerStore> {
    store: Arc<S>,
    resolver: RelationshipResolver<S>,
    tagging: TaggingEngine<S>,
    emitter: Arc<EventEmitter>,
}

impl<S: TrackerStore + 'static> ComposeTracker<S> {
    /// Create a tracker over a store and an emitter.
    pub fn new(store: Arc<S>, emitter: Arc<EventEmitter>) -> Self {
        Self {
            resolver: RelationshipResolver::new(Arc::clone(&store)),
            tagging: TaggingEngine::new(Arc::clone(&store)),
            store,
            emitter,
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Create a compose from build metadata.
    ///
    /// Validates metadata and graph references against committed state,
    /// then inserts, bumping `respin` until the derived ID is free.
    /// Emits one `compose-created` event after the insert commits.
    pub async fn create_compose(
        &self,
        builder: &Principal,
        request: NewCompose,
    ) -> Result<Compose, TrackerError> {
        let mut info = request.compose_info;
        info.validate()
            .map_err(|e| TrackerError::InvalidInput(e.to_string()))?;

        let candidate = info.compose_id();
        self.resolver
            .validate_parents(&request.parent_compose_ids, &candidate)
            .await?;
        if let Some(ref respin_of) = request.respin_of {
            self.resolver
                .validate_respin_of(respin_of, &candidate)
                .await?;
        }

        let mut attempts = 0;
        let record = loop {
            let record = ComposeRecord {
                id: info.compose_id(),
                builder: builder.name.clone(),
                info: info.clone(),
                created_at: Utc::now(),
                parents: request.parent_compose_ids.clone(),
                respin_of: request.respin_of.clone(),
                compose_url: request.compose_url.clone(),
            };
            match self
                .store
                .insert_compose(record.clone())
                .await
                .map_err(TrackerError::from_store)?
            {
                InsertOutcome::Inserted => break record,
                InsertOutcome::IdExists => {
                    attempts += 1;
                    if attempts >= MAX_ID_ATTEMPTS {
                        return Err(TrackerError::Conflict(format!(
                            "cannot allocate unique compose ID for {}",
                            info.release_date_respin()
                        )));
                    }
                    tracing::debug!(
                        compose_id = %record.id,
                        "compose ID taken, bumping respin"
                    );
                    info.bump_respin();
                }
            }
        };

        self.record_change(&record.id, ChangeAction::Created, builder, None)
            .await?;

        let compose = self.resolver.assemble(record).await?;
        tracing::info!(compose_id = %compose.id, builder = %builder.name, "compose created");
        self.emitter.emit(Event::created(compose.clone())).await;
        Ok(compose)
    }

    /// Fetch the full representation of one compose.
    pub async fn get_compose(&self, id: &ComposeId) -> Result<Compose, TrackerError> {
        let record = self
            .store
            .get_compose(id)
            .await
            .map_err(TrackerError::from_store)?
            .ok_or_else(|| TrackerError::compose_not_found(id.as_str()))?;
        self.resolver.assemble(record).await
    }

    /// List composes matching `filter` in the given order.
    pub async fn list_composes(
        &self,
        filter: &ComposeFilter,
        order: &[ComposeOrder],
    ) -> Result<Vec<Compose>, TrackerError> {
        let records = self
            .store
            .list_composes(filter, order)
            .await
            .map_err(TrackerError::from_store)?;
        let mut composes = Vec::with_capacity(records.len());
        for record in records {
            composes.push(self.resolver.assemble(record).await?);
        }
        Ok(composes)
    }

    /// Audit rows for one compose.
    pub async fn compose_changes(
        &self,
        id: &ComposeId,
    ) -> Result<Vec<ComposeChange>, TrackerError> {
        if self
            .store
            .get_compose(id)
            .await
            .map_err(TrackerError::from_store)?
            .is_none()
        {
            return Err(TrackerError::compose_not_found(id.as_str()));
        }
        self.store
            .compose_changes(id)
            .await
            .map_err(TrackerError::from_store)
    }

    /// Attach a tag to a compose.
    ///
    /// Emits one `compose-tagged` event only when membership actually
    /// changed; re-applying a present tag succeeds silently.
    pub async fn tag_compose(
        &self,
        principal: &Principal,
        id: &ComposeId,
        tag_name: &str,
    ) -> Result<Compose, TrackerError> {
        let outcome = self.tagging.apply_tag(id, tag_name, principal).await?;
        if outcome.changed {
            self.record_change(
                id,
                ChangeAction::Tagged,
                principal,
                Some(format!(
                    "User \"{}\" added \"{}\" tag.",
                    principal.name, tag_name
                )),
            )
            .await?;
        }
        let compose = self.get_compose(id).await?;
        if outcome.changed {
            self.emitter
                .emit(Event::tagged(compose.clone(), tag_name, principal.name.as_str()))
                .await;
        }
        Ok(compose)
    }

    /// Detach a tag from a compose.
    ///
    /// Emits one `compose-untagged` event only when membership actually
    /// changed; removing an absent tag succeeds silently.
    pub async fn untag_compose(
        &self,
        principal: &Principal,
        id: &ComposeId,
        tag_name: &str,
    ) -> Result<Compose, TrackerError> {
        let outcome = self.tagging.remove_tag(id, tag_name, principal).await?;
        if outcome.changed {
            self.record_change(
                id,
                ChangeAction::Untagged,
                principal,
                Some(format!(
                    "User \"{}\" removed \"{}\" tag.",
                    principal.name, tag_name
                )),
            )
            .await?;
        }
        let compose = self.get_compose(id).await?;
        if outcome.changed {
            self.emitter
                .emit(Event::untagged(compose.clone(), tag_name, principal.name.as_str()))
                .await;
        }
        Ok(compose)
    }

    /// Create a tag. Administrative: requires an admin principal.
    pub async fn create_tag(
        &self,
        principal: &Principal,
        tag: NewTag,
    ) -> Result<Tag, TrackerError> {
        if !principal.admin {
            return Err(TrackerError::Forbidden(format!(
                "{} is not allowed to create tags",
                principal.name
            )));
        }
        if tag.name.is_empty() {
            return Err(TrackerError::InvalidInput(
                "tag name must not be empty".to_string(),
            ));
        }
        let name = tag.name.clone();
        self.store
            .insert_tag(tag)
            .await
            .map_err(TrackerError::from_store)?
            .ok_or_else(|| TrackerError::Conflict(format!("tag already exists: {name}")))
    }

    /// Update a tag's fields. Administrative: requires an admin principal.
    pub async fn update_tag(
        &self,
        principal: &Principal,
        name: &str,
        update: &TagUpdate,
    ) -> Result<Tag, TrackerError> {
        if !principal.admin {
            return Err(TrackerError::Forbidden(format!(
                "{} is not allowed to update tags",
                principal.name
            )));
        }
        self.store
            .update_tag(name, update)
            .await
            .map_err(TrackerError::from_store)?
            .ok_or_else(|| TrackerError::tag_not_found(name))
    }

    /// Fetch a tag by name.
    pub async fn get_tag(&self, name: &str) -> Result<Tag, TrackerError> {
        self.store
            .get_tag(name)
            .await
            .map_err(TrackerError::from_store)?
            .ok_or_else(|| TrackerError::tag_not_found(name))
    }

    /// List tags.
    pub async fn list_tags(&self, filter: &TagFilter) -> Result<Vec<Tag>, TrackerError> {
        self.store
            .list_tags(filter)
            .await
            .map_err(TrackerError::from_store)
    }

    async fn record_change(
        &self,
        id: &ComposeId,
        action: ChangeAction,
        principal: &Principal,
        message: Option<String>,
    ) -> Result<(), TrackerError> {
        self.store
            .record_compose_change(
                id,
                ComposeChange {
                    time: Utc::now(),
                    action,
                    agent: principal.name.clone(),
                    message,
                },
            )
            .await
            .map_err(TrackerError::from_store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::{MemoryPublisher, DEFAULT_EMIT_TIMEOUT};
    use crate::store::InMemoryTrackerStore;
    use crate::types::{ComposeType, COMPOSE_INFO_VERSION};

    fn info(date: &str, respin: u32) -> ComposeInfo {
        ComposeInfo {
            version: COMPOSE_INFO_VERSION.to_string(),
            release_short: "Fedora".to_string(),
            release_version: "Rawhide".to_string(),
            date: date.to_string(),
            compose_type: ComposeType::Nightly,
            respin,
            label: None,
            extra: serde_json::Map::new(),
        }
    }

    fn new_compose(date: &str) -> NewCompose {
        NewCompose {
            compose_info: info(date, 1),
            parent_compose_ids: vec![],
            respin_of: None,
            compose_url: None,
        }
    }

    fn tracker() -> (
        ComposeTracker<InMemoryTrackerStore>,
        Arc<MemoryPublisher>,
    ) {
        let store = Arc::new(InMemoryTrackerStore::new());
        let publisher = Arc::new(MemoryPublisher::new());
        let emitter = Arc::new(EventEmitter::direct(
            publisher.clone(),
            DEFAULT_EMIT_TIMEOUT,
        ));
        (ComposeTracker::new(store, emitter), publisher)
    }

    #[tokio::test]
    async fn test_create_emits_one_event() {
        let (tracker, publisher) = tracker();
        let builder = Principal::new("odcs");
        let compose = tracker
            .create_compose(&builder, new_compose("20200517"))
            .await
            .unwrap();
        assert_eq!(compose.id.as_str(), "Fedora-Rawhide-20200517.n.1");
        assert_eq!(publisher.topics(), vec!["compose-created"]);
        let (_, payload) = &publisher.published()[0];
        assert_eq!(payload["compose"]["builder"], "odcs");
    }

    #[tokio::test]
    async fn test_create_bumps_respin_on_collision() {
        let (tracker, _) = tracker();
        let builder = Principal::new("odcs");
        let first = tracker
            .create_compose(&builder, new_compose("20200517"))
            .await
            .unwrap();
        let second = tracker
            .create_compose(&builder, new_compose("20200517"))
            .await
            .unwrap();
        assert_eq!(first.id.as_str(), "Fedora-Rawhide-20200517.n.1");
        assert_eq!(second.id.as_str(), "Fedora-Rawhide-20200517.n.2");
        assert_eq!(second.compose_info.respin, 2);
        // Both retrievable.
        tracker.get_compose(&first.id).await.unwrap();
        tracker.get_compose(&second.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_create_with_parent_updates_children_on_read() {
        let (tracker, _) = tracker();
        let builder = Principal::new("odcs");
        let a = tracker
            .create_compose(&builder, new_compose("20200517"))
            .await
            .unwrap();
        let b = tracker
            .create_compose(
                &builder,
                NewCompose {
                    parent_compose_ids: vec![a.id.clone()],
                    ..new_compose("20200518")
                },
            )
            .await
            .unwrap();
        assert_eq!(b.parents, vec![a.id.clone()]);
        let a_after = tracker.get_compose(&a.id).await.unwrap();
        assert_eq!(a_after.children, vec![b.id]);
    }

    #[tokio::test]
    async fn test_create_with_missing_parent_has_no_effect() {
        let (tracker, publisher) = tracker();
        let builder = Principal::new("odcs");
        let err = tracker
            .create_compose(
                &builder,
                NewCompose {
                    parent_compose_ids: vec![ComposeId::new("Ghost-1-20200101.0")],
                    ..new_compose("20200517")
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TrackerError::NotFound { .. }));
        assert!(publisher.is_empty());
        assert!(tracker
            .list_composes(&ComposeFilter::default(), &[])
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_invalid_metadata_rejected() {
        let (tracker, publisher) = tracker();
        let builder = Principal::new("odcs");
        let mut request = new_compose("20200517");
        request.compose_info.date = "May 2020".to_string();
        assert!(matches!(
            tracker.create_compose(&builder, request).await,
            Err(TrackerError::InvalidInput(_))
        ));
        assert!(publisher.is_empty());
    }

    #[tokio::test]
    async fn test_respin_chain() {
        let (tracker, _) = tracker();
        let builder = Principal::new("odcs");
        let a = tracker
            .create_compose(&builder, new_compose("20200517"))
            .await
            .unwrap();
        let b = tracker
            .create_compose(
                &builder,
                NewCompose {
                    respin_of: Some(a.id.clone()),
                    ..new_compose("20200517")
                },
            )
            .await
            .unwrap();
        assert_eq!(b.respin_of, Some(a.id.clone()));
        let a_after = tracker.get_compose(&a.id).await.unwrap();
        assert_eq!(a_after.respun_by, vec![b.id]);
    }

    #[tokio::test]
    async fn test_tag_untag_event_discipline() {
        let (tracker, publisher) = tracker();
        let builder = Principal::new("odcs");
        let admin = Principal::admin("root");
        let alice = Principal::new("alice");

        let compose = tracker
            .create_compose(&builder, new_compose("20200517"))
            .await
            .unwrap();
        tracker
            .create_tag(
                &admin,
                NewTag {
                    name: "periodic".to_string(),
                    description: "Periodic compose".to_string(),
                    documentation: "https://example.test/periodic".to_string(),
                    taggers: ["alice"].iter().map(|s| s.to_string()).collect(),
                    untaggers: ["alice"].iter().map(|s| s.to_string()).collect(),
                },
            )
            .await
            .unwrap();

        let tagged = tracker
            .tag_compose(&alice, &compose.id, "periodic")
            .await
            .unwrap();
        assert_eq!(tagged.tags, vec!["periodic"]);

        // Re-applying is a silent success with no event.
        tracker
            .tag_compose(&alice, &compose.id, "periodic")
            .await
            .unwrap();

        let untagged = tracker
            .untag_compose(&alice, &compose.id, "periodic")
            .await
            .unwrap();
        assert!(untagged.tags.is_empty());

        // Removing again is a silent success with no event.
        tracker
            .untag_compose(&alice, &compose.id, "periodic")
            .await
            .unwrap();

        assert_eq!(
            publisher.topics(),
            vec!["compose-created", "compose-tagged", "compose-untagged"]
        );
        let (_, tagged_payload) = &publisher.published()[1];
        assert_eq!(tagged_payload["agent"], "alice");
        assert_eq!(tagged_payload["tag"], "periodic");
    }

    #[tokio::test]
    async fn test_unauthorized_untag_changes_nothing() {
        let (tracker, publisher) = tracker();
        let builder = Principal::new("odcs");
        let admin = Principal::admin("root");

        let compose = tracker
            .create_compose(&builder, new_compose("20200517"))
            .await
            .unwrap();
        tracker
            .create_tag(
                &admin,
                NewTag {
                    name: "periodic".to_string(),
                    description: String::new(),
                    documentation: String::new(),
                    taggers: ["alice"].iter().map(|s| s.to_string()).collect(),
                    untaggers: Default::default(),
                },
            )
            .await
            .unwrap();
        let alice = Principal::new("alice");
        tracker
            .tag_compose(&alice, &compose.id, "periodic")
            .await
            .unwrap();
        let events_before = publisher.len();

        let err = tracker
            .untag_compose(&alice, &compose.id, "periodic")
            .await
            .unwrap_err();
        assert!(matches!(err, TrackerError::Forbidden(_)));
        let after = tracker.get_compose(&compose.id).await.unwrap();
        assert_eq!(after.tags, vec!["periodic"]);
        assert_eq!(publisher.len(), events_before);
    }

    #[tokio::test]
    async fn test_tag_registry_is_admin_only() {
        let (tracker, _) = tracker();
        let alice = Principal::new("alice");
        let tag = NewTag {
            name: "periodic".to_string(),
            description: String::new(),
            documentation: String::new(),
            taggers: Default::default(),
            untaggers: Default::default(),
        };
        assert!(matches!(
            tracker.create_tag(&alice, tag.clone()).await,
            Err(TrackerError::Forbidden(_))
        ));
        let admin = Principal::admin("root");
        tracker.create_tag(&admin, tag.clone()).await.unwrap();
        assert!(matches!(
            tracker.create_tag(&admin, tag).await,
            Err(TrackerError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_audit_rows_follow_mutations() {
        let (tracker, _) = tracker();
        let builder = Principal::new("odcs");
        let admin = Principal::admin("root");
        let compose = tracker
            .create_compose(&builder, new_compose("20200517"))
            .await
            .unwrap();
        tracker
            .create_tag(
                &admin,
                NewTag {
                    name: "periodic".to_string(),
                    description: String::new(),
                    documentation: String::new(),
                    taggers: Default::default(),
                    untaggers: Default::default(),
                },
            )
            .await
            .unwrap();
        tracker
            .tag_compose(&admin, &compose.id, "periodic")
            .await
            .unwrap();
        // No-op retag leaves no audit row.
        tracker
            .tag_compose(&admin, &compose.id, "periodic")
            .await
            .unwrap();

        let changes = tracker.compose_changes(&compose.id).await.unwrap();
        let actions: Vec<ChangeAction> = changes.iter().map(|c| c.action).collect();
        assert_eq!(actions, vec![ChangeAction::Created, ChangeAction::Tagged]);
    }
}
