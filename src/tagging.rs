//! Tagging engine.
//!
//! Enforces who may attach or detach a tag and maintains the membership
//! relation. Membership is present-or-absent with no state machine of its
//! own; both paths go through the same capability check.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::TrackerError;
use crate::store::TrackerStore;
use crate::types::{ComposeId, ComposeRecord, Principal, Tag};

/// Capability check shared by the apply and remove paths.
///
/// Admin principals bypass the per-tag sets.
pub fn is_authorized(principal: &Principal, allowed: &BTreeSet<String>) -> bool {
    principal.admin || allowed.contains(&principal.name)
}

/// Result of a membership mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagOutcome {
    /// Whether membership actually changed. Events are emitted only on
    /// actual state change; re-applying a present tag or removing an
    /// absent one is a silent no-op.
    pub changed: bool,
}

/// Enforces tag authorization and maintains tag membership.
pub struct TaggingEngine<S: TrackerStore> {
    store: Arc<S>,
}

impl<S: TrackerStore> TaggingEngine<S> {
    /// Create a tagging engine over a store.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    async fn load(
        &self,
        compose_id: &ComposeId,
        tag_name: &str,
    ) -> Result<(ComposeRecord, Tag), TrackerError> {
        let compose = self
            .store
            .get_compose(compose_id)
            .await
            .map_err(TrackerError::from_store)?
            .ok_or_else(|| TrackerError::compose_not_found(compose_id.as_str()))?;
        let tag = self
            .store
            .get_tag(tag_name)
            .await
            .map_err(TrackerError::from_store)?
            .ok_or_else(|| TrackerError::tag_not_found(tag_name))?;
        Ok((compose, tag))
    }

    /// Attach `tag_name` to `compose_id` on behalf of `principal`.
    ///
    /// Fails `NotFound` if compose or tag is absent, `Forbidden` if the
    /// principal is not in the tag's `taggers` set. Idempotent: an
    /// already-present tag reports `changed: false`.
    pub async fn apply_tag(
        &self,
        compose_id: &ComposeId,
        tag_name: &str,
        principal: &Principal,
    ) -> Result<TagOutcome, TrackerError> {
        let (_, tag) = self.load(compose_id, tag_name).await?;
        if !is_authorized(principal, &tag.taggers) {
            return Err(TrackerError::Forbidden(format!(
                "{} is not allowed to tag with {}",
                principal.name, tag.name
            )));
        }
        let changed = self
            .store
            .add_tag_to_compose(compose_id, tag_name)
            .await
            .map_err(TrackerError::from_store)?;
        tracing::debug!(
            compose_id = %compose_id,
            tag = tag_name,
            agent = %principal.name,
            changed,
            "tag applied"
        );
        Ok(TagOutcome { changed })
    }

    /// Detach `tag_name` from `compose_id` on behalf of `principal`.
    ///
    /// Symmetric to [`apply_tag`](Self::apply_tag), checked against the
    /// tag's `untaggers` set. Removing a tag that is not attached is a
    /// silent no-op reporting `changed: false`.
    pub async fn remove_tag(
        &self,
        compose_id: &ComposeId,
        tag_name: &str,
        principal: &Principal,
    ) -> Result<TagOutcome, TrackerError> {
        let (_, tag) = self.load(compose_id, tag_name).await?;
        if !is_authorized(principal, &tag.untaggers) {
            return Err(TrackerError::Forbidden(format!(
                "{} is not allowed to untag {}",
                principal.name, tag.name
            )));
        }
        let changed = self
            .store
            .remove_tag_from_compose(compose_id, tag_name)
            .await
            .map_err(TrackerError::from_store)?;
        tracing::debug!(
            compose_id = %compose_id,
            tag = tag_name,
            agent = %principal.name,
            changed,
            "tag removed"
        );
        Ok(TagOutcome { changed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryTrackerStore;
    use crate::types::{ComposeInfo, ComposeType, NewTag, COMPOSE_INFO_VERSION};
    use chrono::Utc;

    async fn setup() -> (Arc<InMemoryTrackerStore>, TaggingEngine<InMemoryTrackerStore>, ComposeId)
    {
        let store = Arc::new(InMemoryTrackerStore::new());
        let info = ComposeInfo {
            version: COMPOSE_INFO_VERSION.to_string(),
            release_short: "Fedora".to_string(),
            release_version: "Rawhide".to_string(),
            date: "20200517".to_string(),
            compose_type: ComposeType::Nightly,
            respin: 1,
            label: None,
            extra: serde_json::Map::new(),
        };
        let id = info.compose_id();
        store
            .insert_compose(ComposeRecord {
                id: id.clone(),
                builder: "odcs".to_string(),
                info,
                created_at: Utc::now(),
                parents: vec![],
                respin_of: None,
                compose_url: None,
            })
            .await
            .unwrap();
        store
            .insert_tag(NewTag {
                name: "periodic".to_string(),
                description: "Periodic compose".to_string(),
                documentation: "https://example.test/periodic".to_string(),
                taggers: ["alice"].iter().map(|s| s.to_string()).collect(),
                untaggers: ["bob"].iter().map(|s| s.to_string()).collect(),
            })
            .await
            .unwrap();
        let engine = TaggingEngine::new(Arc::clone(&store));
        (store, engine, id)
    }

    #[tokio::test]
    async fn test_apply_then_remove_round_trip() {
        let (store, engine, id) = setup().await;
        let alice = Principal::new("alice");
        let bob = Principal::new("bob");

        assert!(engine.apply_tag(&id, "periodic", &alice).await.unwrap().changed);
        assert_eq!(store.compose_tags(&id).await.unwrap(), vec!["periodic"]);
        assert!(engine.remove_tag(&id, "periodic", &bob).await.unwrap().changed);
        assert!(store.compose_tags(&id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_apply_is_idempotent() {
        let (_, engine, id) = setup().await;
        let alice = Principal::new("alice");
        assert!(engine.apply_tag(&id, "periodic", &alice).await.unwrap().changed);
        assert!(!engine.apply_tag(&id, "periodic", &alice).await.unwrap().changed);
    }

    #[tokio::test]
    async fn test_remove_absent_tag_is_noop() {
        let (_, engine, id) = setup().await;
        let bob = Principal::new("bob");
        assert!(!engine.remove_tag(&id, "periodic", &bob).await.unwrap().changed);
    }

    #[tokio::test]
    async fn test_tagger_and_untagger_sets_are_independent() {
        let (_, engine, id) = setup().await;
        let alice = Principal::new("alice");
        let bob = Principal::new("bob");

        // bob may untag but not tag.
        assert!(matches!(
            engine.apply_tag(&id, "periodic", &bob).await,
            Err(TrackerError::Forbidden(_))
        ));
        engine.apply_tag(&id, "periodic", &alice).await.unwrap();
        // alice may tag but not untag.
        assert!(matches!(
            engine.remove_tag(&id, "periodic", &alice).await,
            Err(TrackerError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_admin_bypasses_both_checks() {
        let (_, engine, id) = setup().await;
        let admin = Principal::admin("root");
        assert!(engine.apply_tag(&id, "periodic", &admin).await.unwrap().changed);
        assert!(engine.remove_tag(&id, "periodic", &admin).await.unwrap().changed);
    }

    #[tokio::test]
    async fn test_missing_tag_and_compose() {
        let (_, engine, id) = setup().await;
        let alice = Principal::new("alice");
        assert!(matches!(
            engine.apply_tag(&id, "nope", &alice).await,
            Err(TrackerError::NotFound { .. })
        ));
        let ghost = ComposeId::new("Ghost-1-20200101.0");
        assert!(matches!(
            engine.apply_tag(&ghost, "periodic", &alice).await,
            Err(TrackerError::NotFound { .. })
        ));
    }
}
