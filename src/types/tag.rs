//! Tag registry types.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// A named label attachable to composes, with its own authorization lists.
///
/// `taggers` and `untaggers` are independent: membership in one does not
/// imply membership in the other. Removing a principal from `taggers` does
/// not retroactively remove tags they already applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    /// Store-assigned numeric ID.
    pub id: u64,
    /// Unique tag name.
    pub name: String,
    /// Short description of the tag.
    pub description: String,
    /// Link to tag documentation.
    pub documentation: String,
    /// Principals allowed to attach this tag.
    pub taggers: BTreeSet<String>,
    /// Principals allowed to detach this tag.
    pub untaggers: BTreeSet<String>,
}

/// Fields for creating a tag. The store assigns the numeric ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTag {
    /// Unique tag name.
    pub name: String,
    /// Short description of the tag.
    pub description: String,
    /// Link to tag documentation.
    pub documentation: String,
    /// Principals allowed to attach this tag.
    #[serde(default)]
    pub taggers: BTreeSet<String>,
    /// Principals allowed to detach this tag.
    #[serde(default)]
    pub untaggers: BTreeSet<String>,
}

/// Partial update of a tag. `None` fields are left untouched;
/// authorization sets are replaced wholesale when present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagUpdate {
    /// New description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// New documentation link.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation: Option<String>,
    /// Replacement tagger set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taggers: Option<BTreeSet<String>>,
    /// Replacement untagger set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub untaggers: Option<BTreeSet<String>>,
}

impl TagUpdate {
    /// True when the update would change nothing.
    pub fn is_empty(&self) -> bool {
        self.description.is_none()
            && self.documentation.is_none()
            && self.taggers.is_none()
            && self.untaggers.is_none()
    }

    /// Apply this update to a tag in place.
    pub fn apply_to(&self, tag: &mut Tag) {
        if let Some(ref description) = self.description {
            tag.description = description.clone();
        }
        if let Some(ref documentation) = self.documentation {
            tag.documentation = documentation.clone();
        }
        if let Some(ref taggers) = self.taggers {
            tag.taggers = taggers.clone();
        }
        if let Some(ref untaggers) = self.untaggers {
            tag.untaggers = untaggers.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag() -> Tag {
        Tag {
            id: 1,
            name: "periodic".to_string(),
            description: "Periodic compose".to_string(),
            documentation: "https://example.test/periodic".to_string(),
            taggers: ["odcs"].iter().map(|s| s.to_string()).collect(),
            untaggers: BTreeSet::new(),
        }
    }

    #[test]
    fn test_update_replaces_sets_wholesale() {
        let mut t = tag();
        let update = TagUpdate {
            taggers: Some(["alice", "bob"].iter().map(|s| s.to_string()).collect()),
            ..Default::default()
        };
        update.apply_to(&mut t);
        assert_eq!(t.taggers.len(), 2);
        assert!(!t.taggers.contains("odcs"));
        // Untouched fields survive.
        assert_eq!(t.description, "Periodic compose");
    }

    #[test]
    fn test_empty_update() {
        assert!(TagUpdate::default().is_empty());
        let update = TagUpdate {
            description: Some("x".to_string()),
            ..Default::default()
        };
        assert!(!update.is_empty());
    }
}
