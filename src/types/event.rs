//! Change-notification events emitted after committed mutations.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::compose::Compose;

/// Kind of change the event describes. Also names the bus topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    /// A compose was created.
    ComposeCreated,
    /// A tag was attached to a compose.
    ComposeTagged,
    /// A tag was detached from a compose.
    ComposeUntagged,
}

impl EventKind {
    /// Wire name of the kind, used as the bus topic.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ComposeCreated => "compose-created",
            Self::ComposeTagged => "compose-tagged",
            Self::ComposeUntagged => "compose-untagged",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One immutable notification describing one committed state change.
///
/// Produced exactly once per successful mutation and never mutated after
/// emission. Events for the same compose are emitted in commit order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// What happened.
    #[serde(rename = "event")]
    pub kind: EventKind,
    /// Tag name, for tagging events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Full post-mutation representation of the subject compose.
    pub compose: Compose,
    /// Acting principal, for tagging events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
}

impl Event {
    /// Event for a newly created compose.
    pub fn created(compose: Compose) -> Self {
        Self {
            kind: EventKind::ComposeCreated,
            tag: None,
            compose,
            agent: None,
        }
    }

    /// Event for a tag attached to a compose.
    pub fn tagged(compose: Compose, tag: impl Into<String>, agent: impl Into<String>) -> Self {
        Self {
            kind: EventKind::ComposeTagged,
            tag: Some(tag.into()),
            compose,
            agent: Some(agent.into()),
        }
    }

    /// Event for a tag detached from a compose.
    pub fn untagged(compose: Compose, tag: impl Into<String>, agent: impl Into<String>) -> Self {
        Self {
            kind: EventKind::ComposeUntagged,
            tag: Some(tag.into()),
            compose,
            agent: Some(agent.into()),
        }
    }

    /// Bus topic for this event.
    pub fn topic(&self) -> &'static str {
        self.kind.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::compose::{ComposeId, ComposeInfo, ComposeType, COMPOSE_INFO_VERSION};

    fn compose() -> Compose {
        Compose {
            id: ComposeId::new("Fedora-Rawhide-20200517.n.1"),
            builder: "odcs".to_string(),
            tags: vec![],
            parents: vec![],
            children: vec![],
            respin_of: None,
            respun_by: vec![],
            compose_info: ComposeInfo {
                version: COMPOSE_INFO_VERSION.to_string(),
                release_short: "Fedora".to_string(),
                release_version: "Rawhide".to_string(),
                date: "20200517".to_string(),
                compose_type: ComposeType::Nightly,
                respin: 1,
                label: None,
                extra: serde_json::Map::new(),
            },
            compose_url: None,
        }
    }

    #[test]
    fn test_created_event_shape() {
        let event = Event::created(compose());
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "compose-created");
        assert_eq!(json["compose"]["id"], "Fedora-Rawhide-20200517.n.1");
        assert!(json.get("tag").is_none());
        assert!(json.get("agent").is_none());
    }

    #[test]
    fn test_tagged_event_topic_and_agent() {
        let event = Event::tagged(compose(), "periodic", "alice");
        assert_eq!(event.topic(), "compose-tagged");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["tag"], "periodic");
        assert_eq!(json["agent"], "alice");
    }
}
