//! Core types for the compose tracker.

pub mod compose;
pub mod event;
pub mod principal;
pub mod tag;

pub use compose::{
    ChangeAction, Compose, ComposeChange, ComposeId, ComposeInfo, ComposeInfoError, ComposeRecord,
    ComposeType, COMPOSE_INFO_VERSION,
};
pub use event::{Event, EventKind};
pub use principal::Principal;
pub use tag::{NewTag, Tag, TagUpdate};
