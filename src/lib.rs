//! # compose-tracker
//!
//! Tracking-service core for composes (build artifacts produced by an
//! external build pipeline).
//!
//! The tracker answers three questions:
//!
//! > How do composes relate (parents, children, respins)?
//! > Who may tag or untag a compose, and with what?
//! > What changed, and in what order?
//!
//! ## Core Contract
//!
//! 1. The parent/respin graph is append-only and acyclic: edges only point
//!    at composes that already exist
//! 2. Derived relations (`children`, `respun_by`, `tags`) are recomputed
//!    on read, never stored redundantly
//! 3. Every committed mutation produces exactly one event, in commit order
//!    per compose; emission failures never roll back the mutation
//!
//! ## Architecture
//!
//! ```text
//! Request → RelationshipResolver / TaggingEngine → TrackerStore
//!                                                      ↓ commit
//!                                              EventEmitter → bus
//! ```
//!
//! Storage and transport are collaborators behind traits: [`TrackerStore`]
//! (in-memory or Postgres) and [`emitter::Publisher`] (fire-and-forget
//! bus client).

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod emitter;
pub mod error;
pub mod pagination;
pub mod resolver;
pub mod store;
pub mod tagging;
pub mod tracker;
pub mod types;

#[cfg(feature = "service")]
pub mod service;

// Re-exports
pub use error::TrackerError;
pub use types::{
    ChangeAction, Compose, ComposeChange, ComposeId, ComposeInfo, ComposeInfoError, ComposeRecord,
    ComposeType, Event, EventKind, NewTag, Principal, Tag, TagUpdate, COMPOSE_INFO_VERSION,
};

pub use emitter::{EventEmitter, MemoryPublisher, NoopPublisher, Publisher, DEFAULT_EMIT_TIMEOUT};
pub use pagination::{paginate, LinkBuilder, Page, PageMeta, PageRequest};
pub use resolver::RelationshipResolver;
pub use store::{
    ComposeFilter, ComposeOrder, InMemoryTrackerStore, InsertOutcome, OrderKey, TagFilter, TagTerm,
    TrackerStore,
};
pub use tagging::{is_authorized, TaggingEngine};
pub use tracker::{ComposeTracker, NewCompose};

#[cfg(feature = "postgres")]
pub use store::PostgresTrackerStore;

// Service re-exports (when the service feature is enabled)
#[cfg(feature = "service")]
pub use service::{create_router, ServiceConfig, ServiceState};

/// REST API version prefix.
pub const API_PREFIX: &str = "/api/1";
