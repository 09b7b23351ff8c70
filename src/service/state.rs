//! Service state and configuration.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use crate::emitter::EventEmitter;
use crate::store::TrackerStore;
use crate::tracker::ComposeTracker;
use crate::types::Principal;

/// Service configuration loaded from the environment.
///
/// - `HOST` / `PORT`: bind address (default: 0.0.0.0:8001)
/// - `AUTH_BACKEND`: name of the external auth layer, reported by `/about`
/// - `TRACKER_ADMINS`: comma-separated admin principal names
/// - `EMIT_TIMEOUT_SECS`: bound on a single publish attempt (default: 5)
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Name of the authentication backend in front of the service.
    pub auth_backend: String,
    /// Principals with administrative rights.
    pub admins: BTreeSet<String>,
    /// Bound on a single event publish attempt.
    pub emit_timeout: Duration,
}

impl ServiceConfig {
    /// Load configuration from environment variables with defaults.
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(8001),
            auth_backend: std::env::var("AUTH_BACKEND").unwrap_or_else(|_| "noauth".to_string()),
            admins: std::env::var("TRACKER_ADMINS")
                .map(|raw| {
                    raw.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            emit_timeout: Duration::from_secs(
                std::env::var("EMIT_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5),
            ),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Shared service state.
pub struct ServiceState<S: TrackerStore + 'static> {
    /// The tracker orchestrator.
    pub tracker: Arc<ComposeTracker<S>>,
    /// The store, exposed for health checks.
    pub store: Arc<S>,
    /// The event emitter, exposed for degradation reporting.
    pub emitter: Arc<EventEmitter>,
    /// Service configuration.
    pub config: Arc<ServiceConfig>,
}

impl<S: TrackerStore + 'static> ServiceState<S> {
    /// Create service state over a store, emitter and configuration.
    pub fn new(store: Arc<S>, emitter: Arc<EventEmitter>, config: ServiceConfig) -> Self {
        Self {
            tracker: Arc::new(ComposeTracker::new(Arc::clone(&store), Arc::clone(&emitter))),
            store,
            emitter,
            config: Arc::new(config),
        }
    }

    /// Resolve a principal from the identity supplied by the external
    /// authentication layer. Admin status comes from configuration.
    pub fn principal(&self, name: Option<&str>) -> Option<Principal> {
        let name = name?.trim();
        if name.is_empty() {
            return None;
        }
        Some(Principal {
            name: name.to_string(),
            admin: self.config.admins.contains(name),
        })
    }
}

impl<S: TrackerStore + 'static> Clone for ServiceState<S> {
    fn clone(&self) -> Self {
        Self {
            tracker: Arc::clone(&self.tracker),
            store: Arc::clone(&self.store),
            emitter: Arc::clone(&self.emitter),
            config: Arc::clone(&self.config),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::{MemoryPublisher, DEFAULT_EMIT_TIMEOUT};
    use crate::store::InMemoryTrackerStore;

    fn state() -> ServiceState<InMemoryTrackerStore> {
        let config = ServiceConfig {
            host: "127.0.0.1".to_string(),
            port: 8001,
            auth_backend: "noauth".to_string(),
            admins: ["root"].iter().map(|s| s.to_string()).collect(),
            emit_timeout: DEFAULT_EMIT_TIMEOUT,
        };
        ServiceState::new(
            Arc::new(InMemoryTrackerStore::new()),
            Arc::new(EventEmitter::direct(
                Arc::new(MemoryPublisher::new()),
                DEFAULT_EMIT_TIMEOUT,
            )),
            config,
        )
    }

    #[test]
    fn test_principal_resolution() {
        let state = state();
        assert!(state.principal(None).is_none());
        assert!(state.principal(Some("  ")).is_none());

        let alice = state.principal(Some("alice")).unwrap();
        assert!(!alice.admin);

        let root = state.principal(Some("root")).unwrap();
        assert!(root.admin);
    }
}
