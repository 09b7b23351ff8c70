//! Compose Tracker REST Service
//!
//! Exposes the tracker core as a REST API.
//!
//! ## Endpoints
//!
//! - `GET /api/1/composes/` - Filtered, paginated compose listing
//! - `POST /api/1/composes/` - Create a compose
//! - `GET /api/1/composes/:id` - Single compose
//! - `PATCH /api/1/composes/:id` - Tag or untag a compose
//! - `GET /api/1/composes/:id/changes` - Audit rows
//! - `GET /api/1/tags/` - Paginated tag listing
//! - `POST /api/1/tags/` - Create a tag (admin)
//! - `GET /api/1/tags/:name` - Single tag
//! - `PATCH /api/1/tags/:name` - Update a tag (admin)
//! - `GET /api/1/about/` - Version and auth backend
//! - `GET /health` - Detailed service health check
//! - `GET /health/live` - Liveness probe
//! - `GET /health/ready` - Readiness probe

pub mod middleware;
pub mod routes;
pub mod state;

pub use middleware::metrics_middleware;
pub use routes::{create_router, AppState, ErrorResponse, PRINCIPAL_HEADER};
pub use state::{ServiceConfig, ServiceState};
