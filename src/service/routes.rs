//! Axum routes for the compose tracker service.

use axum::{
    extract::{Json, Path, RawQuery, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};

use crate::error::TrackerError;
use crate::pagination::{paginate, LinkBuilder, Page, PageRequest};
use crate::store::{ComposeFilter, ComposeOrder, PostgresTrackerStore, TagFilter, TagTerm};
use crate::tracker::NewCompose;
use crate::types::{Compose, ComposeChange, ComposeId, ComposeType, NewTag, Principal, Tag, TagUpdate};
use crate::API_PREFIX;

use super::state::ServiceState;

/// Type alias for the service state with PostgresTrackerStore.
pub type AppState = ServiceState<PostgresTrackerStore>;

/// Header carrying the identity resolved by the external auth layer.
pub const PRINCIPAL_HEADER: &str = "x-forwarded-user";

// ============================================================================
// Request/Response Types
// ============================================================================

/// Tagging action requested via PATCH on a compose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagAction {
    /// Attach the tag.
    Tag,
    /// Detach the tag.
    Untag,
}

/// PATCH body for compose tagging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposeActionRequest {
    /// What to do.
    pub action: TagAction,
    /// Tag name.
    pub tag: String,
}

/// Response of the about endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AboutResponse {
    /// Service version.
    pub version: String,
    /// Name of the authentication backend in front of the service.
    pub auth_backend: String,
}

/// Audit rows of one compose.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangesResponse {
    /// Rows in append order.
    pub changes: Vec<ComposeChange>,
}

/// Service health response (detailed).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Events that could not be handed to the transport.
    pub events_degraded: u64,
    /// Database connectivity status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<DatabaseHealth>,
}

/// Database health information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseHealth {
    pub connected: bool,
    pub pool_size: u32,
    pub pool_idle: usize,
    pub pool_max: u32,
}

/// Simple liveness response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessResponse {
    pub status: String,
}

/// Readiness response with dependency status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub database: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Structured error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable error message.
    pub error: String,
    /// Machine-readable error code.
    pub code: String,
    /// Correlation ID for request tracing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Additional error details (optional).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    /// Create a new error response with code and message.
    pub fn new(code: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
            correlation_id: None,
            details: None,
        }
    }

    /// Add details to the error.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> axum::response::Response {
        tracing::warn!(
            code = %self.code,
            error = %self.error,
            "Request error"
        );
        (StatusCode::BAD_REQUEST, Json(self)).into_response()
    }
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn reject(err: TrackerError) -> ApiError {
    let status = match err {
        TrackerError::NotFound { .. } => StatusCode::NOT_FOUND,
        TrackerError::Forbidden(_) => StatusCode::FORBIDDEN,
        TrackerError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        TrackerError::Conflict(_) => StatusCode::CONFLICT,
        TrackerError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ErrorResponse::new(err.code(), err.to_string())))
}

fn invalid(message: impl Into<String>) -> ApiError {
    reject(TrackerError::InvalidInput(message.into()))
}

// ============================================================================
// Principal Resolution
// ============================================================================

fn principal_from(state: &AppState, headers: &HeaderMap) -> Result<Principal, ApiError> {
    let name = headers
        .get(PRINCIPAL_HEADER)
        .and_then(|value| value.to_str().ok());
    state.principal(name).ok_or_else(|| {
        (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse::new(
                "UNAUTHENTICATED",
                "no resolved principal on request",
            )),
        )
    })
}

// ============================================================================
// Query Parsing
// ============================================================================

fn url_decode(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' => {
                match raw
                    .get(i + 1..i + 3)
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok())
                {
                    Some(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    None => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            byte => {
                out.push(byte);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn parse_pairs(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|part| !part.is_empty())
        .map(|part| match part.split_once('=') {
            Some((key, value)) => (url_decode(key), url_decode(value)),
            None => (url_decode(part), String::new()),
        })
        .collect()
}

struct ComposeListing {
    filter: ComposeFilter,
    order: Vec<ComposeOrder>,
    page: PageRequest,
    links: LinkBuilder,
}

fn parse_compose_listing(query: Option<&str>) -> Result<ComposeListing, ApiError> {
    let pairs = parse_pairs(query.unwrap_or(""));
    let mut filter = ComposeFilter::default();
    let mut order = Vec::new();
    let mut page = None;
    let mut per_page = None;
    let mut links = LinkBuilder::new(format!("{API_PREFIX}/composes/"));

    for (key, value) in &pairs {
        match key.as_str() {
            "page" => page = value.parse().ok(),
            "per_page" => per_page = value.parse().ok(),
            _ => {
                links = links.arg(key.clone(), value.clone());
                match key.as_str() {
                    "id" => filter.id = Some(value.clone()),
                    "date" => filter.date = Some(value.clone()),
                    "date_before" => filter.date_before = Some(value.clone()),
                    "date_after" => filter.date_after = Some(value.clone()),
                    "respin" => {
                        filter.respin = Some(
                            value
                                .parse()
                                .map_err(|_| invalid(format!("invalid respin: {value}")))?,
                        )
                    }
                    "type" => {
                        filter.compose_type = Some(
                            ComposeType::from_str(value)
                                .ok_or_else(|| invalid(format!("invalid compose type: {value}")))?,
                        )
                    }
                    "label" => filter.label = Some(value.clone()),
                    "release_short" => filter.release_short = Some(value.clone()),
                    "release_version" => filter.release_version = Some(value.clone()),
                    "builder" => filter.builder = Some(value.clone()),
                    "tag" => filter.tags.push(TagTerm::parse(value)),
                    "order_by" => {
                        // An empty "?order_by=" falls back to the default.
                        if !value.is_empty() {
                            order.push(ComposeOrder::parse(value).ok_or_else(|| {
                                invalid(format!("invalid order_by key: {value}"))
                            })?);
                        }
                    }
                    // Unknown arguments are ignored, as the original API does.
                    _ => {}
                }
            }
        }
    }

    Ok(ComposeListing {
        filter,
        order,
        page: PageRequest::from_params(page, per_page),
        links,
    })
}

// ============================================================================
// Route Handlers
// ============================================================================

/// List composes with filters and pagination.
async fn list_composes_handler(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> Result<Json<Page<Compose>>, ApiError> {
    let listing = parse_compose_listing(query.as_deref())?;
    let composes = state
        .tracker
        .list_composes(&listing.filter, &listing.order)
        .await
        .map_err(reject)?;
    Ok(Json(paginate(composes, listing.page, &listing.links)))
}

/// Create a compose from build metadata.
async fn create_compose_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<NewCompose>,
) -> Result<Json<Compose>, ApiError> {
    let builder = principal_from(&state, &headers)?;
    let compose = state
        .tracker
        .create_compose(&builder, request)
        .await
        .map_err(reject)?;
    Ok(Json(compose))
}

/// Fetch one compose.
async fn get_compose_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Compose>, ApiError> {
    let compose = state
        .tracker
        .get_compose(&ComposeId::new(id))
        .await
        .map_err(reject)?;
    Ok(Json(compose))
}

/// Tag or untag a compose.
async fn patch_compose_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<ComposeActionRequest>,
) -> Result<Json<Compose>, ApiError> {
    let principal = principal_from(&state, &headers)?;
    let id = ComposeId::new(id);
    let compose = match request.action {
        TagAction::Tag => state.tracker.tag_compose(&principal, &id, &request.tag).await,
        TagAction::Untag => {
            state
                .tracker
                .untag_compose(&principal, &id, &request.tag)
                .await
        }
    }
    .map_err(reject)?;
    Ok(Json(compose))
}

/// Audit rows of one compose.
async fn compose_changes_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ChangesResponse>, ApiError> {
    let changes = state
        .tracker
        .compose_changes(&ComposeId::new(id))
        .await
        .map_err(reject)?;
    Ok(Json(ChangesResponse { changes }))
}

/// List tags with pagination.
async fn list_tags_handler(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> Result<Json<Page<Tag>>, ApiError> {
    let pairs = parse_pairs(query.as_deref().unwrap_or(""));
    let mut filter = TagFilter::default();
    let mut page = None;
    let mut per_page = None;
    let mut links = LinkBuilder::new(format!("{API_PREFIX}/tags/"));
    for (key, value) in &pairs {
        match key.as_str() {
            "page" => page = value.parse().ok(),
            "per_page" => per_page = value.parse().ok(),
            "name" => {
                filter.name = Some(value.clone());
                links = links.arg("name", value.clone());
            }
            _ => {}
        }
    }
    let tags = state.tracker.list_tags(&filter).await.map_err(reject)?;
    Ok(Json(paginate(
        tags,
        PageRequest::from_params(page, per_page),
        &links,
    )))
}

/// Create a tag (admin only).
async fn create_tag_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<NewTag>,
) -> Result<Json<Tag>, ApiError> {
    let principal = principal_from(&state, &headers)?;
    let tag = state
        .tracker
        .create_tag(&principal, request)
        .await
        .map_err(reject)?;
    Ok(Json(tag))
}

/// Fetch one tag.
async fn get_tag_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Tag>, ApiError> {
    let tag = state.tracker.get_tag(&name).await.map_err(reject)?;
    Ok(Json(tag))
}

/// Update a tag's fields (admin only).
async fn patch_tag_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(request): Json<TagUpdate>,
) -> Result<Json<Tag>, ApiError> {
    let principal = principal_from(&state, &headers)?;
    let tag = state
        .tracker
        .update_tag(&principal, &name, &request)
        .await
        .map_err(reject)?;
    Ok(Json(tag))
}

/// Information about this tracker instance.
async fn about_handler(State(state): State<AppState>) -> Json<AboutResponse> {
    Json(AboutResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        auth_backend: state.config.auth_backend.clone(),
    })
}

/// Health check endpoint (detailed).
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let db_healthy = state.store.is_healthy().await;
    let pool_stats = state.store.pool_stats();

    Json(HealthResponse {
        status: if db_healthy { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        events_degraded: state.emitter.degraded_count(),
        database: Some(DatabaseHealth {
            connected: db_healthy,
            pool_size: pool_stats.size,
            pool_idle: pool_stats.idle,
            pool_max: pool_stats.max,
        }),
    })
}

/// Liveness probe endpoint. Does NOT check dependencies.
async fn liveness_handler() -> Json<LivenessResponse> {
    Json(LivenessResponse {
        status: "alive".to_string(),
    })
}

/// Readiness probe endpoint. 200 when the database is reachable.
async fn readiness_handler(
    State(state): State<AppState>,
) -> Result<Json<ReadinessResponse>, (StatusCode, Json<ReadinessResponse>)> {
    let db_healthy = state.store.is_healthy().await;

    if db_healthy {
        Ok(Json(ReadinessResponse {
            ready: true,
            database: true,
            details: None,
        }))
    } else {
        Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessResponse {
                ready: false,
                database: false,
                details: Some("Database connection failed".to_string()),
            }),
        ))
    }
}

// ============================================================================
// Router Construction
// ============================================================================

/// Create the Axum router for the compose tracker service.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Composes
        .route(
            "/api/1/composes/",
            get(list_composes_handler).post(create_compose_handler),
        )
        .route(
            "/api/1/composes/:id",
            get(get_compose_handler).patch(patch_compose_handler),
        )
        .route("/api/1/composes/:id/changes", get(compose_changes_handler))
        // Tags
        .route("/api/1/tags/", get(list_tags_handler).post(create_tag_handler))
        .route("/api/1/tags/:name", get(get_tag_handler).patch(patch_tag_handler))
        // About
        .route("/api/1/about/", get(about_handler))
        // Health checks
        .route("/health", get(health_handler))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pagination::DEFAULT_PER_PAGE;

    #[test]
    fn test_parse_pairs_decodes() {
        let pairs = parse_pairs("release_short=Fedora&label=Beta%2D1.2&tag=-nightly&tag=");
        assert_eq!(pairs[0], ("release_short".to_string(), "Fedora".to_string()));
        assert_eq!(pairs[1], ("label".to_string(), "Beta-1.2".to_string()));
        assert_eq!(pairs[2], ("tag".to_string(), "-nightly".to_string()));
        assert_eq!(pairs[3], ("tag".to_string(), String::new()));
    }

    #[test]
    fn test_parse_compose_listing() {
        let listing =
            parse_compose_listing(Some("release_short=Fedora&tag=periodic&order_by=-date&page=2"))
                .unwrap();
        assert_eq!(listing.filter.release_short.as_deref(), Some("Fedora"));
        assert_eq!(listing.filter.tags, vec![TagTerm::Has("periodic".into())]);
        assert_eq!(listing.order.len(), 1);
        assert!(listing.order[0].descending);
        assert_eq!(listing.page.page, 2);
        assert_eq!(listing.page.per_page, DEFAULT_PER_PAGE);
    }

    #[test]
    fn test_parse_compose_listing_rejects_unknown_order_key() {
        assert!(parse_compose_listing(Some("order_by=popularity")).is_err());
    }

    #[test]
    fn test_parse_compose_listing_empty_order_uses_default() {
        let listing = parse_compose_listing(Some("order_by=")).unwrap();
        assert!(listing.order.is_empty());
    }
}
