//! Service middleware for metrics and request tracking.
//!
//! ## Metrics Exposed
//!
//! - request count by path, method, status (log-based)
//! - request latency
//! - emitter degradation count, via the health endpoint

use std::time::Instant;

use axum::{extract::Request, middleware::Next, response::Response};
use tracing::info;

/// Metrics middleware that records request counts and latency.
///
/// Uses tracing log records for now - can be upgraded to prometheus
/// metrics later.
pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = normalize_path(request.uri().path());

    let response = next.run(request).await;

    let latency = start.elapsed();
    let status = response.status().as_u16();

    info!(
        target: "compose_tracker::metrics",
        metric_type = "request",
        path = %path,
        method = %method,
        status = status,
        latency_ms = latency.as_millis() as u64,
        "request_metric"
    );

    response
}

/// Normalize path for metrics to avoid high cardinality.
///
/// Replaces compose-ID path segments (e.g. `Fedora-Rawhide-20200517.n.1`)
/// with an `:id` placeholder.
fn normalize_path(path: &str) -> String {
    let compose_id_regex =
        regex_lite::Regex::new(r"[A-Za-z0-9_+]+(-[A-Za-z0-9_.+]+)*-[0-9]{8}(\.(n|t|ci))?\.[0-9]+")
            .unwrap();

    compose_id_regex.replace_all(path, ":id").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_replaces_compose_id() {
        let path = "/api/1/composes/Fedora-Rawhide-20200517.n.1";
        assert_eq!(normalize_path(path), "/api/1/composes/:id");

        let path = "/api/1/composes/CentOS-Stream-8-20200517.2/changes";
        assert_eq!(normalize_path(path), "/api/1/composes/:id/changes");
    }

    #[test]
    fn test_normalize_path_preserves_regular_path() {
        assert_eq!(normalize_path("/health/ready"), "/health/ready");
        assert_eq!(normalize_path("/api/1/tags/periodic"), "/api/1/tags/periodic");
    }
}
