// ABOUTME: Request tracing spans for correlating log lines of one HTTP request
// ABOUTME: Honours an incoming x-request-id header or generates a fresh id

use axum::extract::Request;
use tracing::Span;
use uuid::Uuid;

/// Request id from `x-request-id`, or a newly generated one
#[must_use]
pub fn request_id<B>(request: &http::Request<B>) -> String {
    request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map_or_else(|| format!("req_{}", Uuid::new_v4().simple()), ToOwned::to_owned)
}

/// Create a tracing span for an HTTP request
///
/// Used as the `make_span_with` callback of the `TraceLayer`.
pub fn create_request_span(request: &Request) -> Span {
    tracing::info_span!(
        "http_request",
        method = %request.method(),
        path = %request.uri().path(),
        request_id = %request_id(request),
    )
}
