// ABOUTME: HTTP middleware for request tracing and cross-origin access
// ABOUTME: Builds the CORS layer from configuration and per-request tracing spans

/// CORS configuration
pub mod cors;
/// Request tracing spans
pub mod tracing;

pub use cors::setup_cors;
pub use tracing::{create_request_span, request_id};
