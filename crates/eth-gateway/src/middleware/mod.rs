//! HTTP middleware: request tracing, CORS and gateway metrics.

pub mod cors;
pub mod metrics;
pub mod tracing;

pub use cors::create_cors_layer;
pub use metrics::{GatewayMetrics, RequestTimer};
pub use tracing::{TraceParent, TracingLayer};
