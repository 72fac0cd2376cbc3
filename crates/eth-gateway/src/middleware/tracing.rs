//! Per-request tracing spans for the HTTP transport.
//!
//! Every request runs inside an `http_request` span. When the caller sends
//! a W3C `traceparent` header its trace and parent span ids are recorded on
//! that span, so gateway logs join the caller's trace.

use axum::{body::Body, http::Request, response::Response};
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::{field, info_span, Instrument, Span};

#[derive(Clone, Default)]
pub struct TracingLayer;

impl TracingLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for TracingLayer {
    type Service = TracingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TracingService { inner }
    }
}

#[derive(Clone)]
pub struct TracingService<S> {
    inner: S,
}

impl<S> Service<Request<Body>> for TracingService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        // The clone may not be ready; swap so the polled service handles this call.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        let span = info_span!(
            "http_request",
            http.method = %req.method(),
            http.target = %req.uri().path(),
            trace_id = field::Empty,
            parent_span_id = field::Empty,
            http.status = field::Empty,
        );
        if let Some(parent) = TraceParent::from_request(&req) {
            span.record("trace_id", parent.trace_id.as_str());
            span.record("parent_span_id", parent.parent_id.as_str());
        }

        Box::pin(
            async move {
                let result = inner.call(req).await;
                if let Ok(response) = &result {
                    Span::current().record("http.status", response.status().as_u16());
                }
                result
            }
            .instrument(span),
        )
    }
}

/// Parsed W3C `traceparent` header: `version-trace_id-parent_id-flags`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceParent {
    pub trace_id: String,
    pub parent_id: String,
}

impl TraceParent {
    pub fn parse(header: &str) -> Option<Self> {
        let mut parts = header.trim().split('-');
        let (version, trace_id, parent_id, flags) =
            (parts.next()?, parts.next()?, parts.next()?, parts.next()?);
        if parts.next().is_some() {
            return None;
        }
        let hex_of = |s: &str, len: usize| s.len() == len && s.bytes().all(|b| b.is_ascii_hexdigit());
        if !hex_of(version, 2) || version == "ff" || !hex_of(flags, 2) {
            return None;
        }
        if !hex_of(trace_id, 32) || !hex_of(parent_id, 16) {
            return None;
        }
        // All-zero ids are invalid
        if trace_id.bytes().all(|b| b == b'0') || parent_id.bytes().all(|b| b == b'0') {
            return None;
        }
        Some(Self {
            trace_id: trace_id.to_ascii_lowercase(),
            parent_id: parent_id.to_ascii_lowercase(),
        })
    }

    fn from_request<B>(req: &Request<B>) -> Option<Self> {
        Self::parse(req.headers().get("traceparent")?.to_str().ok()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, Router};
    use tower::ServiceExt;

    #[test]
    fn test_traceparent_parsing() {
        let parent =
            TraceParent::parse("00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01").unwrap();
        assert_eq!(parent.trace_id, "0af7651916cd43dd8448eb211c80319c");
        assert_eq!(parent.parent_id, "b7ad6b7169203331");
    }

    #[test]
    fn test_invalid_traceparent() {
        assert!(TraceParent::parse("invalid").is_none());
        assert!(TraceParent::parse("00-0af7651916cd43dd-b7ad6b7169203331-01").is_none());
        assert!(TraceParent::parse(
            "00-00000000000000000000000000000000-b7ad6b7169203331-01"
        )
        .is_none());
        assert!(TraceParent::parse(
            "ff-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01"
        )
        .is_none());
    }

    #[tokio::test]
    async fn test_layer_passes_requests_through() {
        let app = Router::new()
            .route("/health", get(|| async { "ok" }))
            .layer(TracingLayer::new());
        let req = Request::builder()
            .uri("/health")
            .header(
                "traceparent",
                "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01",
            )
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert!(resp.status().is_success());
    }
}
