//! Gateway counters, exported as JSON and (with the `metrics` feature) in
//! Prometheus text format.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Default)]
pub struct GatewayMetrics {
    // Request counters
    pub requests_total: AtomicU64,
    pub requests_success: AtomicU64,
    pub requests_error: AtomicU64,
    pub requests_timed_out: AtomicU64,
    pub write_requests_total: AtomicU64,

    // WebSocket
    pub websocket_connections: AtomicU64,
    pub websocket_subscriptions: AtomicU64,
    pub websocket_notifications_sent: AtomicU64,
    pub subscriptions_overflowed: AtomicU64,

    // Latency tracking
    pub total_latency_ms: AtomicU64,
    pub request_count_for_latency: AtomicU64,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self, success: bool, is_write: bool, latency_ms: u64) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        if success {
            self.requests_success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.requests_error.fetch_add(1, Ordering::Relaxed);
        }
        if is_write {
            self.write_requests_total.fetch_add(1, Ordering::Relaxed);
        }
        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.request_count_for_latency.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.requests_timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ws_connect(&self) {
        self.websocket_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ws_disconnect(&self) {
        self.websocket_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_ws_subscribe(&self) {
        self.websocket_subscriptions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ws_unsubscribe(&self) {
        self.websocket_subscriptions.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_ws_notification(&self) {
        self.websocket_notifications_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// A subscription torn down for overflow also stops being active.
    pub fn record_ws_overflow(&self) {
        self.subscriptions_overflowed.fetch_add(1, Ordering::Relaxed);
        self.record_ws_unsubscribe();
    }

    pub fn average_latency_ms(&self) -> f64 {
        let total = self.total_latency_ms.load(Ordering::Relaxed);
        let count = self.request_count_for_latency.load(Ordering::Relaxed);
        if count == 0 {
            0.0
        } else {
            total as f64 / count as f64
        }
    }

    fn counters(&self) -> [(&'static str, &'static str, u64); 9] {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        [
            ("eth_gateway_requests_total", "Total JSON-RPC requests", load(&self.requests_total)),
            ("eth_gateway_requests_success_total", "Successful requests", load(&self.requests_success)),
            ("eth_gateway_requests_error_total", "Failed requests", load(&self.requests_error)),
            ("eth_gateway_requests_timed_out_total", "Requests cut off by their method timeout", load(&self.requests_timed_out)),
            ("eth_gateway_write_requests_total", "eth_sendRawTransaction requests", load(&self.write_requests_total)),
            ("eth_gateway_websocket_connections", "Open WebSocket connections", load(&self.websocket_connections)),
            ("eth_gateway_websocket_subscriptions", "Active subscriptions", load(&self.websocket_subscriptions)),
            ("eth_gateway_websocket_notifications_total", "Subscription notifications sent", load(&self.websocket_notifications_sent)),
            ("eth_gateway_subscriptions_overflowed_total", "Subscriptions dropped for queue overflow", load(&self.subscriptions_overflowed)),
        ]
    }

    /// Prometheus text exposition of the current counter values.
    #[cfg(feature = "metrics")]
    pub fn to_prometheus(&self) -> Result<String, prometheus::Error> {
        use prometheus::{Encoder, Gauge, IntGauge, Registry, TextEncoder};

        let registry = Registry::new();
        for (name, help, value) in self.counters() {
            let gauge = IntGauge::new(name, help)?;
            gauge.set(i64::try_from(value).unwrap_or(i64::MAX));
            registry.register(Box::new(gauge))?;
        }
        let latency = Gauge::new("eth_gateway_average_latency_ms", "Average request latency")?;
        latency.set(self.average_latency_ms());
        registry.register(Box::new(latency))?;

        let mut buf = Vec::new();
        TextEncoder::new().encode(&registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut counters = serde_json::Map::new();
        for (name, _, value) in self.counters() {
            let key = name.trim_start_matches("eth_gateway_");
            counters.insert(key.to_string(), serde_json::json!(value));
        }
        counters.insert(
            "average_latency_ms".to_string(),
            serde_json::json!(self.average_latency_ms()),
        );
        serde_json::Value::Object(counters)
    }
}

/// Measures one request from creation to `finish`.
pub struct RequestTimer {
    start: Instant,
    metrics: Arc<GatewayMetrics>,
    is_write: bool,
}

impl RequestTimer {
    pub fn new(metrics: Arc<GatewayMetrics>, is_write: bool) -> Self {
        Self {
            start: Instant::now(),
            metrics,
            is_write,
        }
    }

    pub fn finish(self, success: bool) {
        let latency_ms = self.start.elapsed().as_millis() as u64;
        self.metrics.record_request(success, self.is_write, latency_ms);
    }
}
