//! Gateway service: wires the components together and runs the servers.

use crate::dispatch::Dispatcher;
use crate::domain::config::{GatewayConfig, WebSocketConfig};
use crate::domain::error::GatewayError;
use crate::eth::address::AddressBridge;
use crate::eth::index::HashIndex;
use crate::eth::projection::ChainViewProjector;
use crate::filters::FilterRegistry;
use crate::middleware::{create_cors_layer, GatewayMetrics, TracingLayer};
use crate::ports::outbound::{SystemTimeSource, TimeSource, Upstream};
use crate::router::{self, AppState};
use crate::rpc::RpcHandlers;
use crate::ws::{SubscriptionBroker, WebSocketHandler};
use axum::{
    extract::{ws::WebSocketUpgrade, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info, warn};

/// Shared by the axum handlers
#[derive(Clone)]
struct ServerState {
    app: AppState,
    broker: Arc<SubscriptionBroker>,
    projector: Arc<ChainViewProjector>,
    websocket: WebSocketConfig,
    clock: Arc<dyn TimeSource>,
    started_at: u64,
}

pub struct GatewayService {
    config: GatewayConfig,
    upstream: Upstream,
    projector: Arc<ChainViewProjector>,
    filters: Arc<FilterRegistry>,
    broker: Arc<SubscriptionBroker>,
    state: AppState,
    clock: Arc<dyn TimeSource>,
    started_at: u64,
    shutdown_tx: watch::Sender<bool>,
}

impl GatewayService {
    pub fn new(config: GatewayConfig, upstream: Upstream) -> Result<Self, GatewayError> {
        Self::with_clock(config, upstream, Arc::new(SystemTimeSource))
    }

    pub fn with_clock(
        config: GatewayConfig,
        upstream: Upstream,
        clock: Arc<dyn TimeSource>,
    ) -> Result<Self, GatewayError> {
        config
            .validate()
            .map_err(|e| GatewayError::Config(e.to_string()))?;

        let bridge = Arc::new(AddressBridge::new(upstream.state.clone()));
        let projector = Arc::new(ChainViewProjector::new(
            upstream.clone(),
            bridge,
            Arc::new(HashIndex::new()),
            config.chain.chain_id,
        ));
        let filters = Arc::new(FilterRegistry::new(config.filters.clone()));
        let broker = Arc::new(SubscriptionBroker::new(config.subscriptions.clone()));
        let rpc_handlers = Arc::new(RpcHandlers::new(
            &config,
            upstream.clone(),
            Arc::clone(&projector),
            Arc::clone(&filters),
        ));
        let state = AppState {
            rpc_handlers,
            metrics: Arc::new(GatewayMetrics::new()),
            timeouts: config.timeouts.clone(),
            max_batch_size: config.limits.max_batch_size,
        };
        let (shutdown_tx, _) = watch::channel(false);
        let started_at = clock.now();

        Ok(Self {
            config,
            upstream,
            projector,
            filters,
            broker,
            state,
            clock,
            started_at,
            shutdown_tx,
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn app_state(&self) -> AppState {
        self.state.clone()
    }

    pub fn filters(&self) -> Arc<FilterRegistry> {
        Arc::clone(&self.filters)
    }

    pub fn broker(&self) -> Arc<SubscriptionBroker> {
        Arc::clone(&self.broker)
    }

    pub fn metrics(&self) -> Arc<GatewayMetrics> {
        Arc::clone(&self.state.metrics)
    }

    /// Handle one HTTP request body without a server.
    pub async fn handle_rpc(&self, body: &str) -> serde_json::Value {
        router::handle_body(&self.state, body).await
    }

    /// Start the head-change dispatcher and the filter sweeper. Both feeds
    /// are subscribed before this returns, so no later event is missed.
    pub fn spawn_background(&self) -> Vec<JoinHandle<()>> {
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&self.projector),
            Arc::clone(&self.filters),
            Arc::clone(&self.broker),
        ));
        let heads = self.upstream.chain.subscribe_head_changes();
        let mpool = self.upstream.mpool.subscribe_updates();
        vec![
            dispatcher.spawn(heads, mpool, self.shutdown_tx.subscribe()),
            self.filters.spawn_sweeper(self.shutdown_tx.subscribe()),
        ]
    }

    fn server_state(&self) -> ServerState {
        ServerState {
            app: self.state.clone(),
            broker: Arc::clone(&self.broker),
            projector: Arc::clone(&self.projector),
            websocket: self.config.websocket.clone(),
            clock: Arc::clone(&self.clock),
            started_at: self.started_at,
        }
    }

    /// HTTP JSON-RPC router, with the WebSocket endpoint mounted when it
    /// shares the HTTP port.
    pub fn http_router(&self) -> Router {
        let rpc = if self.config.websocket.enabled && self.config.ws_shares_http() {
            post(handle_json_rpc).get(ws_upgrade)
        } else {
            post(handle_json_rpc)
        };

        Router::new()
            .route("/", rpc.clone())
            .route("/rpc/v1", rpc)
            .route("/health", get(health_check))
            .route("/metrics", get(metrics_export))
            .layer(RequestBodyLimitLayer::new(self.config.limits.max_request_size))
            .layer(create_cors_layer(&self.config.cors))
            .layer(TracingLayer::new())
            .with_state(self.server_state())
    }

    /// Standalone WebSocket router for a dedicated port.
    pub fn ws_router(&self) -> Router {
        Router::new()
            .route("/", get(ws_upgrade))
            .route("/rpc/v1", get(ws_upgrade))
            .layer(TracingLayer::new())
            .with_state(self.server_state())
    }

    /// Bind the listeners and serve until [`shutdown`](Self::shutdown).
    pub async fn run(&self) -> Result<(), GatewayError> {
        if *self.shutdown_tx.borrow() {
            return Err(GatewayError::ShuttingDown);
        }
        info!(chain_id = self.config.chain.chain_id, "starting eth gateway");
        let background = self.spawn_background();

        let mut listeners = Vec::new();
        if self.config.http.enabled {
            info!(addr = %self.config.http_addr(), ws = self.config.ws_shares_http(), "starting HTTP server");
            listeners.push((self.config.http_addr(), self.http_router()));
        }
        if self.config.websocket.enabled && !self.config.ws_shares_http() {
            info!(addr = %self.config.ws_addr(), "starting WebSocket server");
            listeners.push((self.config.ws_addr(), self.ws_router()));
        }
        let mut servers = Vec::new();
        for (addr, router) in listeners {
            match self.serve(addr, router).await {
                Ok(server) => servers.push(server),
                Err(e) => {
                    self.shutdown();
                    return Err(e);
                }
            }
        }

        info!("eth gateway started");
        for server in servers {
            match server.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "server error"),
                Err(e) => error!(error = %e, "server task failed"),
            }
        }
        // A server that died on its own still takes the background tasks down.
        self.shutdown();
        for task in background {
            if let Err(e) = task.await {
                warn!(error = %e, "background task failed");
            }
        }
        info!("eth gateway stopped");
        Ok(())
    }

    async fn serve(
        &self,
        addr: SocketAddr,
        router: Router,
    ) -> Result<JoinHandle<std::io::Result<()>>, GatewayError> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| GatewayError::Bind(format!("{}: {}", addr, e)))?;
        let mut shutdown = self.shutdown_tx.subscribe();
        Ok(tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    while !*shutdown.borrow() {
                        if shutdown.changed().await.is_err() {
                            break;
                        }
                    }
                })
                .await
        }))
    }

    /// Trigger graceful shutdown
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }
}

async fn handle_json_rpc(State(state): State<ServerState>, body: String) -> impl IntoResponse {
    Json(router::handle_body(&state.app, &body).await)
}

async fn ws_upgrade(State(state): State<ServerState>, ws: WebSocketUpgrade) -> Response {
    let open = state.app.metrics.websocket_connections.load(Ordering::Relaxed);
    if open >= state.websocket.max_connections as u64 {
        warn!(open, "websocket connection limit reached");
        return (StatusCode::SERVICE_UNAVAILABLE, "too many connections").into_response();
    }
    ws.max_message_size(state.websocket.max_message_size)
        .on_upgrade(move |socket| async move {
            WebSocketHandler::new(state.app, state.broker, state.websocket)
                .handle(socket)
                .await;
        })
}

async fn health_check(State(state): State<ServerState>) -> impl IntoResponse {
    let uptime = state.clock.now().saturating_sub(state.started_at);
    match state.projector.head().await {
        Ok(head) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "uptime_secs": uptime,
                "head": head.height(),
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "degraded",
                "version": env!("CARGO_PKG_VERSION"),
                "uptime_secs": uptime,
                "error": e.to_string(),
            })),
        ),
    }
}

#[cfg(feature = "metrics")]
async fn metrics_export(State(state): State<ServerState>) -> Response {
    match state.app.metrics.to_prometheus() {
        Ok(text) => (
            [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[cfg(not(feature = "metrics"))]
async fn metrics_export(State(state): State<ServerState>) -> Response {
    Json(state.app.metrics.to_json()).into_response()
}
