//! WebSocket transport.
//!
//! A connection serves `eth_subscribe`/`eth_unsubscribe` itself and passes
//! every other method to the router. Each subscription gets a forwarding
//! task that turns broker deliveries into `eth_subscription` notifications.
//! All writes to the socket go through one writer task, so a slow peer
//! backs up into the subscription queues, where overflow is detected.
//!
//! A forwarding task starts only once the response naming its subscription
//! has been queued, and `eth_unsubscribe` answers only after the task has
//! stopped. Notifications therefore never precede the subscription id nor
//! follow the unsubscribe result.

use crate::domain::config::WebSocketConfig;
use crate::domain::error::{ApiError, ApiResult};
use crate::domain::methods::{EthMethod, SubscriptionType};
use crate::domain::types::{FilterId, FilterRequest};
use crate::middleware::{GatewayMetrics, RequestTimer};
use crate::router::{
    call_method, check_batch, json_rpc_error, json_rpc_result, parse_envelope, parse_param,
    parse_param_optional, AppState, Envelope,
};
use crate::ws::subscriptions::{
    spec_for, Delivery, SubscribeError, SubscriptionBroker, SubscriptionNotification,
    SubscriptionStream,
};
use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Frames waiting for the socket writer.
const OUTBOUND_QUEUE: usize = 64;

/// One WebSocket connection
pub struct WebSocketHandler {
    state: AppState,
    broker: Arc<SubscriptionBroker>,
    config: WebSocketConfig,
    connection_id: Uuid,
    subscriptions: HashMap<FilterId, JoinHandle<()>>,
    /// Forwarders waiting for their subscribe response to be queued.
    unstarted: Vec<oneshot::Sender<()>>,
}

impl WebSocketHandler {
    pub fn new(state: AppState, broker: Arc<SubscriptionBroker>, config: WebSocketConfig) -> Self {
        Self {
            state,
            broker,
            config,
            connection_id: Uuid::new_v4(),
            subscriptions: HashMap::new(),
            unstarted: Vec::new(),
        }
    }

    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    fn metrics(&self) -> &Arc<GatewayMetrics> {
        &self.state.metrics
    }

    /// Serve a connection until the peer closes it or the socket fails.
    pub async fn handle(mut self, socket: WebSocket) {
        let (mut sink, mut stream) = socket.split();
        let (out_tx, mut out_rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE);
        let writer = tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        self.metrics().record_ws_connect();
        info!(connection_id = %self.connection_id, "websocket connected");

        while let Some(result) = stream.next().await {
            let text = match result {
                Ok(Message::Text(text)) => text,
                Ok(Message::Binary(data)) => match String::from_utf8(data) {
                    Ok(text) => text,
                    Err(_) => {
                        let err = ApiError::parse_error("binary frame is not UTF-8");
                        if send(&out_tx, json_rpc_error(Value::Null, &err)).await.is_err() {
                            break;
                        }
                        continue;
                    }
                },
                Ok(Message::Ping(data)) => {
                    if out_tx.send(Message::Pong(data)).await.is_err() {
                        break;
                    }
                    continue;
                }
                Ok(Message::Pong(_)) => continue,
                Ok(Message::Close(_)) => {
                    debug!(connection_id = %self.connection_id, "close frame received");
                    break;
                }
                Err(e) => {
                    warn!(connection_id = %self.connection_id, error = %e, "websocket error");
                    break;
                }
            };

            if !self.respond(&text, &out_tx).await {
                break;
            }
        }

        self.close().await;
        drop(out_tx);
        let _ = writer.await;
        self.metrics().record_ws_disconnect();
        info!(connection_id = %self.connection_id, "websocket closed");
    }

    /// Answer one text frame on `out`, then start the forwarders of any
    /// subscriptions it created. False once `out` is closed.
    pub async fn respond(&mut self, text: &str, out: &mpsc::Sender<Message>) -> bool {
        let response = self.handle_text(text, out).await;
        let sent = send(out, response).await.is_ok();
        for gate in self.unstarted.drain(..) {
            if sent {
                let _ = gate.send(());
            }
        }
        sent
    }

    async fn handle_text(&mut self, text: &str, out: &mpsc::Sender<Message>) -> Value {
        if text.len() > self.config.max_message_size {
            warn!(
                connection_id = %self.connection_id,
                size = text.len(),
                max = self.config.max_message_size,
                "message exceeds size limit"
            );
            let err = ApiError::invalid_request(format!(
                "message too large: {} bytes (max: {})",
                text.len(),
                self.config.max_message_size
            ));
            return json_rpc_error(Value::Null, &err);
        }
        let request: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => return json_rpc_error(Value::Null, &ApiError::parse_error(e.to_string())),
        };
        match request {
            Value::Array(batch) => {
                if let Err(e) = check_batch(&batch, self.state.max_batch_size) {
                    return json_rpc_error(Value::Null, &e);
                }
                let mut responses = Vec::with_capacity(batch.len());
                for req in &batch {
                    responses.push(self.handle_request(req, out).await);
                }
                Value::Array(responses)
            }
            single => self.handle_request(&single, out).await,
        }
    }

    async fn handle_request(&mut self, request: &Value, out: &mpsc::Sender<Message>) -> Value {
        let Envelope { id, info, params } = match parse_envelope(request) {
            Ok(env) => env,
            Err((id, e)) => return json_rpc_error(id, &e),
        };
        let result = match info.method {
            EthMethod::Subscribe | EthMethod::Unsubscribe => {
                let timer = RequestTimer::new(Arc::clone(self.metrics()), false);
                let result = if info.method == EthMethod::Subscribe {
                    self.subscribe(params, out)
                } else {
                    self.unsubscribe(params).await
                };
                timer.finish(result.is_ok());
                result
            }
            _ => call_method(&self.state, info, params).await,
        };
        match result {
            Ok(value) => json_rpc_result(id, value),
            Err(e) => json_rpc_error(id, &e),
        }
    }

    fn subscribe(&mut self, params: Option<&Value>, out: &mpsc::Sender<Message>) -> ApiResult<Value> {
        self.subscriptions.retain(|_, task| !task.is_finished());
        let limit = self.config.max_subscriptions_per_connection;
        if self.subscriptions.len() >= limit {
            return Err(SubscribeError::TooManySubscriptions(limit).into());
        }

        let kind_name: String = parse_param(params, 0)?;
        let kind = SubscriptionType::from_str(&kind_name)
            .ok_or_else(|| SubscribeError::InvalidType(kind_name.clone()))?;
        let filter: Option<FilterRequest> = parse_param_optional(params, 1)?;
        let stream = self.broker.subscribe(spec_for(kind, filter)?)?;
        let id = stream.id();

        self.metrics().record_ws_subscribe();
        let (gate, start) = oneshot::channel();
        let task = tokio::spawn(forward(
            stream,
            out.clone(),
            Arc::clone(self.metrics()),
            start,
        ));
        self.unstarted.push(gate);
        self.subscriptions.insert(id, task);
        debug!(connection_id = %self.connection_id, %id, kind = kind.as_str(), "subscribed");
        Ok(serde_json::to_value(id)?)
    }

    /// Only subscriptions created on this connection can be removed here.
    async fn unsubscribe(&mut self, params: Option<&Value>) -> ApiResult<Value> {
        let id: FilterId = parse_param(params, 0)?;
        let removed = match self.subscriptions.remove(&id) {
            Some(task) => {
                let removed = self.broker.unsubscribe(&id);
                task.abort();
                // A notification already being queued lands before the reply.
                let _ = task.await;
                if removed {
                    self.metrics().record_ws_unsubscribe();
                }
                removed
            }
            None => false,
        };
        debug!(connection_id = %self.connection_id, %id, removed, "unsubscribe");
        Ok(Value::Bool(removed))
    }

    /// Drop every subscription of this connection.
    pub async fn close(&mut self) {
        self.unstarted.clear();
        for (id, task) in self.subscriptions.drain() {
            if self.broker.unsubscribe(&id) {
                self.state.metrics.record_ws_unsubscribe();
            }
            task.abort();
            let _ = task.await;
        }
    }
}

async fn send(out: &mpsc::Sender<Message>, value: Value) -> Result<(), ()> {
    out.send(Message::Text(value.to_string()))
        .await
        .map_err(|_| ())
}

/// Pump one subscription into the connection's outbound queue once `start`
/// fires.
async fn forward(
    mut stream: SubscriptionStream,
    out: mpsc::Sender<Message>,
    metrics: Arc<GatewayMetrics>,
    start: oneshot::Receiver<()>,
) {
    if start.await.is_err() {
        return;
    }
    let id = stream.id();
    while let Some(delivery) = stream.next_delivery().await {
        let overflow = matches!(delivery, Delivery::Overflow);
        let text = match serde_json::to_string(&SubscriptionNotification::new(id, delivery)) {
            Ok(text) => text,
            Err(e) => {
                warn!(%id, error = %e, "unserializable notification");
                continue;
            }
        };
        if out.send(Message::Text(text)).await.is_err() {
            return;
        }
        metrics.record_ws_notification();
        if overflow {
            metrics.record_ws_overflow();
            warn!(%id, "subscription dropped after queue overflow");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryChain;
    use crate::domain::config::GatewayConfig;
    use crate::domain::error::codes;
    use crate::service::GatewayService;
    use serde_json::json;
    use std::time::Duration;

    fn handler(service: &GatewayService) -> WebSocketHandler {
        WebSocketHandler::new(
            service.app_state(),
            service.broker(),
            service.config().websocket.clone(),
        )
    }

    async fn next_json(rx: &mut mpsc::Receiver<Message>) -> Value {
        let msg = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("frame in time")
            .expect("channel open");
        match msg {
            Message::Text(text) => serde_json::from_str(&text).unwrap(),
            other => panic!("unexpected frame {:?}", other),
        }
    }

    /// Send `text` and return the frame that answers it.
    async fn call(
        ws: &mut WebSocketHandler,
        out: &mpsc::Sender<Message>,
        rx: &mut mpsc::Receiver<Message>,
        text: &str,
    ) -> Value {
        assert!(ws.respond(text, out).await);
        next_json(rx).await
    }

    #[tokio::test]
    async fn test_subscribe_delivers_heads() {
        let chain = MemoryChain::new();
        let service = GatewayService::new(GatewayConfig::default(), chain.upstream()).unwrap();
        let _tasks = service.spawn_background();
        let mut ws = handler(&service);
        let (out, mut rx) = mpsc::channel(16);

        let resp = call(
            &mut ws,
            &out,
            &mut rx,
            r#"{"jsonrpc":"2.0","id":1,"method":"eth_subscribe","params":["newHeads"]}"#,
        )
        .await;
        let id = resp["result"].as_str().unwrap().to_string();

        let ts = chain.produce_tipset(vec![]).await;
        let note = next_json(&mut rx).await;
        assert_eq!(note["method"], "eth_subscription");
        assert_eq!(note["params"]["subscription"], id.as_str());
        assert_eq!(
            note["params"]["result"]["number"],
            format!("0x{:x}", ts.height())
        );

        let unsub = json!({"jsonrpc":"2.0","id":2,"method":"eth_unsubscribe","params":[id]});
        let resp = call(&mut ws, &out, &mut rx, &unsub.to_string()).await;
        assert_eq!(resp["result"], true);
        let again = json!({"jsonrpc":"2.0","id":3,"method":"eth_unsubscribe","params":[id]});
        let resp = call(&mut ws, &out, &mut rx, &again.to_string()).await;
        assert_eq!(resp["result"], false);
        service.shutdown();
    }

    #[tokio::test]
    async fn test_subscription_id_precedes_its_notifications() {
        let chain = MemoryChain::new();
        let service = GatewayService::new(GatewayConfig::default(), chain.upstream()).unwrap();
        let mut ws = handler(&service);
        let (out, mut rx) = mpsc::channel(16);

        // Events published while the subscribe call is still being answered
        // must wait behind the response.
        let sub = r#"{"jsonrpc":"2.0","id":1,"method":"eth_subscribe","params":["newPendingTransactions"]}"#;
        let answer = ws.handle_text(sub, &out).await;
        let id = answer["result"].as_str().unwrap().to_string();
        service.broker().publish_pending(Default::default());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());

        // Once the response is out the held-back event follows it.
        for gate in ws.unstarted.drain(..) {
            let _ = gate.send(());
        }
        let note = next_json(&mut rx).await;
        assert_eq!(note["params"]["subscription"], id.as_str());
        service.shutdown();
    }

    #[tokio::test]
    async fn test_no_notification_after_unsubscribe_result() {
        let chain = MemoryChain::new();
        let service = GatewayService::new(GatewayConfig::default(), chain.upstream()).unwrap();
        let mut ws = handler(&service);
        let (out, mut rx) = mpsc::channel(64);
        let broker = service.broker();

        let sub = r#"{"jsonrpc":"2.0","id":1,"method":"eth_subscribe","params":["newPendingTransactions"]}"#;
        let id = call(&mut ws, &out, &mut rx, sub).await["result"].clone();
        for _ in 0..8 {
            broker.publish_pending(Default::default());
        }
        let unsub = json!({"jsonrpc":"2.0","id":2,"method":"eth_unsubscribe","params":[id]});
        assert!(ws.respond(&unsub.to_string(), &out).await);
        broker.publish_pending(Default::default());
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut frames = Vec::new();
        while let Ok(Message::Text(text)) = rx.try_recv() {
            frames.push(serde_json::from_str::<Value>(&text).unwrap());
        }
        let last = frames.last().expect("unsubscribe response");
        assert_eq!(last["id"], 2);
        assert_eq!(last["result"], true);
        assert!(frames[..frames.len() - 1]
            .iter()
            .all(|f| f["method"] == "eth_subscription"));
    }

    #[tokio::test]
    async fn test_other_methods_go_through_router() {
        let chain = MemoryChain::new();
        let service = GatewayService::new(GatewayConfig::default(), chain.upstream()).unwrap();
        let mut ws = handler(&service);
        let (out, mut rx) = mpsc::channel(16);

        let resp = call(
            &mut ws,
            &out,
            &mut rx,
            r#"[{"jsonrpc":"2.0","id":1,"method":"eth_chainId"},{"jsonrpc":"2.0","id":2,"method":"net_version"}]"#,
        )
        .await;
        assert_eq!(resp[0]["result"], "0x13a");
        assert_eq!(resp[1]["result"], "314");
    }

    #[tokio::test]
    async fn test_subscribe_rejects_bad_input() {
        let chain = MemoryChain::new();
        let service = GatewayService::new(GatewayConfig::default(), chain.upstream()).unwrap();
        let mut ws = handler(&service);
        let (out, mut rx) = mpsc::channel(16);

        let resp = call(
            &mut ws,
            &out,
            &mut rx,
            r#"{"jsonrpc":"2.0","id":1,"method":"eth_subscribe","params":["syncing"]}"#,
        )
        .await;
        assert_eq!(resp["error"]["code"], codes::INVALID_PARAMS);

        let resp = call(&mut ws, &out, &mut rx, "{not json").await;
        assert_eq!(resp["error"]["code"], codes::PARSE_ERROR);
    }

    #[tokio::test]
    async fn test_per_connection_limit_and_close() {
        let chain = MemoryChain::new();
        let mut config = GatewayConfig::default();
        config.websocket.max_subscriptions_per_connection = 2;
        let service = GatewayService::new(config, chain.upstream()).unwrap();
        let mut ws = handler(&service);
        let (out, mut rx) = mpsc::channel(16);
        let sub = r#"{"jsonrpc":"2.0","id":1,"method":"eth_subscribe","params":["newPendingTransactions"]}"#;

        assert!(call(&mut ws, &out, &mut rx, sub).await["result"].is_string());
        assert!(call(&mut ws, &out, &mut rx, sub).await["result"].is_string());
        let third = call(&mut ws, &out, &mut rx, sub).await;
        assert_eq!(third["error"]["code"], codes::LIMIT_EXCEEDED);
        assert_eq!(service.broker().len(), 2);

        ws.close().await;
        assert!(service.broker().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_message_rejected() {
        let chain = MemoryChain::new();
        let mut config = GatewayConfig::default();
        config.websocket.max_message_size = 16;
        let service = GatewayService::new(config, chain.upstream()).unwrap();
        let mut ws = handler(&service);
        let (out, mut rx) = mpsc::channel(16);
        let resp = call(
            &mut ws,
            &out,
            &mut rx,
            r#"{"jsonrpc":"2.0","id":1,"method":"eth_chainId"}"#,
        )
        .await;
        assert_eq!(resp["error"]["code"], codes::INVALID_REQUEST);
    }
}
