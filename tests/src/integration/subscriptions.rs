//! # Push Subscriptions
//!
//! `eth_subscribe` over the WebSocket handler, fed by the dispatcher. The
//! socket itself is replaced by the handler's outbound queue.

#[cfg(test)]
mod tests {
    use crate::integration::harness::{topic, Gateway};
    use axum::extract::ws::Message;
    use eth_gateway::adapters::fixtures::topic_event;
    use eth_gateway::ws::subscriptions::OVERFLOW_REASON;
    use eth_gateway::ws::WebSocketHandler;
    use eth_gateway::GatewayConfig;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    struct Connection {
        handler: WebSocketHandler,
        out: mpsc::Sender<Message>,
        frames: mpsc::Receiver<Message>,
        /// Notifications read while waiting for a response.
        backlog: VecDeque<Value>,
    }

    impl Connection {
        fn open(gw: &Gateway, queue: usize) -> Self {
            let (out, frames) = mpsc::channel(queue);
            let handler = WebSocketHandler::new(
                gw.service.app_state(),
                gw.service.broker(),
                gw.service.config().websocket.clone(),
            );
            Self {
                handler,
                out,
                frames,
                backlog: VecDeque::new(),
            }
        }

        async fn result(&mut self, method: &str, params: Value) -> Value {
            let body = json!({"jsonrpc": "2.0", "id": 1, "method": method, "params": params});
            assert!(self.handler.respond(&body.to_string(), &self.out).await);
            let response = loop {
                let frame = self.next_frame().await;
                if frame.get("id").is_some() {
                    break frame;
                }
                self.backlog.push_back(frame);
            };
            assert!(response.get("error").is_none(), "{} failed: {}", method, response);
            response["result"].clone()
        }

        async fn notification(&mut self) -> Value {
            match self.backlog.pop_front() {
                Some(note) => note,
                None => self.next_frame().await,
            }
        }

        async fn next_frame(&mut self) -> Value {
            let frame = timeout(Duration::from_secs(5), self.frames.recv())
                .await
                .expect("no notification")
                .expect("connection closed");
            match frame {
                Message::Text(text) => serde_json::from_str(&text).unwrap(),
                other => panic!("unexpected frame {:?}", other),
            }
        }

        async fn assert_silent(&mut self) {
            tokio::time::sleep(Duration::from_millis(20)).await;
            assert!(self.backlog.is_empty(), "unexpected notification");
            assert!(self.frames.try_recv().is_err(), "unexpected notification");
        }
    }

    #[tokio::test]
    async fn test_new_heads_in_order_until_unsubscribed() {
        let mut gw = Gateway::start();
        let mut conn = Connection::open(&gw, 64);
        let id = conn.result("eth_subscribe", json!(["newHeads"])).await;

        for _ in 0..5 {
            gw.produce(vec![]).await;
        }
        for height in 1..=5u64 {
            let note = conn.notification().await;
            assert_eq!(note["method"], json!("eth_subscription"));
            assert_eq!(note["params"]["subscription"], id);
            assert_eq!(note["params"]["result"]["number"], json!(format!("{:#x}", height)));
        }

        assert_eq!(conn.result("eth_unsubscribe", json!([id])).await, json!(true));
        gw.produce(vec![]).await;
        conn.assert_silent().await;
        assert_eq!(conn.result("eth_unsubscribe", json!([id])).await, json!(false));
    }

    #[tokio::test]
    async fn test_log_subscription_filters_and_sees_reverts() {
        let mut gw = Gateway::start();
        let c = gw.contract;
        let mut conn = Connection::open(&gw, 64);
        let id = conn
            .result("eth_subscribe", json!(["logs", {"topics": [topic(1)]}]))
            .await;

        gw.produce(vec![vec![topic_event(c, &[1], b"in"), topic_event(c, &[2], b"out")]])
            .await;
        let note = conn.notification().await;
        assert_eq!(note["params"]["subscription"], id);
        assert_eq!(note["params"]["result"]["topics"][0], json!(topic(1)));
        assert_eq!(note["params"]["result"]["removed"], json!(false));
        conn.assert_silent().await;

        gw.revert().await;
        let note = conn.notification().await;
        assert_eq!(note["params"]["result"]["topics"][0], json!(topic(1)));
        assert_eq!(note["params"]["result"]["removed"], json!(true));
    }

    /// A peer that stops reading loses its subscription; the dispatcher
    /// keeps serving everyone else.
    #[tokio::test]
    async fn test_slow_consumer_dropped_with_overflow_notice() {
        let mut config = GatewayConfig::default();
        config.subscriptions.queue_capacity = 2;
        let mut gw = Gateway::with_config(config);
        let mut slow = Connection::open(&gw, 1);
        let mut fast = Connection::open(&gw, 64);
        let slow_id = slow.result("eth_subscribe", json!(["newHeads"])).await;
        let fast_id = fast.result("eth_subscribe", json!(["newHeads"])).await;

        for height in 1..=6u64 {
            gw.produce(vec![]).await;
            let note = fast.notification().await;
            assert_eq!(note["params"]["subscription"], fast_id);
            assert_eq!(note["params"]["result"]["number"], json!(format!("{:#x}", height)));
        }

        let mut delivered = Vec::new();
        let last = loop {
            let note = slow.notification().await;
            assert_eq!(note["params"]["subscription"], slow_id);
            if note["params"]["error"].is_string() {
                break note;
            }
            delivered.push(note["params"]["result"]["number"].clone());
        };
        assert_eq!(last["params"]["error"], json!(OVERFLOW_REASON));
        assert!(last["params"].get("result").is_none());
        let expected: Vec<Value> = (1..=delivered.len() as u64)
            .map(|h| json!(format!("{:#x}", h)))
            .collect();
        assert_eq!(delivered, expected);
        assert!(delivered.len() < 6);

        assert_eq!(gw.service.broker().dropped(), 1);
        // the forwarder records the overflow once the notice is written
        slow.assert_silent().await;
        assert_eq!(
            gw.service.metrics().to_json()["subscriptions_overflowed_total"],
            json!(1)
        );
        assert_eq!(slow.result("eth_unsubscribe", json!([slow_id])).await, json!(false));
        assert_eq!(fast.result("eth_unsubscribe", json!([fast_id])).await, json!(true));
    }

    #[tokio::test]
    async fn test_unsubscribe_is_scoped_to_connection() {
        let gw = Gateway::start();
        let mut owner = Connection::open(&gw, 8);
        let mut other = Connection::open(&gw, 8);
        let id = owner.result("eth_subscribe", json!(["newHeads"])).await;

        assert_eq!(other.result("eth_unsubscribe", json!([id])).await, json!(false));
        assert_eq!(owner.result("eth_unsubscribe", json!([id])).await, json!(true));
    }

    #[tokio::test]
    async fn test_close_releases_connection_subscriptions() {
        let gw = Gateway::start();
        let baseline = gw.service.broker().len();
        let mut conn = Connection::open(&gw, 8);
        conn.result("eth_subscribe", json!(["newHeads"])).await;
        conn.result("eth_subscribe", json!(["logs"])).await;
        assert_eq!(gw.service.broker().len(), baseline + 2);

        conn.handler.close().await;
        assert_eq!(gw.service.broker().len(), baseline);
    }
}
