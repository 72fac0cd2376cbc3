//! A gateway running its dispatcher over a fresh in-memory chain.
//!
//! Two broker subscriptions act as barriers: tests wait on them to know a
//! head change has been folded into every filter before polling.

use eth_gateway::adapters::fixtures::produce_with_events;
use eth_gateway::adapters::MemoryChain;
use eth_gateway::eth::masked_id;
use eth_gateway::filters::{FilterSpec, LogCriteria};
use eth_gateway::ports::outbound::ActorKind;
use eth_gateway::ws::{Delivery, SubscriptionItem, SubscriptionStream};
use eth_gateway::{GatewayConfig, GatewayService};
use serde_json::{json, Value};
use shared_types::{ActorId, ChainMessage, MessageReceipt, StampedEvent, TipSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const BARRIER_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Gateway {
    pub chain: Arc<MemoryChain>,
    pub service: GatewayService,
    /// Plain account that sends every produced invocation
    pub sender: ActorId,
    /// EVM actor, without a delegated address, that emits every event
    pub contract: ActorId,
    heads: SubscriptionStream,
    logs: SubscriptionStream,
    tasks: Vec<JoinHandle<()>>,
    next_id: AtomicU64,
}

impl Gateway {
    pub fn start() -> Self {
        Self::with_config(GatewayConfig::default())
    }

    pub fn with_config(config: GatewayConfig) -> Self {
        let chain = MemoryChain::new();
        let sender = chain.create_actor(ActorKind::Account, 1_000_000, None);
        let contract = chain.create_actor(ActorKind::Evm, 0, None);
        let service = GatewayService::new(config, chain.upstream()).expect("valid config");
        let heads = service.broker().subscribe(FilterSpec::NewBlocks).unwrap();
        let logs = service
            .broker()
            .subscribe(FilterSpec::Logs(LogCriteria::any()))
            .unwrap();
        let tasks = service.spawn_background();
        Self {
            chain,
            service,
            sender,
            contract,
            heads,
            logs,
            tasks,
            next_id: AtomicU64::new(1),
        }
    }

    /// Full JSON-RPC response to one request.
    pub async fn rpc(&self, method: &str, params: Value) -> Value {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params});
        let response = self.service.handle_rpc(&body.to_string()).await;
        assert_eq!(response["id"], json!(id), "response id for {}", method);
        response
    }

    /// `result` of a request that must succeed.
    pub async fn result(&self, method: &str, params: Value) -> Value {
        let response = self.rpc(method, params).await;
        assert!(
            response.get("error").is_none(),
            "{} failed: {}",
            method,
            response
        );
        response["result"].clone()
    }

    /// `(code, message)` of a request that must fail.
    pub async fn error(&self, method: &str, params: Value) -> (i64, String) {
        let response = self.rpc(method, params).await;
        let error = &response["error"];
        assert!(error.is_object(), "{} should fail: {}", method, response);
        (
            error["code"].as_i64().unwrap(),
            error["message"].as_str().unwrap().to_string(),
        )
    }

    /// Produce a tipset where invocation `i` emits `receipts_events[i]`,
    /// and wait until the dispatcher has handled it.
    pub async fn produce(&mut self, receipts_events: Vec<Vec<StampedEvent>>) -> TipSet {
        let ts = produce_with_events(&self.chain, self.sender, self.contract, receipts_events)
            .await
            .unwrap();
        self.await_head(ts.height()).await;
        ts
    }

    /// Produce a tipset holding `executed` as is.
    pub async fn include(&mut self, executed: Vec<(ChainMessage, MessageReceipt)>) -> TipSet {
        let ts = self.chain.produce_tipset(executed).await;
        self.await_head(ts.height()).await;
        ts
    }

    async fn await_head(&mut self, height: u64) {
        let heads = &mut self.heads;
        timeout(BARRIER_TIMEOUT, async {
            loop {
                match heads.next_delivery().await {
                    Some(Delivery::Item(SubscriptionItem::Head(block))) if block.number.0 == height => {
                        break
                    }
                    Some(_) => continue,
                    None => panic!("head barrier closed"),
                }
            }
        })
        .await
        .expect("head change not dispatched");
        while self.logs.try_next().is_some() {}
    }

    /// Revert the head tipset, which must carry at least one log, and wait
    /// until the revert has been dispatched.
    pub async fn revert(&mut self) -> TipSet {
        let ts = self.chain.revert_head().await.expect("nothing to revert");
        let logs = &mut self.logs;
        timeout(BARRIER_TIMEOUT, async {
            loop {
                match logs.next_delivery().await {
                    Some(Delivery::Item(SubscriptionItem::Log(log))) if log.removed => break,
                    Some(_) => continue,
                    None => panic!("log barrier closed"),
                }
            }
        })
        .await
        .expect("revert not dispatched");
        while self.logs.try_next().is_some() {}
        ts
    }

    pub fn contract_address(&self) -> String {
        hex_address(masked_id(self.contract))
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.service.shutdown();
        for task in &self.tasks {
            task.abort();
        }
    }
}

pub fn hex_address(address: eth_gateway::Address) -> String {
    format!("{:#x}", address)
}

/// 32-byte topic made of `byte`, as the event fixtures build them.
pub fn topic(byte: u8) -> String {
    format!("0x{}", hex::encode([byte; 32]))
}

/// Poll `method` until it returns a non-empty array, collecting every batch.
pub async fn poll_until_some(gw: &Gateway, method: &str, params: Value) -> Vec<Value> {
    for _ in 0..100 {
        let changes = gw.result(method, params.clone()).await;
        let batch = changes.as_array().cloned().unwrap_or_default();
        if !batch.is_empty() {
            return batch;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{} stayed empty", method);
}
