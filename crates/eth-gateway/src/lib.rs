#![allow(missing_docs)]

//! Ethereum JSON-RPC compatibility layer over a content-addressed actor
//! chain.
//!
//! # Architecture
//!
//! ```text
//!   HTTP POST /rpc/v1          WebSocket /rpc/v1
//!          │                         │
//!   TracingLayer → CORS       WebSocketHandler ── eth_subscribe ──┐
//!          │                         │                            │
//!          └──────── router ─────────┘                            │
//!                      │                                          │
//!                 RpcHandlers                             SubscriptionBroker
//!        (eth / net / web3, FilterRegistry)                       ▲
//!                      │                                          │
//!   ChainViewProjector · AddressBridge · GasEstimationProxy       │
//!                      │                                          │
//!        ChainStore · StateApi · Mempool · BlockStore ── Dispatcher
//!                     (collaborator ports)            (head + mpool feeds)
//! ```
//!
//! Blocks are projected from tipsets, logs from actor events, and hashes
//! and addresses are translated in both directions. Filters are polled;
//! subscriptions are pushed. Both are fed by one [`dispatch::Dispatcher`].
//!
//! # Usage
//!
//! ```ignore
//! use eth_gateway::{adapters::MemoryChain, GatewayConfig, GatewayService};
//!
//! let chain = MemoryChain::new();
//! let service = GatewayService::new(GatewayConfig::default(), chain.upstream())?;
//! service.run().await?;
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod adapters;
pub mod dispatch;
pub mod domain;
pub mod eth;
pub mod filters;
pub mod middleware;
pub mod ports;
pub mod router;
pub mod rpc;
pub mod service;
pub mod ws;

// Re-exports for public API
pub use domain::config::GatewayConfig;
pub use domain::error::{ApiError, ApiResult, EthError, GatewayError};
pub use domain::methods::{get_method_info, is_method_supported, MethodInfo};
pub use domain::types::*;
pub use middleware::GatewayMetrics;
pub use service::GatewayService;
pub use ws::SubscriptionBroker;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default web3_clientVersion string
pub fn client_version() -> String {
    format!("eth-gateway/v{}/{}/rust", VERSION, std::env::consts::OS)
}
