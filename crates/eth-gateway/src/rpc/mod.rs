//! RPC method handlers for the JSON-RPC API.

pub mod eth;
pub mod net;
pub mod web3;

pub use eth::EthRpc;
pub use net::NetRpc;
pub use web3::Web3Rpc;

use crate::domain::config::GatewayConfig;
use crate::eth::projection::ChainViewProjector;
use crate::filters::FilterRegistry;
use crate::ports::outbound::Upstream;
use std::sync::Arc;

/// All RPC handlers
pub struct RpcHandlers {
    pub eth: EthRpc,
    pub web3: Web3Rpc,
    pub net: NetRpc,
}

impl RpcHandlers {
    pub fn new(
        config: &GatewayConfig,
        upstream: Upstream,
        projector: Arc<ChainViewProjector>,
        filters: Arc<FilterRegistry>,
    ) -> Self {
        Self {
            eth: EthRpc::new(
                upstream,
                projector,
                filters,
                config.limits.max_log_block_range,
            ),
            web3: Web3Rpc::new(config.chain.client_version.clone()),
            net: NetRpc::new(config.chain.chain_id),
        }
    }
}
