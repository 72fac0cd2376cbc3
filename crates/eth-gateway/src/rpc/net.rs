//! Net JSON-RPC methods.

use crate::domain::error::ApiResult;
use tracing::instrument;

/// Net RPC methods handler
pub struct NetRpc {
    chain_id: u64,
}

impl NetRpc {
    pub fn new(chain_id: u64) -> Self {
        Self { chain_id }
    }

    /// net_version - chain id in decimal
    #[instrument(skip(self))]
    pub async fn version(&self) -> ApiResult<String> {
        Ok(self.chain_id.to_string())
    }

    /// net_listening - a serving gateway is always listening
    #[instrument(skip(self))]
    pub async fn listening(&self) -> ApiResult<bool> {
        Ok(true)
    }

    /// net_peerCount - the gateway has no peers of its own
    #[instrument(skip(self))]
    pub async fn peer_count(&self) -> ApiResult<String> {
        Ok("0x0".to_string())
    }
}
