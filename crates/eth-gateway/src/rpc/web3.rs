//! Web3 JSON-RPC methods.

use crate::domain::error::ApiResult;
use crate::domain::types::{Bytes, Hash};
use sha3::{Digest, Keccak256};

/// Web3 RPC methods handler
pub struct Web3Rpc {
    client_version: String,
}

impl Web3Rpc {
    pub fn new(client_version: String) -> Self {
        Self { client_version }
    }

    pub async fn client_version(&self) -> ApiResult<String> {
        Ok(self.client_version.clone())
    }

    /// web3_sha3 - Keccak-256, not the standardized SHA3-256.
    pub async fn sha3(&self, data: Bytes) -> ApiResult<Hash> {
        Ok(Hash::from_slice(&Keccak256::digest(data.as_slice())))
    }
}
