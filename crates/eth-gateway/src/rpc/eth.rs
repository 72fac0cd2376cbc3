//! Ethereum JSON-RPC methods (eth_*).

use crate::domain::error::{ApiResult, EthError};
use crate::domain::types::*;
use crate::eth::address::AddressBridge;
use crate::eth::gas::GasEstimationProxy;
use crate::eth::projection::ChainViewProjector;
use crate::eth::raw_tx::decode_signed;
use crate::filters::{collect_logs, FilterRegistry, FilterSpec, LogCriteria};
use crate::ports::outbound::{ActorKind, ActorState, Upstream};
use shared_types::{ActorId, NativeAddress, TipSet};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Ethereum RPC methods handler
pub struct EthRpc {
    upstream: Upstream,
    projector: Arc<ChainViewProjector>,
    gas: GasEstimationProxy,
    filters: Arc<FilterRegistry>,
    max_log_block_range: u64,
}

impl EthRpc {
    pub fn new(
        upstream: Upstream,
        projector: Arc<ChainViewProjector>,
        filters: Arc<FilterRegistry>,
        max_log_block_range: u64,
    ) -> Self {
        let gas = GasEstimationProxy::new(upstream.state.clone(), Arc::clone(projector.bridge()));
        Self {
            upstream,
            projector,
            gas,
            filters,
            max_log_block_range,
        }
    }

    fn bridge(&self) -> &AddressBridge {
        self.projector.bridge()
    }

    /// Actor behind a foreign address in the state of `ts`. Unknown
    /// addresses are `None`, not an error: an address nobody has funded yet
    /// is valid.
    async fn actor_at(
        &self,
        address: Address,
        ts: &TipSet,
    ) -> ApiResult<Option<(ActorId, ActorState)>> {
        let id = match self.bridge().resolve_id_at(&address, Some(ts.key())).await {
            Ok(id) => id,
            Err(EthError::AddressNotFound(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(self
            .upstream
            .state
            .get_actor(&NativeAddress::Id(id), Some(ts.key()))
            .await?
            .map(|actor| (id, actor)))
    }

    async fn actor_at_block(
        &self,
        address: Address,
        block: BlockParam,
    ) -> ApiResult<Option<ActorState>> {
        let ts = self.projector.state_tipset(&block).await?;
        Ok(self.actor_at(address, &ts).await?.map(|(_, actor)| actor))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // CHAIN INFO
    // ═══════════════════════════════════════════════════════════════════════

    /// eth_chainId
    #[instrument(skip(self))]
    pub async fn chain_id(&self) -> ApiResult<U64> {
        Ok(U64(self.projector.chain_id()))
    }

    /// eth_protocolVersion - native network version
    #[instrument(skip(self))]
    pub async fn protocol_version(&self) -> ApiResult<U64> {
        let version = self.upstream.state.network_version(None).await?;
        Ok(U64(u64::from(version)))
    }

    #[instrument(skip(self))]
    pub async fn block_number(&self) -> ApiResult<U64> {
        Ok(U64(self.projector.head().await?.height()))
    }

    /// Always false: the gateway serves whatever the chain store has.
    #[instrument(skip(self))]
    pub async fn syncing(&self) -> ApiResult<bool> {
        Ok(false)
    }

    /// The gateway holds no keys.
    #[instrument(skip(self))]
    pub async fn accounts(&self) -> ApiResult<Vec<Address>> {
        Ok(Vec::new())
    }

    /// Head base fee plus the suggested premium.
    #[instrument(skip(self))]
    pub async fn gas_price(&self) -> ApiResult<U256> {
        let head = self.projector.head().await?;
        let premium = self.upstream.mpool.estimate_gas_premium().await?;
        Ok(U256::from(head.parent_base_fee().saturating_add(premium)))
    }

    #[instrument(skip(self))]
    pub async fn max_priority_fee_per_gas(&self) -> ApiResult<U256> {
        Ok(U256::from(self.upstream.mpool.estimate_gas_premium().await?))
    }

    #[instrument(skip(self))]
    pub async fn fee_history(
        &self,
        block_count: U64,
        newest: BlockParam,
        percentiles: Option<Vec<f64>>,
    ) -> ApiResult<FeeHistory> {
        Ok(self
            .projector
            .fee_history(block_count.0, &newest, percentiles.as_deref())
            .await?)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // ACCOUNT STATE
    // ═══════════════════════════════════════════════════════════════════════

    /// eth_getBalance - zero for addresses with no actor
    #[instrument(skip(self))]
    pub async fn get_balance(&self, address: Address, block: BlockParam) -> ApiResult<U256> {
        Ok(self
            .actor_at_block(address, block)
            .await?
            .map(|a| U256::from(a.balance))
            .unwrap_or(U256::ZERO))
    }

    #[instrument(skip(self))]
    pub async fn get_transaction_count(&self, address: Address, block: BlockParam) -> ApiResult<U64> {
        Ok(U64(self
            .actor_at_block(address, block)
            .await?
            .map(|a| a.nonce)
            .unwrap_or_default()))
    }

    /// Bytecode of EVM actors; empty for everything else.
    #[instrument(skip(self))]
    pub async fn get_code(&self, address: Address, block: BlockParam) -> ApiResult<Bytes> {
        Ok(match self.actor_at_block(address, block).await? {
            Some(ActorState {
                kind: ActorKind::Evm,
                bytecode: Some(code),
                ..
            }) => Bytes(code),
            _ => Bytes::new(),
        })
    }

    #[instrument(skip(self))]
    pub async fn get_storage_at(
        &self,
        address: Address,
        position: U256,
        block: BlockParam,
    ) -> ApiResult<Hash> {
        let ts = self.projector.state_tipset(&block).await?;
        let id = match self.actor_at(address, &ts).await? {
            Some((id, ActorState { kind: ActorKind::Evm, .. })) => id,
            _ => return Ok(Hash::zero()),
        };
        let value = self
            .upstream
            .state
            .get_storage_at(id, position.to_be_bytes(), Some(ts.key()))
            .await?;
        Ok(Hash::from(value))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // BLOCKS AND TRANSACTIONS
    // ═══════════════════════════════════════════════════════════════════════

    async fn tipset(&self, block: BlockParam) -> ApiResult<Option<TipSet>> {
        Ok(self.projector.resolve_block_param(&block).await?)
    }

    #[instrument(skip(self))]
    pub async fn get_block_by_hash(&self, hash: Hash, full_tx: bool) -> ApiResult<Option<EthBlock>> {
        self.get_block_by_number(BlockParam::Hash(hash), full_tx).await
    }

    #[instrument(skip(self))]
    pub async fn get_block_by_number(
        &self,
        block: BlockParam,
        full_tx: bool,
    ) -> ApiResult<Option<EthBlock>> {
        let Some(ts) = self.tipset(block).await? else {
            return Ok(None);
        };
        Ok(Some(self.projector.project_block(&ts, full_tx).await?))
    }

    #[instrument(skip(self))]
    pub async fn get_block_transaction_count_by_hash(&self, hash: Hash) -> ApiResult<Option<U64>> {
        self.get_block_transaction_count_by_number(BlockParam::Hash(hash))
            .await
    }

    #[instrument(skip(self))]
    pub async fn get_block_transaction_count_by_number(
        &self,
        block: BlockParam,
    ) -> ApiResult<Option<U64>> {
        let Some(ts) = self.tipset(block).await? else {
            return Ok(None);
        };
        let messages = self.upstream.chain.tipset_messages(&ts).await?;
        Ok(Some(U64(messages.len() as u64)))
    }

    #[instrument(skip(self))]
    pub async fn get_transaction_by_hash(&self, hash: Hash) -> ApiResult<Option<EthTransaction>> {
        Ok(self.projector.find_transaction(&hash).await?)
    }

    #[instrument(skip(self))]
    pub async fn get_transaction_by_block_hash_and_index(
        &self,
        hash: Hash,
        index: U64,
    ) -> ApiResult<Option<EthTransaction>> {
        self.get_transaction_by_block_number_and_index(BlockParam::Hash(hash), index)
            .await
    }

    #[instrument(skip(self))]
    pub async fn get_transaction_by_block_number_and_index(
        &self,
        block: BlockParam,
        index: U64,
    ) -> ApiResult<Option<EthTransaction>> {
        let Some(ts) = self.tipset(block).await? else {
            return Ok(None);
        };
        Ok(self.projector.transaction_at(&ts, index.0).await?)
    }

    #[instrument(skip(self))]
    pub async fn get_transaction_receipt(&self, hash: Hash) -> ApiResult<Option<EthReceipt>> {
        Ok(self.projector.find_receipt(&hash).await?)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // EXECUTION
    // ═══════════════════════════════════════════════════════════════════════

    #[instrument(skip(self))]
    pub async fn call(&self, request: CallRequest, block: BlockParam) -> ApiResult<Bytes> {
        let ts = self.projector.state_tipset(&block).await?;
        Ok(Bytes(self.gas.call(&request, Some(ts.key())).await?))
    }

    #[instrument(skip(self))]
    pub async fn estimate_gas(&self, request: CallRequest, block: Option<BlockParam>) -> ApiResult<U64> {
        let ts = match block {
            Some(b) => Some(self.projector.state_tipset(&b).await?),
            None => None,
        };
        let gas = self
            .gas
            .estimate_gas(&request, ts.as_ref().map(|t| t.key()))
            .await?;
        Ok(U64(gas))
    }

    /// Submit a signed EIP-1559 transaction; returns its hash.
    #[instrument(skip(self, raw), fields(len = raw.len()))]
    pub async fn send_raw_transaction(&self, raw: Bytes) -> ApiResult<Hash> {
        let chain_id = self.projector.chain_id();
        let (tx, sender) = decode_signed(raw.as_slice(), chain_id)
            .map_err(|e| EthError::InvalidParams(e.to_string()))?;
        let msg = tx
            .to_signed_message(sender)
            .map_err(|e| EthError::InvalidParams(e.to_string()))?;
        let cid = self.upstream.mpool.push(msg).await?;
        let hash = tx.hash();
        self.projector.index().insert(hash, cid);
        info!(tx_hash = %format!("{:#x}", hash), %cid, "transaction submitted");
        Ok(hash)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // LOGS AND FILTERS
    // ═══════════════════════════════════════════════════════════════════════

    #[instrument(skip(self))]
    pub async fn get_logs(&self, filter: FilterRequest) -> ApiResult<Vec<EthLog>> {
        let head = self.projector.head().await?.height();
        let criteria = LogCriteria::from_request(&filter, head)?;
        Ok(collect_logs(&self.projector, &criteria, self.max_log_block_range).await?)
    }

    /// Installs only after every upstream read has finished, so a cancelled
    /// call leaves nothing behind.
    #[instrument(skip(self))]
    pub async fn new_filter(&self, filter: FilterRequest) -> ApiResult<FilterId> {
        let head = self.projector.head().await?.height();
        let criteria = LogCriteria::from_request(&filter, head)?;
        Ok(self.filters.install(FilterSpec::Logs(criteria), head)?)
    }

    #[instrument(skip(self))]
    pub async fn new_block_filter(&self) -> ApiResult<FilterId> {
        let head = self.projector.head().await?.height();
        Ok(self.filters.install(FilterSpec::NewBlocks, head)?)
    }

    #[instrument(skip(self))]
    pub async fn new_pending_transaction_filter(&self) -> ApiResult<FilterId> {
        let head = self.projector.head().await?.height();
        Ok(self.filters.install(FilterSpec::PendingTransactions, head)?)
    }

    #[instrument(skip(self))]
    pub async fn get_filter_changes(&self, id: FilterId) -> ApiResult<FilterChanges> {
        let changes = self.filters.poll(&id)?;
        debug!(%id, results = changes.len(), "filter polled");
        Ok(changes)
    }

    #[instrument(skip(self))]
    pub async fn get_filter_logs(&self, id: FilterId) -> ApiResult<Vec<EthLog>> {
        let criteria = self.filters.log_criteria(&id)?;
        Ok(collect_logs(&self.projector, &criteria, self.max_log_block_range).await?)
    }

    /// True if the filter existed.
    #[instrument(skip(self))]
    pub async fn uninstall_filter(&self, id: FilterId) -> ApiResult<bool> {
        Ok(self.filters.uninstall(&id).is_ok())
    }
}
