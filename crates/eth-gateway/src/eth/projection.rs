//! # ChainViewProjector
//!
//! Computes foreign blocks, transactions, receipts and logs from native
//! tipsets on every request. Nothing here is persisted apart from the
//! hash-index entries of delegated messages, so the only property to keep is
//! determinism: the same tipset always projects to the same bytes.

use crate::domain::error::{EthError, EthResult};
use crate::domain::types::{
    Address, BlockParam, BlockTag, BlockTransactions, Bytes, EthBlock, EthLog, EthReceipt,
    EthTransaction, FeeHistory, Hash, U256, U64,
};
use crate::eth::address::AddressBridge;
use crate::eth::events::{LogEntry, ReceiptLogExtractor};
use crate::eth::index::HashIndex;
use crate::eth::raw_tx::{Eip1559Tx, EIP1559_TX_TYPE};
use crate::ports::outbound::Upstream;
use ethereum_types::{Bloom, BloomInput};
use shared_types::{
    cid_digest, ChainEpoch, ChainMessage, CreateExternalReturn, Message, MessageReceipt,
    NativeAddress, SignatureType, SignedMessage, TipSet, TokenAmount, EAM_ACTOR_ID,
    METHOD_CREATE_EXTERNAL,
};
use std::sync::Arc;
use tracing::{trace, warn};

/// Fixed gas limit reported for every block.
pub const BLOCK_GAS_LIMIT: u64 = 10_000_000_000;

/// Depth below head reported for the `safe` tag.
pub const SAFE_DEPTH: ChainEpoch = 30;

/// Depth below head reported for the `finalized` tag.
pub const FINALITY_DEPTH: ChainEpoch = 900;

/// Most blocks one eth_feeHistory call may span.
pub const MAX_FEE_HISTORY_BLOCKS: u64 = 1024;

/// keccak256(rlp([]))
const EMPTY_UNCLES_HASH: [u8; 32] = [
    0x1d, 0xcc, 0x4d, 0xe8, 0xde, 0xc7, 0x5d, 0x7a, 0xab, 0x85, 0xb5, 0x67, 0xb6, 0xcc, 0xd4, 0x1a,
    0xd3, 0x12, 0x45, 0x1b, 0x94, 0x8a, 0x74, 0x13, 0xf0, 0xa1, 0x42, 0xfd, 0x40, 0xd4, 0x93, 0x47,
];

/// Root of an empty Merkle-Patricia trie.
const EMPTY_TRIE_ROOT: [u8; 32] = [
    0x56, 0xe8, 0x1f, 0x17, 0x1b, 0xcc, 0x55, 0xa6, 0xff, 0x83, 0x45, 0xe6, 0x92, 0xc0, 0xf8, 0x6e,
    0x5b, 0x48, 0xe0, 0x1b, 0x99, 0x6c, 0xad, 0xc0, 0x01, 0x62, 0x2f, 0xb5, 0xe3, 0x63, 0xb4, 0x21,
];

/// Foreign hash of a tipset: the digest of its key's CID.
pub fn block_hash(ts: &TipSet) -> Hash {
    Hash::from(cid_digest(&ts.key().cid()))
}

/// base + min(premium, fee_cap - base), capped at fee_cap.
pub fn effective_gas_price(msg: &Message, base_fee: TokenAmount) -> TokenAmount {
    if msg.gas_fee_cap <= base_fee {
        return msg.gas_fee_cap;
    }
    base_fee + msg.gas_premium.min(msg.gas_fee_cap - base_fee)
}

/// 2048-bit bloom over the addresses and topics of `logs`.
pub fn logs_bloom<'a>(logs: impl IntoIterator<Item = &'a EthLog>) -> Bloom {
    let mut bloom = Bloom::zero();
    for log in logs {
        bloom.accrue(BloomInput::Raw(log.address.as_bytes()));
        for topic in &log.topics {
            bloom.accrue(BloomInput::Raw(topic.as_bytes()));
        }
    }
    bloom
}

fn bloom_bytes(bloom: &Bloom) -> Bytes {
    Bytes::from_slice(bloom.as_bytes())
}

fn is_create(msg: &Message) -> bool {
    msg.to == NativeAddress::Id(EAM_ACTOR_ID) && msg.method_num == METHOD_CREATE_EXTERNAL
}

/// Where a transaction sits, for transactions already on chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxLocation {
    pub block_hash: Hash,
    pub block_number: ChainEpoch,
    pub index: u64,
}

/// A tipset's messages, receipts and their foreign hashes, loaded once.
struct TipsetContents {
    messages: Vec<ChainMessage>,
    receipts: Vec<MessageReceipt>,
    hashes: Vec<Hash>,
}

/// Block header plus every log of a tipset, as fed to filters and
/// subscriptions.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectedTipset {
    pub block: EthBlock,
    pub logs: Vec<EthLog>,
}

pub struct ChainViewProjector {
    upstream: Upstream,
    bridge: Arc<AddressBridge>,
    extractor: ReceiptLogExtractor,
    index: Arc<HashIndex>,
    chain_id: u64,
}

impl ChainViewProjector {
    pub fn new(
        upstream: Upstream,
        bridge: Arc<AddressBridge>,
        index: Arc<HashIndex>,
        chain_id: u64,
    ) -> Self {
        let extractor = ReceiptLogExtractor::new(upstream.blocks.clone(), bridge.clone());
        Self {
            upstream,
            bridge,
            extractor,
            index,
            chain_id,
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn bridge(&self) -> &Arc<AddressBridge> {
        &self.bridge
    }

    pub fn index(&self) -> &Arc<HashIndex> {
        &self.index
    }

    // ═══════════════════════════════════════════════════════════════════════
    // BLOCK PARAMETERS
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn head(&self) -> EthResult<TipSet> {
        Ok(self.upstream.chain.head().await?)
    }

    /// Tipset at exactly `height`; `None` for a null round.
    pub async fn tipset_at(&self, height: ChainEpoch) -> EthResult<Option<TipSet>> {
        Ok(self.upstream.chain.tipset_by_height(height).await?)
    }

    /// Tipset named by a block parameter; `None` for null rounds, future
    /// heights and unknown hashes.
    pub async fn resolve_block_param(&self, param: &BlockParam) -> EthResult<Option<TipSet>> {
        let chain = &self.upstream.chain;
        match param {
            BlockParam::Tag(BlockTag::Latest) | BlockParam::Tag(BlockTag::Pending) => {
                Ok(Some(chain.head().await?))
            }
            BlockParam::Tag(BlockTag::Earliest) => Ok(Some(chain.genesis().await?)),
            BlockParam::Tag(BlockTag::Safe) => self.below_head(SAFE_DEPTH).await.map(Some),
            BlockParam::Tag(BlockTag::Finalized) => {
                self.below_head(FINALITY_DEPTH).await.map(Some)
            }
            BlockParam::Number(height) => {
                let head = chain.head().await?;
                if *height > head.height() {
                    return Ok(None);
                }
                Ok(chain.tipset_by_height(*height).await?)
            }
            BlockParam::Hash(hash) => {
                let cid = shared_types::cid_from_digest(&hash.0)?;
                Ok(chain.tipset_by_key_cid(&cid).await?)
            }
        }
    }

    /// Like [`resolve_block_param`](Self::resolve_block_param) but a missing
    /// tipset is an error. Used by state queries.
    pub async fn state_tipset(&self, param: &BlockParam) -> EthResult<TipSet> {
        self.resolve_block_param(param)
            .await?
            .ok_or_else(|| EthError::InvalidParams(format!("no block at {:?}", param)))
    }

    async fn below_head(&self, depth: ChainEpoch) -> EthResult<TipSet> {
        let head = self.upstream.chain.head().await?;
        self.at_or_below(head.height().saturating_sub(depth)).await
    }

    /// Nearest non-null tipset at or below `height`.
    pub async fn at_or_below(&self, height: ChainEpoch) -> EthResult<TipSet> {
        let chain = &self.upstream.chain;
        let mut h = height;
        loop {
            if let Some(ts) = chain.tipset_by_height(h).await? {
                return Ok(ts);
            }
            if h == 0 {
                return Ok(chain.genesis().await?);
            }
            h -= 1;
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // HASHES
    // ═══════════════════════════════════════════════════════════════════════

    /// Foreign hash of a message. Delegated-signature messages hash as their
    /// signed EIP-1559 encoding, everything else as its CID digest.
    pub fn message_hash(&self, msg: &ChainMessage) -> EthResult<Hash> {
        let cid = msg.cid()?;
        if let Some(hash) = self.index.recorded_hash(&cid) {
            return Ok(hash);
        }
        if let ChainMessage::Signed(signed) = msg {
            if signed.signature.sig_type == SignatureType::Delegated {
                let tx = Eip1559Tx::from_signed_message(signed, self.chain_id)
                    .map_err(|e| EthError::Internal(e.to_string()))?;
                let hash = tx.hash();
                self.index.insert(hash, cid);
                return Ok(hash);
            }
        }
        Ok(HashIndex::native_hash(&cid))
    }

    pub fn signed_hash(&self, msg: &SignedMessage) -> EthResult<Hash> {
        self.message_hash(&ChainMessage::Signed(msg.clone()))
    }

    async fn load(&self, ts: &TipSet) -> EthResult<TipsetContents> {
        let messages = self.upstream.chain.tipset_messages(ts).await?;
        let receipts = self.upstream.chain.tipset_receipts(ts).await?;
        if receipts.len() != messages.len() {
            return Err(EthError::Internal(format!(
                "tipset at {} has {} messages but {} receipts",
                ts.height(),
                messages.len(),
                receipts.len()
            )));
        }
        let hashes = messages
            .iter()
            .map(|m| self.message_hash(m))
            .collect::<EthResult<Vec<_>>>()?;
        Ok(TipsetContents {
            messages,
            receipts,
            hashes,
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // LOGS
    // ═══════════════════════════════════════════════════════════════════════

    fn to_eth_log(entry: LogEntry, location: &TxLocation, tx_hash: Hash) -> EthLog {
        EthLog {
            address: entry.address,
            topics: entry.topics,
            data: Bytes(entry.data),
            block_number: U64(location.block_number),
            block_hash: location.block_hash,
            transaction_hash: tx_hash,
            transaction_index: U64(entry.tx_index),
            log_index: U64(entry.log_index),
            removed: false,
        }
    }

    async fn receipt_logs(
        &self,
        receipt: &MessageReceipt,
        location: &TxLocation,
        tx_hash: Hash,
    ) -> EthResult<Vec<EthLog>> {
        let Some(root) = &receipt.events_root else {
            return Ok(Vec::new());
        };
        let entries = self.extractor.extract(root, location.index).await?;
        Ok(entries
            .into_iter()
            .map(|e| Self::to_eth_log(e, location, tx_hash))
            .collect())
    }

    /// Logs of every receipt in `contents`. With `skip_undecodable` a receipt
    /// whose events cannot be decoded contributes no logs instead of failing
    /// the whole tipset.
    async fn contents_logs(
        &self,
        ts: &TipSet,
        contents: &TipsetContents,
        skip_undecodable: bool,
    ) -> EthResult<Vec<EthLog>> {
        let block_hash = block_hash(ts);
        let mut logs = Vec::new();
        for (i, receipt) in contents.receipts.iter().enumerate() {
            let location = TxLocation {
                block_hash,
                block_number: ts.height(),
                index: i as u64,
            };
            match self.receipt_logs(receipt, &location, contents.hashes[i]).await {
                Ok(entries) => logs.extend(entries),
                Err(EthError::EventsUndecodable(reason)) if skip_undecodable => {
                    warn!(
                        height = ts.height(),
                        tx_index = i,
                        %reason,
                        "dropped undecodable receipt events"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(logs)
    }

    /// Every log of a tipset, ordered by transaction then position.
    pub async fn tipset_logs(&self, ts: &TipSet) -> EthResult<Vec<EthLog>> {
        let contents = self.load(ts).await?;
        self.contents_logs(ts, &contents, false).await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // BLOCKS
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn project_block(&self, ts: &TipSet, full_tx: bool) -> EthResult<EthBlock> {
        let contents = self.load(ts).await?;
        let logs = self.contents_logs(ts, &contents, false).await?;
        self.assemble_block(ts, &contents, &logs, full_tx).await
    }

    /// Header-only block together with all its logs. Receipts with
    /// undecodable events are left out of the logs.
    pub async fn project_tipset(&self, ts: &TipSet) -> EthResult<ProjectedTipset> {
        let contents = self.load(ts).await?;
        let logs = self.contents_logs(ts, &contents, true).await?;
        let block = self.assemble_block(ts, &contents, &logs, false).await?;
        trace!(height = ts.height(), logs = logs.len(), "projected tipset");
        Ok(ProjectedTipset { block, logs })
    }

    /// Projection of `ts` from its header alone, without any upstream read.
    /// Used when the full projection keeps failing: the block hash, number
    /// and parent are still exact, contents and logs are left empty.
    pub fn header_only(&self, ts: &TipSet) -> ProjectedTipset {
        let block = Self::header(
            ts,
            Address::zero(),
            0,
            &[],
            BlockTransactions::Hashes(Vec::new()),
        );
        ProjectedTipset {
            block,
            logs: Vec::new(),
        }
    }

    async fn assemble_block(
        &self,
        ts: &TipSet,
        contents: &TipsetContents,
        logs: &[EthLog],
        full_tx: bool,
    ) -> EthResult<EthBlock> {
        let hash = block_hash(ts);
        let miner = match ts.blocks().first() {
            Some(header) => self.bridge.to_foreign(&header.miner).await?,
            None => Address::zero(),
        };
        let gas_used: u64 = contents.receipts.iter().map(|r| r.gas_used).sum();

        let transactions = if full_tx {
            let mut txs = Vec::with_capacity(contents.messages.len());
            for (i, msg) in contents.messages.iter().enumerate() {
                let location = TxLocation {
                    block_hash: hash,
                    block_number: ts.height(),
                    index: i as u64,
                };
                txs.push(
                    self.transaction_view(msg, contents.hashes[i], Some(location))
                        .await?,
                );
            }
            BlockTransactions::Full(txs)
        } else {
            BlockTransactions::Hashes(contents.hashes.clone())
        };

        Ok(Self::header(ts, miner, gas_used, logs, transactions))
    }

    fn header(
        ts: &TipSet,
        miner: Address,
        gas_used: u64,
        logs: &[EthLog],
        transactions: BlockTransactions,
    ) -> EthBlock {
        let parent_hash = if ts.parents().is_empty() {
            Hash::zero()
        } else {
            Hash::from(cid_digest(&ts.parents().cid()))
        };
        EthBlock {
            hash: block_hash(ts),
            parent_hash,
            sha3_uncles: Hash::from(EMPTY_UNCLES_HASH),
            miner,
            state_root: Hash::from(cid_digest(&ts.parent_state_root())),
            transactions_root: Hash::from(EMPTY_TRIE_ROOT),
            receipts_root: Hash::from(EMPTY_TRIE_ROOT),
            logs_bloom: bloom_bytes(&logs_bloom(logs)),
            difficulty: U64(0),
            total_difficulty: U256::from(ts.parent_weight()),
            number: U64(ts.height()),
            gas_limit: U64(BLOCK_GAS_LIMIT),
            gas_used: U64(gas_used),
            timestamp: U64(ts.min_timestamp()),
            extra_data: Bytes::new(),
            mix_hash: Hash::zero(),
            nonce: Bytes(vec![0u8; 8]),
            base_fee_per_gas: U256::from(ts.parent_base_fee()),
            size: U64(0),
            transactions,
            uncles: Vec::new(),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // TRANSACTIONS
    // ═══════════════════════════════════════════════════════════════════════

    async fn transaction_view(
        &self,
        chain_msg: &ChainMessage,
        hash: Hash,
        location: Option<TxLocation>,
    ) -> EthResult<EthTransaction> {
        let msg = chain_msg.message();
        let from = self.bridge.to_foreign(&msg.from).await?;
        let to = if is_create(msg) {
            None
        } else {
            Some(self.bridge.to_foreign(&msg.to).await?)
        };

        let (v, r, s) = match chain_msg.signature() {
            Some(sig) if sig.sig_type == SignatureType::Delegated && sig.bytes.len() == 65 => (
                U256::from(u64::from(sig.bytes[64])),
                U256(primitive_types::U256::from_big_endian(&sig.bytes[..32])),
                U256(primitive_types::U256::from_big_endian(&sig.bytes[32..64])),
            ),
            _ => (U256::ZERO, U256::ZERO, U256::ZERO),
        };

        Ok(EthTransaction {
            hash,
            nonce: U64(msg.sequence),
            block_hash: location.map(|l| l.block_hash),
            block_number: location.map(|l| U64(l.block_number)),
            transaction_index: location.map(|l| U64(l.index)),
            from,
            to,
            value: U256::from(msg.value),
            tx_type: U64(u64::from(EIP1559_TX_TYPE)),
            input: Bytes(msg.params.clone()),
            gas: U64(msg.gas_limit),
            max_fee_per_gas: U256::from(msg.gas_fee_cap),
            max_priority_fee_per_gas: U256::from(msg.gas_premium),
            chain_id: U64(self.chain_id),
            access_list: Vec::new(),
            v,
            r,
            s,
        })
    }

    /// Transaction view of `msg`, placed at `location` if it is on chain.
    pub async fn project_transaction(
        &self,
        msg: &ChainMessage,
        location: Option<TxLocation>,
    ) -> EthResult<EthTransaction> {
        let hash = self.message_hash(msg)?;
        self.transaction_view(msg, hash, location).await
    }

    /// Transaction at `index` in `ts`, if there is one.
    pub async fn transaction_at(
        &self,
        ts: &TipSet,
        index: u64,
    ) -> EthResult<Option<EthTransaction>> {
        let messages = self.upstream.chain.tipset_messages(ts).await?;
        let Some(msg) = messages.get(index as usize) else {
            return Ok(None);
        };
        let location = TxLocation {
            block_hash: block_hash(ts),
            block_number: ts.height(),
            index,
        };
        self.project_transaction(msg, Some(location)).await.map(Some)
    }

    /// Look a transaction up by foreign hash: on chain first, then the
    /// mempool. `None` if neither knows it.
    pub async fn find_transaction(&self, hash: &Hash) -> EthResult<Option<EthTransaction>> {
        let Some(cid) = self.index.cid_for(hash) else {
            return Ok(None);
        };
        if let Some(lookup) = self.upstream.chain.search_message(&cid).await? {
            let Some(ts) = self.upstream.chain.tipset_by_key(&lookup.tipset).await? else {
                return Ok(None);
            };
            return self.transaction_at(&ts, lookup.index).await;
        }
        let pending = self.upstream.mpool.pending().await?;
        for signed in pending {
            if signed.cid()? == cid {
                let msg = ChainMessage::Signed(signed);
                return self.project_transaction(&msg, None).await.map(Some);
            }
        }
        Ok(None)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // RECEIPTS
    // ═══════════════════════════════════════════════════════════════════════

    /// Receipt for the message at `index` of `ts`.
    pub async fn project_receipt(&self, ts: &TipSet, index: u64) -> EthResult<Option<EthReceipt>> {
        let contents = self.load(ts).await?;
        let i = index as usize;
        let (Some(chain_msg), Some(receipt)) = (contents.messages.get(i), contents.receipts.get(i))
        else {
            return Ok(None);
        };
        let msg = chain_msg.message();
        let location = TxLocation {
            block_hash: block_hash(ts),
            block_number: ts.height(),
            index,
        };
        let tx_hash = contents.hashes[i];
        let tx = self.transaction_view(chain_msg, tx_hash, Some(location)).await?;
        let logs = self.receipt_logs(receipt, &location, tx_hash).await?;
        let cumulative: u64 = contents.receipts[..=i].iter().map(|r| r.gas_used).sum();

        let contract_address = if is_create(msg) && receipt.exit_code.is_success() {
            match CreateExternalReturn::from_bytes(&receipt.return_data) {
                Ok(ret) => Some(Address::from(ret.eth_address)),
                Err(e) => {
                    warn!(height = ts.height(), index, error = %e, "undecodable create return");
                    None
                }
            }
        } else {
            None
        };

        Ok(Some(EthReceipt {
            transaction_hash: tx_hash,
            transaction_index: U64(index),
            block_hash: location.block_hash,
            block_number: U64(location.block_number),
            from: tx.from,
            to: tx.to,
            root: Hash::zero(),
            status: U64(u64::from(receipt.exit_code.is_success())),
            contract_address,
            cumulative_gas_used: U64(cumulative),
            gas_used: U64(receipt.gas_used),
            effective_gas_price: U256::from(effective_gas_price(msg, ts.parent_base_fee())),
            logs_bloom: bloom_bytes(&logs_bloom(&logs)),
            logs,
            tx_type: U64(u64::from(EIP1559_TX_TYPE)),
            return_data: Bytes(receipt.return_data.clone()),
        }))
    }

    /// Receipt by foreign hash; `None` until the message is included.
    pub async fn find_receipt(&self, hash: &Hash) -> EthResult<Option<EthReceipt>> {
        let Some(cid) = self.index.cid_for(hash) else {
            return Ok(None);
        };
        let Some(lookup) = self.upstream.chain.search_message(&cid).await? else {
            return Ok(None);
        };
        let Some(ts) = self.upstream.chain.tipset_by_key(&lookup.tipset).await? else {
            return Ok(None);
        };
        self.project_receipt(&ts, lookup.index).await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // FEE HISTORY
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn fee_history(
        &self,
        block_count: u64,
        newest: &BlockParam,
        percentiles: Option<&[f64]>,
    ) -> EthResult<FeeHistory> {
        if block_count == 0 || block_count > MAX_FEE_HISTORY_BLOCKS {
            return Err(EthError::InvalidParams(format!(
                "block count must be between 1 and {}, got {}",
                MAX_FEE_HISTORY_BLOCKS, block_count
            )));
        }
        if let Some(p) = percentiles {
            let in_range = p.iter().all(|v| (0.0..=100.0).contains(v));
            let monotone = p.windows(2).all(|w| w[0] <= w[1]);
            if !in_range || !monotone {
                return Err(EthError::InvalidParams(
                    "reward percentiles must be monotonically increasing values in [0, 100]"
                        .into(),
                ));
            }
        }

        let newest = self.state_tipset(newest).await?;
        let next_base_fee = match self.upstream.chain.tipset_by_height(newest.height() + 1).await? {
            Some(child) => child.parent_base_fee(),
            None => newest.parent_base_fee(),
        };

        // newest first while walking, reversed at the end
        let mut tipsets = Vec::new();
        let mut cursor = Some(newest);
        while let Some(ts) = cursor.take() {
            let height = ts.height();
            tipsets.push(ts);
            if tipsets.len() as u64 == block_count || height == 0 {
                break;
            }
            cursor = Some(self.at_or_below(height - 1).await?);
        }
        tipsets.reverse();

        let mut base_fees = Vec::with_capacity(tipsets.len() + 1);
        let mut ratios = Vec::with_capacity(tipsets.len());
        let mut rewards = Vec::with_capacity(tipsets.len());
        for ts in &tipsets {
            let contents = self.load(ts).await?;
            let base_fee = ts.parent_base_fee();
            let gas_used: u64 = contents.receipts.iter().map(|r| r.gas_used).sum();
            base_fees.push(U256::from(base_fee));
            ratios.push(gas_used as f64 / BLOCK_GAS_LIMIT as f64);
            if let Some(p) = percentiles {
                rewards.push(reward_percentiles(&contents, base_fee, p));
            }
        }
        base_fees.push(U256::from(next_base_fee));

        Ok(FeeHistory {
            oldest_block: U64(tipsets.first().map(|t| t.height()).unwrap_or_default()),
            base_fee_per_gas: base_fees,
            gas_used_ratio: ratios,
            reward: percentiles.map(|_| rewards),
        })
    }
}

/// Gas-weighted percentiles of the effective premiums paid in a tipset.
fn reward_percentiles(contents: &TipsetContents, base_fee: TokenAmount, percentiles: &[f64]) -> Vec<U256> {
    let mut paid: Vec<(TokenAmount, u64)> = contents
        .messages
        .iter()
        .zip(&contents.receipts)
        .map(|(m, r)| {
            let msg = m.message();
            let premium = effective_gas_price(msg, base_fee).saturating_sub(base_fee);
            (premium, r.gas_used)
        })
        .collect();
    paid.sort_by_key(|(premium, _)| *premium);
    let total: u64 = paid.iter().map(|(_, gas)| gas).sum();

    percentiles
        .iter()
        .map(|p| {
            if paid.is_empty() {
                return U256::ZERO;
            }
            let threshold = (total as f64 * p / 100.0) as u64;
            let mut cumulative = 0u64;
            for (premium, gas) in &paid {
                cumulative += gas;
                if cumulative >= threshold {
                    return U256::from(*premium);
                }
            }
            U256::from(paid[paid.len() - 1].0)
        })
        .collect()
}
