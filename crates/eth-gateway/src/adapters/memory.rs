//! In-memory chain implementing every outbound port.
//!
//! Backs the dev node and the test suites. Tipsets are produced on demand
//! with [`MemoryChain::produce_tipset`]; each produced tipset is announced on
//! the head-change feed exactly like a syncing node would.

use crate::domain::error::UpstreamError;
use crate::ports::outbound::{
    ActorKind, ActorState, BlockStore, ChainStore, InvocResult, Mempool, StateApi, Upstream,
    UpstreamResult,
};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use shared_types::{
    cid_of, encode_events, ActorId, EncodingError, BlockHeader, ChainEpoch, ChainMessage, Cid, ExitCode,
    HeadChange, Message, MessageLookup, MessageReceipt, MpoolUpdate, NativeAddress, SignedMessage,
    StampedEvent, TipSet, TipSetKey, TokenAmount,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

const FEED_CAPACITY: usize = 1024;
const GENESIS_TIMESTAMP: u64 = 1_598_306_400;
const BLOCK_DELAY_SECS: u64 = 30;
const BASE_GAS: u64 = 1_000_000;

struct StoredTipSet {
    tipset: TipSet,
    messages: Vec<ChainMessage>,
    receipts: Vec<MessageReceipt>,
}

/// Scripted collaborator behaviour for failure-path tests.
#[derive(Debug, Clone, Default)]
pub struct Behaviour {
    /// Every call fails with `Unavailable`.
    pub unavailable: bool,
    /// Every async call parks forever.
    pub stall: bool,
    /// Simulated execution fails: (exit code, reason, return data).
    pub execution_failure: Option<(u32, String, Vec<u8>)>,
    /// Return data of successful simulated calls.
    pub call_return: Vec<u8>,
}

#[derive(Default)]
struct ChainData {
    canonical: BTreeMap<ChainEpoch, TipSetKey>,
    tipsets: HashMap<TipSetKey, StoredTipSet>,
    key_cids: HashMap<Cid, TipSetKey>,
    included: HashMap<Cid, (TipSetKey, ChainEpoch, u64)>,
    actors: HashMap<ActorId, ActorState>,
    /// Head height when each actor was created; states of earlier tipsets
    /// do not contain it.
    created_at: HashMap<ActorId, ChainEpoch>,
    addresses: HashMap<NativeAddress, ActorId>,
    storage: HashMap<(ActorId, [u8; 32]), [u8; 32]>,
    blocks: HashMap<Cid, Vec<u8>>,
    pending: Vec<SignedMessage>,
    next_actor_id: ActorId,
    null_rounds: u64,
    salt: u64,
}

pub struct MemoryChain {
    data: RwLock<ChainData>,
    behaviour: RwLock<Behaviour>,
    head_feeds: Mutex<Vec<mpsc::Sender<HeadChange>>>,
    mpool_feeds: Mutex<Vec<mpsc::Sender<MpoolUpdate>>>,
    gas_premium: TokenAmount,
    network_version: u32,
}

impl MemoryChain {
    /// A chain holding only a genesis tipset at height 0.
    pub fn new() -> Arc<Self> {
        let mut data = ChainData {
            next_actor_id: 1000,
            ..Default::default()
        };
        let genesis = make_tipset(0, TipSetKey::default(), 0);
        data.key_cids.insert(genesis.key().cid(), genesis.key().clone());
        data.canonical.insert(0, genesis.key().clone());
        data.tipsets.insert(
            genesis.key().clone(),
            StoredTipSet {
                tipset: genesis,
                messages: Vec::new(),
                receipts: Vec::new(),
            },
        );

        Arc::new(Self {
            data: RwLock::new(data),
            behaviour: RwLock::new(Behaviour::default()),
            head_feeds: Mutex::new(Vec::new()),
            mpool_feeds: Mutex::new(Vec::new()),
            gas_premium: 100_000,
            network_version: 21,
        })
    }

    /// All four ports backed by this chain.
    pub fn upstream(self: &Arc<Self>) -> Upstream {
        Upstream::new(
            Arc::clone(self) as Arc<dyn ChainStore>,
            Arc::clone(self) as Arc<dyn StateApi>,
            Arc::clone(self) as Arc<dyn Mempool>,
            Arc::clone(self) as Arc<dyn BlockStore>,
        )
    }

    pub fn set_behaviour(&self, behaviour: Behaviour) {
        *self.behaviour.write() = behaviour;
    }

    pub fn behaviour(&self) -> Behaviour {
        self.behaviour.read().clone()
    }

    /// Create an actor and return its ID. The delegated address, if any, is
    /// registered as an alias.
    pub fn create_actor(
        &self,
        kind: ActorKind,
        balance: TokenAmount,
        delegated: Option<NativeAddress>,
    ) -> ActorId {
        let mut data = self.data.write();
        let id = data.next_actor_id;
        data.next_actor_id += 1;
        let head = data.canonical.keys().next_back().copied().unwrap_or_default();
        data.created_at.insert(id, head);
        if let Some(addr) = &delegated {
            data.addresses.insert(addr.clone(), id);
        }
        data.actors.insert(
            id,
            ActorState {
                kind,
                balance,
                nonce: 0,
                delegated_address: delegated,
                bytecode: None,
            },
        );
        id
    }

    /// Register an extra address (key or actor form) for an existing actor.
    pub fn register_address(&self, addr: NativeAddress, id: ActorId) {
        self.data.write().addresses.insert(addr, id);
    }

    pub fn set_bytecode(&self, id: ActorId, code: Vec<u8>) {
        if let Some(actor) = self.data.write().actors.get_mut(&id) {
            actor.bytecode = Some(code);
        }
    }

    pub fn set_nonce(&self, id: ActorId, nonce: u64) {
        if let Some(actor) = self.data.write().actors.get_mut(&id) {
            actor.nonce = nonce;
        }
    }

    pub fn set_storage(&self, id: ActorId, slot: [u8; 32], value: [u8; 32]) {
        self.data.write().storage.insert((id, slot), value);
    }

    /// Store raw bytes in the block store.
    pub fn put_block(&self, bytes: Vec<u8>) -> Cid {
        let cid = cid_of(&bytes);
        self.data.write().blocks.insert(cid, bytes);
        cid
    }

    /// Store an events root and return its CID.
    pub fn put_events(&self, events: &[StampedEvent]) -> Result<Cid, EncodingError> {
        Ok(self.put_block(encode_events(events)?))
    }

    /// Leave `n` empty epochs before the next produced tipset.
    pub fn skip_null_rounds(&self, n: u64) {
        self.data.write().null_rounds += n;
    }

    pub fn head_height(&self) -> ChainEpoch {
        self.data
            .read()
            .canonical
            .keys()
            .next_back()
            .copied()
            .unwrap_or_default()
    }

    /// Append a tipset holding `executed` on top of the head and announce it.
    pub async fn produce_tipset(&self, executed: Vec<(ChainMessage, MessageReceipt)>) -> TipSet {
        let tipset = {
            let mut data = self.data.write();
            let (parent_height, parent_key) = data
                .canonical
                .iter()
                .next_back()
                .map(|(h, k)| (*h, k.clone()))
                .unwrap_or_default();
            let height = parent_height + 1 + data.null_rounds;
            data.null_rounds = 0;
            data.salt += 1;
            let tipset = make_tipset(height, parent_key, data.salt);

            let mut messages = Vec::with_capacity(executed.len());
            let mut receipts = Vec::with_capacity(executed.len());
            for (index, (msg, receipt)) in executed.into_iter().enumerate() {
                if let Ok(cid) = msg.cid() {
                    data.included
                        .insert(cid, (tipset.key().clone(), height, index as u64));
                    data.pending
                        .retain(|p| p.cid().map(|c| c != cid).unwrap_or(true));
                }
                messages.push(msg);
                receipts.push(receipt);
            }

            data.key_cids.insert(tipset.key().cid(), tipset.key().clone());
            data.canonical.insert(height, tipset.key().clone());
            data.tipsets.insert(
                tipset.key().clone(),
                StoredTipSet {
                    tipset: tipset.clone(),
                    messages,
                    receipts,
                },
            );
            tipset
        };

        debug!(height = tipset.height(), "produced tipset");
        self.announce(HeadChange::Apply(tipset.clone())).await;
        tipset
    }

    /// Drop the head tipset from the canonical chain and announce the revert.
    pub async fn revert_head(&self) -> Option<TipSet> {
        let reverted = {
            let mut data = self.data.write();
            let (&height, _) = data.canonical.iter().next_back()?;
            if height == 0 {
                return None;
            }
            let key = data.canonical.remove(&height)?;
            data.included.retain(|_, (k, _, _)| *k != key);
            data.tipsets.get(&key).map(|s| s.tipset.clone())
        }?;
        self.announce(HeadChange::Revert(reverted.clone())).await;
        Some(reverted)
    }

    async fn announce(&self, change: HeadChange) {
        let feeds: Vec<_> = self.head_feeds.lock().clone();
        for feed in feeds {
            let _ = feed.send(change.clone()).await;
        }
        self.head_feeds.lock().retain(|f| !f.is_closed());
    }

    async fn gate(&self) -> UpstreamResult<()> {
        let behaviour = self.behaviour.read().clone();
        if behaviour.stall {
            std::future::pending::<()>().await;
        }
        if behaviour.unavailable {
            return Err(UpstreamError::Unavailable("memory chain offline".into()));
        }
        Ok(())
    }

    /// Actor behind `addr` in the state of `tipset`, or of the head.
    fn resolve(&self, addr: &NativeAddress, tipset: Option<&TipSetKey>) -> Option<ActorId> {
        let data = self.data.read();
        let id = match addr {
            NativeAddress::Id(id) => data.actors.contains_key(id).then_some(*id)?,
            other => data.addresses.get(other).copied()?,
        };
        let height = tipset
            .and_then(|key| data.tipsets.get(key))
            .map(|stored| stored.tipset.height());
        match (height, data.created_at.get(&id)) {
            (Some(height), Some(created)) if height < *created => None,
            _ => Some(id),
        }
    }

    fn head_tipset(&self) -> UpstreamResult<TipSet> {
        let data = self.data.read();
        data.canonical
            .values()
            .next_back()
            .and_then(|k| data.tipsets.get(k))
            .map(|s| s.tipset.clone())
            .ok_or_else(|| UpstreamError::Unavailable("empty chain".into()))
    }

    fn simulate(&self, msg: &Message) -> UpstreamResult<InvocResult> {
        let behaviour = self.behaviour.read().clone();
        if let Some((exit_code, reason, return_data)) = behaviour.execution_failure {
            return Err(UpstreamError::ExecutionFailed {
                exit_code,
                reason,
                return_data,
            });
        }
        Ok(InvocResult {
            receipt: MessageReceipt {
                exit_code: ExitCode::OK,
                return_data: behaviour.call_return,
                gas_used: BASE_GAS + msg.params.len() as u64 * 16,
                events_root: None,
            },
            error: None,
        })
    }
}

fn make_tipset(height: ChainEpoch, parents: TipSetKey, salt: u64) -> TipSet {
    let seed = format!("block/{}/{}", height, salt);
    let header = BlockHeader {
        miner: NativeAddress::Id(1000),
        parents,
        parent_weight: u128::from(height) * 10,
        height,
        parent_state_root: cid_of(format!("state/{}", seed).as_bytes()),
        parent_message_receipts: cid_of(format!("receipts/{}", seed).as_bytes()),
        messages: cid_of(format!("messages/{}", seed).as_bytes()),
        timestamp: GENESIS_TIMESTAMP + height * BLOCK_DELAY_SECS,
        parent_base_fee: 100,
        cid: cid_of(seed.as_bytes()),
    };
    TipSet::single(header)
}

#[async_trait]
impl ChainStore for MemoryChain {
    async fn head(&self) -> UpstreamResult<TipSet> {
        self.gate().await?;
        self.head_tipset()
    }

    async fn genesis(&self) -> UpstreamResult<TipSet> {
        self.gate().await?;
        self.tipset_by_height(0)
            .await?
            .ok_or_else(|| UpstreamError::Unavailable("no genesis".into()))
    }

    async fn tipset_by_height(&self, height: ChainEpoch) -> UpstreamResult<Option<TipSet>> {
        self.gate().await?;
        let data = self.data.read();
        Ok(data
            .canonical
            .get(&height)
            .and_then(|k| data.tipsets.get(k))
            .map(|s| s.tipset.clone()))
    }

    async fn tipset_by_key(&self, key: &TipSetKey) -> UpstreamResult<Option<TipSet>> {
        self.gate().await?;
        Ok(self.data.read().tipsets.get(key).map(|s| s.tipset.clone()))
    }

    async fn tipset_by_key_cid(&self, cid: &Cid) -> UpstreamResult<Option<TipSet>> {
        self.gate().await?;
        let data = self.data.read();
        Ok(data
            .key_cids
            .get(cid)
            .and_then(|k| data.tipsets.get(k))
            .map(|s| s.tipset.clone()))
    }

    async fn tipset_messages(&self, tipset: &TipSet) -> UpstreamResult<Vec<ChainMessage>> {
        self.gate().await?;
        Ok(self
            .data
            .read()
            .tipsets
            .get(tipset.key())
            .map(|s| s.messages.clone())
            .unwrap_or_default())
    }

    async fn tipset_receipts(&self, tipset: &TipSet) -> UpstreamResult<Vec<MessageReceipt>> {
        self.gate().await?;
        Ok(self
            .data
            .read()
            .tipsets
            .get(tipset.key())
            .map(|s| s.receipts.clone())
            .unwrap_or_default())
    }

    async fn search_message(&self, cid: &Cid) -> UpstreamResult<Option<MessageLookup>> {
        self.gate().await?;
        let data = self.data.read();
        let Some((key, height, index)) = data.included.get(cid).cloned() else {
            return Ok(None);
        };
        let receipt = data
            .tipsets
            .get(&key)
            .and_then(|s| s.receipts.get(index as usize).cloned());
        Ok(receipt.map(|receipt| MessageLookup {
            tipset: key,
            height,
            index,
            receipt,
        }))
    }

    fn subscribe_head_changes(&self) -> mpsc::Receiver<HeadChange> {
        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        self.head_feeds.lock().push(tx);
        rx
    }
}

#[async_trait]
impl StateApi for MemoryChain {
    async fn lookup_id(
        &self,
        addr: &NativeAddress,
        tipset: Option<&TipSetKey>,
    ) -> UpstreamResult<Option<ActorId>> {
        self.gate().await?;
        Ok(self.resolve(addr, tipset))
    }

    async fn get_actor(
        &self,
        addr: &NativeAddress,
        tipset: Option<&TipSetKey>,
    ) -> UpstreamResult<Option<ActorState>> {
        self.gate().await?;
        let Some(id) = self.resolve(addr, tipset) else {
            return Ok(None);
        };
        Ok(self.data.read().actors.get(&id).cloned())
    }

    async fn get_storage_at(
        &self,
        actor: ActorId,
        slot: [u8; 32],
        _tipset: Option<&TipSetKey>,
    ) -> UpstreamResult<[u8; 32]> {
        self.gate().await?;
        Ok(self
            .data
            .read()
            .storage
            .get(&(actor, slot))
            .copied()
            .unwrap_or([0u8; 32]))
    }

    async fn call(&self, msg: &Message, _tipset: Option<&TipSetKey>) -> UpstreamResult<InvocResult> {
        self.gate().await?;
        self.simulate(msg)
    }

    async fn estimate_message_gas(
        &self,
        msg: &Message,
        _tipset: Option<&TipSetKey>,
    ) -> UpstreamResult<u64> {
        self.gate().await?;
        self.simulate(msg).map(|r| r.receipt.gas_used)
    }

    async fn network_version(&self, _tipset: Option<&TipSetKey>) -> UpstreamResult<u32> {
        self.gate().await?;
        Ok(self.network_version)
    }
}

#[async_trait]
impl Mempool for MemoryChain {
    async fn push(&self, msg: SignedMessage) -> UpstreamResult<Cid> {
        self.gate().await?;
        let cid = msg
            .cid()
            .map_err(|e| UpstreamError::Rejected(e.to_string()))?;

        if let Some(id) = self.resolve(&msg.message.from, None) {
            let nonce = self.data.read().actors.get(&id).map(|a| a.nonce);
            if let Some(nonce) = nonce {
                if msg.message.sequence < nonce {
                    return Err(UpstreamError::Rejected(format!(
                        "nonce too low: {} < {}",
                        msg.message.sequence, nonce
                    )));
                }
            }
        }

        self.data.write().pending.push(msg.clone());
        let feeds: Vec<_> = self.mpool_feeds.lock().clone();
        for feed in feeds {
            let _ = feed.send(MpoolUpdate::Add(msg.clone())).await;
        }
        self.mpool_feeds.lock().retain(|f| !f.is_closed());
        Ok(cid)
    }

    async fn pending(&self) -> UpstreamResult<Vec<SignedMessage>> {
        self.gate().await?;
        Ok(self.data.read().pending.clone())
    }

    async fn estimate_gas_premium(&self) -> UpstreamResult<TokenAmount> {
        self.gate().await?;
        Ok(self.gas_premium)
    }

    fn subscribe_updates(&self) -> mpsc::Receiver<MpoolUpdate> {
        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        self.mpool_feeds.lock().push(tx);
        rx
    }
}

#[async_trait]
impl BlockStore for MemoryChain {
    async fn get(&self, cid: &Cid) -> UpstreamResult<Option<Vec<u8>>> {
        self.gate().await?;
        Ok(self.data.read().blocks.get(cid).cloned())
    }
}
