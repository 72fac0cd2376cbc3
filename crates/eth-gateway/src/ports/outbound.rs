//! Outbound ports: the chain collaborators the gateway reads from.
//!
//! Sync, execution, mempool admission and block storage all live behind these
//! traits. The gateway never writes to any of them except [`Mempool::push`].

use crate::domain::error::UpstreamError;
use async_trait::async_trait;
use shared_types::{
    ActorId, ChainEpoch, ChainMessage, Cid, HeadChange, Message, MessageLookup, MessageReceipt,
    MpoolUpdate, NativeAddress, SignedMessage, TipSet, TipSetKey, TokenAmount,
};
use std::sync::Arc;
use tokio::sync::mpsc;

pub type UpstreamResult<T> = Result<T, UpstreamError>;

/// Kind of actor code deployed at an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorKind {
    Account,
    /// Account created by an Ethereum key, addressable by its delegated address.
    EthAccount,
    /// EVM smart contract.
    Evm,
    /// Address that received funds but has no code yet.
    Placeholder,
    /// Any built-in actor without an Ethereum surface.
    Builtin,
}

/// Actor state as seen at a tipset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorState {
    pub kind: ActorKind,
    pub balance: TokenAmount,
    pub nonce: u64,
    pub delegated_address: Option<NativeAddress>,
    /// EVM bytecode, for `Evm` actors.
    pub bytecode: Option<Vec<u8>>,
}

/// Outcome of a read-only simulated call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocResult {
    pub receipt: MessageReceipt,
    /// Execution error text when the exit code is non-zero.
    pub error: Option<String>,
}

/// Chain store: tipsets, their messages and their receipts.
///
/// `tipset` arguments of `None` mean the current head.
#[async_trait]
pub trait ChainStore: Send + Sync {
    async fn head(&self) -> UpstreamResult<TipSet>;

    async fn genesis(&self) -> UpstreamResult<TipSet>;

    /// Tipset at `height` on the canonical chain; `None` for a null round.
    async fn tipset_by_height(&self, height: ChainEpoch) -> UpstreamResult<Option<TipSet>>;

    async fn tipset_by_key(&self, key: &TipSetKey) -> UpstreamResult<Option<TipSet>>;

    /// Lookup by the CID of the tipset key.
    async fn tipset_by_key_cid(&self, cid: &Cid) -> UpstreamResult<Option<TipSet>>;

    /// Messages of a tipset in execution order, deduplicated across blocks.
    async fn tipset_messages(&self, tipset: &TipSet) -> UpstreamResult<Vec<ChainMessage>>;

    /// Receipts for the messages of a tipset, in the same order.
    async fn tipset_receipts(&self, tipset: &TipSet) -> UpstreamResult<Vec<MessageReceipt>>;

    /// Where a message was included, if it was.
    async fn search_message(&self, cid: &Cid) -> UpstreamResult<Option<MessageLookup>>;

    /// Feed of head changes, in chain order.
    fn subscribe_head_changes(&self) -> mpsc::Receiver<HeadChange>;
}

/// Actor state queries and simulated execution.
#[async_trait]
pub trait StateApi: Send + Sync {
    /// Canonical ID for any address kind; `None` if no actor exists.
    async fn lookup_id(
        &self,
        addr: &NativeAddress,
        tipset: Option<&TipSetKey>,
    ) -> UpstreamResult<Option<ActorId>>;

    async fn get_actor(
        &self,
        addr: &NativeAddress,
        tipset: Option<&TipSetKey>,
    ) -> UpstreamResult<Option<ActorState>>;

    /// One 32-byte EVM storage slot of an actor.
    async fn get_storage_at(
        &self,
        actor: ActorId,
        slot: [u8; 32],
        tipset: Option<&TipSetKey>,
    ) -> UpstreamResult<[u8; 32]>;

    /// Apply `msg` on top of `tipset` without persisting anything.
    async fn call(&self, msg: &Message, tipset: Option<&TipSetKey>) -> UpstreamResult<InvocResult>;

    /// Gas limit `msg` needs; [`UpstreamError::ExecutionFailed`] if it fails.
    async fn estimate_message_gas(
        &self,
        msg: &Message,
        tipset: Option<&TipSetKey>,
    ) -> UpstreamResult<u64>;

    async fn network_version(&self, tipset: Option<&TipSetKey>) -> UpstreamResult<u32>;
}

/// Pending message pool.
#[async_trait]
pub trait Mempool: Send + Sync {
    /// Submit a signed message; returns its CID.
    async fn push(&self, msg: SignedMessage) -> UpstreamResult<Cid>;

    async fn pending(&self) -> UpstreamResult<Vec<SignedMessage>>;

    /// Suggested gas premium for inclusion in the next few tipsets.
    async fn estimate_gas_premium(&self) -> UpstreamResult<TokenAmount>;

    /// Feed of pool additions and removals.
    fn subscribe_updates(&self) -> mpsc::Receiver<MpoolUpdate>;
}

/// Content-addressed block store.
#[async_trait]
pub trait BlockStore: Send + Sync {
    async fn get(&self, cid: &Cid) -> UpstreamResult<Option<Vec<u8>>>;
}

/// Wall-clock source, swappable in tests.
pub trait TimeSource: Send + Sync {
    /// Seconds since the unix epoch.
    fn now(&self) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Handles to every collaborator, shared by the gateway components.
#[derive(Clone)]
pub struct Upstream {
    pub chain: Arc<dyn ChainStore>,
    pub state: Arc<dyn StateApi>,
    pub mpool: Arc<dyn Mempool>,
    pub blocks: Arc<dyn BlockStore>,
}

impl Upstream {
    pub fn new(
        chain: Arc<dyn ChainStore>,
        state: Arc<dyn StateApi>,
        mpool: Arc<dyn Mempool>,
        blocks: Arc<dyn BlockStore>,
    ) -> Self {
        Self {
            chain,
            state,
            mpool,
            blocks,
        }
    }
}
