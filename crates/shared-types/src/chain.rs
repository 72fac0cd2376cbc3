//! # Chain Entities
//!
//! Tipsets, messages and receipts as produced by sync and execution. The
//! gateway only ever reads these.

use crate::address::{ActorId, NativeAddress, ETH_ADDRESS_LENGTH};
use crate::errors::EncodingError;
use cid::multihash::Multihash;
use cid::Cid;
use multihash_codetable::{Code, MultihashDigest};
use serde::{Deserialize, Serialize};

/// Chain height.
pub type ChainEpoch = u64;

/// Token amount in atto units.
pub type TokenAmount = u128;

/// Method number on the receiving actor.
pub type MethodNum = u64;

/// Multicodec for DAG-CBOR.
pub const DAG_CBOR: u64 = 0x71;

/// Multihash code for blake2b-256.
pub const BLAKE2B_256: u64 = 0xb220;

/// Method number of a plain value transfer.
pub const METHOD_SEND: MethodNum = 0;

/// Method number of the EVM actor's invoke entry point.
pub const METHOD_INVOKE_EVM: MethodNum = 3_844_450_837;

/// Method number of the address manager's create entry point for
/// externally-signed deployments.
pub const METHOD_CREATE_EXTERNAL: MethodNum = 4;

/// Content identifier of a value: CIDv1, DAG-CBOR codec, blake2b-256.
pub fn cid_of(bytes: &[u8]) -> Cid {
    Cid::new_v1(DAG_CBOR, Code::Blake2b256.digest(bytes))
}

/// The 32-byte digest carried by a blake2b-256 CID.
pub fn cid_digest(cid: &Cid) -> [u8; 32] {
    let mut out = [0u8; 32];
    let digest = cid.hash().digest();
    let n = digest.len().min(32);
    out[..n].copy_from_slice(&digest[..n]);
    out
}

/// Rebuild the CID whose digest is `digest`. Inverse of [`cid_digest`] for
/// CIDs produced by [`cid_of`].
pub fn cid_from_digest(digest: &[u8; 32]) -> Result<Cid, EncodingError> {
    let mh = Multihash::<64>::wrap(BLAKE2B_256, digest)
        .map_err(|e| EncodingError::InvalidDigest(e.to_string()))?;
    Ok(Cid::new_v1(DAG_CBOR, mh))
}

/// Ordered set of block CIDs that identifies a tipset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct TipSetKey(pub Vec<Cid>);

impl TipSetKey {
    pub fn new(cids: Vec<Cid>) -> Self {
        Self(cids)
    }

    pub fn cids(&self) -> &[Cid] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Concatenated binary CIDs.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.iter().flat_map(|c| c.to_bytes()).collect()
    }

    /// CID naming the whole key.
    pub fn cid(&self) -> Cid {
        cid_of(&self.to_bytes())
    }
}

/// A single block header. Only the fields the gateway projects are modelled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub miner: NativeAddress,
    pub parents: TipSetKey,
    /// Cumulative chain weight at the parent.
    pub parent_weight: u128,
    pub height: ChainEpoch,
    pub parent_state_root: Cid,
    pub parent_message_receipts: Cid,
    pub messages: Cid,
    /// Seconds since the unix epoch.
    pub timestamp: u64,
    pub parent_base_fee: TokenAmount,
    /// CID of this header.
    pub cid: Cid,
}

/// Blocks at one height sharing the same parents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TipSet {
    key: TipSetKey,
    blocks: Vec<BlockHeader>,
}

impl TipSet {
    /// Build a tipset. Returns `None` if `blocks` is empty or the blocks
    /// disagree on height or parents.
    pub fn new(blocks: Vec<BlockHeader>) -> Option<Self> {
        let first = blocks.first()?;
        let consistent = blocks
            .iter()
            .all(|b| b.height == first.height && b.parents == first.parents);
        if !consistent {
            return None;
        }
        let key = TipSetKey::new(blocks.iter().map(|b| b.cid).collect());
        Some(Self { key, blocks })
    }

    /// Tipset made of one block.
    pub fn single(header: BlockHeader) -> Self {
        Self {
            key: TipSetKey::new(vec![header.cid]),
            blocks: vec![header],
        }
    }

    pub fn key(&self) -> &TipSetKey {
        &self.key
    }

    pub fn blocks(&self) -> &[BlockHeader] {
        &self.blocks
    }

    pub fn height(&self) -> ChainEpoch {
        self.blocks[0].height
    }

    pub fn parents(&self) -> &TipSetKey {
        &self.blocks[0].parents
    }

    pub fn parent_weight(&self) -> u128 {
        self.blocks[0].parent_weight
    }

    pub fn parent_base_fee(&self) -> TokenAmount {
        self.blocks[0].parent_base_fee
    }

    pub fn parent_state_root(&self) -> Cid {
        self.blocks[0].parent_state_root
    }

    /// Earliest block timestamp.
    pub fn min_timestamp(&self) -> u64 {
        self.blocks.iter().map(|b| b.timestamp).min().unwrap_or_default()
    }
}

/// An unsigned native message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub version: u64,
    pub to: NativeAddress,
    pub from: NativeAddress,
    pub sequence: u64,
    pub value: TokenAmount,
    pub method_num: MethodNum,
    pub params: Vec<u8>,
    pub gas_limit: u64,
    pub gas_fee_cap: TokenAmount,
    pub gas_premium: TokenAmount,
}

impl Message {
    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodingError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn cid(&self) -> Result<Cid, EncodingError> {
        Ok(cid_of(&self.to_bytes()?))
    }
}

/// Signature scheme of a signed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignatureType {
    Secp256k1,
    Bls,
    /// Ethereum-style signature over an RLP transaction: `r || s || v`.
    Delegated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub sig_type: SignatureType,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedMessage {
    pub message: Message,
    pub signature: Signature,
}

impl SignedMessage {
    /// BLS messages are aggregated into the block, so they are named by the
    /// unsigned message CID. Every other scheme names the signed envelope.
    pub fn cid(&self) -> Result<Cid, EncodingError> {
        match self.signature.sig_type {
            SignatureType::Bls => self.message.cid(),
            _ => Ok(cid_of(&bincode::serialize(self)?)),
        }
    }
}

/// A message as it appears in a tipset's execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainMessage {
    Unsigned(Message),
    Signed(SignedMessage),
}

impl ChainMessage {
    pub fn message(&self) -> &Message {
        match self {
            ChainMessage::Unsigned(m) => m,
            ChainMessage::Signed(sm) => &sm.message,
        }
    }

    pub fn signature(&self) -> Option<&Signature> {
        match self {
            ChainMessage::Unsigned(_) => None,
            ChainMessage::Signed(sm) => Some(&sm.signature),
        }
    }

    pub fn cid(&self) -> Result<Cid, EncodingError> {
        match self {
            ChainMessage::Unsigned(m) => m.cid(),
            ChainMessage::Signed(sm) => sm.cid(),
        }
    }
}

/// Exit code of a message execution. Zero is success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExitCode(pub u32);

impl ExitCode {
    pub const OK: ExitCode = ExitCode(0);

    pub fn is_success(&self) -> bool {
        self.0 == 0
    }
}

/// Result of executing one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageReceipt {
    pub exit_code: ExitCode,
    pub return_data: Vec<u8>,
    pub gas_used: u64,
    /// Root of the events emitted during execution, absent if none were.
    pub events_root: Option<Cid>,
}

/// Return value of the address manager's create entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateExternalReturn {
    pub actor_id: ActorId,
    pub eth_address: [u8; ETH_ADDRESS_LENGTH],
}

impl CreateExternalReturn {
    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodingError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EncodingError> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Where a message landed on chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageLookup {
    /// Tipset that included the message.
    pub tipset: TipSetKey,
    pub height: ChainEpoch,
    /// Position in the tipset's execution order.
    pub index: u64,
    pub receipt: MessageReceipt,
}

/// One step of a head change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeadChange {
    /// Tipset became part of the canonical chain.
    Apply(TipSet),
    /// Tipset left the canonical chain in a reorg.
    Revert(TipSet),
}

/// Mempool notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MpoolUpdate {
    Add(SignedMessage),
    Remove(SignedMessage),
}
