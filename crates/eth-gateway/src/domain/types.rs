//! Wire types for the Ethereum JSON-RPC surface.
//!
//! All quantities serialize as `0x`-prefixed minimal hex, byte strings as
//! `0x`-prefixed hex, and hashes/addresses as fixed-width hex.

use primitive_types::U256 as PrimitiveU256;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

pub use primitive_types::{H160 as Address, H256 as Hash};

/// Block number type (u64)
pub type BlockNumber = u64;

/// U256 wrapper with hex string serialization for JSON-RPC compatibility.
///
/// Serializes as `"0x..."` hex string, deserializes from hex string or number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct U256(pub PrimitiveU256);

impl U256 {
    pub const ZERO: U256 = U256(PrimitiveU256::zero());

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[inline]
    pub fn into_inner(self) -> PrimitiveU256 {
        self.0
    }

    /// Narrow to a native token amount, `None` if it does not fit.
    pub fn to_u128(&self) -> Option<u128> {
        if self.0 > PrimitiveU256::from(u128::MAX) {
            None
        } else {
            Some(self.0.as_u128())
        }
    }

    /// Big-endian 32-byte form.
    pub fn to_be_bytes(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        self.0.to_big_endian(&mut out);
        out
    }
}

impl From<u64> for U256 {
    fn from(v: u64) -> Self {
        U256(PrimitiveU256::from(v))
    }
}

impl From<u128> for U256 {
    fn from(v: u128) -> Self {
        U256(PrimitiveU256::from(v))
    }
}

impl From<PrimitiveU256> for U256 {
    fn from(v: PrimitiveU256) -> Self {
        U256(v)
    }
}

impl fmt::Display for U256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

impl Serialize for U256 {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("0x{:x}", self.0))
    }
}

impl<'de> Deserialize<'de> for U256 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct U256Visitor;

        impl<'de> de::Visitor<'de> for U256Visitor {
            type Value = U256;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a hex string starting with 0x or a number")
            }

            fn visit_str<E>(self, value: &str) -> Result<U256, E>
            where
                E: de::Error,
            {
                if let Some(hex_str) = value
                    .strip_prefix("0x")
                    .or_else(|| value.strip_prefix("0X"))
                {
                    PrimitiveU256::from_str(hex_str)
                        .map(U256)
                        .map_err(|_| de::Error::custom("invalid hex string for U256"))
                } else {
                    PrimitiveU256::from_dec_str(value)
                        .map(U256)
                        .map_err(|_| de::Error::custom("invalid decimal string for U256"))
                }
            }

            fn visit_u64<E>(self, value: u64) -> Result<U256, E>
            where
                E: de::Error,
            {
                Ok(U256::from(value))
            }
        }

        deserializer.deserialize_any(U256Visitor)
    }
}

/// u64 quantity with hex string serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct U64(pub u64);

impl From<u64> for U64 {
    fn from(v: u64) -> Self {
        U64(v)
    }
}

impl Serialize for U64 {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("0x{:x}", self.0))
    }
}

impl<'de> Deserialize<'de> for U64 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let wide = U256::deserialize(deserializer)?;
        if wide.0 > PrimitiveU256::from(u64::MAX) {
            return Err(de::Error::custom("quantity overflows u64"));
        }
        Ok(U64(wide.0.as_u64()))
    }
}

/// Bytes wrapper with hex serialization
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Bytes(pub Vec<u8>);

impl Bytes {
    pub fn new() -> Self {
        Bytes(Vec::new())
    }

    pub fn from_slice(slice: &[u8]) -> Self {
        Bytes(slice.to_vec())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for Bytes {
    fn from(v: Vec<u8>) -> Self {
        Bytes(v)
    }
}

impl From<&[u8]> for Bytes {
    fn from(v: &[u8]) -> Self {
        Bytes(v.to_vec())
    }
}

impl AsRef<[u8]> for Bytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for Bytes {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("0x{}", hex::encode(&self.0)))
    }
}

impl<'de> Deserialize<'de> for Bytes {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let s = s.strip_prefix("0x").unwrap_or(&s);
        hex::decode(s)
            .map(Bytes)
            .map_err(|_| de::Error::custom("invalid hex bytes"))
    }
}

/// Block tags for JSON-RPC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockTag {
    #[default]
    Latest,
    Earliest,
    Pending,
    Safe,
    Finalized,
}

impl BlockTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockTag::Latest => "latest",
            BlockTag::Earliest => "earliest",
            BlockTag::Pending => "pending",
            BlockTag::Safe => "safe",
            BlockTag::Finalized => "finalized",
        }
    }
}

impl FromStr for BlockTag {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "latest" => Ok(BlockTag::Latest),
            "earliest" => Ok(BlockTag::Earliest),
            "pending" => Ok(BlockTag::Pending),
            "safe" => Ok(BlockTag::Safe),
            "finalized" => Ok(BlockTag::Finalized),
            _ => Err("invalid block tag"),
        }
    }
}

impl Serialize for BlockTag {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

/// Block parameter: a tag, a height or a block hash.
///
/// Accepts `"latest"`-style tags, hex quantities (`"0x1b4"`), decimal
/// strings (`"436"`), JSON numbers, 32-byte hashes, and the EIP-1898 object
/// form `{"blockHash": ..}` / `{"blockNumber": ..}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockParam {
    Tag(BlockTag),
    Number(BlockNumber),
    Hash(Hash),
}

impl Default for BlockParam {
    fn default() -> Self {
        BlockParam::Tag(BlockTag::Latest)
    }
}

impl FromStr for BlockParam {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(tag) = BlockTag::from_str(s) {
            return Ok(BlockParam::Tag(tag));
        }
        if let Some(hex_str) = s.strip_prefix("0x") {
            if hex_str.len() == 64 {
                let bytes = hex::decode(hex_str).map_err(|e| format!("invalid block hash: {}", e))?;
                return Ok(BlockParam::Hash(Hash::from_slice(&bytes)));
            }
            return u64::from_str_radix(hex_str, 16)
                .map(BlockParam::Number)
                .map_err(|_| format!("invalid block number: {}", s));
        }
        s.parse::<u64>()
            .map(BlockParam::Number)
            .map_err(|_| format!("invalid block parameter: {}", s))
    }
}

impl Serialize for BlockParam {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            BlockParam::Tag(tag) => tag.serialize(serializer),
            BlockParam::Number(n) => U64(*n).serialize(serializer),
            BlockParam::Hash(h) => h.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for BlockParam {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Eip1898 {
            block_hash: Option<Hash>,
            block_number: Option<U64>,
        }

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Str(String),
            Num(u64),
            Obj(Eip1898),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Str(s) => BlockParam::from_str(&s).map_err(de::Error::custom),
            Raw::Num(n) => Ok(BlockParam::Number(n)),
            Raw::Obj(Eip1898 {
                block_hash: Some(h),
                ..
            }) => Ok(BlockParam::Hash(h)),
            Raw::Obj(Eip1898 {
                block_number: Some(n),
                ..
            }) => Ok(BlockParam::Number(n.0)),
            Raw::Obj(_) => Err(de::Error::custom("empty block parameter object")),
        }
    }
}

/// Transaction call object for eth_call and eth_estimateGas
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,
    /// Target address (None for contract creation)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas: Option<U64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<U256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_fee_per_gas: Option<U256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_priority_fee_per_gas: Option<U256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<U256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Bytes>,
    /// Input data (alias for data)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<Bytes>,
}

impl CallRequest {
    /// Call payload, preferring `input` over `data`.
    pub fn payload(&self) -> &[u8] {
        self.input
            .as_ref()
            .or(self.data.as_ref())
            .map(Bytes::as_slice)
            .unwrap_or_default()
    }
}

/// Access list item for EIP-2930
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessListItem {
    pub address: Address,
    pub storage_keys: Vec<Hash>,
}

/// Filter object for eth_newFilter, eth_getLogs and `logs` subscriptions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_block: Option<BlockParam>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_block: Option<BlockParam>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<FilterAddress>,
    /// Topics (up to 4)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topics: Option<Vec<Option<FilterTopic>>>,
    /// Block hash (alternative to from_block/to_block)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_hash: Option<Hash>,
}

/// Filter address - single or multiple
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterAddress {
    Single(Address),
    Multiple(Vec<Address>),
}

/// Filter topic - single or multiple
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterTopic {
    Single(Hash),
    Multiple(Vec<Hash>),
}

/// A log as returned by filters, subscriptions and receipts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EthLog {
    pub address: Address,
    pub topics: Vec<Hash>,
    pub data: Bytes,
    pub block_number: U64,
    pub block_hash: Hash,
    pub transaction_hash: Hash,
    pub transaction_index: U64,
    /// Position within the emitting receipt's event sequence
    pub log_index: U64,
    /// Set on logs delivered again because their tipset was reverted
    pub removed: bool,
}

/// Transactions of a block: hashes only or full objects
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BlockTransactions {
    Hashes(Vec<Hash>),
    Full(Vec<EthTransaction>),
}

impl BlockTransactions {
    pub fn len(&self) -> usize {
        match self {
            BlockTransactions::Hashes(h) => h.len(),
            BlockTransactions::Full(t) => t.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EthBlock {
    pub hash: Hash,
    pub parent_hash: Hash,
    pub sha3_uncles: Hash,
    pub miner: Address,
    pub state_root: Hash,
    pub transactions_root: Hash,
    pub receipts_root: Hash,
    pub logs_bloom: Bytes,
    pub difficulty: U64,
    /// Parent weight of the tipset
    pub total_difficulty: U256,
    pub number: U64,
    pub gas_limit: U64,
    pub gas_used: U64,
    pub timestamp: U64,
    pub extra_data: Bytes,
    pub mix_hash: Hash,
    pub nonce: Bytes,
    pub base_fee_per_gas: U256,
    pub size: U64,
    pub transactions: BlockTransactions,
    pub uncles: Vec<Hash>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EthTransaction {
    pub hash: Hash,
    pub nonce: U64,
    pub block_hash: Option<Hash>,
    pub block_number: Option<U64>,
    pub transaction_index: Option<U64>,
    pub from: Address,
    pub to: Option<Address>,
    pub value: U256,
    #[serde(rename = "type")]
    pub tx_type: U64,
    pub input: Bytes,
    pub gas: U64,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    pub chain_id: U64,
    pub access_list: Vec<AccessListItem>,
    pub v: U256,
    pub r: U256,
    pub s: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EthReceipt {
    pub transaction_hash: Hash,
    pub transaction_index: U64,
    pub block_hash: Hash,
    pub block_number: U64,
    pub from: Address,
    pub to: Option<Address>,
    pub root: Hash,
    /// 1 on success, 0 on failure
    pub status: U64,
    pub contract_address: Option<Address>,
    pub cumulative_gas_used: U64,
    pub gas_used: U64,
    pub effective_gas_price: U256,
    pub logs_bloom: Bytes,
    pub logs: Vec<EthLog>,
    #[serde(rename = "type")]
    pub tx_type: U64,
    /// Actor return data, surfaced on failure as well
    pub return_data: Bytes,
}

/// Fee history response for eth_feeHistory (EIP-1559)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeHistory {
    pub oldest_block: U64,
    /// One entry per block plus the next block's base fee
    pub base_fee_per_gas: Vec<U256>,
    pub gas_used_ratio: Vec<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reward: Option<Vec<Vec<U256>>>,
}

/// Opaque identifier shared by filters and subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterId(pub Hash);

impl fmt::Display for FilterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl FromStr for FilterId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex_str = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(hex_str).map_err(|e| format!("invalid id: {}", e))?;
        if bytes.len() != 32 {
            return Err(format!("invalid id length: {}", bytes.len()));
        }
        Ok(FilterId(Hash::from_slice(&bytes)))
    }
}

/// Hands out filter and subscription ids. Each id is 24 random bytes
/// followed by a big-endian sequence number, so ids are unguessable and
/// never repeat within a process.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&self) -> FilterId {
        let seq = self.next.fetch_add(1, Ordering::Relaxed);
        let mut bytes = [0u8; 32];
        bytes[..16].copy_from_slice(uuid::Uuid::new_v4().as_bytes());
        bytes[16..24].copy_from_slice(&uuid::Uuid::new_v4().as_bytes()[..8]);
        bytes[24..].copy_from_slice(&seq.to_be_bytes());
        FilterId(Hash::from(bytes))
    }
}

/// Results returned by eth_getFilterChanges
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterChanges {
    Hashes(Vec<Hash>),
    Logs(Vec<EthLog>),
}

impl FilterChanges {
    pub fn len(&self) -> usize {
        match self {
            FilterChanges::Hashes(h) => h.len(),
            FilterChanges::Logs(l) => l.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// JSON-RPC request ID type
///
/// Per JSON-RPC 2.0 spec, ID can be string, number, or null.
/// We reject null IDs as they indicate notifications (no response expected).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcId {
    String(String),
    /// Numeric ID (must fit in i64 for compatibility)
    Number(i64),
}

impl JsonRpcId {
    /// Rejects empty strings and strings longer than 256 chars
    pub fn validate(&self) -> Result<(), &'static str> {
        match self {
            JsonRpcId::String(s) => {
                if s.is_empty() {
                    Err("request ID cannot be empty string")
                } else if s.len() > 256 {
                    Err("request ID string too long (max 256 chars)")
                } else {
                    Ok(())
                }
            }
            JsonRpcId::Number(_) => Ok(()),
        }
    }
}

impl fmt::Display for JsonRpcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JsonRpcId::String(s) => write!(f, "\"{}\"", s),
            JsonRpcId::Number(n) => write!(f, "{}", n),
        }
    }
}
