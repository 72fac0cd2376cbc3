//! What a filter or subscription selects, and the matching rules shared by
//! polled filters, pushed subscriptions and one-shot `eth_getLogs` queries.
//!
//! Addresses: an empty set matches any emitter. Topics: position-wise, AND
//! across positions and OR within a position; a wildcard position matches
//! anything, including a missing topic.

use crate::domain::error::{EthError, EthResult};
use crate::domain::types::{
    Address, BlockParam, BlockTag, EthLog, FilterAddress, FilterRequest, FilterTopic, Hash,
};
use crate::eth::projection::{FINALITY_DEPTH, SAFE_DEPTH};
use shared_types::ChainEpoch;

/// Most topic positions a log can carry.
pub const MAX_TOPIC_POSITIONS: usize = 4;

/// Selection criteria of a log filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogCriteria {
    /// Empty means any address
    pub addresses: Vec<Address>,
    /// `None` entries are wildcards
    pub topics: Vec<Option<Vec<Hash>>>,
    pub from_height: ChainEpoch,
    /// `None` follows the head
    pub to_height: Option<ChainEpoch>,
    /// Restricts matches to one block; excludes a height range
    pub block_hash: Option<Hash>,
}

/// Kind-tagged filter specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterSpec {
    Logs(LogCriteria),
    NewBlocks,
    PendingTransactions,
}

/// Fixed height for a range bound, `None` for bounds that follow the head.
fn bound(param: &BlockParam, head: ChainEpoch) -> EthResult<Option<ChainEpoch>> {
    match param {
        BlockParam::Tag(BlockTag::Latest) | BlockParam::Tag(BlockTag::Pending) => Ok(None),
        BlockParam::Tag(BlockTag::Earliest) => Ok(Some(0)),
        BlockParam::Tag(BlockTag::Safe) => Ok(Some(head.saturating_sub(SAFE_DEPTH))),
        BlockParam::Tag(BlockTag::Finalized) => Ok(Some(head.saturating_sub(FINALITY_DEPTH))),
        BlockParam::Number(n) => Ok(Some(*n)),
        BlockParam::Hash(_) => Err(EthError::InvalidParams(
            "block hashes are not range bounds, use blockHash".into(),
        )),
    }
}

fn addresses(address: &Option<FilterAddress>) -> Vec<Address> {
    match address {
        None => Vec::new(),
        Some(FilterAddress::Single(a)) => vec![*a],
        Some(FilterAddress::Multiple(list)) => list.clone(),
    }
}

fn topics(topics: &Option<Vec<Option<FilterTopic>>>) -> EthResult<Vec<Option<Vec<Hash>>>> {
    let Some(positions) = topics else {
        return Ok(Vec::new());
    };
    if positions.len() > MAX_TOPIC_POSITIONS {
        return Err(EthError::InvalidParams(format!(
            "at most {} topic positions, got {}",
            MAX_TOPIC_POSITIONS,
            positions.len()
        )));
    }
    Ok(positions
        .iter()
        .map(|p| match p {
            None => None,
            Some(FilterTopic::Single(t)) => Some(vec![*t]),
            // [] accepts anything, same as null
            Some(FilterTopic::Multiple(set)) if set.is_empty() => None,
            Some(FilterTopic::Multiple(set)) => Some(set.clone()),
        })
        .collect())
}

impl LogCriteria {
    /// Criteria for a filter request, with "latest"-style bounds resolved
    /// against `head`. A missing `fromBlock` means the head; a missing
    /// `toBlock` follows the head.
    pub fn from_request(req: &FilterRequest, head: ChainEpoch) -> EthResult<Self> {
        let addresses = addresses(&req.address);
        let topics = topics(&req.topics)?;

        if let Some(hash) = req.block_hash {
            if req.from_block.is_some() || req.to_block.is_some() {
                return Err(EthError::InvalidParams(
                    "blockHash excludes fromBlock and toBlock".into(),
                ));
            }
            return Ok(Self {
                addresses,
                topics,
                from_height: 0,
                to_height: None,
                block_hash: Some(hash),
            });
        }

        let from_height = match &req.from_block {
            None => head,
            Some(p) => bound(p, head)?.unwrap_or(head),
        };
        let to_height = match &req.to_block {
            None => None,
            Some(p) => bound(p, head)?,
        };
        if let Some(to) = to_height {
            if from_height > to {
                return Err(EthError::InvalidParams(format!(
                    "fromBlock {} is after toBlock {}",
                    from_height, to
                )));
            }
        }

        Ok(Self {
            addresses,
            topics,
            from_height,
            to_height,
            block_hash: None,
        })
    }

    /// Criteria for a `logs` subscription: addresses and topics only, every
    /// future block is in range.
    pub fn live(req: &FilterRequest) -> EthResult<Self> {
        Ok(Self {
            addresses: addresses(&req.address),
            topics: topics(&req.topics)?,
            from_height: 0,
            to_height: None,
            block_hash: None,
        })
    }

    /// Matches every log.
    pub fn any() -> Self {
        Self {
            addresses: Vec::new(),
            topics: Vec::new(),
            from_height: 0,
            to_height: None,
            block_hash: None,
        }
    }

    pub fn matches_address(&self, address: &Address) -> bool {
        self.addresses.is_empty() || self.addresses.contains(address)
    }

    pub fn matches_topics(&self, log_topics: &[Hash]) -> bool {
        self.topics.iter().enumerate().all(|(i, position)| match position {
            None => true,
            Some(accepted) => log_topics.get(i).is_some_and(|t| accepted.contains(t)),
        })
    }

    pub fn in_range(&self, height: ChainEpoch) -> bool {
        height >= self.from_height && self.to_height.map_or(true, |to| height <= to)
    }

    pub fn matches(&self, log: &EthLog) -> bool {
        let placed = match self.block_hash {
            Some(hash) => log.block_hash == hash,
            None => self.in_range(log.block_number.0),
        };
        placed && self.matches_address(&log.address) && self.matches_topics(&log.topics)
    }
}
