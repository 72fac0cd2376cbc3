//! # Actor Events
//!
//! Events emitted by actors during execution. A receipt's events root points
//! at the bincode encoding of `Vec<StampedEvent>` in the block store.

use crate::address::ActorId;
use crate::errors::EncodingError;
use serde::{Deserialize, Serialize};

/// Entry flag: index the key.
pub const FLAG_INDEXED_KEY: u64 = 0b01;
/// Entry flag: index the value.
pub const FLAG_INDEXED_VALUE: u64 = 0b10;
/// Both key and value indexed.
pub const FLAG_INDEXED_ALL: u64 = FLAG_INDEXED_KEY | FLAG_INDEXED_VALUE;

/// Multicodec for raw bytes.
pub const IPLD_RAW: u64 = 0x55;

/// A single key/value pair of an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEntry {
    pub flags: u64,
    pub key: String,
    /// Codec of `value`.
    pub codec: u64,
    pub value: Vec<u8>,
}

impl EventEntry {
    pub fn raw(key: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            flags: FLAG_INDEXED_ALL,
            key: key.into(),
            codec: IPLD_RAW,
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ActorEvent {
    pub entries: Vec<EventEntry>,
}

/// An event together with the actor that emitted it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StampedEvent {
    pub emitter: ActorId,
    pub event: ActorEvent,
}

/// Encode an events root payload.
pub fn encode_events(events: &[StampedEvent]) -> Result<Vec<u8>, EncodingError> {
    Ok(bincode::serialize(events)?)
}

/// Decode an events root payload.
pub fn decode_events(bytes: &[u8]) -> Result<Vec<StampedEvent>, EncodingError> {
    Ok(bincode::deserialize(bytes)?)
}
