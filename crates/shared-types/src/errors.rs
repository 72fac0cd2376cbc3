//! # Error Types
//!
//! Errors raised while decoding native chain values.

use thiserror::Error;

/// Errors that can occur while decoding a native value from bytes.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EncodingError {
    /// Address protocol byte is not one of the known protocols.
    #[error("Unknown address protocol: {0}")]
    UnknownProtocol(u8),

    /// Address payload has the wrong length for its protocol.
    #[error("Invalid payload length for {protocol}: {len} bytes")]
    InvalidPayloadLength { protocol: &'static str, len: usize },

    /// Varint in an address payload is truncated or overflows u64.
    #[error("Malformed varint in address payload")]
    MalformedVarint,

    /// Delegated subaddress exceeds the protocol maximum.
    #[error("Delegated subaddress too long: {0} bytes (max 54)")]
    SubaddressTooLong(usize),

    /// Digest could not be wrapped into a content identifier.
    #[error("Invalid digest: {0}")]
    InvalidDigest(String),

    /// Binary codec failure.
    #[error("Codec error: {0}")]
    Codec(String),
}

impl From<bincode::Error> for EncodingError {
    fn from(err: bincode::Error) -> Self {
        EncodingError::Codec(err.to_string())
    }
}
