//! # Native Addresses
//!
//! Actors are addressed by one of five protocols. Only the ID form is
//! canonical; every other form must be resolved to an ID through chain state.
//!
//! | Protocol | Byte | Payload |
//! |----------|------|---------|
//! | ID | 0 | unsigned varint actor ID |
//! | SECP256K1 | 1 | 20-byte hash of the public key |
//! | Actor | 2 | 20-byte hash of the creation nonce |
//! | BLS | 3 | 48-byte public key |
//! | Delegated | 4 | varint namespace + subaddress (up to 54 bytes) |

use crate::errors::EncodingError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An actor's integer identifier.
pub type ActorId = u64;

/// ID of the Ethereum Address Manager actor. Its ID is also the namespace for
/// delegated addresses that carry an Ethereum address as subaddress.
pub const EAM_ACTOR_ID: ActorId = 10;

/// Subaddress length of an Ethereum-namespace delegated address.
pub const ETH_ADDRESS_LENGTH: usize = 20;

/// Longest subaddress a delegated address may carry.
pub const MAX_SUBADDRESS_LEN: usize = 54;

const PAYLOAD_HASH_LEN: usize = 20;
const BLS_PUB_LEN: usize = 48;

/// Address protocol discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Protocol {
    Id = 0,
    Secp256k1 = 1,
    Actor = 2,
    Bls = 3,
    Delegated = 4,
}

impl TryFrom<u8> for Protocol {
    type Error = EncodingError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Protocol::Id),
            1 => Ok(Protocol::Secp256k1),
            2 => Ok(Protocol::Actor),
            3 => Ok(Protocol::Bls),
            4 => Ok(Protocol::Delegated),
            other => Err(EncodingError::UnknownProtocol(other)),
        }
    }
}

/// A native actor address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NativeAddress {
    /// Canonical actor ID.
    Id(ActorId),
    /// Key-derived account address.
    Secp256k1([u8; PAYLOAD_HASH_LEN]),
    /// Actor created by another actor.
    Actor([u8; PAYLOAD_HASH_LEN]),
    /// BLS public key address.
    Bls(Vec<u8>),
    /// Address assigned by an address-manager actor.
    Delegated { namespace: ActorId, subaddress: Vec<u8> },
}

impl NativeAddress {
    /// Build a delegated address in the Ethereum namespace.
    pub fn eth_delegated(eth: [u8; ETH_ADDRESS_LENGTH]) -> Self {
        NativeAddress::Delegated {
            namespace: EAM_ACTOR_ID,
            subaddress: eth.to_vec(),
        }
    }

    pub fn protocol(&self) -> Protocol {
        match self {
            NativeAddress::Id(_) => Protocol::Id,
            NativeAddress::Secp256k1(_) => Protocol::Secp256k1,
            NativeAddress::Actor(_) => Protocol::Actor,
            NativeAddress::Bls(_) => Protocol::Bls,
            NativeAddress::Delegated { .. } => Protocol::Delegated,
        }
    }

    pub fn id(&self) -> Option<ActorId> {
        match self {
            NativeAddress::Id(id) => Some(*id),
            _ => None,
        }
    }

    /// The 20-byte Ethereum address, if this is an Ethereum-namespace
    /// delegated address.
    pub fn eth_subaddress(&self) -> Option<[u8; ETH_ADDRESS_LENGTH]> {
        match self {
            NativeAddress::Delegated {
                namespace,
                subaddress,
            } if *namespace == EAM_ACTOR_ID && subaddress.len() == ETH_ADDRESS_LENGTH => {
                let mut out = [0u8; ETH_ADDRESS_LENGTH];
                out.copy_from_slice(subaddress);
                Some(out)
            }
            _ => None,
        }
    }

    /// Binary form: protocol byte followed by the payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![self.protocol() as u8];
        match self {
            NativeAddress::Id(id) => write_uvarint(*id, &mut out),
            NativeAddress::Secp256k1(hash) | NativeAddress::Actor(hash) => {
                out.extend_from_slice(hash)
            }
            NativeAddress::Bls(key) => out.extend_from_slice(key),
            NativeAddress::Delegated {
                namespace,
                subaddress,
            } => {
                write_uvarint(*namespace, &mut out);
                out.extend_from_slice(subaddress);
            }
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EncodingError> {
        let (&proto, payload) = bytes
            .split_first()
            .ok_or(EncodingError::InvalidPayloadLength {
                protocol: "address",
                len: 0,
            })?;

        match Protocol::try_from(proto)? {
            Protocol::Id => {
                let (id, rest) = read_uvarint(payload)?;
                if !rest.is_empty() {
                    return Err(EncodingError::InvalidPayloadLength {
                        protocol: "id",
                        len: payload.len(),
                    });
                }
                Ok(NativeAddress::Id(id))
            }
            Protocol::Secp256k1 => Ok(NativeAddress::Secp256k1(fixed_hash(payload, "secp256k1")?)),
            Protocol::Actor => Ok(NativeAddress::Actor(fixed_hash(payload, "actor")?)),
            Protocol::Bls => {
                if payload.len() != BLS_PUB_LEN {
                    return Err(EncodingError::InvalidPayloadLength {
                        protocol: "bls",
                        len: payload.len(),
                    });
                }
                Ok(NativeAddress::Bls(payload.to_vec()))
            }
            Protocol::Delegated => {
                let (namespace, subaddress) = read_uvarint(payload)?;
                if subaddress.len() > MAX_SUBADDRESS_LEN {
                    return Err(EncodingError::SubaddressTooLong(subaddress.len()));
                }
                Ok(NativeAddress::Delegated {
                    namespace,
                    subaddress: subaddress.to_vec(),
                })
            }
        }
    }
}

/// Diagnostic form: `f0<id>` for IDs, `f4<ns>f<hex>` for delegated addresses
/// and `f<protocol><hex>` for the key-derived kinds.
impl fmt::Display for NativeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeAddress::Id(id) => write!(f, "f0{}", id),
            NativeAddress::Delegated {
                namespace,
                subaddress,
            } => write!(f, "f4{}f{}", namespace, hex::encode(subaddress)),
            NativeAddress::Secp256k1(p) => write!(f, "f1{}", hex::encode(p)),
            NativeAddress::Actor(p) => write!(f, "f2{}", hex::encode(p)),
            NativeAddress::Bls(p) => write!(f, "f3{}", hex::encode(p)),
        }
    }
}

fn fixed_hash(payload: &[u8], protocol: &'static str) -> Result<[u8; PAYLOAD_HASH_LEN], EncodingError> {
    payload
        .try_into()
        .map_err(|_| EncodingError::InvalidPayloadLength {
            protocol,
            len: payload.len(),
        })
}

fn write_uvarint(mut value: u64, out: &mut Vec<u8>) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

fn read_uvarint(bytes: &[u8]) -> Result<(u64, &[u8]), EncodingError> {
    let mut value: u64 = 0;
    for (i, &b) in bytes.iter().enumerate().take(10) {
        let part = u64::from(b & 0x7f);
        if i == 9 && b > 1 {
            return Err(EncodingError::MalformedVarint);
        }
        value |= part << (7 * i);
        if b & 0x80 == 0 {
            return Ok((value, &bytes[i + 1..]));
        }
    }
    Err(EncodingError::MalformedVarint)
}
