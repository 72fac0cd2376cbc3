//! EIP-1559 transaction codec for eth_sendRawTransaction.
//!
//! Decodes and signature-checks a typed (0x02) transaction, turns it into a
//! native message signed with a delegated signature, and rebuilds the exact
//! signed RLP from such a message so its foreign hash can be recomputed.

use crate::domain::types::{Address, Hash};
use crate::eth::address::{decode_masked, from_delegated, masked_id, to_delegated};
use primitive_types::U256;
use rlp::{Rlp, RlpStream};
use sha3::{Digest, Keccak256};
use shared_types::{
    Message, NativeAddress, Signature, SignatureType, SignedMessage, EAM_ACTOR_ID,
    METHOD_CREATE_EXTERNAL, METHOD_INVOKE_EVM, METHOD_SEND,
};
use tracing::debug;

/// Typed-transaction marker for EIP-1559.
pub const EIP1559_TX_TYPE: u8 = 0x02;

/// Maximum accepted transaction size (128 KB)
const MAX_TX_SIZE: usize = 128 * 1024;

/// Signature length `r || s || v`.
const SIGNATURE_LEN: usize = 65;

const FIELD_COUNT: usize = 12;

// secp256k1 n / 2
const HALF_N: [u8; 32] = [
    0x7F, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
    0x5D, 0x57, 0x6E, 0x73, 0x57, 0xA4, 0x50, 0x1D, 0xDF, 0xE9, 0x2F, 0x46, 0x68, 0x1B, 0x20, 0xA0,
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RawTxError {
    #[error("empty transaction")]
    Empty,

    #[error("transaction size {0} exceeds limit {}", MAX_TX_SIZE)]
    TooLarge(usize),

    #[error("unsupported transaction type 0x{0:02x}, only EIP-1559 is accepted")]
    UnsupportedType(u8),

    #[error("RLP decode error: {0}")]
    Rlp(String),

    #[error("EIP-1559 transaction must have {} fields, got {0}", FIELD_COUNT)]
    FieldCount(usize),

    #[error("access lists are not supported")]
    AccessList,

    #[error("invalid signature: {0}")]
    Signature(String),

    #[error("chain id mismatch: expected {expected}, got {got}")]
    ChainId { expected: u64, got: u64 },

    #[error("value does not fit a native token amount")]
    ValueOverflow,

    #[error("message is not a delegated transaction: {0}")]
    NotDelegated(String),
}

impl From<rlp::DecoderError> for RawTxError {
    fn from(e: rlp::DecoderError) -> Self {
        RawTxError::Rlp(format!("{:?}", e))
    }
}

/// A signed EIP-1559 transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eip1559Tx {
    pub chain_id: u64,
    pub nonce: u64,
    pub max_priority_fee_per_gas: U256,
    pub max_fee_per_gas: U256,
    pub gas_limit: u64,
    pub to: Option<Address>,
    pub value: U256,
    pub input: Vec<u8>,
    /// y parity, 0 or 1
    pub v: u8,
    pub r: [u8; 32],
    pub s: [u8; 32],
}

impl Eip1559Tx {
    /// Decode `0x02 || rlp([...])`.
    pub fn decode(raw: &[u8]) -> Result<Self, RawTxError> {
        let (&tx_type, body) = raw.split_first().ok_or(RawTxError::Empty)?;
        if raw.len() > MAX_TX_SIZE {
            return Err(RawTxError::TooLarge(raw.len()));
        }
        if tx_type != EIP1559_TX_TYPE {
            return Err(RawTxError::UnsupportedType(tx_type));
        }

        let rlp = Rlp::new(body);
        if !rlp.is_list() {
            return Err(RawTxError::Rlp("transaction must be an RLP list".into()));
        }
        let count = rlp.item_count()?;
        if count != FIELD_COUNT {
            return Err(RawTxError::FieldCount(count));
        }
        if rlp.at(8)?.item_count()? != 0 {
            return Err(RawTxError::AccessList);
        }

        let v: u64 = rlp.val_at(9)?;
        if v > 1 {
            return Err(RawTxError::Signature(format!("invalid y parity {}", v)));
        }

        Ok(Self {
            chain_id: rlp.val_at(0)?,
            nonce: rlp.val_at(1)?,
            max_priority_fee_per_gas: rlp.val_at(2)?,
            max_fee_per_gas: rlp.val_at(3)?,
            gas_limit: rlp.val_at(4)?,
            to: decode_optional_address(&rlp, 5)?,
            value: rlp.val_at(6)?,
            input: rlp.val_at(7)?,
            v: v as u8,
            r: decode_bytes32(&rlp, 10)?,
            s: decode_bytes32(&rlp, 11)?,
        })
    }

    fn append_unsigned(&self, stream: &mut RlpStream) {
        stream.append(&self.chain_id);
        stream.append(&self.nonce);
        stream.append(&self.max_priority_fee_per_gas);
        stream.append(&self.max_fee_per_gas);
        stream.append(&self.gas_limit);
        match &self.to {
            Some(to) => stream.append(to),
            None => stream.append_empty_data(),
        };
        stream.append(&self.value);
        stream.append(&self.input);
        stream.begin_list(0);
    }

    /// keccak256(0x02 || rlp(unsigned fields))
    pub fn signing_hash(&self) -> [u8; 32] {
        let mut stream = RlpStream::new_list(9);
        self.append_unsigned(&mut stream);
        let mut hasher = Keccak256::new();
        hasher.update([EIP1559_TX_TYPE]);
        hasher.update(stream.as_raw());
        hasher.finalize().into()
    }

    /// `0x02 || rlp(all fields)`, byte-identical to what the client signed.
    pub fn encode(&self) -> Vec<u8> {
        let mut stream = RlpStream::new_list(FIELD_COUNT);
        self.append_unsigned(&mut stream);
        stream.append(&self.v);
        stream.append(&U256::from_big_endian(&self.r));
        stream.append(&U256::from_big_endian(&self.s));
        let mut out = Vec::with_capacity(stream.as_raw().len() + 1);
        out.push(EIP1559_TX_TYPE);
        out.extend_from_slice(stream.as_raw());
        out
    }

    /// Foreign transaction hash.
    pub fn hash(&self) -> Hash {
        Hash::from_slice(&Keccak256::digest(self.encode()))
    }

    /// Recover the sending address from the signature.
    pub fn recover_sender(&self) -> Result<Address, RawTxError> {
        use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
        use secp256k1::{Message as SecpMessage, Secp256k1};

        if self.r == [0u8; 32] || self.s == [0u8; 32] {
            return Err(RawTxError::Signature("r or s is zero".into()));
        }
        if self.s > HALF_N {
            return Err(RawTxError::Signature("s value too high (EIP-2)".into()));
        }

        let mut compact = [0u8; 64];
        compact[..32].copy_from_slice(&self.r);
        compact[32..].copy_from_slice(&self.s);

        let rec_id = RecoveryId::from_i32(i32::from(self.v))
            .map_err(|e| RawTxError::Signature(e.to_string()))?;
        let signature = RecoverableSignature::from_compact(&compact, rec_id)
            .map_err(|e| RawTxError::Signature(e.to_string()))?;
        let message = SecpMessage::from_digest_slice(&self.signing_hash())
            .map_err(|e| RawTxError::Signature(e.to_string()))?;
        let public_key = Secp256k1::verification_only()
            .recover_ecdsa(&message, &signature)
            .map_err(|e| RawTxError::Signature(e.to_string()))?;

        let uncompressed = public_key.serialize_uncompressed();
        let digest = Keccak256::digest(&uncompressed[1..]);
        Ok(Address::from_slice(&digest[12..]))
    }

    /// Native message carrying this transaction, sent from the delegated
    /// address of `sender`.
    pub fn to_signed_message(&self, sender: Address) -> Result<SignedMessage, RawTxError> {
        let value = u128::try_from(self.value).map_err(|_| RawTxError::ValueOverflow)?;
        let gas_fee_cap =
            u128::try_from(self.max_fee_per_gas).map_err(|_| RawTxError::ValueOverflow)?;
        let gas_premium =
            u128::try_from(self.max_priority_fee_per_gas).map_err(|_| RawTxError::ValueOverflow)?;

        let (to, method_num) = match &self.to {
            None => (NativeAddress::Id(EAM_ACTOR_ID), METHOD_CREATE_EXTERNAL),
            Some(to) => {
                let native = match decode_masked(to) {
                    Some(id) => NativeAddress::Id(id),
                    None => to_delegated(to),
                };
                let method = if self.input.is_empty() {
                    METHOD_SEND
                } else {
                    METHOD_INVOKE_EVM
                };
                (native, method)
            }
        };

        let mut sig = Vec::with_capacity(SIGNATURE_LEN);
        sig.extend_from_slice(&self.r);
        sig.extend_from_slice(&self.s);
        sig.push(self.v);

        Ok(SignedMessage {
            message: Message {
                version: 0,
                to,
                from: to_delegated(&sender),
                sequence: self.nonce,
                value,
                method_num,
                params: self.input.clone(),
                gas_limit: self.gas_limit,
                gas_fee_cap,
                gas_premium,
            },
            signature: Signature {
                sig_type: SignatureType::Delegated,
                bytes: sig,
            },
        })
    }

    /// Rebuild the transaction a delegated-signature message was made from.
    pub fn from_signed_message(msg: &SignedMessage, chain_id: u64) -> Result<Self, RawTxError> {
        if msg.signature.sig_type != SignatureType::Delegated {
            return Err(RawTxError::NotDelegated("signature is not delegated".into()));
        }
        if msg.signature.bytes.len() != SIGNATURE_LEN {
            return Err(RawTxError::Signature(format!(
                "expected {} signature bytes, got {}",
                SIGNATURE_LEN,
                msg.signature.bytes.len()
            )));
        }
        if from_delegated(&msg.message.from).is_none() {
            return Err(RawTxError::NotDelegated(format!(
                "sender {} has no foreign form",
                msg.message.from
            )));
        }

        let m = &msg.message;
        let to = match &m.to {
            NativeAddress::Id(EAM_ACTOR_ID) if m.method_num == METHOD_CREATE_EXTERNAL => None,
            NativeAddress::Id(id) => Some(masked_id(*id)),
            other => Some(from_delegated(other).ok_or_else(|| {
                RawTxError::NotDelegated(format!("recipient {} has no foreign form", other))
            })?),
        };

        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&msg.signature.bytes[..32]);
        s.copy_from_slice(&msg.signature.bytes[32..64]);

        Ok(Self {
            chain_id,
            nonce: m.sequence,
            max_priority_fee_per_gas: U256::from(m.gas_premium),
            max_fee_per_gas: U256::from(m.gas_fee_cap),
            gas_limit: m.gas_limit,
            to,
            value: U256::from(m.value),
            input: m.params.clone(),
            v: msg.signature.bytes[64],
            r,
            s,
        })
    }
}

/// Decode, check chain id and recover the sender.
pub fn decode_signed(raw: &[u8], chain_id: u64) -> Result<(Eip1559Tx, Address), RawTxError> {
    let tx = Eip1559Tx::decode(raw)?;
    if tx.chain_id != chain_id {
        return Err(RawTxError::ChainId {
            expected: chain_id,
            got: tx.chain_id,
        });
    }
    let sender = tx.recover_sender()?;
    debug!(
        sender = %format!("{:#x}", sender),
        nonce = tx.nonce,
        create = tx.to.is_none(),
        "decoded raw transaction"
    );
    Ok((tx, sender))
}

fn decode_bytes32(rlp: &Rlp, index: usize) -> Result<[u8; 32], RawTxError> {
    let bytes: Vec<u8> = rlp.val_at(index)?;
    if bytes.len() > 32 {
        return Err(RawTxError::Rlp(format!(
            "field {} too large: {} bytes",
            index,
            bytes.len()
        )));
    }
    if bytes.first() == Some(&0) {
        return Err(RawTxError::Rlp(format!(
            "field {} has leading zero bytes",
            index
        )));
    }
    let mut arr = [0u8; 32];
    arr[32 - bytes.len()..].copy_from_slice(&bytes);
    Ok(arr)
}

fn decode_optional_address(rlp: &Rlp, index: usize) -> Result<Option<Address>, RawTxError> {
    let bytes: Vec<u8> = rlp.val_at(index)?;
    match bytes.len() {
        0 => Ok(None),
        20 => Ok(Some(Address::from_slice(&bytes))),
        n => Err(RawTxError::Rlp(format!(
            "invalid address length at field {}: {} bytes",
            index, n
        ))),
    }
}
