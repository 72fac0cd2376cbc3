//! # AddressBridge
//!
//! Translates between native actor addresses and 20-byte foreign addresses.
//!
//! Two foreign encodings exist for an actor:
//!
//! - its delegated address in the address-manager namespace, when one is
//!   registered;
//! - otherwise the masked ID address `0xff || 0^11 || be_u64(id)`.
//!
//! Masked addresses decode without touching chain state. Every other value is
//! resolved through [`StateApi::lookup_id`]; successful resolutions are cached
//! as ID ↔ delegated pairs. The cache only ever short-circuits a lookup that
//! already succeeded, a miss always goes to the collaborator.

use crate::domain::error::{EthError, EthResult};
use crate::domain::types::Address;
use crate::ports::outbound::StateApi;
use dashmap::DashMap;
use shared_types::{ActorId, NativeAddress, TipSetKey, EAM_ACTOR_ID, ETH_ADDRESS_LENGTH};
use std::sync::Arc;
use tracing::trace;

/// First byte of every masked ID address.
pub const MASKED_ID_PREFIX_BYTE: u8 = 0xff;

/// Length of the fixed masked-ID prefix: the marker byte plus 11 zero bytes.
const MASKED_PREFIX_LEN: usize = 12;

/// Encode an actor ID as a masked foreign address.
pub fn masked_id(id: ActorId) -> Address {
    let mut bytes = [0u8; ETH_ADDRESS_LENGTH];
    bytes[0] = MASKED_ID_PREFIX_BYTE;
    bytes[MASKED_PREFIX_LEN..].copy_from_slice(&id.to_be_bytes());
    Address::from(bytes)
}

/// The embedded ID if `addr` is in the masked-ID namespace.
pub fn decode_masked(addr: &Address) -> Option<ActorId> {
    let bytes = addr.as_bytes();
    if bytes[0] != MASKED_ID_PREFIX_BYTE || bytes[1..MASKED_PREFIX_LEN].iter().any(|b| *b != 0) {
        return None;
    }
    let mut id = [0u8; 8];
    id.copy_from_slice(&bytes[MASKED_PREFIX_LEN..]);
    Some(u64::from_be_bytes(id))
}

pub fn is_masked(addr: &Address) -> bool {
    decode_masked(addr).is_some()
}

/// Delegated native form of a foreign address. Pure; says nothing about
/// whether an actor exists there.
pub fn to_delegated(addr: &Address) -> NativeAddress {
    NativeAddress::eth_delegated(addr.0)
}

/// Foreign form of a delegated address, if it lives in the address-manager
/// namespace.
pub fn from_delegated(addr: &NativeAddress) -> Option<Address> {
    addr.eth_subaddress().map(Address::from)
}

pub struct AddressBridge {
    state: Arc<dyn StateApi>,
    /// delegated → ID
    ids: DashMap<NativeAddress, ActorId>,
    /// ID → delegated foreign address
    foreign: DashMap<ActorId, Address>,
}

impl AddressBridge {
    pub fn new(state: Arc<dyn StateApi>) -> Self {
        Self {
            state,
            ids: DashMap::new(),
            foreign: DashMap::new(),
        }
    }

    /// Foreign address of a native actor.
    ///
    /// Delegated addresses outside the address-manager namespace have no
    /// foreign shape and fail with `ActorNotEvmCompatible`. Key and actor
    /// addresses are first resolved to an ID.
    pub async fn to_foreign(&self, addr: &NativeAddress) -> EthResult<Address> {
        match addr {
            NativeAddress::Delegated { .. } => from_delegated(addr).ok_or_else(|| {
                EthError::ActorNotEvmCompatible(format!(
                    "{} is not a namespace {} address",
                    addr, EAM_ACTOR_ID
                ))
            }),
            NativeAddress::Id(id) => self.foreign_for_id(*id).await,
            NativeAddress::Secp256k1(_) | NativeAddress::Actor(_) | NativeAddress::Bls(_) => {
                let id = self
                    .state
                    .lookup_id(addr, None)
                    .await?
                    .ok_or_else(|| EthError::AddressNotFound(addr.to_string()))?;
                self.foreign_for_id(id).await
            }
        }
    }

    /// Foreign address for an actor ID: its delegated address when the actor
    /// has one in the address-manager namespace, else the masked form.
    pub async fn foreign_for_id(&self, id: ActorId) -> EthResult<Address> {
        if let Some(addr) = self.foreign.get(&id) {
            return Ok(*addr);
        }
        let actor = self.state.get_actor(&NativeAddress::Id(id), None).await?;
        let delegated = actor
            .and_then(|a| a.delegated_address)
            .and_then(|d| from_delegated(&d).map(|eth| (d, eth)));
        match delegated {
            Some((native, eth)) => {
                self.remember(id, native, eth);
                Ok(eth)
            }
            None => Ok(masked_id(id)),
        }
    }

    /// Canonical ID form of a foreign address.
    pub async fn to_native(&self, addr: &Address) -> EthResult<NativeAddress> {
        self.resolve_id(addr).await.map(NativeAddress::Id)
    }

    /// Actor ID behind a foreign address. Fails with `AddressNotFound` when
    /// chain state has no actor at the delegated form.
    pub async fn resolve_id(&self, addr: &Address) -> EthResult<ActorId> {
        self.resolve_id_at(addr, None).await
    }

    /// Like [`resolve_id`](Self::resolve_id), against the state of `tipset`.
    /// Cached pairs are reused: an ID, once bound to a delegated address,
    /// never changes. Whether the actor already existed at `tipset` is for
    /// the caller's actor lookup to decide.
    pub async fn resolve_id_at(
        &self,
        addr: &Address,
        tipset: Option<&TipSetKey>,
    ) -> EthResult<ActorId> {
        if let Some(id) = decode_masked(addr) {
            return Ok(id);
        }
        let delegated = to_delegated(addr);
        if let Some(id) = self.ids.get(&delegated) {
            return Ok(*id);
        }
        match self.state.lookup_id(&delegated, tipset).await? {
            Some(id) => {
                self.remember(id, delegated, *addr);
                Ok(id)
            }
            None => Err(EthError::AddressNotFound(format!("{:#x}", addr))),
        }
    }

    fn remember(&self, id: ActorId, delegated: NativeAddress, eth: Address) {
        trace!(id, eth = %format!("{:#x}", eth), "caching address pair");
        self.ids.insert(delegated, id);
        self.foreign.insert(id, eth);
    }

    /// Number of cached pairs.
    pub fn cached(&self) -> usize {
        self.foreign.len()
    }
}
