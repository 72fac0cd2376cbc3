//! Foreign transaction hash ↔ native message CID.
//!
//! Native messages hash to the digest of their CID, which reverses without a
//! lookup. Messages submitted as Ethereum transactions hash to keccak of the
//! signed RLP instead; those pairs are recorded here when the gateway first
//! sees them (submission or projection).

use crate::domain::types::Hash;
use dashmap::DashMap;
use shared_types::{cid_digest, cid_from_digest, Cid};

#[derive(Default)]
pub struct HashIndex {
    by_hash: DashMap<Hash, Cid>,
    by_cid: DashMap<Cid, Hash>,
}

impl HashIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, hash: Hash, cid: Cid) {
        self.by_hash.insert(hash, cid);
        self.by_cid.insert(cid, hash);
    }

    /// Message CID for a foreign hash: the recorded pair if any, else the CID
    /// whose digest the hash is.
    pub fn cid_for(&self, hash: &Hash) -> Option<Cid> {
        if let Some(cid) = self.by_hash.get(hash) {
            return Some(*cid);
        }
        cid_from_digest(&hash.0).ok()
    }

    /// Recorded foreign hash of a delegated message.
    pub fn recorded_hash(&self, cid: &Cid) -> Option<Hash> {
        self.by_cid.get(cid).map(|h| *h)
    }

    /// Hash a native message is known by when it has no recorded pair.
    pub fn native_hash(cid: &Cid) -> Hash {
        Hash::from(cid_digest(cid))
    }

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::cid_of;

    #[test]
    fn test_native_hash_reverses_without_entry() {
        let index = HashIndex::new();
        let cid = cid_of(b"msg");
        let hash = HashIndex::native_hash(&cid);
        assert_eq!(index.cid_for(&hash), Some(cid));
        assert!(index.is_empty());
    }

    #[test]
    fn test_recorded_pair_wins() {
        let index = HashIndex::new();
        let cid = cid_of(b"eth msg");
        let eth_hash = Hash::repeat_byte(0xee);
        index.insert(eth_hash, cid);
        assert_eq!(index.cid_for(&eth_hash), Some(cid));
        assert_eq!(index.recorded_hash(&cid), Some(eth_hash));
    }
}
