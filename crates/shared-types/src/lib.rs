//! # Shared Types Crate
//!
//! The native chain data model consumed by the Ethereum gateway.
//!
//! ## Clusters
//!
//! - **Addresses**: [`NativeAddress`], [`ActorId`] and the Ethereum Address
//!   Manager constants that decide which actors have an Ethereum identity.
//! - **Chain**: [`TipSetKey`], [`BlockHeader`], [`TipSet`], [`HeadChange`].
//! - **Messages**: [`Message`], [`SignedMessage`], [`MessageReceipt`].
//! - **Events**: [`StampedEvent`], [`ActorEvent`], [`EventEntry`].
//!
//! ## Design Principles
//!
//! - **Content addressing**: every message and tipset key is named by a CIDv1
//!   (DAG-CBOR codec, blake2b-256). See [`cid_of`].
//! - **Read-only**: nothing in this crate talks to storage; collaborators own
//!   persistence and hand these values to the gateway.

pub mod address;
pub mod chain;
pub mod errors;
pub mod event;

pub use address::*;
pub use chain::*;
pub use errors::*;
pub use event::*;

pub use cid::Cid;
