//! Ports (hexagonal architecture).

pub mod outbound;

pub use outbound::{
    ActorKind, ActorState, BlockStore, ChainStore, InvocResult, Mempool, StateApi,
    SystemTimeSource, TimeSource, Upstream, UpstreamResult,
};
