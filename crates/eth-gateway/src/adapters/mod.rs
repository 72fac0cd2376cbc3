//! Adapters implementing the outbound ports.

pub mod fixtures;
pub mod memory;

pub use memory::{Behaviour, MemoryChain};
