//! Translation between the native chain and the Ethereum surface.

pub mod address;
pub mod events;
pub mod gas;
pub mod index;
pub mod projection;
pub mod raw_tx;

pub use address::{decode_masked, masked_id, AddressBridge};
pub use events::{LogEntry, ReceiptLogExtractor};
pub use gas::GasEstimationProxy;
pub use index::HashIndex;
pub use projection::{block_hash, ChainViewProjector, ProjectedTipset, TxLocation};
pub use raw_tx::{decode_signed, Eip1559Tx, RawTxError};
