//! # Gateway Test Suite
//!
//! End-to-end scenarios run through the JSON-RPC router and the WebSocket
//! handler against the in-memory chain.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/
//!     ├── harness.rs        # Running gateway + chain fixture
//!     ├── accounts.rs       # Address translation, account state, metadata
//!     ├── execution.rs      # eth_call, gas estimation, raw transactions
//!     ├── filters.rs        # Polling filters, reverts, eviction
//!     └── subscriptions.rs  # Push delivery and overflow
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p eth-gateway-tests
//! cargo test -p eth-gateway-tests integration::filters
//! ```

pub mod integration;
