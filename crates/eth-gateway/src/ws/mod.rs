//! WebSocket transport and subscription delivery.
//!
//! - eth_subscribe / eth_unsubscribe
//! - Subscription types: newHeads, logs, newPendingTransactions
//! - Every other method is served through the JSON-RPC router

pub mod handler;
pub mod subscriptions;

pub use handler::WebSocketHandler;
pub use subscriptions::{
    Delivery, SubscribeError, SubscriptionBroker, SubscriptionItem, SubscriptionNotification,
    SubscriptionStream,
};
