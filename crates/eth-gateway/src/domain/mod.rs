//! Domain types for the gateway: configuration, errors, wire types and the
//! method registry.

pub mod config;
pub mod error;
pub mod methods;
pub mod types;

pub use config::GatewayConfig;
pub use error::{ApiError, ApiResult, EthError, EthResult, GatewayError, UpstreamError};
pub use methods::{get_method_info, is_method_supported, EthMethod, MethodInfo, SubscriptionType};
pub use types::*;
