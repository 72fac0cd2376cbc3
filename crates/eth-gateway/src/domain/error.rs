//! Gateway error types with JSON-RPC 2.0 error codes.
//!
//! Two layers: [`EthError`] is what the translation components return;
//! [`ApiError`] is the JSON-RPC error object put on the wire.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Every gas estimation failure message starts with this. Clients match on it
/// to tell "this call always reverts" apart from other RPC errors.
pub const GAS_ESTIMATION_PREFIX: &str = "GasEstimateMessageGas";

/// JSON-RPC error codes
pub mod codes {
    // JSON-RPC 2.0 standard errors (-32700 to -32600)
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;

    // Translation errors (-32000 to -32099)
    pub const SERVER_ERROR: i32 = -32000;
    pub const ADDRESS_NOT_FOUND: i32 = -32001;
    pub const ACTOR_NOT_EVM_COMPATIBLE: i32 = -32002;
    pub const EVENTS_UNDECODABLE: i32 = -32003;
    pub const FILTER_NOT_FOUND: i32 = -32004;
    pub const UPSTREAM_UNAVAILABLE: i32 = -32005;
    pub const TIMEOUT: i32 = -32006;
    pub const LIMIT_EXCEEDED: i32 = -32007;
    pub const TRANSACTION_REJECTED: i32 = -32010;
    pub const GAS_ESTIMATION_FAILED: i32 = -32015;

    // geth reports reverts with code 3 and the revert data attached
    pub const EXECUTION_REVERTED: i32 = 3;
}

/// Errors raised by the translation components.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EthError {
    /// Foreign address has no native counterpart.
    #[error("address not found: {0}")]
    AddressNotFound(String),

    /// Native actor exists but has no Ethereum representation.
    #[error("actor not EVM compatible: {0}")]
    ActorNotEvmCompatible(String),

    /// Receipt event data could not be fetched or parsed.
    #[error("events undecodable: {0}")]
    EventsUndecodable(String),

    /// Unknown, uninstalled or evicted filter or subscription.
    #[error("filter not found: {0}")]
    FilterNotFound(String),

    /// Simulated execution failed during gas estimation.
    #[error("GasEstimateMessageGas: {0}")]
    GasEstimationFailed(String),

    /// A collaborator could not answer.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Read-only call reverted.
    #[error("execution reverted: {reason}")]
    ExecutionReverted { reason: String, data: Vec<u8> },

    /// Mempool refused the message.
    #[error("transaction rejected: {0}")]
    TransactionRejected(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type EthResult<T> = Result<T, EthError>;

/// Failures reported by the chain collaborators.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpstreamError {
    /// The collaborator could not be reached or timed out.
    #[error("{0}")]
    Unavailable(String),

    /// Simulated execution ended with a non-zero exit code.
    #[error("exit {exit_code}: {reason}")]
    ExecutionFailed {
        exit_code: u32,
        reason: String,
        return_data: Vec<u8>,
    },

    /// Mempool admission refused the message.
    #[error("{0}")]
    Rejected(String),
}

impl From<UpstreamError> for EthError {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::Unavailable(msg) => EthError::UpstreamUnavailable(msg),
            UpstreamError::ExecutionFailed {
                exit_code,
                reason,
                return_data,
            } => EthError::ExecutionReverted {
                reason: format!("exit {}: {}", exit_code, reason),
                data: return_data,
            },
            UpstreamError::Rejected(msg) => EthError::TransactionRejected(msg),
        }
    }
}

impl From<shared_types::EncodingError> for EthError {
    fn from(err: shared_types::EncodingError) -> Self {
        EthError::Internal(err.to_string())
    }
}

/// JSON-RPC error object
#[derive(Debug, Clone)]
pub struct ApiError {
    /// JSON-RPC error code
    pub code: i32,
    /// Error message
    pub message: String,
    /// Optional additional data
    pub data: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(code: i32, message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            code,
            message: message.into(),
            data: Some(data),
        }
    }

    /// Parse error - invalid JSON
    pub fn parse_error(details: impl Into<String>) -> Self {
        Self::new(
            codes::PARSE_ERROR,
            format!("Parse error: {}", details.into()),
        )
    }

    /// Invalid request - not a valid JSON-RPC request
    pub fn invalid_request(details: impl Into<String>) -> Self {
        Self::new(
            codes::INVALID_REQUEST,
            format!("Invalid request: {}", details.into()),
        )
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            codes::METHOD_NOT_FOUND,
            format!("Method not found: {}", method),
        )
    }

    pub fn invalid_params(details: impl Into<String>) -> Self {
        Self::new(
            codes::INVALID_PARAMS,
            format!("Invalid params: {}", details.into()),
        )
    }

    pub fn internal(details: impl Into<String>) -> Self {
        Self::new(
            codes::INTERNAL_ERROR,
            format!("Internal error: {}", details.into()),
        )
    }

    pub fn limit_exceeded(limit: impl Into<String>) -> Self {
        Self::new(
            codes::LIMIT_EXCEEDED,
            format!("Limit exceeded: {}", limit.into()),
        )
    }

    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::new(
            codes::TIMEOUT,
            format!("Request timeout: {}", operation.into()),
        )
    }

    /// Execution reverted, with the revert data attached hex-encoded
    pub fn execution_reverted(details: impl Into<String>, data: &[u8]) -> Self {
        Self::with_data(
            codes::EXECUTION_REVERTED,
            format!("execution reverted: {}", details.into()),
            serde_json::Value::String(format!("0x{}", hex::encode(data))),
        )
    }
}

impl From<EthError> for ApiError {
    fn from(err: EthError) -> Self {
        let code = match &err {
            EthError::AddressNotFound(_) => codes::ADDRESS_NOT_FOUND,
            EthError::ActorNotEvmCompatible(_) => codes::ACTOR_NOT_EVM_COMPATIBLE,
            EthError::EventsUndecodable(_) => codes::EVENTS_UNDECODABLE,
            EthError::FilterNotFound(_) => codes::FILTER_NOT_FOUND,
            EthError::GasEstimationFailed(_) => codes::GAS_ESTIMATION_FAILED,
            EthError::UpstreamUnavailable(_) => codes::UPSTREAM_UNAVAILABLE,
            EthError::TransactionRejected(_) => codes::TRANSACTION_REJECTED,
            EthError::LimitExceeded(_) => codes::LIMIT_EXCEEDED,
            EthError::InvalidParams(_) => codes::INVALID_PARAMS,
            EthError::Internal(_) => codes::INTERNAL_ERROR,
            EthError::ExecutionReverted { reason, data } => {
                return ApiError::execution_reverted(reason.clone(), data);
            }
        };
        ApiError::new(code, err.to_string())
    }
}

impl From<UpstreamError> for ApiError {
    fn from(err: UpstreamError) -> Self {
        EthError::from(err).into()
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

impl Serialize for ApiError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("ApiError", 3)?;
        state.serialize_field("code", &self.code)?;
        state.serialize_field("message", &self.message)?;
        if let Some(ref data) = self.data {
            state.serialize_field("data", data)?;
        }
        state.end()
    }
}

impl<'de> Deserialize<'de> for ApiError {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct ErrorHelper {
            code: i32,
            message: String,
            data: Option<serde_json::Value>,
        }

        let helper = ErrorHelper::deserialize(deserializer)?;
        Ok(ApiError {
            code: helper.code,
            message: helper.message,
            data: helper.data,
        })
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        if e.is_syntax() || e.is_eof() {
            ApiError::parse_error(e.to_string())
        } else {
            ApiError::invalid_params(e.to_string())
        }
    }
}

impl From<hex::FromHexError> for ApiError {
    fn from(e: hex::FromHexError) -> Self {
        ApiError::invalid_params(format!("invalid hex: {}", e))
    }
}

/// Result type for RPC handlers
pub type ApiResult<T> = Result<T, ApiError>;

/// Server lifecycle errors (not JSON-RPC)
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("configuration error: {0}")]
    Config(String),

    /// Server socket bind error
    #[error("server bind error: {0}")]
    Bind(String),

    #[error("shutdown in progress")]
    ShuttingDown,

    #[error("internal error: {0}")]
    Internal(String),
}
