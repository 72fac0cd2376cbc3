//! Closed set of supported RPC methods and the name → method registry.
//!
//! The router resolves a request's method name through [`METHOD_REGISTRY`]
//! and then matches exhaustively on [`EthMethod`]; each arm has a fixed,
//! typed handler.

use crate::domain::config::TimeoutConfig;
use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;

/// Every method the gateway serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EthMethod {
    // chain info
    ChainId,
    ProtocolVersion,
    BlockNumber,
    Syncing,
    Accounts,
    GasPrice,
    MaxPriorityFeePerGas,
    FeeHistory,
    // account state
    GetBalance,
    GetTransactionCount,
    GetCode,
    GetStorageAt,
    // blocks and transactions
    GetBlockByHash,
    GetBlockByNumber,
    GetBlockTransactionCountByHash,
    GetBlockTransactionCountByNumber,
    GetTransactionByHash,
    GetTransactionByBlockHashAndIndex,
    GetTransactionByBlockNumberAndIndex,
    GetTransactionReceipt,
    // execution
    Call,
    EstimateGas,
    SendRawTransaction,
    // logs and filters
    GetLogs,
    NewFilter,
    NewBlockFilter,
    NewPendingTransactionFilter,
    GetFilterChanges,
    GetFilterLogs,
    UninstallFilter,
    // subscriptions (WebSocket only)
    Subscribe,
    Unsubscribe,
    // net / web3
    NetVersion,
    NetListening,
    NetPeerCount,
    Web3ClientVersion,
    Web3Sha3,
}

/// Method category for grouping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodCategory {
    Eth,
    Net,
    Web3,
}

/// Which configured timeout bounds a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutClass {
    Default,
    Call,
    EstimateGas,
    Logs,
}

impl TimeoutClass {
    pub fn duration(&self, timeouts: &TimeoutConfig) -> Duration {
        match self {
            TimeoutClass::Default => timeouts.default,
            TimeoutClass::Call => timeouts.eth_call,
            TimeoutClass::EstimateGas => timeouts.estimate_gas,
            TimeoutClass::Logs => timeouts.get_logs,
        }
    }
}

/// Method metadata
#[derive(Debug, Clone)]
pub struct MethodInfo {
    /// Full method name (e.g., "eth_getBalance")
    pub name: &'static str,
    pub method: EthMethod,
    pub category: MethodCategory,
    pub timeout: TimeoutClass,
    /// Submits to the mempool
    pub is_write: bool,
    /// Needs a push channel
    pub ws_only: bool,
}

impl MethodInfo {
    fn read(name: &'static str, method: EthMethod, category: MethodCategory) -> Self {
        Self {
            name,
            method,
            category,
            timeout: TimeoutClass::Default,
            is_write: false,
            ws_only: false,
        }
    }

    fn timed(mut self, timeout: TimeoutClass) -> Self {
        self.timeout = timeout;
        self
    }

    fn write(mut self) -> Self {
        self.is_write = true;
        self
    }

    fn ws_only(mut self) -> Self {
        self.ws_only = true;
        self
    }
}

/// Method registry - all supported methods with metadata
pub static METHOD_REGISTRY: LazyLock<HashMap<&'static str, MethodInfo>> = LazyLock::new(|| {
    use EthMethod::*;
    use MethodCategory::{Eth, Net, Web3};

    let methods = [
        // ═══════════════════════════════════════════════════════════════════════
        // CHAIN INFO
        // ═══════════════════════════════════════════════════════════════════════
        MethodInfo::read("eth_chainId", ChainId, Eth),
        MethodInfo::read("eth_protocolVersion", ProtocolVersion, Eth),
        MethodInfo::read("eth_blockNumber", BlockNumber, Eth),
        MethodInfo::read("eth_syncing", Syncing, Eth),
        MethodInfo::read("eth_accounts", Accounts, Eth),
        MethodInfo::read("eth_gasPrice", GasPrice, Eth),
        MethodInfo::read("eth_maxPriorityFeePerGas", MaxPriorityFeePerGas, Eth),
        MethodInfo::read("eth_feeHistory", FeeHistory, Eth).timed(TimeoutClass::Logs),
        // ═══════════════════════════════════════════════════════════════════════
        // ACCOUNT STATE
        // ═══════════════════════════════════════════════════════════════════════
        MethodInfo::read("eth_getBalance", GetBalance, Eth),
        MethodInfo::read("eth_getTransactionCount", GetTransactionCount, Eth),
        MethodInfo::read("eth_getCode", GetCode, Eth),
        MethodInfo::read("eth_getStorageAt", GetStorageAt, Eth),
        // ═══════════════════════════════════════════════════════════════════════
        // BLOCKS AND TRANSACTIONS
        // ═══════════════════════════════════════════════════════════════════════
        MethodInfo::read("eth_getBlockByHash", GetBlockByHash, Eth),
        MethodInfo::read("eth_getBlockByNumber", GetBlockByNumber, Eth),
        MethodInfo::read(
            "eth_getBlockTransactionCountByHash",
            GetBlockTransactionCountByHash,
            Eth,
        ),
        MethodInfo::read(
            "eth_getBlockTransactionCountByNumber",
            GetBlockTransactionCountByNumber,
            Eth,
        ),
        MethodInfo::read("eth_getTransactionByHash", GetTransactionByHash, Eth),
        MethodInfo::read(
            "eth_getTransactionByBlockHashAndIndex",
            GetTransactionByBlockHashAndIndex,
            Eth,
        ),
        MethodInfo::read(
            "eth_getTransactionByBlockNumberAndIndex",
            GetTransactionByBlockNumberAndIndex,
            Eth,
        ),
        MethodInfo::read("eth_getTransactionReceipt", GetTransactionReceipt, Eth),
        // ═══════════════════════════════════════════════════════════════════════
        // EXECUTION
        // ═══════════════════════════════════════════════════════════════════════
        MethodInfo::read("eth_call", Call, Eth).timed(TimeoutClass::Call),
        MethodInfo::read("eth_estimateGas", EstimateGas, Eth).timed(TimeoutClass::EstimateGas),
        MethodInfo::read("eth_sendRawTransaction", SendRawTransaction, Eth).write(),
        // ═══════════════════════════════════════════════════════════════════════
        // LOGS AND FILTERS
        // ═══════════════════════════════════════════════════════════════════════
        MethodInfo::read("eth_getLogs", GetLogs, Eth).timed(TimeoutClass::Logs),
        MethodInfo::read("eth_newFilter", NewFilter, Eth),
        MethodInfo::read("eth_newBlockFilter", NewBlockFilter, Eth),
        MethodInfo::read(
            "eth_newPendingTransactionFilter",
            NewPendingTransactionFilter,
            Eth,
        ),
        MethodInfo::read("eth_getFilterChanges", GetFilterChanges, Eth),
        MethodInfo::read("eth_getFilterLogs", GetFilterLogs, Eth).timed(TimeoutClass::Logs),
        MethodInfo::read("eth_uninstallFilter", UninstallFilter, Eth),
        // ═══════════════════════════════════════════════════════════════════════
        // SUBSCRIPTIONS
        // ═══════════════════════════════════════════════════════════════════════
        MethodInfo::read("eth_subscribe", Subscribe, Eth).ws_only(),
        MethodInfo::read("eth_unsubscribe", Unsubscribe, Eth).ws_only(),
        // ═══════════════════════════════════════════════════════════════════════
        // NET / WEB3
        // ═══════════════════════════════════════════════════════════════════════
        MethodInfo::read("net_version", NetVersion, Net),
        MethodInfo::read("net_listening", NetListening, Net),
        MethodInfo::read("net_peerCount", NetPeerCount, Net),
        MethodInfo::read("web3_clientVersion", Web3ClientVersion, Web3),
        MethodInfo::read("web3_sha3", Web3Sha3, Web3),
    ];

    methods.into_iter().map(|m| (m.name, m)).collect()
});

/// Get method info by name
pub fn get_method_info(method: &str) -> Option<&'static MethodInfo> {
    METHOD_REGISTRY.get(method)
}

pub fn is_method_supported(method: &str) -> bool {
    METHOD_REGISTRY.contains_key(method)
}

pub fn is_write_method(method: &str) -> bool {
    METHOD_REGISTRY
        .get(method)
        .map(|m| m.is_write)
        .unwrap_or(false)
}

pub fn get_methods_by_category(category: MethodCategory) -> Vec<&'static str> {
    METHOD_REGISTRY
        .values()
        .filter(|m| m.category == category)
        .map(|m| m.name)
        .collect()
}

/// Subscription types for WebSocket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionType {
    NewHeads,
    Logs,
    NewPendingTransactions,
}

impl SubscriptionType {
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "newHeads" => Some(SubscriptionType::NewHeads),
            "logs" => Some(SubscriptionType::Logs),
            "newPendingTransactions" => Some(SubscriptionType::NewPendingTransactions),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionType::NewHeads => "newHeads",
            SubscriptionType::Logs => "logs",
            SubscriptionType::NewPendingTransactions => "newPendingTransactions",
        }
    }
}
