//! JSON-RPC 2.0 framing and method dispatch.
//!
//! Both transports hand request bodies to this module. Every method runs
//! under the timeout of its registry entry; when the timeout fires the
//! handler future is dropped, which cancels whatever it was waiting on.

use crate::domain::config::TimeoutConfig;
use crate::domain::error::{codes, ApiError, ApiResult};
use crate::domain::methods::{get_method_info, EthMethod, MethodInfo};
use crate::domain::types::*;
use crate::middleware::{GatewayMetrics, RequestTimer};
use crate::rpc::RpcHandlers;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub rpc_handlers: Arc<RpcHandlers>,
    pub metrics: Arc<GatewayMetrics>,
    pub timeouts: TimeoutConfig,
    pub max_batch_size: usize,
}

pub fn json_rpc_result(id: Value, result: Value) -> Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result,
    })
}

pub fn json_rpc_error(id: Value, error: &ApiError) -> Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": error,
    })
}

/// Handle a raw request body: a single request or a batch.
pub async fn handle_body(state: &AppState, body: &str) -> Value {
    let request: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(e) => return json_rpc_error(Value::Null, &ApiError::parse_error(e.to_string())),
    };
    handle_value(state, request).await
}

pub async fn handle_value(state: &AppState, request: Value) -> Value {
    match request {
        Value::Array(batch) => match check_batch(&batch, state.max_batch_size) {
            Ok(()) => {
                let mut responses = Vec::with_capacity(batch.len());
                for req in &batch {
                    responses.push(process_single_request(state, req).await);
                }
                Value::Array(responses)
            }
            Err(e) => json_rpc_error(Value::Null, &e),
        },
        single => process_single_request(state, &single).await,
    }
}

pub fn check_batch(batch: &[Value], max_batch_size: usize) -> ApiResult<()> {
    if batch.is_empty() {
        return Err(ApiError::invalid_request("empty batch"));
    }
    if batch.len() > max_batch_size {
        return Err(ApiError::limit_exceeded(format!(
            "batch of {} requests exceeds {}",
            batch.len(),
            max_batch_size
        )));
    }
    Ok(())
}

/// A validated request envelope.
#[derive(Debug)]
pub struct Envelope<'a> {
    pub id: Value,
    pub info: &'static MethodInfo,
    pub params: Option<&'a Value>,
}

/// Validate the envelope of one request.
///
/// On failure the returned id is the best one to echo: the request's own
/// id when it was readable, null otherwise.
pub fn parse_envelope(request: &Value) -> Result<Envelope<'_>, (Value, ApiError)> {
    let Some(obj) = request.as_object() else {
        return Err((Value::Null, ApiError::invalid_request("not an object")));
    };

    let id = match obj.get("id") {
        None => Value::Null,
        Some(raw) => {
            let parsed: JsonRpcId = serde_json::from_value(raw.clone()).map_err(|_| {
                (
                    Value::Null,
                    ApiError::invalid_request("id must be a string or an integer"),
                )
            })?;
            parsed
                .validate()
                .map_err(|e| (Value::Null, ApiError::invalid_request(e)))?;
            raw.clone()
        }
    };

    if obj.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
        return Err((id, ApiError::invalid_request("jsonrpc must be \"2.0\"")));
    }
    let Some(method) = obj.get("method").and_then(Value::as_str) else {
        return Err((id, ApiError::invalid_request("missing method")));
    };
    let Some(info) = get_method_info(method) else {
        return Err((id, ApiError::method_not_found(method)));
    };
    Ok(Envelope {
        id,
        info,
        params: obj.get("params"),
    })
}

/// Process a single JSON-RPC request into its response object.
pub async fn process_single_request(state: &AppState, request: &Value) -> Value {
    let Envelope { id, info, params } = match parse_envelope(request) {
        Ok(env) => env,
        Err((id, e)) => return json_rpc_error(id, &e),
    };
    match call_method(state, info, params).await {
        Ok(value) => json_rpc_result(id, value),
        Err(e) => json_rpc_error(id, &e),
    }
}

/// Run one registered method under its timeout, recording metrics.
pub async fn call_method(
    state: &AppState,
    info: &'static MethodInfo,
    params: Option<&Value>,
) -> ApiResult<Value> {
    if info.ws_only {
        return Err(ws_only(info.name));
    }
    let timer = RequestTimer::new(Arc::clone(&state.metrics), info.is_write);
    let limit = info.timeout.duration(&state.timeouts);
    let result = match tokio::time::timeout(limit, route_method(state, info.method, params)).await
    {
        Ok(result) => result,
        Err(_) => {
            state.metrics.record_timeout();
            warn!(method = info.name, timeout_ms = limit.as_millis() as u64, "request timed out");
            Err(ApiError::timeout(info.name))
        }
    };
    if let Err(e) = &result {
        debug!(method = info.name, code = e.code, error = %e.message, "request failed");
    }
    timer.finish(result.is_ok());
    result
}

fn ws_only(method: &str) -> ApiError {
    ApiError::new(
        codes::METHOD_NOT_FOUND,
        format!("{} is only available over WebSocket", method),
    )
}

fn to_json<T: Serialize>(value: T) -> ApiResult<Value> {
    Ok(serde_json::to_value(value)?)
}

/// Route a registered method to its handler.
pub async fn route_method(
    state: &AppState,
    method: EthMethod,
    params: Option<&Value>,
) -> ApiResult<Value> {
    use EthMethod::*;
    let eth = &state.rpc_handlers.eth;

    match method {
        // ═══════════════════════════════════════════════════════════════════
        // WEB3 / NET NAMESPACES
        // ═══════════════════════════════════════════════════════════════════
        Web3ClientVersion => to_json(state.rpc_handlers.web3.client_version().await?),
        Web3Sha3 => {
            let data: Bytes = parse_param(params, 0)?;
            to_json(state.rpc_handlers.web3.sha3(data).await?)
        }
        NetVersion => to_json(state.rpc_handlers.net.version().await?),
        NetListening => to_json(state.rpc_handlers.net.listening().await?),
        NetPeerCount => to_json(state.rpc_handlers.net.peer_count().await?),

        // ═══════════════════════════════════════════════════════════════════
        // ETH NAMESPACE - Chain Info
        // ═══════════════════════════════════════════════════════════════════
        ChainId => to_json(eth.chain_id().await?),
        ProtocolVersion => to_json(eth.protocol_version().await?),
        BlockNumber => to_json(eth.block_number().await?),
        Syncing => to_json(eth.syncing().await?),
        Accounts => to_json(eth.accounts().await?),
        GasPrice => to_json(eth.gas_price().await?),
        MaxPriorityFeePerGas => to_json(eth.max_priority_fee_per_gas().await?),
        FeeHistory => {
            let block_count: U64 = parse_param(params, 0)?;
            let newest: BlockParam = parse_param(params, 1)?;
            let percentiles: Option<Vec<f64>> = parse_param_optional(params, 2)?;
            to_json(eth.fee_history(block_count, newest, percentiles).await?)
        }

        // ═══════════════════════════════════════════════════════════════════
        // ETH NAMESPACE - Account State
        // ═══════════════════════════════════════════════════════════════════
        GetBalance => {
            let address: Address = parse_param(params, 0)?;
            let block = parse_param_optional(params, 1)?.unwrap_or_default();
            to_json(eth.get_balance(address, block).await?)
        }
        GetTransactionCount => {
            let address: Address = parse_param(params, 0)?;
            let block = parse_param_optional(params, 1)?.unwrap_or_default();
            to_json(eth.get_transaction_count(address, block).await?)
        }
        GetCode => {
            let address: Address = parse_param(params, 0)?;
            let block = parse_param_optional(params, 1)?.unwrap_or_default();
            to_json(eth.get_code(address, block).await?)
        }
        GetStorageAt => {
            let address: Address = parse_param(params, 0)?;
            let position: U256 = parse_param(params, 1)?;
            let block = parse_param_optional(params, 2)?.unwrap_or_default();
            to_json(eth.get_storage_at(address, position, block).await?)
        }

        // ═══════════════════════════════════════════════════════════════════
        // ETH NAMESPACE - Blocks and Transactions
        // ═══════════════════════════════════════════════════════════════════
        GetBlockByHash => {
            let hash: Hash = parse_param(params, 0)?;
            let full_tx = parse_param_optional(params, 1)?.unwrap_or(false);
            to_json(eth.get_block_by_hash(hash, full_tx).await?)
        }
        GetBlockByNumber => {
            let block: BlockParam = parse_param(params, 0)?;
            let full_tx = parse_param_optional(params, 1)?.unwrap_or(false);
            to_json(eth.get_block_by_number(block, full_tx).await?)
        }
        GetBlockTransactionCountByHash => {
            let hash: Hash = parse_param(params, 0)?;
            to_json(eth.get_block_transaction_count_by_hash(hash).await?)
        }
        GetBlockTransactionCountByNumber => {
            let block: BlockParam = parse_param(params, 0)?;
            to_json(eth.get_block_transaction_count_by_number(block).await?)
        }
        GetTransactionByHash => {
            let hash: Hash = parse_param(params, 0)?;
            to_json(eth.get_transaction_by_hash(hash).await?)
        }
        GetTransactionByBlockHashAndIndex => {
            let hash: Hash = parse_param(params, 0)?;
            let index: U64 = parse_param(params, 1)?;
            to_json(eth.get_transaction_by_block_hash_and_index(hash, index).await?)
        }
        GetTransactionByBlockNumberAndIndex => {
            let block: BlockParam = parse_param(params, 0)?;
            let index: U64 = parse_param(params, 1)?;
            to_json(eth.get_transaction_by_block_number_and_index(block, index).await?)
        }
        GetTransactionReceipt => {
            let hash: Hash = parse_param(params, 0)?;
            to_json(eth.get_transaction_receipt(hash).await?)
        }

        // ═══════════════════════════════════════════════════════════════════
        // ETH NAMESPACE - Execution
        // ═══════════════════════════════════════════════════════════════════
        Call => {
            let request: CallRequest = parse_param(params, 0)?;
            let block = parse_param_optional(params, 1)?.unwrap_or_default();
            to_json(eth.call(request, block).await?)
        }
        EstimateGas => {
            let request: CallRequest = parse_param(params, 0)?;
            let block: Option<BlockParam> = parse_param_optional(params, 1)?;
            to_json(eth.estimate_gas(request, block).await?)
        }
        SendRawTransaction => {
            let raw: Bytes = parse_param(params, 0)?;
            to_json(eth.send_raw_transaction(raw).await?)
        }

        // ═══════════════════════════════════════════════════════════════════
        // ETH NAMESPACE - Logs and Filters
        // ═══════════════════════════════════════════════════════════════════
        GetLogs => {
            let filter: FilterRequest = parse_param(params, 0)?;
            to_json(eth.get_logs(filter).await?)
        }
        NewFilter => {
            let filter: FilterRequest = parse_param_optional(params, 0)?.unwrap_or_default();
            to_json(eth.new_filter(filter).await?)
        }
        NewBlockFilter => to_json(eth.new_block_filter().await?),
        NewPendingTransactionFilter => to_json(eth.new_pending_transaction_filter().await?),
        GetFilterChanges => {
            let id: FilterId = parse_param(params, 0)?;
            to_json(eth.get_filter_changes(id).await?)
        }
        GetFilterLogs => {
            let id: FilterId = parse_param(params, 0)?;
            to_json(eth.get_filter_logs(id).await?)
        }
        UninstallFilter => {
            let id: FilterId = parse_param(params, 0)?;
            to_json(eth.uninstall_filter(id).await?)
        }

        // Served by the WebSocket handler before reaching the router
        Subscribe => Err(ws_only("eth_subscribe")),
        Unsubscribe => Err(ws_only("eth_unsubscribe")),
    }
}

fn param_at(params: Option<&Value>, index: usize) -> Option<&Value> {
    params.and_then(|p| {
        if p.is_array() {
            p.get(index)
        } else if index == 0 {
            Some(p)
        } else {
            None
        }
    })
}

/// Parse a required parameter from the params array.
pub fn parse_param<T: DeserializeOwned>(params: Option<&Value>, index: usize) -> ApiResult<T> {
    let param = param_at(params, index)
        .ok_or_else(|| ApiError::invalid_params(format!("missing parameter at index {}", index)))?;
    serde_json::from_value(param.clone())
        .map_err(|e| ApiError::invalid_params(format!("invalid parameter at index {}: {}", index, e)))
}

/// Parse an optional parameter. Absent and `null` are `None`; anything
/// else must parse.
pub fn parse_param_optional<T: DeserializeOwned>(
    params: Option<&Value>,
    index: usize,
) -> ApiResult<Option<T>> {
    match param_at(params, index) {
        None | Some(Value::Null) => Ok(None),
        Some(_) => parse_param(params, index).map(Some),
    }
}
