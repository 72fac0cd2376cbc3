//! # GasEstimationProxy
//!
//! Builds the native message equivalent to a foreign call description and
//! runs it through simulated execution, for gas estimation and for
//! read-only calls. No retries: the outcome is fixed by chain state.

use crate::domain::error::{EthError, EthResult, UpstreamError};
use crate::domain::types::{Address, CallRequest, U256};
use crate::eth::address::{to_delegated, AddressBridge};
use crate::eth::projection::BLOCK_GAS_LIMIT;
use crate::ports::outbound::StateApi;
use shared_types::{
    Message, NativeAddress, TipSetKey, EAM_ACTOR_ID, METHOD_CREATE_EXTERNAL, METHOD_INVOKE_EVM,
    METHOD_SEND,
};
use std::sync::Arc;
use tracing::debug;

pub struct GasEstimationProxy {
    state: Arc<dyn StateApi>,
    bridge: Arc<AddressBridge>,
}

fn amount(value: Option<U256>, field: &str) -> EthResult<u128> {
    match value {
        None => Ok(0),
        Some(v) => v
            .to_u128()
            .ok_or_else(|| EthError::InvalidParams(format!("{} overflows", field))),
    }
}

impl GasEstimationProxy {
    pub fn new(state: Arc<dyn StateApi>, bridge: Arc<AddressBridge>) -> Self {
        Self { state, bridge }
    }

    /// Native form of a call participant. Unknown addresses keep their
    /// delegated form; the message can still be simulated against them.
    async fn participant(&self, addr: &Address) -> EthResult<NativeAddress> {
        match self.bridge.to_native(addr).await {
            Ok(native) => Ok(native),
            Err(EthError::AddressNotFound(_)) => Ok(to_delegated(addr)),
            Err(e) => Err(e),
        }
    }

    /// Native message for a foreign call description.
    pub async fn build_message(&self, req: &CallRequest) -> EthResult<Message> {
        let from = self
            .participant(&req.from.unwrap_or_else(Address::zero))
            .await?;
        let payload = req.payload().to_vec();

        let (to, method_num) = match &req.to {
            None => (NativeAddress::Id(EAM_ACTOR_ID), METHOD_CREATE_EXTERNAL),
            Some(to) => {
                let method = if payload.is_empty() {
                    METHOD_SEND
                } else {
                    METHOD_INVOKE_EVM
                };
                (self.participant(to).await?, method)
            }
        };

        Ok(Message {
            version: 0,
            to,
            from,
            sequence: 0,
            value: amount(req.value, "value")?,
            method_num,
            params: payload,
            gas_limit: req.gas.map(|g| g.0).unwrap_or(BLOCK_GAS_LIMIT),
            gas_fee_cap: amount(req.max_fee_per_gas.or(req.gas_price), "maxFeePerGas")?,
            gas_premium: amount(req.max_priority_fee_per_gas, "maxPriorityFeePerGas")?,
        })
    }

    /// Gas the call needs. Simulation failures come back as
    /// `GasEstimationFailed`, whose message starts with the estimation
    /// prefix regardless of where in execution the failure happened.
    pub async fn estimate_gas(&self, req: &CallRequest, tipset: Option<&TipSetKey>) -> EthResult<u64> {
        let msg = self.build_message(req).await?;
        match self.state.estimate_message_gas(&msg, tipset).await {
            Ok(gas) => {
                debug!(gas, method = msg.method_num, "estimated gas");
                Ok(gas)
            }
            Err(UpstreamError::Unavailable(reason)) => Err(EthError::UpstreamUnavailable(reason)),
            Err(err @ UpstreamError::ExecutionFailed { .. })
            | Err(err @ UpstreamError::Rejected(_)) => {
                Err(EthError::GasEstimationFailed(err.to_string()))
            }
        }
    }

    /// Read-only call; returns the actor's return data.
    pub async fn call(&self, req: &CallRequest, tipset: Option<&TipSetKey>) -> EthResult<Vec<u8>> {
        let msg = self.build_message(req).await?;
        let result = self.state.call(&msg, tipset).await?;
        if result.receipt.exit_code.is_success() {
            return Ok(result.receipt.return_data);
        }
        Err(EthError::ExecutionReverted {
            reason: result
                .error
                .unwrap_or_else(|| format!("exit {}", result.receipt.exit_code.0)),
            data: result.receipt.return_data,
        })
    }
}
