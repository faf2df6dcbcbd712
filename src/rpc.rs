// src/rpc.rs
use std::sync::Arc;

use ethers::types::{Address, U256};
use jsonrpsee::core::{async_trait, RpcResult};
use jsonrpsee::proc_macros::rpc;
use jsonrpsee::types::error::ErrorObject;
use jsonrpsee::RpcModule;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::RelayError;
use crate::relay::Relay;
use crate::types::RelayReceipt;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawRequest {
    pub user: String,
    pub amount: U256,
    pub destination: Address,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRequest {
    pub prize_id: u64,
    pub user: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributeRequest {
    pub prize_ids: Vec<u64>,
}

// Define the RPC interface
#[rpc(server, namespace = "relay")]
pub trait RelayRpc {
    /// Withdraws off-chain balance to an on-chain address via a sponsored
    /// user operation.
    #[method(name = "withdraw")]
    async fn withdraw(&self, request: WithdrawRequest) -> RpcResult<RelayReceipt>;

    /// Pays an unclaimed prize out to its winner.
    #[method(name = "claimPrize")]
    async fn claim_prize(&self, request: ClaimRequest) -> RpcResult<RelayReceipt>;

    /// Pays a batch of unclaimed prizes in one operation.
    #[method(name = "distributePrizes")]
    async fn distribute_prizes(&self, request: DistributeRequest) -> RpcResult<RelayReceipt>;
}

pub struct RelayRpcImpl {
    relay: Arc<Relay>,
}

impl RelayRpcImpl {
    pub fn new(relay: Arc<Relay>) -> Self {
        Self { relay }
    }
}

fn to_rpc_error(err: RelayError) -> ErrorObject<'static> {
    let code = match &err {
        RelayError::Validation(_) => -32001,
        RelayError::InsufficientFunds => -32002,
        RelayError::InsufficientPoolBalance => -32003,
        RelayError::Encoding(_) => -32004,
        RelayError::SponsorshipDenied(_) => -32010,
        RelayError::BundlerRejected(_) => -32011,
        RelayError::ConfirmationTimeout { .. } => -32012,
        RelayError::OnChainRevert { .. } => -32013,
        RelayError::Provider(_) => -32014,
        RelayError::Ledger(_) => -32015,
    };
    ErrorObject::owned(code, err.to_string(), None::<()>)
}

#[async_trait]
impl RelayRpcServer for RelayRpcImpl {
    async fn withdraw(&self, request: WithdrawRequest) -> RpcResult<RelayReceipt> {
        debug!(user = %request.user, amount = %request.amount, "withdraw request");
        self.relay
            .withdraw(&request.user, request.amount, request.destination)
            .await
            .map_err(|e| {
                warn!(user = %request.user, error = %e, "withdraw failed");
                to_rpc_error(e)
            })
    }

    async fn claim_prize(&self, request: ClaimRequest) -> RpcResult<RelayReceipt> {
        debug!(prize_id = request.prize_id, user = %request.user, "claim request");
        self.relay
            .claim_prize(request.prize_id, &request.user)
            .await
            .map_err(|e| {
                warn!(prize_id = request.prize_id, error = %e, "claim failed");
                to_rpc_error(e)
            })
    }

    async fn distribute_prizes(&self, request: DistributeRequest) -> RpcResult<RelayReceipt> {
        debug!(prizes = request.prize_ids.len(), "distribution request");
        self.relay
            .distribute_prizes(&request.prize_ids)
            .await
            .map_err(|e| {
                warn!(error = %e, "distribution failed");
                to_rpc_error(e)
            })
    }
}

pub fn register_methods(module: &mut RpcModule<RelayRpcImpl>) -> anyhow::Result<()> {
    module.register_async_method("relay_withdraw", |params, context| async move {
        let request = params.parse::<WithdrawRequest>()?;
        context.withdraw(request).await
    })?;

    module.register_async_method("relay_claimPrize", |params, context| async move {
        let request = params.parse::<ClaimRequest>()?;
        context.claim_prize(request).await
    })?;

    module.register_async_method("relay_distributePrizes", |params, context| async move {
        let request = params.parse::<DistributeRequest>()?;
        context.distribute_prizes(request).await
    })?;

    Ok(())
}
