// src/chain.rs
use std::sync::Arc;

use async_trait::async_trait;
use ethers::abi::{self, Token};
use ethers::providers::{Http, Middleware, Provider};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionRequest, U256};

use crate::encoder::selector;
use crate::error::RelayError;
use crate::types::FeeEstimate;

/// Read-only chain access the relay depends on. Never used to submit
/// transactions; submission always goes through the bundler.
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Current nonce of the backend account, read live from the entry point.
    async fn account_nonce(&self) -> Result<U256, RelayError>;
    /// Current EIP-1559 fee suggestion, without the relay's buffer.
    async fn fee_estimate(&self) -> Result<FeeEstimate, RelayError>;
    /// Token balance held by the backend account.
    async fn pool_balance(&self) -> Result<U256, RelayError>;
}

pub struct EthChainReader {
    provider: Arc<Provider<Http>>,
    entry_point: Address,
    account: Address,
    token: Address,
}

impl EthChainReader {
    pub fn new(
        provider: Arc<Provider<Http>>,
        entry_point: Address,
        account: Address,
        token: Address,
    ) -> Self {
        Self {
            provider,
            entry_point,
            account,
            token,
        }
    }

    async fn read_word(&self, to: Address, call_data: Bytes) -> Result<U256, RelayError> {
        let tx: TypedTransaction = TransactionRequest::new().to(to).data(call_data).into();
        let out = self
            .provider
            .call(&tx, None)
            .await
            .map_err(|e| RelayError::Provider(e.to_string()))?;
        if out.len() < 32 {
            return Err(RelayError::Provider(format!(
                "eth_call to {to:#x} returned {} bytes, expected a 32-byte word",
                out.len()
            )));
        }
        Ok(U256::from_big_endian(&out[..32]))
    }
}

#[async_trait]
impl ChainReader for EthChainReader {
    async fn account_nonce(&self) -> Result<U256, RelayError> {
        // EntryPoint.getNonce(sender, key) with the default key 0.
        let mut call_data = selector("getNonce(address,uint192)").to_vec();
        call_data.extend(abi::encode(&[
            Token::Address(self.account),
            Token::Uint(U256::zero()),
        ]));
        self.read_word(self.entry_point, Bytes::from(call_data))
            .await
    }

    async fn fee_estimate(&self) -> Result<FeeEstimate, RelayError> {
        let (max_fee_per_gas, max_priority_fee_per_gas) = self
            .provider
            .estimate_eip1559_fees(None)
            .await
            .map_err(|e| RelayError::Provider(e.to_string()))?;
        Ok(FeeEstimate {
            max_fee_per_gas,
            max_priority_fee_per_gas,
        })
    }

    async fn pool_balance(&self) -> Result<U256, RelayError> {
        let mut call_data = selector("balanceOf(address)").to_vec();
        call_data.extend(abi::encode(&[Token::Address(self.account)]));
        self.read_word(self.token, Bytes::from(call_data)).await
    }
}
