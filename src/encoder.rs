// src/encoder.rs
use std::sync::Arc;

use ethers::abi::{self, Token};
use ethers::types::{Address, Bytes, U256};
use ethers::utils::keccak256;
use tracing::debug;

use crate::chain::ChainReader;
use crate::error::RelayError;
use crate::types::{Call, FeeEstimate, UserOperation};

// Draft gas budgets; the paymaster refines them during sponsorship.
const DEFAULT_CALL_GAS: u64 = 400_000;
const DEFAULT_VERIFICATION_GAS: u64 = 150_000;
const DEFAULT_PRE_VERIFICATION_GAS: u64 = 50_000;

/// Upward buffer on the network fee suggestion, in percent. Keeps operations
/// from getting stuck when the base fee moves between estimation and
/// inclusion.
const FEE_BUFFER_PERCENT: u64 = 20;

/// First four bytes of the keccak-256 of a canonical function signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Calldata for `ERC20.transfer(to, amount)`.
pub fn erc20_transfer(to: Address, amount: U256) -> Bytes {
    let mut data = selector("transfer(address,uint256)").to_vec();
    data.extend(abi::encode(&[Token::Address(to), Token::Uint(amount)]));
    Bytes::from(data)
}

/// Calldata for the smart account's `executeBatch(address[],bytes[])` entry
/// point, carrying one sub-call per `(destination, payload)` pair.
pub fn batch_call_data(calls: &[Call]) -> Result<Bytes, RelayError> {
    if calls.is_empty() {
        return Err(RelayError::Encoding("empty call list".to_string()));
    }
    let mut destinations = Vec::with_capacity(calls.len());
    let mut payloads = Vec::with_capacity(calls.len());
    for call in calls {
        if call.to == Address::zero() {
            return Err(RelayError::Encoding(
                "zero destination address in call batch".to_string(),
            ));
        }
        destinations.push(Token::Address(call.to));
        payloads.push(Token::Bytes(call.data.to_vec()));
    }

    let mut data = selector("executeBatch(address[],bytes[])").to_vec();
    data.extend(abi::encode(&[
        Token::Array(destinations),
        Token::Array(payloads),
    ]));
    Ok(Bytes::from(data))
}

/// Applies the fixed upward buffer to a suggested fee.
pub fn buffer_fee(suggested: U256) -> U256 {
    suggested * U256::from(100 + FEE_BUFFER_PERCENT) / U256::from(100)
}

/// Builds draft user operations for the backend account. The nonce is read
/// live from the entry point on every draft; it is never cached, so callers
/// retrying a failed attempt automatically pick up fresh chain state.
pub struct OpEncoder {
    chain: Arc<dyn ChainReader>,
    sender: Address,
}

impl OpEncoder {
    pub fn new(chain: Arc<dyn ChainReader>, sender: Address) -> Self {
        Self { chain, sender }
    }

    pub async fn build_draft(&self, calls: &[Call]) -> Result<UserOperation, RelayError> {
        let call_data = batch_call_data(calls)?;
        let nonce = self.chain.account_nonce().await?;
        let FeeEstimate {
            max_fee_per_gas,
            max_priority_fee_per_gas,
        } = self.chain.fee_estimate().await?;

        debug!(nonce = %nonce, calls = calls.len(), "built draft user operation");

        Ok(UserOperation {
            sender: self.sender,
            nonce,
            // Account is pre-deployed, so no init code ever.
            init_code: Bytes::default(),
            call_data,
            call_gas_limit: U256::from(DEFAULT_CALL_GAS),
            verification_gas_limit: U256::from(DEFAULT_VERIFICATION_GAS),
            pre_verification_gas: U256::from(DEFAULT_PRE_VERIFICATION_GAS),
            max_fee_per_gas: buffer_fee(max_fee_per_gas),
            max_priority_fee_per_gas: buffer_fee(max_priority_fee_per_gas),
            paymaster_and_data: Bytes::default(),
            signature: Bytes::default(),
        })
    }
}
