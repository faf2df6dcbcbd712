// src/types.rs
use ethers::types::{Address, Bytes, H256, U256};
use serde::{Deserialize, Serialize};

/// ERC-4337 v0.6 user operation, serialized in the camelCase wire form the
/// paymaster and bundler endpoints expect.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperation {
    pub sender: Address,
    pub nonce: U256,
    pub init_code: Bytes,
    pub call_data: Bytes,
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    pub paymaster_and_data: Bytes,
    pub signature: Bytes,
}

/// One `(destination, payload)` pair of the batch the smart account executes.
#[derive(Debug, Clone)]
pub struct Call {
    pub to: Address,
    pub data: Bytes,
}

/// Sponsorship payload returned by `pm_sponsorUserOperation`. Gas fields are
/// optional; when present they supersede the draft's estimates and the
/// operation must be re-signed afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sponsorship {
    pub paymaster_and_data: Bytes,
    #[serde(default)]
    pub call_gas_limit: Option<U256>,
    #[serde(default)]
    pub verification_gas_limit: Option<U256>,
    #[serde(default)]
    pub pre_verification_gas: Option<U256>,
}

impl Sponsorship {
    /// Overwrites the draft with the paymaster-refined fields. Invalidates
    /// any existing signature on the draft.
    pub fn apply_to(&self, op: &mut UserOperation) {
        op.paymaster_and_data = self.paymaster_and_data.clone();
        if let Some(gas) = self.call_gas_limit {
            op.call_gas_limit = gas;
        }
        if let Some(gas) = self.verification_gas_limit {
            op.verification_gas_limit = gas;
        }
        if let Some(gas) = self.pre_verification_gas {
            op.pre_verification_gas = gas;
        }
        op.signature = Bytes::default();
    }
}

/// Confirmed outcome extracted from a bundler receipt.
#[derive(Debug, Clone)]
pub struct OpReceipt {
    pub tx_hash: H256,
}

/// Network fee estimate before the relay's upward buffer is applied.
#[derive(Debug, Clone, Copy)]
pub struct FeeEstimate {
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
}

/// Caller-facing result of a confirmed relay attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayReceipt {
    pub success: bool,
    pub tx_hash: H256,
    pub net_amount: U256,
    pub fee: U256,
}
