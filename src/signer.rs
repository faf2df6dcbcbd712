// src/signer.rs
use ethers::abi::{self, Token};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::keccak256;

use crate::error::RelayError;
use crate::types::UserOperation;

/// Canonical ERC-4337 v0.6 digest of a user operation, scoped to the entry
/// point and chain. Every field participates, so any mutation after signing
/// (gas limits included) invalidates the signature.
pub fn user_op_hash(op: &UserOperation, entry_point: Address, chain_id: u64) -> H256 {
    let packed = abi::encode(&[
        Token::Address(op.sender),
        Token::Uint(op.nonce),
        Token::FixedBytes(keccak256(&op.init_code).to_vec()),
        Token::FixedBytes(keccak256(&op.call_data).to_vec()),
        Token::Uint(op.call_gas_limit),
        Token::Uint(op.verification_gas_limit),
        Token::Uint(op.pre_verification_gas),
        Token::Uint(op.max_fee_per_gas),
        Token::Uint(op.max_priority_fee_per_gas),
        Token::FixedBytes(keccak256(&op.paymaster_and_data).to_vec()),
    ]);
    let scoped = abi::encode(&[
        Token::FixedBytes(keccak256(packed).to_vec()),
        Token::Address(entry_point),
        Token::Uint(U256::from(chain_id)),
    ]);
    H256::from(keccak256(scoped))
}

/// Holds the custodial operator key. The wallet never leaves this struct and
/// is never logged or serialized; only signatures come out.
pub struct OpSigner {
    wallet: LocalWallet,
    entry_point: Address,
    chain_id: u64,
}

impl OpSigner {
    pub fn new(wallet: LocalWallet, entry_point: Address, chain_id: u64) -> Self {
        let wallet = wallet.with_chain_id(chain_id);
        Self {
            wallet,
            entry_point,
            chain_id,
        }
    }

    pub fn operator_address(&self) -> Address {
        self.wallet.address()
    }

    pub fn hash(&self, op: &UserOperation) -> H256 {
        user_op_hash(op, self.entry_point, self.chain_id)
    }

    /// EIP-191 signature over the canonical hash. Must only be called once
    /// paymaster and gas fields are final; an earlier estimation-time
    /// signature must be discarded, never submitted.
    pub async fn sign(&self, op: &UserOperation) -> Result<Bytes, RelayError> {
        let hash = self.hash(op);
        let signature = self
            .wallet
            .sign_message(hash.as_bytes())
            .await
            .map_err(|e| RelayError::Provider(format!("signing failed: {e}")))?;
        Ok(Bytes::from(signature.to_vec()))
    }
}
