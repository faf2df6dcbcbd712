// src/error.rs
use ethers::types::H256;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Insufficient ledger balance")]
    InsufficientFunds,

    #[error("Insufficient on-chain pool balance to cover the transfer")]
    InsufficientPoolBalance,

    #[error("Failed to encode user operation: {0}")]
    Encoding(String),

    #[error("Paymaster refused sponsorship: {0}")]
    SponsorshipDenied(String),

    #[error("Bundler rejected user operation: {0}")]
    BundlerRejected(String),

    /// The receipt never arrived within the poll bound. The on-chain outcome
    /// is unknown: the operation may still land, so the pending ledger row
    /// must NOT be rolled back automatically.
    #[error("No receipt for user operation {user_op_hash:#x} within the poll bound")]
    ConfirmationTimeout { user_op_hash: H256 },

    #[error("User operation reverted on-chain in transaction {tx_hash:#x}")]
    OnChainRevert { tx_hash: H256 },

    #[error("Ethereum provider error: {0}")]
    Provider(String),

    #[error("Ledger error: {0}")]
    Ledger(String),
}

impl RelayError {
    /// True for the failures that leave the debited amount in an ambiguous
    /// state and therefore must skip the automatic rollback.
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, RelayError::ConfirmationTimeout { .. })
    }
}
