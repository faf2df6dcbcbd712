// src/config.rs
use std::time::Duration;

use ethers::types::{Address, U256};

/// Environment-provided constants shared by every relay flow. The operator
/// signing key is deliberately not part of this struct; it lives only inside
/// the signing engine.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub chain_id: u64,
    /// Canonical ERC-4337 entry point the bundler verifies against.
    pub entry_point: Address,
    /// Backend-controlled smart account used as the sender of every relayed
    /// operation.
    pub account: Address,
    /// ERC-20 token (USDC-equivalent) moved by withdrawals and prizes.
    pub token: Address,
    pub fee_recipient: Address,
    /// Fixed fee charged on withdrawals, in token base units.
    pub withdrawal_fee: U256,
    /// Per-transaction cap on the requested amount, in token base units.
    pub max_amount: U256,
    pub poll_interval: Duration,
    pub poll_attempts: u32,
    /// Timeout applied to each individual paymaster/bundler network call.
    pub request_timeout: Duration,
}

impl RelayConfig {
    /// Effective upper bound on the confirmation wait.
    pub fn confirmation_bound(&self) -> Duration {
        self.poll_interval * self.poll_attempts
    }
}
