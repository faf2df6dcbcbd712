// src/bundler.rs
use std::time::Duration;

use async_trait::async_trait;
use ethers::providers::{Http, Provider};
use ethers::types::{Address, H256};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::RelayError;
use crate::types::{OpReceipt, UserOperation};

/// Submission and confirmation seam against the bundler service.
#[async_trait]
pub trait BundlerClient: Send + Sync {
    /// Submits a fully signed operation; returns the user-operation hash the
    /// bundler tracks it under.
    async fn submit(&self, op: &UserOperation) -> Result<H256, RelayError>;

    /// Polls for the receipt until confirmed or the attempt bound runs out.
    /// `ConfirmationTimeout` means the outcome is unknown, not failed.
    async fn wait_for_receipt(&self, user_op_hash: H256) -> Result<OpReceipt, RelayError>;
}

/// Bundlers disagree on how they encode a receipt's success flag; accept the
/// encodings seen in the wild and treat anything unrecognized as a revert.
fn receipt_success(flag: Option<&Value>) -> bool {
    match flag {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s == "0x1" || s == "1" || s.eq_ignore_ascii_case("true"),
        Some(Value::Number(n)) => n.as_u64() == Some(1),
        _ => false,
    }
}

/// The enclosing transaction hash lives either at the top level or inside a
/// nested `receipt` object, depending on the bundler.
fn receipt_tx_hash(receipt: &Value) -> Result<H256, RelayError> {
    let raw = receipt
        .get("receipt")
        .and_then(|inner| inner.get("transactionHash"))
        .or_else(|| receipt.get("transactionHash"))
        .and_then(Value::as_str)
        .ok_or_else(|| {
            RelayError::BundlerRejected("receipt carries no transaction hash".to_string())
        })?;
    raw.parse::<H256>()
        .map_err(|e| RelayError::BundlerRejected(format!("malformed transaction hash: {e}")))
}

fn parse_receipt(receipt: &Value) -> Result<OpReceipt, RelayError> {
    let tx_hash = receipt_tx_hash(receipt)?;
    if receipt_success(receipt.get("success")) {
        Ok(OpReceipt { tx_hash })
    } else {
        Err(RelayError::OnChainRevert { tx_hash })
    }
}

/// JSON-RPC client for the bundler endpoint.
pub struct HttpBundlerClient {
    provider: Provider<Http>,
    entry_point: Address,
    poll_interval: Duration,
    poll_attempts: u32,
    request_timeout: Duration,
}

impl HttpBundlerClient {
    pub fn new(
        endpoint: &str,
        entry_point: Address,
        poll_interval: Duration,
        poll_attempts: u32,
        request_timeout: Duration,
    ) -> Result<Self, RelayError> {
        let provider = Provider::<Http>::try_from(endpoint)
            .map_err(|e| RelayError::Provider(format!("invalid bundler endpoint: {e}")))?;
        Ok(Self {
            provider,
            entry_point,
            poll_interval,
            poll_attempts,
            request_timeout,
        })
    }
}

#[async_trait]
impl BundlerClient for HttpBundlerClient {
    async fn submit(&self, op: &UserOperation) -> Result<H256, RelayError> {
        let request = self
            .provider
            .request::<_, H256>("eth_sendUserOperation", (op, self.entry_point));
        let user_op_hash = tokio::time::timeout(self.request_timeout, request)
            .await
            .map_err(|_| RelayError::BundlerRejected("submission timed out".to_string()))?
            .map_err(|e| RelayError::BundlerRejected(e.to_string()))?;

        debug!(user_op_hash = %format!("{user_op_hash:#x}"), "user operation submitted");
        Ok(user_op_hash)
    }

    async fn wait_for_receipt(&self, user_op_hash: H256) -> Result<OpReceipt, RelayError> {
        // Bounded fixed-interval loop. Cancel-safe: if the caller goes away
        // mid-poll the ledger row stays pending for manual reconciliation,
        // never a blind rollback.
        for attempt in 1..=self.poll_attempts {
            let request = self
                .provider
                .request::<_, Option<Value>>("eth_getUserOperationReceipt", [user_op_hash]);
            match tokio::time::timeout(self.request_timeout, request).await {
                Ok(Ok(Some(receipt))) => return parse_receipt(&receipt),
                Ok(Ok(None)) => {
                    debug!(attempt, "receipt not yet available");
                }
                // Transient poll errors do not abort the wait; the bound is
                // the attempt counter.
                Ok(Err(e)) => warn!(attempt, error = %e, "receipt poll failed"),
                Err(_) => warn!(attempt, "receipt poll timed out"),
            }
            // No trailing sleep: the bound is interval * attempts, not one
            // interval more.
            if attempt < self.poll_attempts {
                tokio::time::sleep(self.poll_interval).await;
            }
        }
        Err(RelayError::ConfirmationTimeout { user_op_hash })
    }
}
