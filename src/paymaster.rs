// src/paymaster.rs
use std::time::Duration;

use async_trait::async_trait;
use ethers::providers::{Http, Provider};
use ethers::types::Address;
use tracing::{debug, warn};

use crate::error::RelayError;
use crate::types::{Sponsorship, UserOperation};

/// Gas sponsorship seam. One request per relay attempt, no retries at this
/// layer; a retried attempt re-drafts and re-signs from scratch.
#[async_trait]
pub trait SponsorClient: Send + Sync {
    async fn sponsor_user_operation(
        &self,
        op: &UserOperation,
    ) -> Result<Sponsorship, RelayError>;
}

/// JSON-RPC client for the external paymaster service.
pub struct HttpPaymasterClient {
    provider: Provider<Http>,
    entry_point: Address,
    request_timeout: Duration,
}

impl HttpPaymasterClient {
    pub fn new(
        endpoint: &str,
        entry_point: Address,
        request_timeout: Duration,
    ) -> Result<Self, RelayError> {
        let provider = Provider::<Http>::try_from(endpoint)
            .map_err(|e| RelayError::Provider(format!("invalid paymaster endpoint: {e}")))?;
        Ok(Self {
            provider,
            entry_point,
            request_timeout,
        })
    }
}

#[async_trait]
impl SponsorClient for HttpPaymasterClient {
    async fn sponsor_user_operation(
        &self,
        op: &UserOperation,
    ) -> Result<Sponsorship, RelayError> {
        debug!(sender = %op.sender, nonce = %op.nonce, "requesting sponsorship");

        let request = self
            .provider
            .request::<_, Sponsorship>("pm_sponsorUserOperation", (op, self.entry_point));
        let sponsorship = tokio::time::timeout(self.request_timeout, request)
            .await
            .map_err(|_| {
                warn!("paymaster request timed out");
                RelayError::SponsorshipDenied("paymaster request timed out".to_string())
            })?
            .map_err(|e| RelayError::SponsorshipDenied(e.to_string()))?;

        if sponsorship.paymaster_and_data.is_empty() {
            return Err(RelayError::SponsorshipDenied(
                "paymaster returned empty paymasterAndData".to_string(),
            ));
        }
        Ok(sponsorship)
    }
}
