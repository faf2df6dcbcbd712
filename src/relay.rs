// src/relay.rs
use std::collections::HashSet;
use std::sync::Arc;

use ethers::types::{Address, H256, U256};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::bundler::BundlerClient;
use crate::chain::ChainReader;
use crate::config::RelayConfig;
use crate::encoder::{erc20_transfer, OpEncoder};
use crate::error::RelayError;
use crate::ledger::{Ledger, LedgerTransaction};
use crate::paymaster::SponsorClient;
use crate::signer::OpSigner;
use crate::types::{Call, RelayReceipt};

/// Ledger account the prize pool is debited from during claims and
/// distributions.
pub const PRIZE_POOL_ACCOUNT: &str = "prize-pool";

/// Per-use-case driver composing encoder, signer, paymaster, bundler and
/// ledger into one externally visible outcome.
pub struct Relay {
    config: Arc<RelayConfig>,
    chain: Arc<dyn ChainReader>,
    encoder: OpEncoder,
    signer: OpSigner,
    paymaster: Arc<dyn SponsorClient>,
    bundler: Arc<dyn BundlerClient>,
    ledger: Arc<dyn Ledger>,
    /// Serializes the nonce-fetch-to-confirmation window. The account nonce
    /// is read fresh from chain state with no reservation, so overlapping
    /// attempts for the single backend account would race to the same nonce.
    submission_lock: Mutex<()>,
}

impl Relay {
    pub fn new(
        config: Arc<RelayConfig>,
        chain: Arc<dyn ChainReader>,
        signer: OpSigner,
        paymaster: Arc<dyn SponsorClient>,
        bundler: Arc<dyn BundlerClient>,
        ledger: Arc<dyn Ledger>,
    ) -> Self {
        let encoder = OpEncoder::new(chain.clone(), config.account);
        Self {
            config,
            chain,
            encoder,
            signer,
            paymaster,
            bundler,
            ledger,
            submission_lock: Mutex::new(()),
        }
    }

    /// Withdraws `amount` of the user's off-chain balance to `destination`:
    /// net amount to the user, the fixed fee to the fee recipient.
    pub async fn withdraw(
        &self,
        user: &str,
        amount: U256,
        destination: Address,
    ) -> Result<RelayReceipt, RelayError> {
        let fee = self.config.withdrawal_fee;
        if destination == Address::zero() {
            return Err(RelayError::Validation(
                "destination address must not be zero".to_string(),
            ));
        }
        if amount <= fee {
            return Err(RelayError::Validation(
                "amount must exceed the withdrawal fee".to_string(),
            ));
        }
        if amount > self.config.max_amount {
            return Err(RelayError::Validation(
                "amount exceeds the per-transaction maximum".to_string(),
            ));
        }
        self.check_pool(amount).await?;

        let tx = self.ledger.pre_debit(user, amount, fee, destination).await?;
        let calls = vec![
            Call {
                to: self.config.token,
                data: erc20_transfer(destination, tx.net_amount),
            },
            Call {
                to: self.config.token,
                data: erc20_transfer(self.config.fee_recipient, fee),
            },
        ];
        self.finish("withdrawal", user, &tx, calls).await
    }

    /// Sends an unclaimed prize to its winner's wallet, debiting the prize
    /// pool. No fee on claims.
    pub async fn claim_prize(&self, prize_id: u64, user: &str) -> Result<RelayReceipt, RelayError> {
        let prize = self
            .ledger
            .prize(prize_id)
            .await
            .ok_or_else(|| RelayError::Validation(format!("unknown prize {prize_id}")))?;
        if prize.winner != user {
            return Err(RelayError::Validation(
                "prize does not belong to this user".to_string(),
            ));
        }
        if prize.claimed {
            return Err(RelayError::Validation("prize already claimed".to_string()));
        }
        if prize.wallet == Address::zero() {
            return Err(RelayError::Validation(
                "winner has no wallet address on file".to_string(),
            ));
        }
        self.check_pool(prize.amount).await?;

        // Atomic acquisition: the claimed flag flips before any money moves,
        // so a concurrent claim of the same prize fails here instead of
        // being paid a second time.
        let prize = self.ledger.try_claim(prize_id).await?;
        let tx = match self
            .ledger
            .pre_debit(PRIZE_POOL_ACCOUNT, prize.amount, U256::zero(), prize.wallet)
            .await
        {
            Ok(tx) => tx,
            Err(err) => {
                self.release_claims(&[prize_id]).await;
                return Err(err);
            }
        };
        let calls = vec![Call {
            to: self.config.token,
            data: erc20_transfer(prize.wallet, prize.amount),
        }];
        match self.finish("claim", user, &tx, calls).await {
            Ok(receipt) => Ok(receipt),
            Err(err) => {
                // An ambiguous outcome keeps the claim held along with the
                // pending debit; releasing it while the operation may still
                // land would pay twice.
                if !err.is_ambiguous() {
                    self.release_claims(&[prize_id]).await;
                }
                Err(err)
            }
        }
    }

    /// Pays out a set of unclaimed prizes in one batched operation, debiting
    /// the prize pool by the total.
    pub async fn distribute_prizes(&self, prize_ids: &[u64]) -> Result<RelayReceipt, RelayError> {
        if prize_ids.is_empty() {
            return Err(RelayError::Validation("no prizes to distribute".to_string()));
        }

        let mut seen = HashSet::with_capacity(prize_ids.len());
        for &prize_id in prize_ids {
            if !seen.insert(prize_id) {
                return Err(RelayError::Validation(format!(
                    "duplicate prize {prize_id} in distribution"
                )));
            }
            let prize = self
                .ledger
                .prize(prize_id)
                .await
                .ok_or_else(|| RelayError::Validation(format!("unknown prize {prize_id}")))?;
            if prize.claimed {
                return Err(RelayError::Validation(format!(
                    "prize {prize_id} already claimed"
                )));
            }
            if prize.wallet == Address::zero() {
                return Err(RelayError::Validation(format!(
                    "winner of prize {prize_id} has no wallet address on file"
                )));
            }
        }

        // Acquire every claim before any money moves, backing out the ones
        // already taken if one fails.
        let mut prizes = Vec::with_capacity(prize_ids.len());
        let mut acquired = Vec::with_capacity(prize_ids.len());
        let mut total = U256::zero();
        for &prize_id in prize_ids {
            match self.ledger.try_claim(prize_id).await {
                Ok(prize) => {
                    total += prize.amount;
                    acquired.push(prize_id);
                    prizes.push(prize);
                }
                Err(err) => {
                    self.release_claims(&acquired).await;
                    return Err(err);
                }
            }
        }
        if let Err(err) = self.check_pool(total).await {
            self.release_claims(&acquired).await;
            return Err(err);
        }

        // A batch has no single destination, so the record carries the zero
        // address; the per-winner targets live in the call data.
        let tx = match self
            .ledger
            .pre_debit(PRIZE_POOL_ACCOUNT, total, U256::zero(), Address::zero())
            .await
        {
            Ok(tx) => tx,
            Err(err) => {
                self.release_claims(&acquired).await;
                return Err(err);
            }
        };
        let calls = prizes
            .iter()
            .map(|prize| Call {
                to: self.config.token,
                data: erc20_transfer(prize.wallet, prize.amount),
            })
            .collect();
        match self.finish("distribution", PRIZE_POOL_ACCOUNT, &tx, calls).await {
            Ok(receipt) => Ok(receipt),
            Err(err) => {
                if !err.is_ambiguous() {
                    self.release_claims(&acquired).await;
                }
                Err(err)
            }
        }
    }

    async fn release_claims(&self, prize_ids: &[u64]) {
        for &prize_id in prize_ids {
            if let Err(err) = self.ledger.release_claim(prize_id).await {
                error!(prize_id, error = %err, "failed to release claim");
            }
        }
    }

    async fn check_pool(&self, required: U256) -> Result<(), RelayError> {
        let balance = self.chain.pool_balance().await?;
        if balance < required {
            return Err(RelayError::InsufficientPoolBalance);
        }
        Ok(())
    }

    /// Post-debit pipeline: encode, sponsor, final-sign, submit, confirm.
    async fn execute(&self, calls: &[Call]) -> Result<H256, RelayError> {
        let _guard = self.submission_lock.lock().await;
        let mut op = self.encoder.build_draft(calls).await?;
        let sponsorship = self.paymaster.sponsor_user_operation(&op).await?;
        sponsorship.apply_to(&mut op);
        // Signed only now, over the paymaster-refined fields; any earlier
        // signature would no longer verify.
        op.signature = self.signer.sign(&op).await?;
        let user_op_hash = self.bundler.submit(&op).await?;
        let receipt = self.bundler.wait_for_receipt(user_op_hash).await?;
        Ok(receipt.tx_hash)
    }

    async fn finish(
        &self,
        flow: &str,
        user: &str,
        tx: &LedgerTransaction,
        calls: Vec<Call>,
    ) -> Result<RelayReceipt, RelayError> {
        match self.execute(&calls).await {
            Ok(tx_hash) => {
                self.ledger.commit(tx.id, tx_hash).await?;
                info!(
                    flow,
                    user,
                    tx_id = tx.id,
                    tx_hash = %format!("{tx_hash:#x}"),
                    "relay confirmed"
                );
                Ok(RelayReceipt {
                    success: true,
                    tx_hash,
                    net_amount: tx.net_amount,
                    fee: tx.fee_amount,
                })
            }
            Err(err) if err.is_ambiguous() => {
                // Unknown on-chain outcome: the operation may still land, so
                // rolling back here could double-spend. Leave the row pending
                // for manual reconciliation.
                error!(
                    flow,
                    user,
                    tx_id = tx.id,
                    error = %err,
                    "confirmation timed out; ledger row left pending for manual reconciliation"
                );
                Err(err)
            }
            Err(err) => {
                if let Err(rollback_err) = self.ledger.rollback(tx.id).await {
                    error!(flow, tx_id = tx.id, error = %rollback_err, "rollback failed");
                }
                warn!(flow, user, tx_id = tx.id, error = %err, "relay attempt reverted");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use ethers::signers::LocalWallet;
    use ethers::types::Bytes;

    use crate::ledger::{MemoryLedger, PrizeRecord, TxStatus};
    use crate::types::{FeeEstimate, OpReceipt, Sponsorship, UserOperation};

    const DOLLAR: u64 = 1_000_000;

    struct FakeChain {
        pool: U256,
    }

    #[async_trait]
    impl ChainReader for FakeChain {
        async fn account_nonce(&self) -> Result<U256, RelayError> {
            Ok(U256::from(5))
        }

        async fn fee_estimate(&self) -> Result<FeeEstimate, RelayError> {
            Ok(FeeEstimate {
                max_fee_per_gas: U256::from(1_000_000_000u64),
                max_priority_fee_per_gas: U256::from(100_000_000u64),
            })
        }

        async fn pool_balance(&self) -> Result<U256, RelayError> {
            Ok(self.pool)
        }
    }

    struct FakeSponsor {
        deny: bool,
    }

    #[async_trait]
    impl SponsorClient for FakeSponsor {
        async fn sponsor_user_operation(
            &self,
            _op: &UserOperation,
        ) -> Result<Sponsorship, RelayError> {
            if self.deny {
                return Err(RelayError::SponsorshipDenied(
                    "policy rejected sender".to_string(),
                ));
            }
            Ok(Sponsorship {
                paymaster_and_data: Bytes::from(vec![0x01; 20]),
                call_gas_limit: Some(U256::from(250_000)),
                verification_gas_limit: None,
                pre_verification_gas: None,
            })
        }
    }

    #[derive(Clone, Copy)]
    enum Outcome {
        Confirm,
        Reject,
        Revert,
        Timeout,
    }

    struct FakeBundler {
        outcome: Outcome,
    }

    const USER_OP_HASH: H256 = H256::repeat_byte(0x11);
    const TX_HASH: H256 = H256::repeat_byte(0x22);

    #[async_trait]
    impl BundlerClient for FakeBundler {
        async fn submit(&self, op: &UserOperation) -> Result<H256, RelayError> {
            assert!(!op.signature.is_empty(), "submitted an unsigned operation");
            assert!(
                !op.paymaster_and_data.is_empty(),
                "submitted without sponsorship"
            );
            match self.outcome {
                Outcome::Reject => Err(RelayError::BundlerRejected(
                    "AA24 signature error".to_string(),
                )),
                _ => Ok(USER_OP_HASH),
            }
        }

        async fn wait_for_receipt(&self, user_op_hash: H256) -> Result<OpReceipt, RelayError> {
            match self.outcome {
                Outcome::Confirm => Ok(OpReceipt { tx_hash: TX_HASH }),
                Outcome::Revert => Err(RelayError::OnChainRevert { tx_hash: TX_HASH }),
                Outcome::Timeout => Err(RelayError::ConfirmationTimeout { user_op_hash }),
                Outcome::Reject => unreachable!("rejected at submission"),
            }
        }
    }

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    fn config() -> Arc<RelayConfig> {
        Arc::new(RelayConfig {
            chain_id: 8453,
            entry_point: addr(0xe1),
            account: addr(0xac),
            token: addr(0x70),
            fee_recipient: addr(0xfe),
            withdrawal_fee: U256::from(DOLLAR / 2),
            max_amount: U256::from(1_000 * DOLLAR),
            poll_interval: Duration::from_millis(1),
            poll_attempts: 3,
            request_timeout: Duration::from_secs(1),
        })
    }

    fn relay(pool: U256, deny_sponsorship: bool, outcome: Outcome, ledger: Arc<MemoryLedger>) -> Relay {
        let config = config();
        let wallet: LocalWallet =
            "0x0123456789012345678901234567890123456789012345678901234567890123"
                .parse()
                .unwrap();
        let signer = OpSigner::new(wallet, config.entry_point, config.chain_id);
        Relay::new(
            config,
            Arc::new(FakeChain { pool }),
            signer,
            Arc::new(FakeSponsor {
                deny: deny_sponsorship,
            }),
            Arc::new(FakeBundler { outcome }),
            ledger,
        )
    }

    #[tokio::test]
    async fn withdrawal_scenario_confirms_and_commits() {
        let ledger = Arc::new(MemoryLedger::new(U256::from(1_000 * DOLLAR)));
        ledger.credit("alice", U256::from(50 * DOLLAR)).await;
        let relay = relay(U256::from(100 * DOLLAR), false, Outcome::Confirm, ledger.clone());

        let receipt = relay
            .withdraw("alice", U256::from(10 * DOLLAR), addr(0xd1))
            .await
            .unwrap();

        assert!(receipt.success);
        assert_eq!(receipt.tx_hash, TX_HASH);
        assert_eq!(receipt.net_amount, U256::from(9 * DOLLAR + DOLLAR / 2));
        assert_eq!(receipt.fee, U256::from(DOLLAR / 2));
        assert_eq!(ledger.balance("alice").await, U256::from(40 * DOLLAR));

        let tx = ledger.transaction(1).await.unwrap();
        assert_eq!(tx.status, TxStatus::Completed);
        assert_eq!(tx.tx_hash, Some(TX_HASH));
    }

    #[tokio::test]
    async fn amount_equal_to_the_fee_is_rejected_before_any_debit() {
        let ledger = Arc::new(MemoryLedger::new(U256::from(1_000 * DOLLAR)));
        ledger.credit("alice", U256::from(50 * DOLLAR)).await;
        let relay = relay(U256::from(100 * DOLLAR), false, Outcome::Confirm, ledger.clone());

        let err = relay
            .withdraw("alice", U256::from(DOLLAR / 2), addr(0xd1))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Validation(_)));
        assert_eq!(ledger.balance("alice").await, U256::from(50 * DOLLAR));
        assert!(ledger.transaction(1).await.is_none());
    }

    #[tokio::test]
    async fn amount_at_the_cap_is_accepted_and_one_above_is_not() {
        let ledger = Arc::new(MemoryLedger::new(U256::from(1_000 * DOLLAR)));
        ledger.credit("alice", U256::from(5_000 * DOLLAR)).await;
        let relay = relay(
            U256::from(10_000 * DOLLAR),
            false,
            Outcome::Confirm,
            ledger.clone(),
        );

        assert!(relay
            .withdraw("alice", U256::from(1_000 * DOLLAR), addr(0xd1))
            .await
            .is_ok());
        assert!(matches!(
            relay
                .withdraw("alice", U256::from(1_000 * DOLLAR) + U256::one(), addr(0xd1))
                .await,
            Err(RelayError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn insufficient_pool_balance_fails_before_the_debit() {
        let ledger = Arc::new(MemoryLedger::new(U256::from(1_000 * DOLLAR)));
        ledger.credit("alice", U256::from(50 * DOLLAR)).await;
        let relay = relay(U256::from(5 * DOLLAR), false, Outcome::Confirm, ledger.clone());

        let err = relay
            .withdraw("alice", U256::from(10 * DOLLAR), addr(0xd1))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::InsufficientPoolBalance));
        assert_eq!(ledger.balance("alice").await, U256::from(50 * DOLLAR));
        assert!(ledger.transaction(1).await.is_none());
    }

    #[tokio::test]
    async fn paymaster_rejection_rolls_the_debit_back() {
        let ledger = Arc::new(MemoryLedger::new(U256::from(1_000 * DOLLAR)));
        ledger.credit("alice", U256::from(50 * DOLLAR)).await;
        let relay = relay(U256::from(100 * DOLLAR), true, Outcome::Confirm, ledger.clone());

        let err = relay
            .withdraw("alice", U256::from(10 * DOLLAR), addr(0xd1))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::SponsorshipDenied(_)));
        assert_eq!(ledger.balance("alice").await, U256::from(50 * DOLLAR));
        assert_eq!(
            ledger.transaction(1).await.unwrap().status,
            TxStatus::Reverted
        );
    }

    #[tokio::test]
    async fn bundler_rejection_and_on_chain_revert_roll_back() {
        for outcome in [Outcome::Reject, Outcome::Revert] {
            let ledger = Arc::new(MemoryLedger::new(U256::from(1_000 * DOLLAR)));
            ledger.credit("alice", U256::from(50 * DOLLAR)).await;
            let relay = relay(U256::from(100 * DOLLAR), false, outcome, ledger.clone());

            let err = relay
                .withdraw("alice", U256::from(10 * DOLLAR), addr(0xd1))
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                RelayError::BundlerRejected(_) | RelayError::OnChainRevert { .. }
            ));
            assert_eq!(ledger.balance("alice").await, U256::from(50 * DOLLAR));
            assert_eq!(
                ledger.transaction(1).await.unwrap().status,
                TxStatus::Reverted
            );
        }
    }

    #[tokio::test]
    async fn confirmation_timeout_leaves_the_debit_pending() {
        let ledger = Arc::new(MemoryLedger::new(U256::from(1_000 * DOLLAR)));
        ledger.credit("alice", U256::from(50 * DOLLAR)).await;
        let relay = relay(U256::from(100 * DOLLAR), false, Outcome::Timeout, ledger.clone());

        let err = relay
            .withdraw("alice", U256::from(10 * DOLLAR), addr(0xd1))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::ConfirmationTimeout { .. }));
        // Still debited, still pending: manual reconciliation territory.
        assert_eq!(ledger.balance("alice").await, U256::from(40 * DOLLAR));
        assert_eq!(
            ledger.transaction(1).await.unwrap().status,
            TxStatus::Pending
        );
    }

    #[tokio::test]
    async fn claim_pays_the_winner_and_marks_the_prize() {
        let ledger = Arc::new(MemoryLedger::new(U256::from(1_000 * DOLLAR)));
        ledger.credit(PRIZE_POOL_ACCOUNT, U256::from(100 * DOLLAR)).await;
        ledger
            .add_prize(PrizeRecord {
                id: 1,
                winner: "bob".to_string(),
                wallet: addr(0xb0),
                amount: U256::from(25 * DOLLAR),
                claimed: false,
            })
            .await;
        let relay = relay(U256::from(100 * DOLLAR), false, Outcome::Confirm, ledger.clone());

        let receipt = relay.claim_prize(1, "bob").await.unwrap();
        assert!(receipt.success);
        assert_eq!(receipt.net_amount, U256::from(25 * DOLLAR));
        assert_eq!(receipt.fee, U256::zero());
        assert_eq!(
            ledger.balance(PRIZE_POOL_ACCOUNT).await,
            U256::from(75 * DOLLAR)
        );
        assert!(ledger.prize(1).await.unwrap().claimed);
    }

    #[tokio::test]
    async fn already_claimed_prize_is_rejected_before_any_debit() {
        let ledger = Arc::new(MemoryLedger::new(U256::from(1_000 * DOLLAR)));
        ledger.credit(PRIZE_POOL_ACCOUNT, U256::from(100 * DOLLAR)).await;
        ledger
            .add_prize(PrizeRecord {
                id: 1,
                winner: "bob".to_string(),
                wallet: addr(0xb0),
                amount: U256::from(25 * DOLLAR),
                claimed: true,
            })
            .await;
        let relay = relay(U256::from(100 * DOLLAR), false, Outcome::Confirm, ledger.clone());

        let err = relay.claim_prize(1, "bob").await.unwrap_err();
        assert!(matches!(err, RelayError::Validation(_)));
        assert_eq!(
            ledger.balance(PRIZE_POOL_ACCOUNT).await,
            U256::from(100 * DOLLAR)
        );
        assert!(ledger.transaction(1).await.is_none());
    }

    #[tokio::test]
    async fn concurrent_claims_of_one_prize_pay_at_most_once() {
        let ledger = Arc::new(MemoryLedger::new(U256::from(1_000 * DOLLAR)));
        ledger.credit(PRIZE_POOL_ACCOUNT, U256::from(100 * DOLLAR)).await;
        ledger
            .add_prize(PrizeRecord {
                id: 1,
                winner: "bob".to_string(),
                wallet: addr(0xb0),
                amount: U256::from(25 * DOLLAR),
                claimed: false,
            })
            .await;
        let relay = Arc::new(relay(
            U256::from(100 * DOLLAR),
            false,
            Outcome::Confirm,
            ledger.clone(),
        ));

        let a = {
            let relay = relay.clone();
            tokio::spawn(async move { relay.claim_prize(1, "bob").await })
        };
        let b = {
            let relay = relay.clone();
            tokio::spawn(async move { relay.claim_prize(1, "bob").await })
        };
        let (a, b) = (a.await.unwrap(), b.await.unwrap());

        // Exactly one payout; the loser fails validation at acquisition.
        let successes = [&a, &b].iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1);
        let failure = if a.is_err() { a } else { b };
        assert!(matches!(failure, Err(RelayError::Validation(_))));
        assert_eq!(
            ledger.balance(PRIZE_POOL_ACCOUNT).await,
            U256::from(75 * DOLLAR)
        );
        assert!(ledger.prize(1).await.unwrap().claimed);
        // One ledger row, not two.
        assert!(ledger.transaction(1).await.is_some());
        assert!(ledger.transaction(2).await.is_none());
    }

    #[tokio::test]
    async fn failed_claim_releases_the_prize_for_another_attempt() {
        let ledger = Arc::new(MemoryLedger::new(U256::from(1_000 * DOLLAR)));
        ledger.credit(PRIZE_POOL_ACCOUNT, U256::from(100 * DOLLAR)).await;
        ledger
            .add_prize(PrizeRecord {
                id: 1,
                winner: "bob".to_string(),
                wallet: addr(0xb0),
                amount: U256::from(25 * DOLLAR),
                claimed: false,
            })
            .await;
        let relay = relay(U256::from(100 * DOLLAR), true, Outcome::Confirm, ledger.clone());

        let err = relay.claim_prize(1, "bob").await.unwrap_err();
        assert!(matches!(err, RelayError::SponsorshipDenied(_)));
        // Debit rolled back and the claim handed back.
        assert_eq!(
            ledger.balance(PRIZE_POOL_ACCOUNT).await,
            U256::from(100 * DOLLAR)
        );
        assert!(!ledger.prize(1).await.unwrap().claimed);
        assert_eq!(
            ledger.transaction(1).await.unwrap().status,
            TxStatus::Reverted
        );
    }

    #[tokio::test]
    async fn claim_timeout_keeps_the_claim_and_the_debit_held() {
        let ledger = Arc::new(MemoryLedger::new(U256::from(1_000 * DOLLAR)));
        ledger.credit(PRIZE_POOL_ACCOUNT, U256::from(100 * DOLLAR)).await;
        ledger
            .add_prize(PrizeRecord {
                id: 1,
                winner: "bob".to_string(),
                wallet: addr(0xb0),
                amount: U256::from(25 * DOLLAR),
                claimed: false,
            })
            .await;
        let relay = relay(U256::from(100 * DOLLAR), false, Outcome::Timeout, ledger.clone());

        let err = relay.claim_prize(1, "bob").await.unwrap_err();
        assert!(matches!(err, RelayError::ConfirmationTimeout { .. }));
        // The operation may still land: claim stays held, debit stays
        // pending, nothing is released until manual reconciliation.
        assert!(ledger.prize(1).await.unwrap().claimed);
        assert_eq!(
            ledger.balance(PRIZE_POOL_ACCOUNT).await,
            U256::from(75 * DOLLAR)
        );
        assert_eq!(
            ledger.transaction(1).await.unwrap().status,
            TxStatus::Pending
        );
    }

    #[tokio::test]
    async fn claim_by_the_wrong_user_is_rejected() {
        let ledger = Arc::new(MemoryLedger::new(U256::from(1_000 * DOLLAR)));
        ledger
            .add_prize(PrizeRecord {
                id: 1,
                winner: "bob".to_string(),
                wallet: addr(0xb0),
                amount: U256::from(25 * DOLLAR),
                claimed: false,
            })
            .await;
        let relay = relay(U256::from(100 * DOLLAR), false, Outcome::Confirm, ledger.clone());

        assert!(matches!(
            relay.claim_prize(1, "mallory").await,
            Err(RelayError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn distribution_debits_the_total_and_marks_every_prize() {
        let ledger = Arc::new(MemoryLedger::new(U256::from(1_000 * DOLLAR)));
        ledger.credit(PRIZE_POOL_ACCOUNT, U256::from(100 * DOLLAR)).await;
        for (id, byte, dollars) in [(1u64, 0xb1u8, 10u64), (2, 0xb2, 15)] {
            ledger
                .add_prize(PrizeRecord {
                    id,
                    winner: format!("winner-{id}"),
                    wallet: addr(byte),
                    amount: U256::from(dollars * DOLLAR),
                    claimed: false,
                })
                .await;
        }
        let relay = relay(U256::from(100 * DOLLAR), false, Outcome::Confirm, ledger.clone());

        let receipt = relay.distribute_prizes(&[1, 2]).await.unwrap();
        assert!(receipt.success);
        assert_eq!(receipt.net_amount, U256::from(25 * DOLLAR));
        assert_eq!(
            ledger.balance(PRIZE_POOL_ACCOUNT).await,
            U256::from(75 * DOLLAR)
        );
        assert!(ledger.prize(1).await.unwrap().claimed);
        assert!(ledger.prize(2).await.unwrap().claimed);
    }

    #[tokio::test]
    async fn distribution_rejects_duplicate_prize_ids() {
        let ledger = Arc::new(MemoryLedger::new(U256::from(1_000 * DOLLAR)));
        ledger.credit(PRIZE_POOL_ACCOUNT, U256::from(100 * DOLLAR)).await;
        ledger
            .add_prize(PrizeRecord {
                id: 1,
                winner: "bob".to_string(),
                wallet: addr(0xb1),
                amount: U256::from(10 * DOLLAR),
                claimed: false,
            })
            .await;
        let relay = relay(U256::from(100 * DOLLAR), false, Outcome::Confirm, ledger.clone());

        // One prize listed twice must not become two transfers.
        let err = relay.distribute_prizes(&[1, 1]).await.unwrap_err();
        assert!(matches!(err, RelayError::Validation(_)));
        assert_eq!(
            ledger.balance(PRIZE_POOL_ACCOUNT).await,
            U256::from(100 * DOLLAR)
        );
        assert!(!ledger.prize(1).await.unwrap().claimed);
        assert!(ledger.transaction(1).await.is_none());
    }

    #[tokio::test]
    async fn failed_distribution_releases_every_acquired_claim() {
        let ledger = Arc::new(MemoryLedger::new(U256::from(1_000 * DOLLAR)));
        ledger.credit(PRIZE_POOL_ACCOUNT, U256::from(100 * DOLLAR)).await;
        for (id, byte) in [(1u64, 0xb1u8), (2, 0xb2)] {
            ledger
                .add_prize(PrizeRecord {
                    id,
                    winner: format!("winner-{id}"),
                    wallet: addr(byte),
                    amount: U256::from(10 * DOLLAR),
                    claimed: false,
                })
                .await;
        }
        let relay = relay(U256::from(100 * DOLLAR), true, Outcome::Confirm, ledger.clone());

        let err = relay.distribute_prizes(&[1, 2]).await.unwrap_err();
        assert!(matches!(err, RelayError::SponsorshipDenied(_)));
        assert_eq!(
            ledger.balance(PRIZE_POOL_ACCOUNT).await,
            U256::from(100 * DOLLAR)
        );
        assert!(!ledger.prize(1).await.unwrap().claimed);
        assert!(!ledger.prize(2).await.unwrap().claimed);
    }

    #[tokio::test]
    async fn distribution_with_a_claimed_prize_touches_nothing() {
        let ledger = Arc::new(MemoryLedger::new(U256::from(1_000 * DOLLAR)));
        ledger.credit(PRIZE_POOL_ACCOUNT, U256::from(100 * DOLLAR)).await;
        ledger
            .add_prize(PrizeRecord {
                id: 1,
                winner: "bob".to_string(),
                wallet: addr(0xb1),
                amount: U256::from(10 * DOLLAR),
                claimed: false,
            })
            .await;
        ledger
            .add_prize(PrizeRecord {
                id: 2,
                winner: "carol".to_string(),
                wallet: addr(0xb2),
                amount: U256::from(15 * DOLLAR),
                claimed: true,
            })
            .await;
        let relay = relay(U256::from(100 * DOLLAR), false, Outcome::Confirm, ledger.clone());

        assert!(matches!(
            relay.distribute_prizes(&[1, 2]).await,
            Err(RelayError::Validation(_))
        ));
        assert_eq!(
            ledger.balance(PRIZE_POOL_ACCOUNT).await,
            U256::from(100 * DOLLAR)
        );
        assert!(!ledger.prize(1).await.unwrap().claimed);
    }
}
