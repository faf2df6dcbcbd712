// src/ledger.rs
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;

use crate::error::RelayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    /// Debited, outcome not yet known. The only non-terminal state.
    Pending,
    Completed,
    Reverted,
}

/// Persisted record of one relay attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerTransaction {
    pub id: u64,
    pub user_id: String,
    pub requested_amount: U256,
    pub fee_amount: U256,
    pub net_amount: U256,
    pub destination: Address,
    pub status: TxStatus,
    pub tx_hash: Option<H256>,
}

/// Winner entry carried through the claim and distribution flows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrizeRecord {
    pub id: u64,
    pub winner: String,
    pub wallet: Address,
    pub amount: U256,
    pub claimed: bool,
}

/// Off-chain balance reconciliation. The sole owner of balance mutation: no
/// other component reads-then-writes balances.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Atomically checks the balance and the per-transaction cap, deducts the
    /// full requested amount and inserts the pending record. Atomic per user
    /// row, so unrelated users never contend.
    async fn pre_debit(
        &self,
        user: &str,
        amount: U256,
        fee: U256,
        destination: Address,
    ) -> Result<LedgerTransaction, RelayError>;

    /// `Pending -> Completed`, stamping the confirmed transaction hash.
    /// Idempotent when re-called with the same hash.
    async fn commit(&self, tx_id: u64, tx_hash: H256) -> Result<(), RelayError>;

    /// Restores the debited amount, `Pending -> Reverted`. A second call is a
    /// no-op; calling after a successful commit is an error.
    async fn rollback(&self, tx_id: u64) -> Result<(), RelayError>;

    async fn balance(&self, user: &str) -> U256;

    async fn prize(&self, prize_id: u64) -> Option<PrizeRecord>;

    /// Atomically flips an unclaimed prize to claimed and returns the
    /// record. This is the single acquisition point for payouts: a
    /// concurrent second caller gets a validation error, not a second
    /// payout.
    async fn try_claim(&self, prize_id: u64) -> Result<PrizeRecord, RelayError>;

    /// Releases a claim acquired by `try_claim` after a failed attempt, so
    /// the winner can claim again.
    async fn release_claim(&self, prize_id: u64) -> Result<(), RelayError>;
}

#[derive(Debug, Default)]
struct Account {
    balance: U256,
}

/// In-memory ledger with one lock per user row plus a transaction table.
#[derive(Default)]
pub struct MemoryLedger {
    max_amount: U256,
    accounts: Mutex<HashMap<String, Arc<Mutex<Account>>>>,
    transactions: Mutex<HashMap<u64, LedgerTransaction>>,
    prizes: Mutex<HashMap<u64, PrizeRecord>>,
    next_id: AtomicU64,
}

impl MemoryLedger {
    pub fn new(max_amount: U256) -> Self {
        Self {
            max_amount,
            next_id: AtomicU64::new(1),
            ..Self::default()
        }
    }

    async fn account_row(&self, user: &str) -> Arc<Mutex<Account>> {
        let mut accounts = self.accounts.lock().await;
        accounts
            .entry(user.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Account::default())))
            .clone()
    }

    /// Credits a user, e.g. points earned on the platform or pool funding.
    pub async fn credit(&self, user: &str, amount: U256) {
        let row = self.account_row(user).await;
        let mut account = row.lock().await;
        account.balance += amount;
    }

    pub async fn add_prize(&self, prize: PrizeRecord) {
        self.prizes.lock().await.insert(prize.id, prize);
    }

    pub async fn transaction(&self, tx_id: u64) -> Option<LedgerTransaction> {
        self.transactions.lock().await.get(&tx_id).cloned()
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn pre_debit(
        &self,
        user: &str,
        amount: U256,
        fee: U256,
        destination: Address,
    ) -> Result<LedgerTransaction, RelayError> {
        if amount.is_zero() {
            return Err(RelayError::Validation("amount must be positive".to_string()));
        }
        if amount > self.max_amount {
            return Err(RelayError::Validation(
                "amount exceeds the per-transaction maximum".to_string(),
            ));
        }
        let net_amount = amount
            .checked_sub(fee)
            .ok_or_else(|| RelayError::Validation("fee exceeds the amount".to_string()))?;

        let row = self.account_row(user).await;
        let mut account = row.lock().await;
        if account.balance < amount {
            return Err(RelayError::InsufficientFunds);
        }
        account.balance -= amount;

        // Inserted while the row lock is still held, so there is no window
        // where the balance is debited without a pending record.
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let tx = LedgerTransaction {
            id,
            user_id: user.to_string(),
            requested_amount: amount,
            fee_amount: fee,
            net_amount,
            destination,
            status: TxStatus::Pending,
            tx_hash: None,
        };
        self.transactions.lock().await.insert(id, tx.clone());

        info!(user, tx_id = id, amount = %amount, "pre-debited");
        Ok(tx)
    }

    async fn commit(&self, tx_id: u64, tx_hash: H256) -> Result<(), RelayError> {
        let mut transactions = self.transactions.lock().await;
        let tx = transactions
            .get_mut(&tx_id)
            .ok_or_else(|| RelayError::Ledger(format!("unknown transaction {tx_id}")))?;
        match tx.status {
            TxStatus::Pending => {
                tx.status = TxStatus::Completed;
                tx.tx_hash = Some(tx_hash);
                info!(tx_id, tx_hash = %format!("{tx_hash:#x}"), "ledger committed");
                Ok(())
            }
            TxStatus::Completed if tx.tx_hash == Some(tx_hash) => Ok(()),
            TxStatus::Completed => Err(RelayError::Ledger(format!(
                "transaction {tx_id} already committed with a different hash"
            ))),
            TxStatus::Reverted => Err(RelayError::Ledger(format!(
                "cannot commit reverted transaction {tx_id}"
            ))),
        }
    }

    async fn rollback(&self, tx_id: u64) -> Result<(), RelayError> {
        // Flip the status inside the table lock so a racing second rollback
        // observes `Reverted` and becomes a no-op before any credit happens.
        let (user, amount) = {
            let mut transactions = self.transactions.lock().await;
            let tx = transactions
                .get_mut(&tx_id)
                .ok_or_else(|| RelayError::Ledger(format!("unknown transaction {tx_id}")))?;
            match tx.status {
                TxStatus::Completed => {
                    return Err(RelayError::Ledger(format!(
                        "cannot roll back committed transaction {tx_id}"
                    )))
                }
                TxStatus::Reverted => return Ok(()),
                TxStatus::Pending => {
                    tx.status = TxStatus::Reverted;
                    (tx.user_id.clone(), tx.requested_amount)
                }
            }
        };

        let row = self.account_row(&user).await;
        let mut account = row.lock().await;
        account.balance += amount;
        info!(user, tx_id, amount = %amount, "ledger rolled back");
        Ok(())
    }

    async fn balance(&self, user: &str) -> U256 {
        let row = self.account_row(user).await;
        let account = row.lock().await;
        account.balance
    }

    async fn prize(&self, prize_id: u64) -> Option<PrizeRecord> {
        self.prizes.lock().await.get(&prize_id).cloned()
    }

    async fn try_claim(&self, prize_id: u64) -> Result<PrizeRecord, RelayError> {
        let mut prizes = self.prizes.lock().await;
        let prize = prizes
            .get_mut(&prize_id)
            .ok_or_else(|| RelayError::Validation(format!("unknown prize {prize_id}")))?;
        if prize.claimed {
            return Err(RelayError::Validation(format!(
                "prize {prize_id} already claimed"
            )));
        }
        prize.claimed = true;
        info!(prize_id, "claim acquired");
        Ok(prize.clone())
    }

    async fn release_claim(&self, prize_id: u64) -> Result<(), RelayError> {
        let mut prizes = self.prizes.lock().await;
        let prize = prizes
            .get_mut(&prize_id)
            .ok_or_else(|| RelayError::Ledger(format!("unknown prize {prize_id}")))?;
        prize.claimed = false;
        info!(prize_id, "claim released");
        Ok(())
    }
}
