// 9.2 transfer.rs: real-money payout seam. the engine only sees the trait;
// the in-memory service is MOCKED for tests and simulation.

use crate::types::{Amount, Currency, WalletId};
use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

// Reference handed back by the transfer service (tx hash, payout id, ...)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransferRef(pub String);

impl fmt::Display for TransferRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub wallet: WalletId,
    pub currency: Currency,
    pub amount: Amount,
    // same key on a resubmission lets the service dedupe
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum TransferError {
    // network blip, nonce clash, rpc timeout. safe to retry.
    #[error("Transfer failed (retryable): {0}")]
    Failed(String),

    // bad address, sanctioned wallet, treasury empty. needs a human.
    #[error("Transfer rejected: {0}")]
    Rejected(String),
}

impl TransferError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransferError::Failed(_))
    }
}

#[async_trait]
pub trait TransferService: Send + Sync {
    async fn transfer(&self, request: &TransferRequest) -> Result<TransferRef, TransferError>;
}

/// Bounded exponential backoff for retryable transfer failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 5_000,
        }
    }
}

impl RetryPolicy {
    pub fn no_delay(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }

    // delay before attempt `attempt + 1` (attempt is 1-based)
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        let ms = self.initial_backoff_ms.saturating_mul(factor).min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

/// Final failure after the retry loop, with how many attempts were spent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferFailure {
    pub error: TransferError,
    pub attempts: u32,
}

/// Submit a transfer, retrying retryable failures per the policy.
/// A rejection stops immediately.
pub async fn transfer_with_retry(
    service: &dyn TransferService,
    request: &TransferRequest,
    policy: &RetryPolicy,
) -> Result<(TransferRef, u32), TransferFailure> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match service.transfer(request).await {
            Ok(transfer_ref) => {
                debug!(wallet = %request.wallet, leg = %request.currency, attempt, "transfer confirmed");
                return Ok((transfer_ref, attempt));
            }
            Err(error) if error.is_retryable() && attempt < max_attempts => {
                let delay = policy.backoff_after(attempt);
                warn!(
                    wallet = %request.wallet,
                    leg = %request.currency,
                    attempt,
                    error = %error,
                    backoff_ms = delay.as_millis() as u64,
                    "transfer failed, retrying"
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
            Err(error) => return Err(TransferFailure { error, attempts: attempt }),
        }
    }
}

/// In-memory transfer service. Dedupes on idempotency key, can be scripted to
/// fail, and counts every call so tests can assert exactly-once payout.
#[derive(Debug, Default)]
pub struct InMemoryTransferService {
    balances: Mutex<HashMap<(WalletId, Currency), Decimal>>,
    executed: Mutex<HashMap<String, TransferRef>>,
    scripted_failures: Mutex<HashMap<Currency, VecDeque<TransferError>>>,
    rejected_wallets: Mutex<HashSet<WalletId>>,
    calls: AtomicU64,
    next_ref: AtomicU64,
    latency_ms: u64,
}

impl InMemoryTransferService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    /// Queue failures for the next calls on a currency leg, consumed in order.
    pub fn fail_next(&self, currency: Currency, error: TransferError) {
        self.scripted_failures
            .lock()
            .entry(currency)
            .or_default()
            .push_back(error);
    }

    pub fn reject_wallet(&self, wallet: WalletId) {
        self.rejected_wallets.lock().insert(wallet);
    }

    pub fn allow_wallet(&self, wallet: &WalletId) {
        self.rejected_wallets.lock().remove(wallet);
    }

    pub fn balance(&self, wallet: &WalletId, currency: Currency) -> Decimal {
        self.balances
            .lock()
            .get(&(wallet.clone(), currency))
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn executed_count(&self) -> usize {
        self.executed.lock().len()
    }
}

#[async_trait]
impl TransferService for InMemoryTransferService {
    async fn transfer(&self, request: &TransferRequest) -> Result<TransferRef, TransferError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.latency_ms)).await;
        }

        if let Some(existing) = self.executed.lock().get(&request.idempotency_key) {
            return Ok(existing.clone());
        }
        if self.rejected_wallets.lock().contains(&request.wallet) {
            return Err(TransferError::Rejected(format!("wallet {} not payable", request.wallet)));
        }
        if let Some(error) = self
            .scripted_failures
            .lock()
            .get_mut(&request.currency)
            .and_then(|q| q.pop_front())
        {
            return Err(error);
        }
        if !request.amount.is_positive() {
            return Err(TransferError::Rejected("amount must be positive".to_string()));
        }

        let id = self.next_ref.fetch_add(1, Ordering::SeqCst) + 1;
        let transfer_ref = TransferRef(format!("tx-{}-{}", request.currency.symbol().to_lowercase(), id));
        *self
            .balances
            .lock()
            .entry((request.wallet.clone(), request.currency))
            .or_insert(Decimal::ZERO) += request.amount.value();
        self.executed
            .lock()
            .insert(request.idempotency_key.clone(), transfer_ref.clone());
        Ok(transfer_ref)
    }
}
