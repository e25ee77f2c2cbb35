//! Prize claims and payout execution.
//!
//! The per-claim lock is the idempotency boundary: it is taken before the
//! claim is read and held until every leg's outcome is persisted, so two
//! concurrent claims for the same wallet serialize and the second one finds
//! the first one's transfer references.

use super::core::Engine;
use super::results::{EngineError, PayoutProgress};
use crate::claim::{ClaimReceipt, ClaimStatus, PrizeClaim};
use crate::events::{ClaimReopenedEvent, EventPayload, PayoutLegFailedEvent, PayoutLegPaidEvent};
use crate::transfer::{transfer_with_retry, TransferRequest};
use crate::types::{Currency, ParticipantKey, TournamentId, WalletId};
use tracing::{error, info, warn};

// dedupe key handed to the transfer service: one per claim leg
pub fn transfer_idempotency_key(key: &ParticipantKey, currency: Currency) -> String {
    format!("{}:{}:{}", key.tournament_id, key.wallet, currency)
}

impl Engine {
    /// Pay out a settled prize. A claim that is already PAID returns its
    /// recorded receipt without touching the transfer service.
    pub async fn claim_prize(&self, tournament_id: TournamentId, wallet: &WalletId) -> Result<ClaimReceipt, EngineError> {
        let key = ParticipantKey::new(tournament_id, wallet.clone());
        let lock = self.claim_lock(&key);
        let _guard = lock.lock().await;

        // read under the lock: whoever held it before may have paid
        let mut claim = self.get_claim(&key)?;
        if claim.claimed {
            info!(key = %key, "claim already paid, returning recorded receipt");
            self.release_claim_lock(&key);
            return Ok(claim.receipt(true));
        }
        if !claim.has_positive_amount() {
            return Err(EngineError::NothingToClaim(key));
        }
        if claim.status == ClaimStatus::Failed {
            let reason = claim
                .failure
                .as_ref()
                .map(|f| f.reason.clone())
                .unwrap_or_default();
            return Err(EngineError::ClaimFailed { key, reason });
        }

        for currency in claim.due_legs() {
            self.pay_leg(&mut claim, currency).await?;
        }

        info!(key = %key, refs = claim.transfer_refs().len(), "prize claimed");
        self.release_claim_lock(&key);
        Ok(claim.receipt(false))
    }

    // 8.6: one leg. the outcome is persisted before moving on, so a crash or
    // failure on the next leg never loses this one's reference.
    async fn pay_leg(&self, claim: &mut PrizeClaim, currency: Currency) -> Result<(), EngineError> {
        let key = claim.key();
        let amount = claim.leg(currency).amount;
        let request = TransferRequest {
            wallet: claim.wallet.clone(),
            currency,
            amount,
            idempotency_key: transfer_idempotency_key(&key, currency),
        };

        match transfer_with_retry(self.transfers.as_ref(), &request, &self.config.retry).await {
            Ok((transfer_ref, attempts)) => {
                let status = claim.record_leg_paid(currency, transfer_ref.clone(), attempts, self.now())?;
                self.store.update_claim(claim)?;

                info!(key = %key, leg = %currency, %amount, transfer_ref = %transfer_ref, attempts, "payout leg confirmed");
                self.emit_event(EventPayload::PayoutLegPaid(PayoutLegPaidEvent {
                    tournament_id: key.tournament_id,
                    wallet: key.wallet.clone(),
                    currency,
                    amount,
                    transfer_ref,
                    attempts,
                    claim_status: status,
                }));
                Ok(())
            }
            Err(failure) => {
                let retryable = failure.error.is_retryable();
                claim.record_leg_failed(currency, failure.error.to_string(), retryable, failure.attempts, self.now())?;
                self.store.update_claim(claim)?;

                if retryable {
                    warn!(key = %key, leg = %currency, attempts = failure.attempts, error = %failure.error, "payout retries exhausted");
                } else {
                    error!(key = %key, leg = %currency, error = %failure.error, "payout rejected");
                }
                self.emit_event(EventPayload::PayoutLegFailed(PayoutLegFailedEvent {
                    tournament_id: key.tournament_id,
                    wallet: key.wallet.clone(),
                    currency,
                    amount,
                    reason: failure.error.to_string(),
                    retryable,
                    attempts: failure.attempts,
                }));

                Err(EngineError::PayoutIncomplete {
                    progress: PayoutProgress::from_claim(claim, currency, failure.attempts),
                    error: failure.error,
                })
            }
        }
    }

    /// Claims waiting on an operator.
    pub fn failed_claims(&self) -> Vec<PrizeClaim> {
        self.store.claims_with_status(ClaimStatus::Failed)
    }

    pub fn claims(&self, tournament_id: TournamentId) -> Vec<PrizeClaim> {
        self.store.claims(tournament_id)
    }

    /// Operator action: put a FAILED claim back in line. Paid legs stay paid.
    pub async fn reopen_claim(&self, tournament_id: TournamentId, wallet: &WalletId) -> Result<PrizeClaim, EngineError> {
        let key = ParticipantKey::new(tournament_id, wallet.clone());
        let lock = self.claim_lock(&key);
        let _guard = lock.lock().await;

        let mut claim = self.get_claim(&key)?;
        let status = claim.reopen()?;
        self.store.update_claim(&claim)?;

        info!(key = %key, ?status, "claim reopened");
        self.emit_event(EventPayload::ClaimReopened(ClaimReopenedEvent {
            tournament_id,
            wallet: wallet.clone(),
            status,
        }));
        Ok(claim)
    }
}
