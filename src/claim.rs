//! Prize claim records.
//!
//! One claim per (tournament, wallet). Each currency is a separate payout leg
//! that records its own transfer reference the moment it is confirmed, so a
//! retry after a partial failure only ever resubmits unpaid legs.
//!
//! UNCLAIMED -> PARTIALLY_PAID -> PAID, with FAILED as the operator-facing
//! dead end that `reopen` can walk back. `claimed` flips to true exactly once,
//! together with the final transfer reference, and the record is frozen after.

use crate::prize::PrizeAward;
use crate::transfer::TransferRef;
use crate::types::{Amount, Currency, ParticipantKey, Timestamp, TournamentId, WalletId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    Unclaimed,
    PartiallyPaid,
    Paid,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegState {
    pub currency: Currency,
    pub amount: Amount,
    pub transfer_ref: Option<TransferRef>,
    pub paid_at: Option<Timestamp>,
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl LegState {
    fn new(currency: Currency, amount: Amount) -> Self {
        Self {
            currency,
            amount,
            transfer_ref: None,
            paid_at: None,
            attempts: 0,
            last_error: None,
        }
    }

    pub fn is_paid(&self) -> bool {
        self.transfer_ref.is_some()
    }

    // zero legs never hit the transfer service
    pub fn is_due(&self) -> bool {
        self.amount.is_positive() && !self.is_paid()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimFailure {
    pub currency: Currency,
    pub reason: String,
    pub retryable: bool,
    pub failed_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrizeClaim {
    pub tournament_id: TournamentId,
    pub wallet: WalletId,
    pub rank: u32,
    pub primary: LegState,
    pub bonus: LegState,
    pub status: ClaimStatus,
    pub claimed: bool,
    pub claimed_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub failure: Option<ClaimFailure>,
}

impl PrizeClaim {
    pub fn from_award(tournament_id: TournamentId, award: &PrizeAward, now: Timestamp) -> Self {
        Self {
            tournament_id,
            wallet: award.wallet.clone(),
            rank: award.rank,
            primary: LegState::new(Currency::Primary, award.primary_prize),
            bonus: LegState::new(Currency::Bonus, award.bonus_prize),
            status: ClaimStatus::Unclaimed,
            claimed: false,
            claimed_at: None,
            created_at: now,
            failure: None,
        }
    }

    pub fn key(&self) -> ParticipantKey {
        ParticipantKey::new(self.tournament_id, self.wallet.clone())
    }

    pub fn leg(&self, currency: Currency) -> &LegState {
        match currency {
            Currency::Primary => &self.primary,
            Currency::Bonus => &self.bonus,
        }
    }

    fn leg_mut(&mut self, currency: Currency) -> &mut LegState {
        match currency {
            Currency::Primary => &mut self.primary,
            Currency::Bonus => &mut self.bonus,
        }
    }

    pub fn has_positive_amount(&self) -> bool {
        self.primary.amount.is_positive() || self.bonus.amount.is_positive()
    }

    pub fn due_legs(&self) -> Vec<Currency> {
        Currency::ALL.into_iter().filter(|c| self.leg(*c).is_due()).collect()
    }

    pub fn paid_legs(&self) -> Vec<Currency> {
        Currency::ALL.into_iter().filter(|c| self.leg(*c).is_paid()).collect()
    }

    pub fn transfer_refs(&self) -> BTreeMap<Currency, TransferRef> {
        Currency::ALL
            .into_iter()
            .filter_map(|c| self.leg(c).transfer_ref.clone().map(|r| (c, r)))
            .collect()
    }

    /// Record a confirmed leg. When no leg is left due the claim becomes PAID
    /// and `claimed` flips in the same step.
    pub fn record_leg_paid(
        &mut self,
        currency: Currency,
        transfer_ref: TransferRef,
        attempts: u32,
        now: Timestamp,
    ) -> Result<ClaimStatus, ClaimError> {
        if self.claimed {
            return Err(ClaimError::AlreadyClaimed(self.key()));
        }
        let leg = self.leg_mut(currency);
        if leg.is_paid() {
            return Err(ClaimError::LegAlreadyPaid(currency));
        }
        leg.transfer_ref = Some(transfer_ref);
        leg.paid_at = Some(now);
        leg.attempts += attempts;
        leg.last_error = None;

        if self.due_legs().is_empty() {
            self.status = ClaimStatus::Paid;
            self.claimed = true;
            self.claimed_at = Some(now);
            self.failure = None;
        } else {
            self.status = ClaimStatus::PartiallyPaid;
        }
        Ok(self.status)
    }

    /// Leg gave up (rejected or retries exhausted). Paid legs are kept.
    pub fn record_leg_failed(
        &mut self,
        currency: Currency,
        reason: String,
        retryable: bool,
        attempts: u32,
        now: Timestamp,
    ) -> Result<(), ClaimError> {
        if self.claimed {
            return Err(ClaimError::AlreadyClaimed(self.key()));
        }
        let leg = self.leg_mut(currency);
        leg.attempts += attempts;
        leg.last_error = Some(reason.clone());
        self.status = ClaimStatus::Failed;
        self.failure = Some(ClaimFailure {
            currency,
            reason,
            retryable,
            failed_at: now,
        });
        Ok(())
    }

    /// Operator action: put a FAILED claim back in the queue.
    pub fn reopen(&mut self) -> Result<ClaimStatus, ClaimError> {
        if self.status != ClaimStatus::Failed {
            return Err(ClaimError::NotFailed(self.key(), self.status));
        }
        self.status = if self.paid_legs().is_empty() {
            ClaimStatus::Unclaimed
        } else {
            ClaimStatus::PartiallyPaid
        };
        self.failure = None;
        Ok(self.status)
    }

    pub fn receipt(&self, already_claimed: bool) -> ClaimReceipt {
        let paid = |leg: &LegState| if leg.is_paid() { leg.amount } else { Amount::zero() };
        ClaimReceipt {
            tournament_id: self.tournament_id,
            wallet: self.wallet.clone(),
            rank: self.rank,
            primary_paid: paid(&self.primary),
            bonus_paid: paid(&self.bonus),
            transfer_refs: self.transfer_refs(),
            claimed_at: self.claimed_at,
            already_claimed,
        }
    }
}

/// What a successful claim hands back. A repeat claim returns the same refs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimReceipt {
    pub tournament_id: TournamentId,
    pub wallet: WalletId,
    pub rank: u32,
    pub primary_paid: Amount,
    pub bonus_paid: Amount,
    pub transfer_refs: BTreeMap<Currency, TransferRef>,
    pub claimed_at: Option<Timestamp>,
    pub already_claimed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClaimError {
    #[error("Claim {0} is already claimed and immutable")]
    AlreadyClaimed(ParticipantKey),

    #[error("{0} leg already paid")]
    LegAlreadyPaid(Currency),

    #[error("Claim {0} is {1:?}, not FAILED")]
    NotFailed(ParticipantKey, ClaimStatus),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn claim(primary: rust_decimal::Decimal, bonus: rust_decimal::Decimal) -> PrizeClaim {
        let award = PrizeAward {
            rank: 1,
            wallet: WalletId::new("0xwin"),
            primary_prize: Amount::new(primary),
            bonus_prize: Amount::new(bonus),
        };
        PrizeClaim::from_award(TournamentId(3), &award, Timestamp::from_millis(0))
    }

    #[test]
    fn zero_leg_is_not_due() {
        let c = claim(dec!(5), dec!(0));
        assert_eq!(c.due_legs(), vec![Currency::Primary]);
    }

    #[test]
    fn paying_all_legs_flips_claimed_once() {
        let mut c = claim(dec!(5), dec!(100));
        let status = c
            .record_leg_paid(Currency::Primary, TransferRef("tx-1".into()), 1, Timestamp::from_millis(10))
            .unwrap();
        assert_eq!(status, ClaimStatus::PartiallyPaid);
        assert!(!c.claimed);

        let status = c
            .record_leg_paid(Currency::Bonus, TransferRef("tx-2".into()), 1, Timestamp::from_millis(20))
            .unwrap();
        assert_eq!(status, ClaimStatus::Paid);
        assert!(c.claimed);
        assert_eq!(c.claimed_at, Some(Timestamp::from_millis(20)));

        // frozen
        assert!(matches!(
            c.record_leg_paid(Currency::Bonus, TransferRef("tx-3".into()), 1, Timestamp::from_millis(30)),
            Err(ClaimError::AlreadyClaimed(_))
        ));
        assert_eq!(c.transfer_refs().len(), 2);
    }

    #[test]
    fn failure_keeps_paid_leg_and_reopen_resumes() {
        let mut c = claim(dec!(5), dec!(100));
        c.record_leg_paid(Currency::Primary, TransferRef("tx-1".into()), 1, Timestamp::from_millis(10))
            .unwrap();
        c.record_leg_failed(Currency::Bonus, "rpc down".into(), true, 3, Timestamp::from_millis(11))
            .unwrap();
        assert_eq!(c.status, ClaimStatus::Failed);
        assert_eq!(c.paid_legs(), vec![Currency::Primary]);
        assert_eq!(c.due_legs(), vec![Currency::Bonus]);

        assert_eq!(c.reopen().unwrap(), ClaimStatus::PartiallyPaid);
        assert!(c.failure.is_none());
        assert!(matches!(c.reopen(), Err(ClaimError::NotFailed(..))));
    }

    #[test]
    fn receipt_reports_only_paid_legs() {
        let mut c = claim(dec!(5), dec!(100));
        c.record_leg_paid(Currency::Primary, TransferRef("tx-1".into()), 1, Timestamp::from_millis(10))
            .unwrap();
        let r = c.receipt(false);
        assert_eq!(r.primary_paid.value(), dec!(5));
        assert!(r.bonus_paid.is_zero());
    }
}
