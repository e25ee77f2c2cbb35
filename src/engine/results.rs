// 8.0.2: result types and errors for engine operations.

use crate::claim::{ClaimError, ClaimStatus, PrizeClaim};
use crate::config::ConfigError;
use crate::ledger::LedgerError;
use crate::participant::ParticipantError;
use crate::price_feed::PriceFeedError;
use crate::prize::PrizeAward;
use crate::store::StoreError;
use crate::tournament::{TournamentError, TournamentStatus, Transition};
use crate::trade::Trade;
use crate::transfer::{TransferError, TransferRef};
use crate::types::{Amount, Currency, ParticipantKey, Timestamp, TokenAddress, TournamentId, WalletId};
use crate::valuation::{Valuation, ValuationError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeExecution {
    pub trade: Trade,
    pub new_cash_balance: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Portfolio {
    pub tournament_id: TournamentId,
    pub wallet: WalletId,
    pub starting_balance: Amount,
    pub profit: Amount,
    pub trade_count: u64,
    pub valuation: Valuation,
}

/// Stored cash checked against the cash the trade log implies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditReport {
    pub key: ParticipantKey,
    pub stored_cash: Amount,
    pub derived_cash: Amount,
    pub positions: BTreeMap<TokenAddress, Decimal>,
    pub trade_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub tournament_id: TournamentId,
    pub transition: Transition,
    pub at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementSummary {
    pub tournament_id: TournamentId,
    pub awards: Vec<PrizeAward>,
    pub claims_created: usize,
    // true when the tournament was already SETTLED and nothing was written
    pub already_settled: bool,
}

/// Where a payout stood when it stopped. Enough for a caller to retry
/// without risking a second transfer on a paid leg.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutProgress {
    pub key: ParticipantKey,
    pub status: ClaimStatus,
    pub paid: BTreeMap<Currency, TransferRef>,
    pub failed_leg: Currency,
    pub attempts: u32,
}

impl PayoutProgress {
    pub fn from_claim(claim: &PrizeClaim, failed_leg: Currency, attempts: u32) -> Self {
        Self {
            key: claim.key(),
            status: claim.status,
            paid: claim.transfer_refs(),
            failed_leg,
            attempts,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    Validation,
    PreconditionFailed,
    ConcurrencyConflict,
    ExternalService,
    TransferRejected,
    InvariantViolation,
    NotFound,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("Tournament {0} not found")]
    TournamentNotFound(TournamentId),

    #[error("Participant {0} not found")]
    ParticipantNotFound(ParticipantKey),

    #[error("Prize claim {0} not found")]
    ClaimNotFound(ParticipantKey),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Token {token} is not tradable in {tournament_id}")]
    TokenNotInUniverse {
        tournament_id: TournamentId,
        token: TokenAddress,
    },

    #[error("Tournament {0} is closed")]
    TournamentClosed(TournamentId),

    #[error("Tournament {0} is full")]
    TournamentFull(TournamentId),

    #[error("{0} already joined")]
    AlreadyJoined(ParticipantKey),

    #[error("Insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: Amount, available: Amount },

    #[error("Insufficient position in {token}: requested {requested}, held {held}")]
    InsufficientPosition {
        token: TokenAddress,
        requested: Decimal,
        held: Decimal,
    },

    #[error("Price unavailable: {0}")]
    PriceUnavailable(#[from] PriceFeedError),

    #[error("Tournament {tournament_id} is {status}, no final leaderboard yet")]
    NotEnded {
        tournament_id: TournamentId,
        status: TournamentStatus,
    },

    #[error("Claim {0} has nothing to pay")]
    NothingToClaim(ParticipantKey),

    #[error("Claim {key} failed ({reason}); needs operator reopen")]
    ClaimFailed { key: ParticipantKey, reason: String },

    #[error("Payout for {} incomplete: {error}", .progress.key)]
    PayoutIncomplete {
        progress: PayoutProgress,
        error: TransferError,
    },

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Tournament error: {0}")]
    Tournament(#[from] TournamentError),

    #[error("Participant error: {0}")]
    Participant(#[from] ParticipantError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Valuation error: {0}")]
    Valuation(#[from] ValuationError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("Claim error: {0}")]
    Claim(#[from] ClaimError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl EngineError {
    pub fn category(&self) -> ErrorCategory {
        use EngineError::*;
        match self {
            TournamentNotFound(_) | ParticipantNotFound(_) | ClaimNotFound(_) => ErrorCategory::NotFound,
            InvalidInput(_) | TokenNotInUniverse { .. } | Config(_) => ErrorCategory::Validation,
            Tournament(TournamentError::InvalidSpec(_)) => ErrorCategory::Validation,
            Tournament(_) => ErrorCategory::PreconditionFailed,
            TournamentClosed(_)
            | TournamentFull(_)
            | AlreadyJoined(_)
            | InsufficientBalance { .. }
            | InsufficientPosition { .. }
            | PriceUnavailable(_)
            | NotEnded { .. }
            | NothingToClaim(_)
            | ClaimFailed { .. }
            | Participant(_) => ErrorCategory::PreconditionFailed,
            PayoutIncomplete { error, .. } | Transfer(error) => {
                if error.is_retryable() {
                    ErrorCategory::ExternalService
                } else {
                    ErrorCategory::TransferRejected
                }
            }
            Store(StoreError::NotFound(_)) => ErrorCategory::NotFound,
            Store(StoreError::Conflict(_)) | Store(StoreError::StaleSnapshot(_)) => ErrorCategory::ConcurrencyConflict,
            Store(StoreError::Duplicate(_)) => ErrorCategory::PreconditionFailed,
            Store(StoreError::Immutable(_)) | Store(StoreError::NegativeBalance { .. }) => {
                ErrorCategory::InvariantViolation
            }
            Claim(ClaimError::LegAlreadyPaid(_)) => ErrorCategory::InvariantViolation,
            Claim(_) => ErrorCategory::PreconditionFailed,
            InvariantViolation(_) | Ledger(_) | Valuation(_) => ErrorCategory::InvariantViolation,
        }
    }

    /// Safe to resubmit as-is: lost races and transient external failures.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::ConcurrencyConflict | ErrorCategory::ExternalService
        )
    }

    pub fn payout_progress(&self) -> Option<&PayoutProgress> {
        match self {
            EngineError::PayoutIncomplete { progress, .. } => Some(progress),
            _ => None,
        }
    }
}
