//! Read side: positions, valuation, leaderboard and reconciliation.
//!
//! Nothing here writes balances. Every figure is re-derived from the trade
//! log and the price cache at call time.

use super::core::Engine;
use super::results::{AuditReport, EngineError, Portfolio};
use crate::events::{EventPayload, ReconciliationFailedEvent};
use crate::leaderboard::{self, Leaderboard, Standing};
use crate::ledger;
use crate::participant::Participant;
use crate::store::LedgerSnapshot;
use crate::tournament::{Tournament, TournamentStatus};
use crate::trade::Trade;
use crate::types::{ParticipantKey, Timestamp, TokenAddress, TournamentId, WalletId};
use crate::valuation::{self, Valuation};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::{debug, error};

impl Engine {
    pub fn compute_position(
        &self,
        tournament_id: TournamentId,
        wallet: &WalletId,
        token: &TokenAddress,
    ) -> Result<Decimal, EngineError> {
        let (_, trades) = self.participant_with_trades(&ParticipantKey::new(tournament_id, wallet.clone()))?;
        Ok(ledger::compute_position(&trades, token)?)
    }

    /// Strictly positive holdings only.
    pub fn compute_all_positions(
        &self,
        tournament_id: TournamentId,
        wallet: &WalletId,
    ) -> Result<BTreeMap<TokenAddress, Decimal>, EngineError> {
        let (_, trades) = self.participant_with_trades(&ParticipantKey::new(tournament_id, wallet.clone()))?;
        Ok(ledger::compute_all_positions(&trades)?)
    }

    pub fn valuate(&self, tournament_id: TournamentId, wallet: &WalletId) -> Result<Valuation, EngineError> {
        let (participant, trades) = self.participant_with_trades(&ParticipantKey::new(tournament_id, wallet.clone()))?;
        self.valuate_participant(&participant, &trades, self.now())
    }

    pub fn get_portfolio(&self, tournament_id: TournamentId, wallet: &WalletId) -> Result<Portfolio, EngineError> {
        let (participant, trades) = self.participant_with_trades(&ParticipantKey::new(tournament_id, wallet.clone()))?;
        let valuation = self.valuate_participant(&participant, &trades, self.now())?;
        Ok(Portfolio {
            tournament_id,
            wallet: wallet.clone(),
            starting_balance: participant.starting_balance,
            profit: valuation.total_equity.sub(participant.starting_balance),
            trade_count: participant.trade_count,
            valuation,
        })
    }

    /// Live ranking while trading is open; the frozen final board once ENDED.
    pub fn get_leaderboard(&self, tournament_id: TournamentId) -> Result<Leaderboard, EngineError> {
        let tournament = self.get_tournament(tournament_id)?;
        if matches!(tournament.status, TournamentStatus::Ended | TournamentStatus::Settled) {
            return self.store.final_leaderboard(tournament_id).ok_or_else(|| {
                EngineError::InvariantViolation(format!("{tournament_id} is {} without a frozen leaderboard", tournament.status))
            });
        }
        let snapshot = self.store.ledger_snapshot(tournament_id);
        self.compute_leaderboard(&tournament, &snapshot, self.now(), false)
    }

    /// Re-derive cash and positions from the trade log and compare with the
    /// stored balance.
    pub fn audit_participant(&self, tournament_id: TournamentId, wallet: &WalletId) -> Result<AuditReport, EngineError> {
        let key = ParticipantKey::new(tournament_id, wallet.clone());
        let (participant, trades) = self.participant_with_trades(&key)?;

        let checked = ledger::derive_cash(participant.starting_balance, &trades)
            .and_then(|cash| Ok((cash, ledger::compute_all_positions(&trades)?)));
        let (derived_cash, positions) = match checked {
            Ok(derived) => derived,
            Err(e) => {
                self.report_drift(&key, e.to_string());
                return Err(e.into());
            }
        };

        if derived_cash != participant.cash_balance {
            let reason = format!(
                "stored cash {} but trade log implies {}",
                participant.cash_balance, derived_cash
            );
            self.report_drift(&key, reason.clone());
            return Err(EngineError::InvariantViolation(reason));
        }
        if participant.trade_count != trades.len() as u64 {
            let reason = format!(
                "stored trade count {} but log holds {}",
                participant.trade_count,
                trades.len()
            );
            self.report_drift(&key, reason.clone());
            return Err(EngineError::InvariantViolation(reason));
        }

        debug!(key = %key, cash = %derived_cash, trades = trades.len(), "participant reconciled");
        Ok(AuditReport {
            key,
            stored_cash: participant.cash_balance,
            derived_cash,
            positions,
            trade_count: trades.len(),
        })
    }

    fn report_drift(&self, key: &ParticipantKey, reason: String) {
        error!(key = %key, %reason, "reconciliation failed");
        self.emit_event(EventPayload::ReconciliationFailed(ReconciliationFailedEvent {
            tournament_id: key.tournament_id,
            wallet: key.wallet.clone(),
            reason,
        }));
    }

    // `trades` must come from the same store read as `participant`
    fn valuate_participant(&self, participant: &Participant, trades: &[Trade], now: Timestamp) -> Result<Valuation, EngineError> {
        let holdings = ledger::compute_holdings(trades)?;
        Ok(valuation::valuate(
            participant.cash_balance,
            &holdings,
            &self.prices,
            now,
            self.config.max_quote_age_ms,
        )?)
    }

    // 8.3: pull-model ranking over one consistent snapshot, valued at `now`
    pub(super) fn compute_leaderboard(
        &self,
        tournament: &Tournament,
        snapshot: &LedgerSnapshot,
        now: Timestamp,
        frozen: bool,
    ) -> Result<Leaderboard, EngineError> {
        let mut standings = Vec::with_capacity(snapshot.entries.len());
        for (participant, trades) in &snapshot.entries {
            let valuation = self.valuate_participant(participant, trades, now)?;
            standings.push(Standing {
                has_stale_prices: valuation.has_stale_prices(),
                wallet: participant.wallet.clone(),
                entry_currency: participant.entry_currency,
                starting_balance: participant.starting_balance,
                total_equity: valuation.total_equity,
                joined_at: participant.joined_at,
            });
        }

        Ok(Leaderboard {
            tournament_id: tournament.id,
            entries: leaderboard::rank(standings),
            computed_at: now,
            frozen,
        })
    }
}
