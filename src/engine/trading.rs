//! Joining and trade execution.

use super::core::Engine;
use super::results::{EngineError, ErrorCategory, TradeExecution};
use crate::events::{EventPayload, ParticipantJoinedEvent, TradeExecutedEvent, TradeRejectedEvent};
use crate::ledger;
use crate::participant::{Participant, ParticipantError};
use crate::store::StoreError;
use crate::trade::Trade;
use crate::types::{Currency, ParticipantKey, Quantity, Side, TokenAddress, TournamentId, WalletId};
use rust_decimal::Decimal;
use tracing::{debug, info};

impl Engine {
    /// Join a tournament. The participant row and the entry fee's pool
    /// contribution are written together.
    pub fn join_tournament(
        &self,
        tournament_id: TournamentId,
        wallet: WalletId,
        entry_currency: Currency,
    ) -> Result<Participant, EngineError> {
        let key = ParticipantKey::new(tournament_id, wallet.clone());
        let mut retried = false;

        loop {
            let now = self.now();
            let mut tournament = self.get_tournament(tournament_id)?;
            if !tournament.accepts_joins(now) {
                return Err(EngineError::TournamentClosed(tournament_id));
            }
            if self.store.participant(&key).is_ok() {
                return Err(EngineError::AlreadyJoined(key));
            }
            if tournament.is_full() {
                return Err(EngineError::TournamentFull(tournament_id));
            }

            let entry_fee = tournament.record_entry(entry_currency);
            let participant = Participant::new(
                tournament_id,
                wallet.clone(),
                entry_currency,
                tournament.starting_balance,
                now,
            );

            match self.store.insert_participant(participant.clone(), &tournament) {
                Ok(()) => {
                    info!(
                        tournament_id = %tournament_id,
                        wallet = %wallet,
                        currency = %entry_currency,
                        fee = %entry_fee,
                        "participant joined"
                    );
                    self.emit_event(EventPayload::ParticipantJoined(ParticipantJoinedEvent {
                        tournament_id,
                        wallet,
                        entry_currency,
                        entry_fee,
                    }));
                    return Ok(participant);
                }
                Err(StoreError::Duplicate(_)) => return Err(EngineError::AlreadyJoined(key)),
                // another join moved the count; re-read once
                Err(StoreError::Conflict(reason)) if !retried => {
                    debug!(tournament_id = %tournament_id, %reason, "join lost a race, retrying");
                    retried = true;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Execute a market trade at the latest cached price.
    pub fn execute_trade(
        &self,
        tournament_id: TournamentId,
        wallet: &WalletId,
        side: Side,
        token: &TokenAddress,
        quantity: Decimal,
    ) -> Result<TradeExecution, EngineError> {
        let key = ParticipantKey::new(tournament_id, wallet.clone());
        let quantity = Quantity::new(quantity)
            .ok_or_else(|| EngineError::InvalidInput(format!("quantity must be positive, got {quantity}")))?;

        let lock = self.participant_lock(&key);
        let _guard = lock.lock();

        let mut retried = false;
        loop {
            match self.try_execute_trade(&key, side, token, quantity) {
                Ok(execution) => return Ok(execution),
                Err(e) if e.category() == ErrorCategory::ConcurrencyConflict && !retried => {
                    debug!(key = %key, error = %e, "trade lost a race, retrying");
                    retried = true;
                }
                Err(e) => {
                    if matches!(e.category(), ErrorCategory::Validation | ErrorCategory::PreconditionFailed) {
                        info!(key = %key, token = %token, side = %side, reason = %e, "trade rejected");
                        self.emit_event(EventPayload::TradeRejected(TradeRejectedEvent {
                            tournament_id,
                            wallet: wallet.clone(),
                            token: token.clone(),
                            side,
                            reason: e.to_string(),
                        }));
                    }
                    return Err(e);
                }
            }
        }
    }

    // 8.2: one pass of the trade pipeline. every check reads current state;
    // the version on `participant` is the precondition for the final write.
    fn try_execute_trade(
        &self,
        key: &ParticipantKey,
        side: Side,
        token: &TokenAddress,
        quantity: Quantity,
    ) -> Result<TradeExecution, EngineError> {
        let now = self.now();
        let tournament = self.get_tournament(key.tournament_id)?;

        // wall clock, not just status: the sweep may not have flipped it yet
        if !tournament.accepts_trades(now) {
            return Err(EngineError::TournamentClosed(tournament.id));
        }
        if !tournament.has_token(token) {
            return Err(EngineError::TokenNotInUniverse {
                tournament_id: tournament.id,
                token: token.clone(),
            });
        }

        // cash and holdings from one read of the log
        let (participant, trades) = self.participant_with_trades(key)?;
        let quote = self.prices.fresh(token, now, self.config.max_quote_age_ms)?;

        if side == Side::Sell {
            let held = ledger::compute_position(&trades, token)?;
            if quantity.value() > held {
                return Err(EngineError::InsufficientPosition {
                    token: token.clone(),
                    requested: quantity.value(),
                    held,
                });
            }
        }

        let out_of_range =
            || EngineError::InvalidInput(format!("notional of {quantity} {token} at {} is out of range", quote.price));
        let total_value = quantity.notional(quote.price).ok_or_else(out_of_range)?;

        let mut next = participant;
        next.apply_fill(side, total_value).map_err(|e| match e {
            ParticipantError::InsufficientBalance { requested, available } => {
                EngineError::InsufficientBalance { requested, available }
            }
            ParticipantError::BalanceOverflow { .. } => out_of_range(),
        })?;

        let trade = Trade::new(self.store.next_trade_id(), key, token.clone(), side, quantity, quote.price, now)
            .ok_or_else(out_of_range)?;
        let written = self.store.append_trade(trade.clone(), &next)?;

        info!(
            key = %key,
            trade_id = trade.id.0,
            token = %token,
            side = %side,
            quantity = %quantity,
            price = %quote.price,
            cash = %written.cash_balance,
            "trade executed"
        );
        self.emit_event(EventPayload::TradeExecuted(TradeExecutedEvent {
            tournament_id: key.tournament_id,
            wallet: key.wallet.clone(),
            trade_id: trade.id,
            token: token.clone(),
            side,
            quantity,
            price: quote.price,
            new_cash_balance: written.cash_balance,
        }));

        Ok(TradeExecution {
            trade,
            new_cash_balance: written.cash_balance,
        })
    }
}
