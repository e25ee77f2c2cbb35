//! Participant and cash management.
//!
//! A participant holds virtual cash only. Token holdings are never stored
//! here; they are derived from the trade log by the ledger.

use crate::types::{Amount, Currency, ParticipantKey, Side, Timestamp, TournamentId, WalletId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub tournament_id: TournamentId,
    pub wallet: WalletId,
    pub entry_currency: Currency,
    pub starting_balance: Amount,
    pub cash_balance: Amount,
    pub joined_at: Timestamp,
    /// Bumped by the store on every balance write. Used as the optimistic
    /// precondition for the next write.
    pub version: u64,
    pub trade_count: u64,
    pub final_rank: Option<u32>,
    pub final_equity: Option<Amount>,
    pub primary_prize: Option<Amount>,
    pub bonus_prize: Option<Amount>,
}

impl Participant {
    pub fn new(
        tournament_id: TournamentId,
        wallet: WalletId,
        entry_currency: Currency,
        starting_balance: Amount,
        joined_at: Timestamp,
    ) -> Self {
        Self {
            tournament_id,
            wallet,
            entry_currency,
            starting_balance,
            cash_balance: starting_balance,
            joined_at,
            version: 0,
            trade_count: 0,
            final_rank: None,
            final_equity: None,
            primary_prize: None,
            bonus_prize: None,
        }
    }

    pub fn key(&self) -> ParticipantKey {
        ParticipantKey::new(self.tournament_id, self.wallet.clone())
    }

    pub fn debit(&mut self, amount: Amount) -> Result<(), ParticipantError> {
        if amount > self.cash_balance {
            return Err(ParticipantError::InsufficientBalance {
                requested: amount,
                available: self.cash_balance,
            });
        }
        self.cash_balance = self.cash_balance.sub(amount);
        Ok(())
    }

    pub fn credit(&mut self, amount: Amount) -> Result<(), ParticipantError> {
        self.cash_balance = self
            .cash_balance
            .checked_add(amount)
            .ok_or(ParticipantError::BalanceOverflow { amount })?;
        Ok(())
    }

    /// Cash side of a fill. Returns the balance after the trade.
    pub fn apply_fill(&mut self, side: Side, total_value: Amount) -> Result<Amount, ParticipantError> {
        match side {
            Side::Buy => self.debit(total_value)?,
            Side::Sell => self.credit(total_value)?,
        }
        self.trade_count += 1;
        Ok(self.cash_balance)
    }

    pub fn record_final(&mut self, rank: u32, equity: Amount, primary: Amount, bonus: Amount) {
        self.final_rank = Some(rank);
        self.final_equity = Some(equity);
        self.primary_prize = Some(primary);
        self.bonus_prize = Some(bonus);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParticipantError {
    #[error("Insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: Amount, available: Amount },

    #[error("Crediting {amount} would overflow the balance")]
    BalanceOverflow { amount: Amount },
}
