//! Leaderboard ranking.
//!
//! Pull model: the board is recomputed from current state on every request
//! rather than maintained per price tick. Ordering is a strict total order
//! because rank feeds payout amounts: equity descending, then earlier join,
//! then wallet address as the last resort for same-millisecond joins.

use crate::types::{Amount, Currency, Timestamp, TournamentId, WalletId};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Ranking input for one participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Standing {
    pub wallet: WalletId,
    pub entry_currency: Currency,
    pub starting_balance: Amount,
    pub total_equity: Amount,
    pub joined_at: Timestamp,
    pub has_stale_prices: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub rank: u32,
    pub wallet: WalletId,
    pub entry_currency: Currency,
    pub total_equity: Amount,
    pub profit: Amount,
    pub profit_percent: Decimal,
    pub joined_at: Timestamp,
    pub has_stale_prices: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leaderboard {
    pub tournament_id: TournamentId,
    pub entries: Vec<LeaderboardEntry>,
    pub computed_at: Timestamp,
    /// True once this is the snapshot frozen at ACTIVE -> ENDED.
    pub frozen: bool,
}

impl Leaderboard {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn standing_order(a: &Standing, b: &Standing) -> Ordering {
    b.total_equity
        .cmp(&a.total_equity)
        .then_with(|| a.joined_at.cmp(&b.joined_at))
        .then_with(|| a.wallet.cmp(&b.wallet))
}

pub fn rank(mut standings: Vec<Standing>) -> Vec<LeaderboardEntry> {
    standings.sort_by(standing_order);

    standings
        .into_iter()
        .enumerate()
        .map(|(i, s)| {
            let profit = s.total_equity.sub(s.starting_balance);
            let profit_percent = if s.starting_balance.is_zero() {
                Decimal::ZERO
            } else {
                (profit.value() / s.starting_balance.value() * dec!(100)).round_dp(4)
            };
            LeaderboardEntry {
                rank: i as u32 + 1,
                wallet: s.wallet,
                entry_currency: s.entry_currency,
                total_equity: s.total_equity,
                profit,
                profit_percent,
                joined_at: s.joined_at,
                has_stale_prices: s.has_stale_prices,
            }
        })
        .collect()
}
