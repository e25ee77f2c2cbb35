// 6.0: prize calculator. turns the frozen final leaderboard plus the pots into
// per-rank payouts. reads persisted inputs only, so it can be re-run at any time
// and produce the same answer.
//
// rounding policy (one policy for every split): each share is floored to
// `scale` decimal places and whatever is left over goes to the best-placed
// recipient of that pot. the pot is always paid out exactly.

use crate::leaderboard::LeaderboardEntry;
use crate::types::{Amount, Bps, Currency, WalletId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Primary-pool split by rank. shares[0] is rank 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrizeCurve {
    pub shares: Vec<Bps>,
}

impl Default for PrizeCurve {
    fn default() -> Self {
        Self {
            shares: vec![Bps::new(5_000), Bps::new(3_000), Bps::new(2_000)],
        }
    }
}

impl PrizeCurve {
    pub fn new(shares: Vec<Bps>) -> Result<Self, PrizeError> {
        let curve = Self { shares };
        curve.validate()?;
        Ok(curve)
    }

    pub fn winner_take_all() -> Self {
        Self {
            shares: vec![Bps::FULL],
        }
    }

    pub fn validate(&self) -> Result<(), PrizeError> {
        if self.shares.is_empty() {
            return Err(PrizeError::InvalidCurve("curve has no ranks".to_string()));
        }
        if self.shares.iter().any(|s| s.value() == 0) {
            return Err(PrizeError::InvalidCurve("zero share in curve".to_string()));
        }
        let total: u32 = self.shares.iter().map(|s| s.value()).sum();
        if total != Bps::FULL.value() {
            return Err(PrizeError::InvalidCurve(format!("shares sum to {total} bps, expected 10000")));
        }
        Ok(())
    }

    pub fn paid_ranks(&self) -> usize {
        self.shares.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrizeAward {
    pub rank: u32,
    pub wallet: WalletId,
    pub primary_prize: Amount,
    pub bonus_prize: Amount,
}

impl PrizeAward {
    pub fn is_payable(&self) -> bool {
        self.primary_prize.is_positive() || self.bonus_prize.is_positive()
    }
}

// splits `pot` by integer weights, flooring each share; remainder to index 0
fn split_by_weights(pot: Amount, weights: &[Decimal], scale: u32) -> Vec<Amount> {
    let total: Decimal = weights.iter().copied().sum();
    if weights.is_empty() || total.is_zero() {
        return Vec::new();
    }
    let mut shares: Vec<Amount> = weights
        .iter()
        .map(|w| Amount::new(pot.value() * *w / total).floor_to(scale))
        .collect();
    let paid: Amount = shares.iter().sum();
    shares[0] = shares[0].add(pot.sub(paid));
    shares
}

// 6.1: primary pool over the curve ranks. curve ranks with nobody in them roll into rank 1.
fn primary_split(board_len: usize, pool: Amount, curve: &PrizeCurve, scale: u32) -> Vec<Amount> {
    let ranks = board_len.min(curve.paid_ranks());
    if ranks == 0 {
        return Vec::new();
    }
    // weights over the full curve so absent ranks' shares land in the remainder
    let weights: Vec<Decimal> = curve.shares.iter().map(|s| Decimal::from(s.value())).collect();
    let mut shares = split_by_weights(pool, &weights, scale);
    let unfilled: Amount = shares[ranks..].iter().sum();
    shares.truncate(ranks);
    shares[0] = shares[0].add(unfilled);
    shares
}

// 6.2: bonus jackpot among bonus entrants, linear rank weights (best of n gets n, worst gets 1)
fn bonus_split(bonus_entrants: usize, jackpot: Amount, scale: u32) -> Vec<Amount> {
    let weights: Vec<Decimal> = (0..bonus_entrants)
        .map(|i| Decimal::from((bonus_entrants - i) as u64))
        .collect();
    split_by_weights(jackpot, &weights, scale)
}

/// Per-rank payouts for a final leaderboard. Only payable ranks are returned,
/// in rank order.
pub fn compute_prizes(
    board: &[LeaderboardEntry],
    prize_pool: Amount,
    bonus_jackpot: Amount,
    curve: &PrizeCurve,
    scale: u32,
) -> Vec<PrizeAward> {
    let mut ordered: Vec<&LeaderboardEntry> = board.iter().collect();
    ordered.sort_by_key(|e| e.rank);

    let primary = primary_split(ordered.len(), prize_pool, curve, scale);

    let bonus_ranks: Vec<u32> = ordered
        .iter()
        .filter(|e| e.entry_currency == Currency::Bonus)
        .map(|e| e.rank)
        .collect();
    let bonus = bonus_split(bonus_ranks.len(), bonus_jackpot, scale);

    ordered
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            let primary_prize = primary.get(i).copied().unwrap_or_else(Amount::zero);
            let bonus_prize = bonus_ranks
                .iter()
                .position(|r| *r == entry.rank)
                .and_then(|j| bonus.get(j).copied())
                .unwrap_or_else(Amount::zero);
            PrizeAward {
                rank: entry.rank,
                wallet: entry.wallet.clone(),
                primary_prize,
                bonus_prize,
            }
        })
        .filter(PrizeAward::is_payable)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PrizeError {
    #[error("Invalid prize curve: {0}")]
    InvalidCurve(String),
}
