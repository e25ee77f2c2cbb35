// 4.0: position ledger. holdings = fold over the trade log in replay order.
// nothing here is stored; every call re-derives from the trades it is given,
// so two replays of the same log always agree.

use crate::trade::Trade;
use crate::types::{Amount, Price, TokenAddress, TradeId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Derived view of one token holding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holding {
    pub token: TokenAddress,
    pub quantity: Decimal,
    /// Price of the most recent trade in this token. Valuation falls back to it
    /// when no quote is cached.
    pub last_trade_price: Price,
    /// Average cost of the units still held.
    pub average_cost: Decimal,
}

fn replay_order(trades: &[Trade]) -> Vec<&Trade> {
    let mut ordered: Vec<&Trade> = trades.iter().collect();
    ordered.sort_by_key(|t| t.replay_key());
    ordered
}

// 4.1: net quantity of one token. a negative running total means a sell was
// recorded without the units to back it: that is a defect, never clamped.
pub fn compute_position(trades: &[Trade], token: &TokenAddress) -> Result<Decimal, LedgerError> {
    let mut quantity = Decimal::ZERO;
    for trade in replay_order(trades).into_iter().filter(|t| &t.token == token) {
        quantity = quantity
            .checked_add(trade.signed_quantity())
            .ok_or_else(|| LedgerError::Overflow {
                token: token.clone(),
                trade_id: trade.id,
            })?;
        if quantity < Decimal::ZERO {
            return Err(LedgerError::NegativePosition {
                token: token.clone(),
                quantity,
                trade_id: trade.id,
            });
        }
    }
    Ok(quantity)
}

// 4.2: every strictly positive holding, keyed by token (BTreeMap so iteration order is stable)
pub fn compute_all_positions(trades: &[Trade]) -> Result<BTreeMap<TokenAddress, Decimal>, LedgerError> {
    Ok(compute_holdings(trades)?
        .into_iter()
        .map(|(token, holding)| (token, holding.quantity))
        .collect())
}

// 4.3: full holdings with average cost and last trade price
pub fn compute_holdings(trades: &[Trade]) -> Result<BTreeMap<TokenAddress, Holding>, LedgerError> {
    let mut book: BTreeMap<TokenAddress, Holding> = BTreeMap::new();

    for trade in replay_order(trades) {
        let holding = book.entry(trade.token.clone()).or_insert_with(|| Holding {
            token: trade.token.clone(),
            quantity: Decimal::ZERO,
            last_trade_price: trade.price,
            average_cost: Decimal::ZERO,
        });

        let overflow = || LedgerError::Overflow {
            token: trade.token.clone(),
            trade_id: trade.id,
        };
        let new_quantity = holding
            .quantity
            .checked_add(trade.signed_quantity())
            .ok_or_else(overflow)?;
        if new_quantity < Decimal::ZERO {
            return Err(LedgerError::NegativePosition {
                token: trade.token.clone(),
                quantity: new_quantity,
                trade_id: trade.id,
            });
        }

        if trade.side.sign() > Decimal::ZERO {
            // weighted average over the units now held
            holding.average_cost = holding
                .quantity
                .checked_mul(holding.average_cost)
                .and_then(|held| held.checked_add(trade.total_value.value()))
                .and_then(|cost| cost.checked_div(new_quantity))
                .ok_or_else(overflow)?;
        } else if new_quantity.is_zero() {
            holding.average_cost = Decimal::ZERO;
        }

        holding.quantity = new_quantity;
        holding.last_trade_price = trade.price;
    }

    book.retain(|_, h| h.quantity > Decimal::ZERO);
    Ok(book)
}

// 4.4: cash implied by the log: starting - sum(buys) + sum(sells)
pub fn derive_cash(starting_balance: Amount, trades: &[Trade]) -> Result<Amount, LedgerError> {
    let mut cash = starting_balance.value();
    for trade in replay_order(trades) {
        cash = cash.checked_add(trade.cash_delta()).ok_or(LedgerError::Overflow {
            token: trade.token.clone(),
            trade_id: trade.id,
        })?;
        if cash < Decimal::ZERO {
            return Err(LedgerError::NegativeCash {
                balance: Amount::new(cash),
                trade_id: trade.id,
            });
        }
    }
    Ok(Amount::new(cash))
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("Position in {token} went negative ({quantity}) at trade {trade_id:?}")]
    NegativePosition {
        token: TokenAddress,
        quantity: Decimal,
        trade_id: TradeId,
    },

    #[error("Cash went negative ({balance}) at trade {trade_id:?}")]
    NegativeCash { balance: Amount, trade_id: TradeId },

    #[error("Fold over {token} left Decimal range at trade {trade_id:?}")]
    Overflow { token: TokenAddress, trade_id: TradeId },
}
