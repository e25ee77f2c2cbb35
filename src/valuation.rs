// 5.0: mark-to-market. equity = cash + sum(qty * latest price).
// a portfolio always values: a stale or missing quote falls back to the last
// known price and raises a staleness flag instead of failing.

use crate::ledger::Holding;
use crate::price_feed::PriceCache;
use crate::types::{Amount, Price, Timestamp, TokenAddress};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceBasis {
    /// Cached quote inside the freshness window.
    FreshQuote,
    /// Cached quote older than the freshness window.
    StaleQuote,
    /// No quote cached at all; last trade price for the token.
    LastTrade,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionValuation {
    pub token: TokenAddress,
    pub quantity: Decimal,
    pub price: Price,
    pub value: Amount,
    pub basis: PriceBasis,
    pub observed_at: Option<Timestamp>,
}

impl PositionValuation {
    pub fn is_stale(&self) -> bool {
        self.basis != PriceBasis::FreshQuote
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Valuation {
    pub cash_balance: Amount,
    pub positions_value: Amount,
    pub total_equity: Amount,
    pub positions: Vec<PositionValuation>,
    pub stale_tokens: Vec<TokenAddress>,
    pub valued_at: Timestamp,
}

impl Valuation {
    pub fn has_stale_prices(&self) -> bool {
        !self.stale_tokens.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValuationError {
    #[error("{quantity} {token} at {price} is out of range")]
    PositionOverflow {
        token: TokenAddress,
        quantity: Decimal,
        price: Price,
    },

    #[error("Total equity is out of range")]
    EquityOverflow,
}

// 5.1: value a participant's holdings against the cache
pub fn valuate(
    cash_balance: Amount,
    holdings: &BTreeMap<TokenAddress, Holding>,
    cache: &PriceCache,
    now: Timestamp,
    max_quote_age_ms: i64,
) -> Result<Valuation, ValuationError> {
    let mut positions = Vec::with_capacity(holdings.len());
    let mut stale_tokens = Vec::new();

    for (token, holding) in holdings {
        let (price, basis, observed_at) = match cache.latest(token) {
            Some(quote) if !quote.is_stale(now, max_quote_age_ms) => {
                (quote.price, PriceBasis::FreshQuote, Some(quote.observed_at))
            }
            Some(quote) => (quote.price, PriceBasis::StaleQuote, Some(quote.observed_at)),
            None => (holding.last_trade_price, PriceBasis::LastTrade, None),
        };

        if basis != PriceBasis::FreshQuote {
            debug!(token = %token, basis = ?basis, "valuing position at last known price");
            stale_tokens.push(token.clone());
        }

        let value = holding
            .quantity
            .checked_mul(price.value())
            .ok_or_else(|| ValuationError::PositionOverflow {
                token: token.clone(),
                quantity: holding.quantity,
                price,
            })?;
        positions.push(PositionValuation {
            token: token.clone(),
            quantity: holding.quantity,
            price,
            value: Amount::new(value),
            basis,
            observed_at,
        });
    }

    let positions_value = positions
        .iter()
        .try_fold(Decimal::ZERO, |acc, p| acc.checked_add(p.value.value()))
        .ok_or(ValuationError::EquityOverflow)?;
    let total_equity = cash_balance
        .value()
        .checked_add(positions_value)
        .ok_or(ValuationError::EquityOverflow)?;

    Ok(Valuation {
        cash_balance,
        positions_value: Amount::new(positions_value),
        total_equity: Amount::new(total_equity),
        positions,
        stale_tokens,
        valued_at: now,
    })
}
