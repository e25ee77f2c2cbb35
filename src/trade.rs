// 3.0: append-only trade record. the sole source of truth for positions.
// price is frozen at execution; nothing downstream ever re-prices a trade.

use crate::types::{Amount, ParticipantKey, Price, Quantity, Side, Timestamp, TokenAddress, TournamentId, TradeId, WalletId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub id: TradeId,
    pub tournament_id: TournamentId,
    pub wallet: WalletId,
    pub token: TokenAddress,
    pub side: Side,
    pub quantity: Quantity,
    pub price: Price,
    pub total_value: Amount,
    pub executed_at: Timestamp,
}

impl Trade {
    /// None when the notional (quantity x price) is out of range.
    pub fn new(
        id: TradeId,
        key: &ParticipantKey,
        token: TokenAddress,
        side: Side,
        quantity: Quantity,
        price: Price,
        executed_at: Timestamp,
    ) -> Option<Self> {
        Some(Self {
            id,
            tournament_id: key.tournament_id,
            wallet: key.wallet.clone(),
            token,
            side,
            quantity,
            price,
            total_value: quantity.notional(price)?,
            executed_at,
        })
    }

    // +qty for buys, -qty for sells
    pub fn signed_quantity(&self) -> Decimal {
        self.side.sign() * self.quantity.value()
    }

    // cash effect on the participant: buys spend, sells earn
    pub fn cash_delta(&self) -> Decimal {
        -self.side.sign() * self.total_value.value()
    }

    // replay order: execution time, then id to break same-millisecond ties
    pub fn replay_key(&self) -> (Timestamp, TradeId) {
        (self.executed_at, self.id)
    }
}
