// 8.0: tournament engine. coordinates joins, trade execution, valuation,
// lifecycle transitions, settlement and payouts over the store boundary.
// no timers inside: a scheduler calls advance_tournaments.

mod core;
mod lifecycle;
mod payouts;
mod portfolio;
mod results;
mod trading;

#[cfg(test)]
mod test_support;

pub use self::core::Engine;
pub use payouts::transfer_idempotency_key;
pub use results::{
    AuditReport, EngineError, ErrorCategory, PayoutProgress, Portfolio, SettlementSummary, TradeExecution,
    TransitionRecord,
};
