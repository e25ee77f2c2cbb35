// tournament-core: tournament trading and settlement engine.
// money-first architecture: no negative balance or position, exactly-once payout.
// durable state sits behind the store trait; prices and transfers behind async traits.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs: primitives: TournamentId, WalletId, Price, Quantity, Amount
//   2.x  tournament.rs: tournament record + UPCOMING/ACTIVE/ENDED/SETTLED machine
//   3.x  trade.rs: append-only trade record
//   4.x  ledger.rs: positions and cash derived from the trade log
//   5.x  valuation.rs: mark-to-market with stale-price fallback
//   6.x  prize.rs: prize curve, pool and jackpot splits
//   7.x  config.rs: engine settings, env overrides, presets
//   8.x  engine/: facade: joins, trades, portfolio, lifecycle, payouts
//   9.x  price_feed.rs: price source + read-shared quote cache
//   9.2  transfer.rs: payout transfer service + bounded retry (mocked)
//   10.x store.rs: durable-store boundary + in-memory store
//   11.x events.rs: state transition events for audit
//   participant.rs, leaderboard.rs, claim.rs, clock.rs are documented inline

// core modules
pub mod clock;
pub mod engine;
pub mod events;
pub mod leaderboard;
pub mod ledger;
pub mod participant;
pub mod prize;
pub mod tournament;
pub mod trade;
pub mod types;
pub mod valuation;

// settlement modules
pub mod claim;

// integration modules
pub mod config;
pub mod price_feed;
pub mod store;
pub mod transfer;

// re exports for convenience
pub use claim::*;
pub use clock::*;
pub use engine::*;
pub use events::*;
pub use leaderboard::{rank, Leaderboard, LeaderboardEntry, Standing};
pub use ledger::{compute_all_positions, compute_holdings, compute_position, derive_cash, Holding, LedgerError};
pub use participant::*;
pub use prize::*;
pub use tournament::*;
pub use trade::*;
pub use types::*;
pub use valuation::*;
pub use config::{ConfigError, EngineConfig};
pub use price_feed::{PriceCache, PriceFeedError, PriceIngestor, PriceQuote, PriceSource, StaticPriceSource};
pub use store::{InMemoryStore, LedgerSnapshot, StoreError, TournamentStore};
pub use transfer::{
    transfer_with_retry, InMemoryTransferService, RetryPolicy, TransferError, TransferFailure, TransferRef,
    TransferRequest, TransferService,
};
