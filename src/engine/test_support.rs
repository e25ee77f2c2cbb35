// shared fixtures for the engine unit tests

use super::core::Engine;
use crate::clock::ManualClock;
use crate::config::EngineConfig;
use crate::price_feed::{PriceCache, PriceQuote};
use crate::store::InMemoryStore;
use crate::tournament::{EntryFees, TournamentSpec};
use crate::transfer::InMemoryTransferService;
use crate::types::{Amount, Price, Timestamp, TokenAddress, TournamentId};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

pub const WINDOW_MS: i64 = 86_400_000;

pub fn engine_with_transfers(start_ms: i64) -> (Engine, Arc<ManualClock>, Arc<InMemoryTransferService>) {
    let clock = Arc::new(ManualClock::new(Timestamp::from_millis(start_ms)));
    let transfers = Arc::new(InMemoryTransferService::new());
    let engine = Engine::new(
        EngineConfig::testing(),
        Arc::new(InMemoryStore::new()),
        Arc::new(PriceCache::new()),
        transfers.clone(),
        clock.clone(),
    )
    .unwrap();
    (engine, clock, transfers)
}

pub fn engine_at(start_ms: i64) -> (Engine, Arc<ManualClock>) {
    let (engine, clock, _) = engine_with_transfers(start_ms);
    (engine, clock)
}

pub fn spec_starting_now(clock: &ManualClock, max_participants: u32) -> TournamentSpec {
    use crate::clock::Clock;
    let now = clock.now();
    TournamentSpec {
        name: "test cup".to_string(),
        start_time: now,
        end_time: now.plus_millis(WINDOW_MS),
        entry_fees: EntryFees {
            primary: Amount::new(dec!(10)),
            bonus: Amount::new(dec!(100)),
        },
        max_participants,
        starting_balance: Amount::new(dec!(10000)),
        token_universe: [TokenAddress::new("X"), TokenAddress::new("Y")].into_iter().collect(),
    }
}

/// Create a tournament whose window opens now and sweep it to ACTIVE.
pub fn active_tournament(engine: &Engine, clock: &ManualClock, max_participants: u32) -> TournamentId {
    let tournament = engine.create_tournament(spec_starting_now(clock, max_participants)).unwrap();
    engine.advance_tournaments();
    tournament.id
}

pub fn set_price(engine: &Engine, clock: &ManualClock, token: &str, price: Decimal) {
    use crate::clock::Clock;
    engine.price_cache().ingest(
        TokenAddress::new(token),
        PriceQuote::new(Price::new_unchecked(price), clock.now()),
    );
}
