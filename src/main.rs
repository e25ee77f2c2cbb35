//! Tournament Engine Simulation.
//!
//! Runs the engine end to end against the in-memory store, a static price
//! source and a mock transfer service: trading, the full lifecycle through
//! payouts, and concurrent claims against a flaky transfer service.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeSet;
use std::sync::Arc;
use tournament_core::*;
use tracing_subscriber::EnvFilter;

const HOUR_MS: i64 = 3_600_000;

struct Sim {
    engine: Arc<Engine>,
    clock: Arc<ManualClock>,
    source: Arc<StaticPriceSource>,
    ingestor: PriceIngestor,
    transfers: Arc<InMemoryTransferService>,
}

impl Sim {
    fn new(transfers: InMemoryTransferService) -> Self {
        let clock = Arc::new(ManualClock::new(Timestamp::from_millis(1_700_000_000_000)));
        let cache = Arc::new(PriceCache::new());
        let source = Arc::new(StaticPriceSource::new());
        let transfers = Arc::new(transfers);
        let engine = Engine::new(
            EngineConfig::testing(),
            Arc::new(InMemoryStore::new()),
            cache.clone(),
            transfers.clone(),
            clock.clone(),
        )
        .unwrap();
        Self {
            engine: Arc::new(engine),
            clock,
            ingestor: PriceIngestor::new(source.clone(), cache),
            source,
            transfers,
        }
    }

    async fn quote(&self, token: &str, price: Decimal) {
        let token = TokenAddress::new(token);
        self.source
            .set(token.clone(), PriceQuote::new(Price::new_unchecked(price), self.clock.now()));
        self.ingestor.refresh([&token]).await;
    }

    fn schedule(&self, name: &str, max_participants: u32) -> TournamentId {
        let now = self.clock.now();
        let universe: BTreeSet<TokenAddress> = ["SOL", "BONK", "JUP"].into_iter().map(TokenAddress::new).collect();
        let spec = TournamentSpec {
            name: name.to_string(),
            start_time: now,
            end_time: now.plus_millis(HOUR_MS),
            entry_fees: EntryFees {
                primary: Amount::new(dec!(10)),
                bonus: Amount::new(dec!(1000)),
            },
            max_participants,
            starting_balance: Amount::new(dec!(10000)),
            token_universe: universe,
        };
        let tournament = self.engine.create_tournament(spec).unwrap();
        self.engine.advance_tournaments();
        tournament.id
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    println!("Tournament Engine Simulation");
    println!("Virtual trading, frozen leaderboard, idempotent payouts\n");

    scenario_1_basic_trading().await;
    scenario_2_full_lifecycle().await;
    scenario_3_concurrent_claims().await;

    println!("\nAll simulations completed successfully.");
}

/// Buy, sell, and the rejections that guard balances and positions.
async fn scenario_1_basic_trading() {
    println!("Scenario 1: Basic Trading\n");

    let sim = Sim::new(InMemoryTransferService::new());
    let tid = sim.schedule("warmup", 10);
    let alice = WalletId::new("alice");
    let sol = TokenAddress::new("SOL");
    sim.engine.join_tournament(tid, alice.clone(), Currency::Primary).unwrap();

    sim.quote("SOL", dec!(10)).await;
    let buy = sim.engine.execute_trade(tid, &alice, Side::Buy, &sol, dec!(50)).unwrap();
    println!("  Alice buys 50 SOL @ 10, cash {}", buy.new_cash_balance);

    sim.quote("SOL", dec!(12)).await;
    let sell = sim.engine.execute_trade(tid, &alice, Side::Sell, &sol, dec!(20)).unwrap();
    println!("  Alice sells 20 SOL @ 12, cash {}", sell.new_cash_balance);
    println!("  Position: {} SOL", sim.engine.compute_position(tid, &alice, &sol).unwrap());

    match sim.engine.execute_trade(tid, &alice, Side::Sell, &sol, dec!(31)) {
        Err(e) => println!("  Oversell rejected: {e}"),
        Ok(_) => println!("  Oversell unexpectedly accepted"),
    }

    let portfolio = sim.engine.get_portfolio(tid, &alice).unwrap();
    println!(
        "  Equity {} (cash {} + positions {}), profit {}\n",
        portfolio.valuation.total_equity,
        portfolio.valuation.cash_balance,
        portfolio.valuation.positions_value,
        portfolio.profit
    );
}

/// Join, trade, close, freeze, settle and pay every claim.
async fn scenario_2_full_lifecycle() {
    println!("Scenario 2: Full Lifecycle\n");

    let sim = Sim::new(InMemoryTransferService::new());
    let tid = sim.schedule("weekly", 10);
    let traders = [
        ("whale", Currency::Bonus, "SOL", dec!(500)),
        ("degen", Currency::Primary, "BONK", dec!(900)),
        ("hodler", Currency::Primary, "JUP", dec!(100)),
        ("lurker", Currency::Bonus, "SOL", dec!(1)),
    ];

    sim.quote("SOL", dec!(10)).await;
    sim.quote("BONK", dec!(10)).await;
    sim.quote("JUP", dec!(10)).await;

    for (name, currency, token, qty) in &traders {
        let wallet = WalletId::new(*name);
        sim.engine.join_tournament(tid, wallet.clone(), *currency).unwrap();
        sim.engine
            .execute_trade(tid, &wallet, Side::Buy, &TokenAddress::new(*token), *qty)
            .unwrap();
        sim.clock.advance(1_000);
    }

    sim.quote("SOL", dec!(14)).await;
    sim.quote("BONK", dec!(6)).await;
    sim.quote("JUP", dec!(11)).await;

    sim.clock.advance(HOUR_MS);
    for record in sim.engine.advance_tournaments() {
        println!("  {} -> {:?}", record.tournament_id, record.transition);
    }

    let board = sim.engine.get_leaderboard(tid).unwrap();
    for entry in &board.entries {
        println!(
            "  #{} {:<7} equity {:>8} profit {:>6}%",
            entry.rank, entry.wallet, entry.total_equity, entry.profit_percent
        );
    }

    let summary = sim.engine.settle_tournament(tid).unwrap();
    println!("\n  Settled with {} claims", summary.claims_created);
    for award in &summary.awards {
        let receipt = sim.engine.claim_prize(tid, &award.wallet).await.unwrap();
        println!(
            "  {} paid {} primary + {} bonus ({} transfers)",
            receipt.wallet,
            receipt.primary_paid,
            receipt.bonus_paid,
            receipt.transfer_refs.len()
        );
    }
    println!("  Transfer calls: {}\n", sim.transfers.call_count());
}

/// Many concurrent claims for one winner against a service that times out twice.
async fn scenario_3_concurrent_claims() {
    println!("Scenario 3: Concurrent Claims\n");

    let sim = Sim::new(InMemoryTransferService::new().with_latency(5));
    let tid = sim.schedule("flaky", 10);
    let winner = WalletId::new("winner");
    sim.engine.join_tournament(tid, winner.clone(), Currency::Bonus).unwrap();
    sim.engine.join_tournament(tid, WalletId::new("runner-up"), Currency::Primary).unwrap();

    sim.clock.advance(HOUR_MS);
    sim.engine.advance_tournaments();
    sim.engine.settle_tournament(tid).unwrap();

    sim.transfers.fail_next(Currency::Bonus, TransferError::Failed("rpc timeout".into()));
    sim.transfers.fail_next(Currency::Bonus, TransferError::Failed("rpc timeout".into()));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = sim.engine.clone();
        let wallet = winner.clone();
        handles.push(tokio::spawn(async move { engine.claim_prize(tid, &wallet).await }));
    }

    let mut refs = BTreeSet::new();
    for handle in handles {
        let receipt = handle.await.unwrap().unwrap();
        for transfer_ref in receipt.transfer_refs.values() {
            refs.insert(transfer_ref.clone());
        }
    }

    println!("  8 concurrent claims, {} distinct transfer refs", refs.len());
    println!("  Transfers executed: {}", sim.transfers.executed_count());
    println!("  Failed claims awaiting operator: {}", sim.engine.failed_claims().len());
}
