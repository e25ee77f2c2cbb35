//! Stress tests
//!
//! Many threads trading against one engine, plus a store wrapper that lets a
//! test slip a write in between the engine's reads and writes. Cash, trade
//! log and frozen leaderboard must stay consistent whatever the interleaving.

use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;
use tournament_core::*;

const HOUR_MS: i64 = 3_600_000;

fn spec(clock: &ManualClock) -> TournamentSpec {
    let start = clock.now();
    TournamentSpec {
        name: "stress cup".to_string(),
        start_time: start,
        end_time: start.plus_millis(HOUR_MS),
        entry_fees: EntryFees {
            primary: Amount::new(dec!(10)),
            bonus: Amount::new(dec!(100)),
        },
        max_participants: 100,
        starting_balance: Amount::new(dec!(10000)),
        token_universe: ["X", "Y"].into_iter().map(TokenAddress::new).collect(),
    }
}

fn engine_over(store: Arc<dyn TournamentStore>) -> (Arc<Engine>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(Timestamp::from_millis(1_000_000)));
    let engine = Engine::new(
        EngineConfig::testing(),
        store,
        Arc::new(PriceCache::new()),
        Arc::new(InMemoryTransferService::new()),
        clock.clone(),
    )
    .unwrap();
    (Arc::new(engine), clock)
}

fn active(engine: &Engine, clock: &ManualClock) -> TournamentId {
    let id = engine.create_tournament(spec(clock)).unwrap().id;
    engine.advance_tournaments();
    id
}

fn price(engine: &Engine, clock: &ManualClock, token: &str, price: Decimal) {
    engine.price_cache().ingest(
        TokenAddress::new(token),
        PriceQuote::new(Price::new_unchecked(price), clock.now()),
    );
}

/// Concurrent trades on one wallet.
mod same_participant {
    use super::*;

    #[test]
    fn parallel_buys_serialize_and_reconcile() {
        const THREADS: usize = 16;
        let (engine, clock) = engine_over(Arc::new(InMemoryStore::new()));
        let tid = active(&engine, &clock);
        let alice = WalletId::new("alice");
        engine.join_tournament(tid, alice.clone(), Currency::Primary).unwrap();
        price(&engine, &clock, "X", dec!(10));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let engine = engine.clone();
                let alice = alice.clone();
                thread::spawn(move || engine.execute_trade(tid, &alice, Side::Buy, &TokenAddress::new("X"), dec!(1)))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        let report = engine.audit_participant(tid, &alice).unwrap();
        assert_eq!(report.trade_count, THREADS);
        assert_eq!(report.stored_cash.value(), dec!(10000) - dec!(10) * Decimal::from(THREADS));
        assert_eq!(report.positions[&TokenAddress::new("X")], Decimal::from(THREADS));

        let participant = engine.get_participant(&ParticipantKey::new(tid, alice)).unwrap();
        assert_eq!(participant.trade_count, THREADS as u64);
        assert_eq!(participant.version, THREADS as u64);
    }

    #[test]
    fn racing_sells_never_oversell() {
        let (engine, clock) = engine_over(Arc::new(InMemoryStore::new()));
        let tid = active(&engine, &clock);
        let alice = WalletId::new("alice");
        let x = TokenAddress::new("X");
        engine.join_tournament(tid, alice.clone(), Currency::Primary).unwrap();
        price(&engine, &clock, "X", dec!(10));
        engine.execute_trade(tid, &alice, Side::Buy, &x, dec!(5)).unwrap();

        // twelve sellers race for five units
        let handles: Vec<_> = (0..12)
            .map(|_| {
                let engine = engine.clone();
                let alice = alice.clone();
                let x = x.clone();
                thread::spawn(move || engine.execute_trade(tid, &alice, Side::Sell, &x, dec!(1)))
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let filled = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(filled, 5);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, EngineError::InsufficientPosition { .. })));
        assert_eq!(engine.compute_position(tid, &alice, &x).unwrap(), Decimal::ZERO);
        assert_eq!(engine.audit_participant(tid, &alice).unwrap().stored_cash.value(), dec!(10000));
    }

    #[test]
    fn reads_during_trading_see_whole_trades() {
        let (engine, clock) = engine_over(Arc::new(InMemoryStore::new()));
        let tid = active(&engine, &clock);
        let alice = WalletId::new("alice");
        engine.join_tournament(tid, alice.clone(), Currency::Primary).unwrap();
        price(&engine, &clock, "X", dec!(10));

        let trader = {
            let engine = engine.clone();
            let alice = alice.clone();
            thread::spawn(move || {
                let x = TokenAddress::new("X");
                for i in 0..200 {
                    let side = if i % 2 == 0 { Side::Buy } else { Side::Sell };
                    engine.execute_trade(tid, &alice, side, &x, dec!(7)).unwrap();
                }
            })
        };

        // constant price: any consistent view is worth exactly the stake
        for _ in 0..200 {
            let valuation = engine.valuate(tid, &alice).unwrap();
            assert_eq!(valuation.total_equity.value(), dec!(10000));
            engine.audit_participant(tid, &alice).unwrap();
            let board = engine.get_leaderboard(tid).unwrap();
            assert_eq!(board.entries[0].total_equity.value(), dec!(10000));
        }
        trader.join().unwrap();
    }
}

/// Concurrent trades across wallets.
mod cross_participant {
    use super::*;

    #[test]
    fn wallets_trade_in_parallel() {
        const WALLETS: usize = 8;
        const TRADES: usize = 10;
        let (engine, clock) = engine_over(Arc::new(InMemoryStore::new()));
        let tid = active(&engine, &clock);
        price(&engine, &clock, "X", dec!(10));
        price(&engine, &clock, "Y", dec!(4));

        let wallets: Vec<WalletId> = (0..WALLETS).map(|i| WalletId::new(format!("w{i}"))).collect();
        for wallet in &wallets {
            engine.join_tournament(tid, wallet.clone(), Currency::Primary).unwrap();
        }

        let handles: Vec<_> = wallets
            .iter()
            .enumerate()
            .map(|(i, wallet)| {
                let engine = engine.clone();
                let wallet = wallet.clone();
                let token = TokenAddress::new(if i % 2 == 0 { "X" } else { "Y" });
                thread::spawn(move || {
                    (0..TRADES)
                        .map(|_| engine.execute_trade(tid, &wallet, Side::Buy, &token, dec!(1)).unwrap().trade.id)
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut ids = BTreeSet::new();
        for handle in handles {
            ids.extend(handle.join().unwrap());
        }
        assert_eq!(ids.len(), WALLETS * TRADES);

        for (i, wallet) in wallets.iter().enumerate() {
            let report = engine.audit_participant(tid, wallet).unwrap();
            let unit = if i % 2 == 0 { dec!(10) } else { dec!(4) };
            assert_eq!(report.trade_count, TRADES);
            assert_eq!(report.stored_cash.value(), dec!(10000) - unit * Decimal::from(TRADES));
        }
        assert_eq!(engine.get_leaderboard(tid).unwrap().len(), WALLETS);
    }
}

type Hook = Box<dyn FnOnce(&InMemoryStore) + Send>;

/// Delegates to an in-memory store and runs a one-shot hook at a chosen
/// point, standing in for another writer that got there first.
#[derive(Default)]
struct InterleavingStore {
    inner: InMemoryStore,
    after_participant_read: Mutex<Option<Hook>>,
    before_append: Mutex<Option<Hook>>,
    after_snapshot: Mutex<Option<Hook>>,
}

impl InterleavingStore {
    fn fire(&self, slot: &Mutex<Option<Hook>>) {
        let hook = slot.lock().take();
        if let Some(hook) = hook {
            hook(&self.inner);
        }
    }
}

impl TournamentStore for InterleavingStore {
    fn next_tournament_id(&self) -> TournamentId {
        self.inner.next_tournament_id()
    }
    fn next_trade_id(&self) -> TradeId {
        self.inner.next_trade_id()
    }
    fn insert_tournament(&self, tournament: Tournament) -> Result<(), StoreError> {
        self.inner.insert_tournament(tournament)
    }
    fn tournament(&self, id: TournamentId) -> Result<Tournament, StoreError> {
        self.inner.tournament(id)
    }
    fn tournaments(&self) -> Vec<Tournament> {
        self.inner.tournaments()
    }
    fn update_tournament(&self, tournament: &Tournament, expected_status: TournamentStatus) -> Result<(), StoreError> {
        self.inner.update_tournament(tournament, expected_status)
    }
    fn insert_participant(&self, participant: Participant, tournament: &Tournament) -> Result<(), StoreError> {
        self.inner.insert_participant(participant, tournament)
    }
    fn participant(&self, key: &ParticipantKey) -> Result<Participant, StoreError> {
        let read = self.inner.participant(key);
        self.fire(&self.after_participant_read);
        read
    }
    fn participant_with_trades(&self, key: &ParticipantKey) -> Result<(Participant, Vec<Trade>), StoreError> {
        let read = self.inner.participant_with_trades(key);
        self.fire(&self.after_participant_read);
        read
    }
    fn ledger_snapshot(&self, tournament_id: TournamentId) -> LedgerSnapshot {
        let snapshot = self.inner.ledger_snapshot(tournament_id);
        self.fire(&self.after_snapshot);
        snapshot
    }
    fn append_trade(&self, trade: Trade, participant: &Participant) -> Result<Participant, StoreError> {
        self.fire(&self.before_append);
        self.inner.append_trade(trade, participant)
    }
    fn trades(&self, key: &ParticipantKey) -> Vec<Trade> {
        self.inner.trades(key)
    }
    fn freeze_leaderboard(&self, tournament: &Tournament, board: Leaderboard, trade_seq: u64) -> Result<(), StoreError> {
        self.inner.freeze_leaderboard(tournament, board, trade_seq)
    }
    fn final_leaderboard(&self, tournament_id: TournamentId) -> Option<Leaderboard> {
        self.inner.final_leaderboard(tournament_id)
    }
    fn commit_settlement(
        &self,
        tournament: &Tournament,
        claims: Vec<PrizeClaim>,
        finals: Vec<Participant>,
    ) -> Result<(), StoreError> {
        self.inner.commit_settlement(tournament, claims, finals)
    }
    fn claim(&self, key: &ParticipantKey) -> Result<PrizeClaim, StoreError> {
        self.inner.claim(key)
    }
    fn claims(&self, tournament_id: TournamentId) -> Vec<PrizeClaim> {
        self.inner.claims(tournament_id)
    }
    fn claims_with_status(&self, status: ClaimStatus) -> Vec<PrizeClaim> {
        self.inner.claims_with_status(status)
    }
    fn update_claim(&self, claim: &PrizeClaim) -> Result<(), StoreError> {
        self.inner.update_claim(claim)
    }
}

/// A buy of 50 X at 10 written straight to the store, bypassing the engine.
fn direct_buy(key: ParticipantKey, executed_at: Timestamp) -> Hook {
    Box::new(move |store: &InMemoryStore| {
        let participant = store.participant(&key).unwrap();
        let trade = Trade::new(
            store.next_trade_id(),
            &key,
            TokenAddress::new("X"),
            Side::Buy,
            Quantity::new_unchecked(dec!(50)),
            Price::new_unchecked(dec!(10)),
            executed_at,
        )
        .unwrap();
        let mut next = participant;
        next.apply_fill(Side::Buy, trade.total_value).unwrap();
        store.append_trade(trade, &next).unwrap();
    })
}

/// Writes slipped in between the engine's steps.
mod interleaved_writes {
    use super::*;

    #[test]
    fn valuation_never_mixes_cash_and_holdings_from_different_trades() {
        let store = Arc::new(InterleavingStore::default());
        let (engine, clock) = engine_over(store.clone());
        let tid = active(&engine, &clock);
        let alice = WalletId::new("alice");
        let key = ParticipantKey::new(tid, alice.clone());
        engine.join_tournament(tid, alice.clone(), Currency::Primary).unwrap();
        price(&engine, &clock, "X", dec!(20));

        *store.after_participant_read.lock() = Some(direct_buy(key.clone(), clock.now()));
        // the buy lands after the read: cash and holdings both predate it
        let before = engine.valuate(tid, &alice).unwrap();
        assert_eq!(before.cash_balance.value(), dec!(10000));
        assert!(before.positions.is_empty());
        assert_eq!(before.total_equity.value(), dec!(10000));

        let after = engine.valuate(tid, &alice).unwrap();
        assert_eq!(after.cash_balance.value(), dec!(9500));
        assert_eq!(after.positions_value.value(), dec!(1000));
        assert_eq!(after.total_equity.value(), dec!(10500));

        *store.after_participant_read.lock() = Some(direct_buy(key, clock.now()));
        let report = engine.audit_participant(tid, &alice).unwrap();
        assert_eq!(report.derived_cash, report.stored_cash);
        assert_eq!(report.trade_count, 1);
        assert_eq!(engine.audit_participant(tid, &alice).unwrap().trade_count, 2);
    }

    #[test]
    fn trade_racing_the_end_is_rejected_and_leaves_no_trace() {
        let store = Arc::new(InterleavingStore::default());
        let (engine, clock) = engine_over(store.clone());
        let tid = active(&engine, &clock);
        let alice = WalletId::new("alice");
        let key = ParticipantKey::new(tid, alice.clone());
        engine.join_tournament(tid, alice.clone(), Currency::Primary).unwrap();
        price(&engine, &clock, "X", dec!(10));

        // the tournament closes after the engine's checks, before its write
        *store.before_append.lock() = Some(Box::new(move |inner: &InMemoryStore| {
            let mut ended = inner.tournament(tid).unwrap();
            ended.status = TournamentStatus::Ended;
            inner.update_tournament(&ended, TournamentStatus::Active).unwrap();
        }));

        let result = engine.execute_trade(tid, &alice, Side::Buy, &TokenAddress::new("X"), dec!(1));
        assert!(matches!(result, Err(EngineError::TournamentClosed(_))));
        assert!(store.trades(&key).is_empty());
        let participant = engine.get_participant(&key).unwrap();
        assert_eq!(participant.cash_balance.value(), dec!(10000));
        assert_eq!(participant.trade_count, 0);
    }

    #[test]
    fn freeze_rereads_when_a_trade_lands_mid_snapshot() {
        let store = Arc::new(InterleavingStore::default());
        let (engine, clock) = engine_over(store.clone());
        let tid = active(&engine, &clock);
        let alice = WalletId::new("alice");
        let key = ParticipantKey::new(tid, alice.clone());
        engine.join_tournament(tid, alice.clone(), Currency::Primary).unwrap();
        price(&engine, &clock, "X", dec!(20));

        // a trade executed just before the close, committed after the
        // freezer read the ledger
        let executed_at = clock.now().plus_millis(HOUR_MS - 1);
        clock.advance(HOUR_MS);
        price(&engine, &clock, "X", dec!(20));
        *store.after_snapshot.lock() = Some(direct_buy(key, executed_at));

        let board = engine.end_tournament(tid).unwrap();
        assert!(board.frozen);
        assert_eq!(board.entries[0].total_equity.value(), dec!(10500));
        assert_eq!(engine.get_tournament(tid).unwrap().status, TournamentStatus::Ended);
        assert_eq!(engine.get_leaderboard(tid).unwrap(), board);
        assert!(engine.audit_participant(tid, &alice).is_ok());
    }
}
