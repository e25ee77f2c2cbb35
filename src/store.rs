// 10.0 store.rs: durable-store boundary. the engine talks to the trait; the
// in-memory implementation is what tests and the simulator run against.
// each method is one atomic unit: a reader never sees half of it.

use crate::claim::{ClaimStatus, PrizeClaim};
use crate::leaderboard::Leaderboard;
use crate::participant::Participant;
use crate::tournament::{Tournament, TournamentStatus};
use crate::trade::Trade;
use crate::types::{Amount, ParticipantKey, TournamentId, TradeId};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    Duplicate(String),

    // optimistic precondition lost: someone else wrote first
    #[error("Write conflict: {0}")]
    Conflict(String),

    #[error("Record {0} is immutable")]
    Immutable(String),

    #[error("Write would leave {key} with negative cash {balance}")]
    NegativeBalance { key: ParticipantKey, balance: Amount },

    // a trade landed after the snapshot the write was computed from
    #[error("Snapshot of {0} is out of date")]
    StaleSnapshot(TournamentId),
}

/// Every participant of one tournament with its trade log, read in one step.
/// `trade_seq` counts trade appends in the tournament at read time.
#[derive(Debug, Clone, Default)]
pub struct LedgerSnapshot {
    pub entries: Vec<(Participant, Vec<Trade>)>,
    pub trade_seq: u64,
}

pub trait TournamentStore: Send + Sync {
    fn next_tournament_id(&self) -> TournamentId;
    fn next_trade_id(&self) -> TradeId;

    fn insert_tournament(&self, tournament: Tournament) -> Result<(), StoreError>;
    fn tournament(&self, id: TournamentId) -> Result<Tournament, StoreError>;
    fn tournaments(&self) -> Vec<Tournament>;
    /// Replace a tournament record if its stored status still equals `expected_status`.
    fn update_tournament(&self, tournament: &Tournament, expected_status: TournamentStatus) -> Result<(), StoreError>;

    /// Insert a participant together with the tournament record carrying its
    /// pool contribution. Fails on duplicate key, or if the stored tournament
    /// changed since `tournament` was read.
    fn insert_participant(&self, participant: Participant, tournament: &Tournament) -> Result<(), StoreError>;
    fn participant(&self, key: &ParticipantKey) -> Result<Participant, StoreError>;
    /// Participant row and its trades under one read, so cash and positions
    /// always describe the same point in the log.
    fn participant_with_trades(&self, key: &ParticipantKey) -> Result<(Participant, Vec<Trade>), StoreError>;
    fn ledger_snapshot(&self, tournament_id: TournamentId) -> LedgerSnapshot;

    /// Append a trade and write the participant's new balance in one step.
    /// `participant.version` must match the stored version, and the stored
    /// tournament must be ACTIVE with `trade.executed_at` before its end.
    fn append_trade(&self, trade: Trade, participant: &Participant) -> Result<Participant, StoreError>;
    fn trades(&self, key: &ParticipantKey) -> Vec<Trade>;

    /// Write the final leaderboard together with the ENDED record. Written
    /// once; a second write is a Duplicate. `trade_seq` must still match the
    /// snapshot the board was computed from.
    fn freeze_leaderboard(&self, tournament: &Tournament, board: Leaderboard, trade_seq: u64) -> Result<(), StoreError>;
    fn final_leaderboard(&self, tournament_id: TournamentId) -> Option<Leaderboard>;

    /// Claims, participant final fields and the SETTLED status, all or nothing.
    fn commit_settlement(
        &self,
        tournament: &Tournament,
        claims: Vec<PrizeClaim>,
        finals: Vec<Participant>,
    ) -> Result<(), StoreError>;
    fn claim(&self, key: &ParticipantKey) -> Result<PrizeClaim, StoreError>;
    fn claims(&self, tournament_id: TournamentId) -> Vec<PrizeClaim>;
    fn claims_with_status(&self, status: ClaimStatus) -> Vec<PrizeClaim>;
    /// Replace a claim. A stored claim with `claimed == true` can never be replaced.
    fn update_claim(&self, claim: &PrizeClaim) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
struct StoreState {
    tournaments: BTreeMap<TournamentId, Tournament>,
    participants: BTreeMap<ParticipantKey, Participant>,
    trades: HashMap<ParticipantKey, Vec<Trade>>,
    trade_seq: HashMap<TournamentId, u64>,
    final_boards: HashMap<TournamentId, Leaderboard>,
    claims: BTreeMap<ParticipantKey, PrizeClaim>,
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<StoreState>,
    next_tournament: AtomicU64,
    next_trade: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_found_tournament(id: TournamentId) -> StoreError {
    StoreError::NotFound(format!("tournament {id}"))
}

impl TournamentStore for InMemoryStore {
    fn next_tournament_id(&self) -> TournamentId {
        TournamentId(self.next_tournament.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn next_trade_id(&self) -> TradeId {
        TradeId(self.next_trade.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn insert_tournament(&self, tournament: Tournament) -> Result<(), StoreError> {
        let mut state = self.state.write();
        if state.tournaments.contains_key(&tournament.id) {
            return Err(StoreError::Duplicate(format!("tournament {}", tournament.id)));
        }
        state.tournaments.insert(tournament.id, tournament);
        Ok(())
    }

    fn tournament(&self, id: TournamentId) -> Result<Tournament, StoreError> {
        self.state
            .read()
            .tournaments
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found_tournament(id))
    }

    fn tournaments(&self) -> Vec<Tournament> {
        self.state.read().tournaments.values().cloned().collect()
    }

    fn update_tournament(&self, tournament: &Tournament, expected_status: TournamentStatus) -> Result<(), StoreError> {
        let mut state = self.state.write();
        let stored = state
            .tournaments
            .get_mut(&tournament.id)
            .ok_or_else(|| not_found_tournament(tournament.id))?;
        if stored.status != expected_status {
            return Err(StoreError::Conflict(format!(
                "tournament {} is {}, expected {}",
                tournament.id, stored.status, expected_status
            )));
        }
        *stored = tournament.clone();
        Ok(())
    }

    fn insert_participant(&self, participant: Participant, tournament: &Tournament) -> Result<(), StoreError> {
        let mut state = self.state.write();
        let key = participant.key();
        if state.participants.contains_key(&key) {
            return Err(StoreError::Duplicate(format!("participant {key}")));
        }
        let stored = state
            .tournaments
            .get_mut(&tournament.id)
            .ok_or_else(|| not_found_tournament(tournament.id))?;
        if stored.status != tournament.status || stored.participant_count + 1 != tournament.participant_count {
            return Err(StoreError::Conflict(format!("tournament {} changed during join", tournament.id)));
        }
        *stored = tournament.clone();
        state.participants.insert(key, participant);
        Ok(())
    }

    fn participant(&self, key: &ParticipantKey) -> Result<Participant, StoreError> {
        self.state
            .read()
            .participants
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("participant {key}")))
    }

    fn participant_with_trades(&self, key: &ParticipantKey) -> Result<(Participant, Vec<Trade>), StoreError> {
        let state = self.state.read();
        let participant = state
            .participants
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("participant {key}")))?;
        let trades = state.trades.get(key).cloned().unwrap_or_default();
        Ok((participant, trades))
    }

    fn ledger_snapshot(&self, tournament_id: TournamentId) -> LedgerSnapshot {
        let state = self.state.read();
        let entries = state
            .participants
            .values()
            .filter(|p| p.tournament_id == tournament_id)
            .map(|p| (p.clone(), state.trades.get(&p.key()).cloned().unwrap_or_default()))
            .collect();
        LedgerSnapshot {
            entries,
            trade_seq: state.trade_seq.get(&tournament_id).copied().unwrap_or(0),
        }
    }

    fn append_trade(&self, trade: Trade, participant: &Participant) -> Result<Participant, StoreError> {
        let key = participant.key();
        if participant.cash_balance.is_negative() {
            return Err(StoreError::NegativeBalance {
                key,
                balance: participant.cash_balance,
            });
        }

        let mut state = self.state.write();
        let tournament = state
            .tournaments
            .get(&trade.tournament_id)
            .ok_or_else(|| not_found_tournament(trade.tournament_id))?;
        if tournament.status != TournamentStatus::Active || trade.executed_at >= tournament.end_time {
            return Err(StoreError::Conflict(format!(
                "tournament {} is {} and closes at {}, trade executed at {}",
                tournament.id, tournament.status, tournament.end_time, trade.executed_at
            )));
        }

        let stored = state
            .participants
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound(format!("participant {key}")))?;
        if stored.version != participant.version {
            return Err(StoreError::Conflict(format!(
                "participant {key} at version {}, write based on {}",
                stored.version, participant.version
            )));
        }

        let mut written = participant.clone();
        written.version += 1;
        *stored = written.clone();
        *state.trade_seq.entry(trade.tournament_id).or_default() += 1;
        state.trades.entry(key).or_default().push(trade);
        Ok(written)
    }

    fn trades(&self, key: &ParticipantKey) -> Vec<Trade> {
        self.state.read().trades.get(key).cloned().unwrap_or_default()
    }

    fn freeze_leaderboard(&self, tournament: &Tournament, board: Leaderboard, trade_seq: u64) -> Result<(), StoreError> {
        let mut state = self.state.write();
        if state.final_boards.contains_key(&tournament.id) {
            return Err(StoreError::Duplicate(format!("final leaderboard for {}", tournament.id)));
        }
        if state.trade_seq.get(&tournament.id).copied().unwrap_or(0) != trade_seq {
            return Err(StoreError::StaleSnapshot(tournament.id));
        }
        let stored = state
            .tournaments
            .get_mut(&tournament.id)
            .ok_or_else(|| not_found_tournament(tournament.id))?;
        if stored.status != TournamentStatus::Active {
            return Err(StoreError::Conflict(format!(
                "tournament {} is {}, expected ACTIVE",
                tournament.id, stored.status
            )));
        }
        *stored = tournament.clone();
        state.final_boards.insert(tournament.id, board);
        Ok(())
    }

    fn final_leaderboard(&self, tournament_id: TournamentId) -> Option<Leaderboard> {
        self.state.read().final_boards.get(&tournament_id).cloned()
    }

    fn commit_settlement(
        &self,
        tournament: &Tournament,
        claims: Vec<PrizeClaim>,
        finals: Vec<Participant>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write();

        // validate everything before touching anything
        match state.tournaments.get(&tournament.id) {
            None => return Err(not_found_tournament(tournament.id)),
            Some(stored) if stored.status != TournamentStatus::Ended => {
                return Err(StoreError::Conflict(format!(
                    "tournament {} is {}, expected ENDED",
                    tournament.id, stored.status
                )))
            }
            Some(_) => {}
        }
        if let Some(existing) = claims.iter().find(|c| state.claims.contains_key(&c.key())) {
            return Err(StoreError::Duplicate(format!("prize claim {}", existing.key())));
        }
        if let Some(missing) = finals.iter().find(|p| !state.participants.contains_key(&p.key())) {
            return Err(StoreError::NotFound(format!("participant {}", missing.key())));
        }

        for claim in claims {
            state.claims.insert(claim.key(), claim);
        }
        for participant in finals {
            state.participants.insert(participant.key(), participant);
        }
        state.tournaments.insert(tournament.id, tournament.clone());
        Ok(())
    }

    fn claim(&self, key: &ParticipantKey) -> Result<PrizeClaim, StoreError> {
        self.state
            .read()
            .claims
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("prize claim {key}")))
    }

    fn claims(&self, tournament_id: TournamentId) -> Vec<PrizeClaim> {
        self.state
            .read()
            .claims
            .values()
            .filter(|c| c.tournament_id == tournament_id)
            .cloned()
            .collect()
    }

    fn claims_with_status(&self, status: ClaimStatus) -> Vec<PrizeClaim> {
        self.state
            .read()
            .claims
            .values()
            .filter(|c| c.status == status)
            .cloned()
            .collect()
    }

    fn update_claim(&self, claim: &PrizeClaim) -> Result<(), StoreError> {
        let mut state = self.state.write();
        let key = claim.key();
        let stored = state
            .claims
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound(format!("prize claim {key}")))?;
        if stored.claimed {
            return Err(StoreError::Immutable(format!("prize claim {key}")));
        }
        *stored = claim.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tournament::{EntryFees, TournamentSpec};
    use crate::types::{Currency, Price, Quantity, Side, Timestamp, TokenAddress, WalletId};
    use rust_decimal_macros::dec;

    fn seeded() -> (InMemoryStore, Tournament) {
        let store = InMemoryStore::new();
        let id = store.next_tournament_id();
        let spec = TournamentSpec {
            name: "t".into(),
            start_time: Timestamp::from_millis(0),
            end_time: Timestamp::from_millis(1_000),
            entry_fees: EntryFees {
                primary: Amount::new(dec!(1)),
                bonus: Amount::new(dec!(1)),
            },
            max_participants: 10,
            starting_balance: Amount::new(dec!(100)),
            token_universe: [TokenAddress::new("X")].into_iter().collect(),
        };
        let mut t = Tournament::new(id, spec, Timestamp::from_millis(0)).unwrap();
        t.status = TournamentStatus::Active;
        store.insert_tournament(t.clone()).unwrap();
        (store, t)
    }

    fn join(store: &InMemoryStore, t: &Tournament, wallet: &str) -> Participant {
        let mut updated = store.tournament(t.id).unwrap();
        updated.record_entry(Currency::Primary);
        let p = Participant::new(t.id, WalletId::new(wallet), Currency::Primary, t.starting_balance, Timestamp::from_millis(0));
        store.insert_participant(p.clone(), &updated).unwrap();
        p
    }

    #[test]
    fn duplicate_join_rejected() {
        let (store, t) = seeded();
        let p = join(&store, &t, "a");
        let mut updated = store.tournament(t.id).unwrap();
        updated.record_entry(Currency::Primary);
        assert!(matches!(store.insert_participant(p, &updated), Err(StoreError::Duplicate(_))));
        assert_eq!(store.tournament(t.id).unwrap().participant_count, 1);
    }

    #[test]
    fn stale_tournament_read_conflicts_on_join() {
        let (store, t) = seeded();
        let mut stale = store.tournament(t.id).unwrap();
        join(&store, &t, "a");
        stale.record_entry(Currency::Primary);
        let p = Participant::new(t.id, WalletId::new("b"), Currency::Primary, t.starting_balance, Timestamp::from_millis(0));
        assert!(matches!(store.insert_participant(p, &stale), Err(StoreError::Conflict(_))));
    }

    fn buy(store: &InMemoryStore, p: &Participant, at_ms: i64) -> (Trade, Participant) {
        let trade = Trade::new(
            store.next_trade_id(),
            &p.key(),
            TokenAddress::new("X"),
            Side::Buy,
            Quantity::new_unchecked(dec!(1)),
            Price::new_unchecked(dec!(10)),
            Timestamp::from_millis(at_ms),
        )
        .unwrap();
        let mut next = p.clone();
        next.apply_fill(Side::Buy, trade.total_value).unwrap();
        (trade, next)
    }

    fn empty_board(t: &Tournament) -> Leaderboard {
        Leaderboard {
            tournament_id: t.id,
            entries: vec![],
            computed_at: t.end_time,
            frozen: true,
        }
    }

    #[test]
    fn append_trade_is_version_checked() {
        let (store, t) = seeded();
        let p = join(&store, &t, "a");
        let (trade, next) = buy(&store, &p, 1);

        let written = store.append_trade(trade.clone(), &next).unwrap();
        assert_eq!(written.version, 1);
        assert_eq!(written.cash_balance.value(), dec!(90));

        // second write based on the old version loses
        assert!(matches!(store.append_trade(trade, &next), Err(StoreError::Conflict(_))));
        assert_eq!(store.trades(&p.key()).len(), 1);
    }

    #[test]
    fn append_trade_rechecks_trading_window() {
        let (store, t) = seeded();
        let p = join(&store, &t, "a");

        // executed at the end instant
        let (late, next) = buy(&store, &p, 1_000);
        assert!(matches!(store.append_trade(late, &next), Err(StoreError::Conflict(_))));

        // ended between the engine's read and the write
        let mut ended = store.tournament(t.id).unwrap();
        ended.status = TournamentStatus::Ended;
        store.update_tournament(&ended, TournamentStatus::Active).unwrap();
        let (trade, next) = buy(&store, &p, 1);
        assert!(matches!(store.append_trade(trade, &next), Err(StoreError::Conflict(_))));

        assert!(store.trades(&p.key()).is_empty());
        assert_eq!(store.participant(&p.key()).unwrap().version, 0);
    }

    #[test]
    fn participant_with_trades_reads_one_point_in_the_log() {
        let (store, t) = seeded();
        let p = join(&store, &t, "a");
        let (trade, next) = buy(&store, &p, 1);
        store.append_trade(trade, &next).unwrap();

        let (participant, trades) = store.participant_with_trades(&p.key()).unwrap();
        assert_eq!(participant.trade_count, trades.len() as u64);
        assert_eq!(participant.cash_balance.value(), dec!(90));

        let snapshot = store.ledger_snapshot(t.id);
        assert_eq!(snapshot.trade_seq, 1);
        assert_eq!(snapshot.entries.len(), 1);
        assert_eq!(snapshot.entries[0].1.len(), 1);

        let ghost = ParticipantKey::new(t.id, WalletId::new("ghost"));
        assert!(matches!(store.participant_with_trades(&ghost), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn freeze_rejects_board_older_than_last_trade() {
        let (store, t) = seeded();
        let p = join(&store, &t, "a");
        let before = store.ledger_snapshot(t.id);

        let (trade, next) = buy(&store, &p, 1);
        store.append_trade(trade, &next).unwrap();

        let mut ended = store.tournament(t.id).unwrap();
        ended.status = TournamentStatus::Ended;
        assert!(matches!(
            store.freeze_leaderboard(&ended, empty_board(&ended), before.trade_seq),
            Err(StoreError::StaleSnapshot(_))
        ));
        assert_eq!(store.tournament(t.id).unwrap().status, TournamentStatus::Active);
        assert!(store.final_leaderboard(t.id).is_none());

        let current = store.ledger_snapshot(t.id);
        store.freeze_leaderboard(&ended, empty_board(&ended), current.trade_seq).unwrap();
        assert_eq!(store.tournament(t.id).unwrap().status, TournamentStatus::Ended);
        assert!(matches!(
            store.freeze_leaderboard(&ended, empty_board(&ended), current.trade_seq),
            Err(StoreError::Duplicate(_))
        ));
    }

    #[test]
    fn claimed_claim_is_immutable() {
        use crate::prize::PrizeAward;
        use crate::transfer::TransferRef;

        let (store, mut t) = seeded();
        join(&store, &t, "a");
        t = store.tournament(t.id).unwrap();
        t.status = TournamentStatus::Ended;
        store.update_tournament(&t, TournamentStatus::Active).unwrap();

        let award = PrizeAward {
            rank: 1,
            wallet: WalletId::new("a"),
            primary_prize: Amount::new(dec!(1)),
            bonus_prize: Amount::zero(),
        };
        let mut claim = PrizeClaim::from_award(t.id, &award, Timestamp::from_millis(5));
        let mut settled = t.clone();
        settled.status = TournamentStatus::Settled;
        store.commit_settlement(&settled, vec![claim.clone()], vec![]).unwrap();

        claim
            .record_leg_paid(Currency::Primary, TransferRef("tx".into()), 1, Timestamp::from_millis(6))
            .unwrap();
        store.update_claim(&claim).unwrap();
        assert!(matches!(store.update_claim(&claim), Err(StoreError::Immutable(_))));
    }
}
