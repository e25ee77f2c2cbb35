//! Tournament lifecycle: scheduling, time-driven transitions, final
//! leaderboard freeze and settlement into prize claims.

use super::core::Engine;
use super::results::{EngineError, SettlementSummary, TransitionRecord};
use crate::claim::PrizeClaim;
use crate::events::{
    EventPayload, LeaderboardFrozenEvent, TokenUniverseUpdatedEvent, TournamentCreatedEvent,
    TournamentSettledEvent, TournamentTransitionedEvent,
};
use crate::leaderboard::Leaderboard;
use crate::prize::{self, PrizeAward};
use crate::store::StoreError;
use crate::tournament::{Tournament, TournamentSpec, TournamentStatus, Transition};
use crate::types::{Amount, ParticipantKey, Timestamp, TokenAddress, TournamentId};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

const MAX_FREEZE_ATTEMPTS: u32 = 8;

impl Engine {
    pub fn create_tournament(&self, spec: TournamentSpec) -> Result<Tournament, EngineError> {
        spec.validate()?;
        let tournament = Tournament::new(self.store.next_tournament_id(), spec, self.now())?;
        self.store.insert_tournament(tournament.clone())?;

        info!(
            tournament_id = %tournament.id,
            name = %tournament.name,
            start = %tournament.start_time,
            end = %tournament.end_time,
            "tournament scheduled"
        );
        self.emit_event(EventPayload::TournamentCreated(TournamentCreatedEvent {
            tournament_id: tournament.id,
            name: tournament.name.clone(),
            start_time: tournament.start_time,
            end_time: tournament.end_time,
        }));
        Ok(tournament)
    }

    /// Replace the tradable tokens. Only while UPCOMING.
    pub fn set_token_universe(
        &self,
        tournament_id: TournamentId,
        tokens: BTreeSet<TokenAddress>,
    ) -> Result<Tournament, EngineError> {
        let mut tournament = self.get_tournament(tournament_id)?;
        tournament.set_token_universe(tokens)?;
        self.store.update_tournament(&tournament, TournamentStatus::Upcoming)?;

        self.emit_event(EventPayload::TokenUniverseUpdated(TokenUniverseUpdatedEvent {
            tournament_id,
            tokens: tournament.token_universe.iter().cloned().collect(),
        }));
        Ok(tournament)
    }

    /// Scheduler entry point. Applies every due transition across all
    /// unsettled tournaments; a tournament whose whole window has passed goes
    /// UPCOMING -> ACTIVE -> ENDED in one sweep. One tournament failing does
    /// not stop the sweep.
    pub fn advance_tournaments(&self) -> Vec<TransitionRecord> {
        let now = self.now();
        let mut applied = Vec::new();

        for tournament in self.store.tournaments() {
            let mut current = tournament;
            while let Some(transition) = current.next_transition(now) {
                let result = match transition {
                    Transition::Activate => self.activate(&current, now),
                    Transition::End => self.end(&current, now).map(|(t, _)| t),
                    Transition::Settle => break,
                };
                match result {
                    Ok(next) => {
                        applied.push(TransitionRecord {
                            tournament_id: next.id,
                            transition,
                            at: now,
                        });
                        current = next;
                    }
                    // someone else applied it first
                    Err(EngineError::Store(e @ (StoreError::Conflict(_) | StoreError::Duplicate(_)))) => {
                        debug!(tournament_id = %current.id, reason = %e, "transition already applied");
                        break;
                    }
                    Err(e) => {
                        warn!(tournament_id = %current.id, ?transition, error = %e, "transition failed");
                        break;
                    }
                }
            }
        }
        applied
    }

    /// Close trading and freeze the final leaderboard. Idempotent once ENDED.
    pub fn end_tournament(&self, tournament_id: TournamentId) -> Result<Leaderboard, EngineError> {
        let tournament = self.get_tournament(tournament_id)?;
        if matches!(tournament.status, TournamentStatus::Ended | TournamentStatus::Settled) {
            return self.get_leaderboard(tournament_id);
        }
        match self.end(&tournament, self.now()) {
            Ok((_, board)) => Ok(board),
            Err(EngineError::Store(StoreError::Conflict(_) | StoreError::Duplicate(_))) => {
                self.get_leaderboard(tournament_id)
            }
            Err(e) => Err(e),
        }
    }

    /// Prize amounts from persisted state only: frozen board plus pots.
    pub fn compute_prizes(&self, tournament_id: TournamentId) -> Result<Vec<PrizeAward>, EngineError> {
        let tournament = self.get_tournament(tournament_id)?;
        self.prizes_for(&tournament)
    }

    /// ENDED -> SETTLED. Writes one claim per payable rank and the final
    /// rank/payout fields on every participant, atomically. Settling a
    /// SETTLED tournament changes nothing.
    pub fn settle_tournament(&self, tournament_id: TournamentId) -> Result<SettlementSummary, EngineError> {
        let tournament = self.get_tournament(tournament_id)?;
        if tournament.status == TournamentStatus::Settled {
            return self.settled_summary(&tournament);
        }

        let awards = self.prizes_for(&tournament)?;
        let board = self.final_board(&tournament)?;
        let now = self.now();

        let mut settled = tournament.clone();
        settled.apply(Transition::Settle, now)?;

        let claims: Vec<PrizeClaim> = awards
            .iter()
            .map(|award| PrizeClaim::from_award(tournament_id, award, now))
            .collect();

        let mut finals = Vec::with_capacity(board.len());
        for entry in &board.entries {
            let mut participant = self.get_participant(&ParticipantKey::new(tournament_id, entry.wallet.clone()))?;
            let award = awards.iter().find(|a| a.wallet == entry.wallet);
            participant.record_final(
                entry.rank,
                entry.total_equity,
                award.map(|a| a.primary_prize).unwrap_or_else(Amount::zero),
                award.map(|a| a.bonus_prize).unwrap_or_else(Amount::zero),
            );
            finals.push(participant);
        }

        match self.store.commit_settlement(&settled, claims, finals) {
            Ok(()) => {}
            // lost to a concurrent settle
            Err(StoreError::Conflict(_)) | Err(StoreError::Duplicate(_)) => {
                let current = self.get_tournament(tournament_id)?;
                if current.status == TournamentStatus::Settled {
                    return self.settled_summary(&current);
                }
                return Err(EngineError::Store(StoreError::Conflict(format!(
                    "{tournament_id} changed during settlement"
                ))));
            }
            Err(e) => return Err(e.into()),
        }
        self.release_participant_locks(tournament_id);

        let primary_total: Amount = awards.iter().map(|a| a.primary_prize).sum();
        let bonus_total: Amount = awards.iter().map(|a| a.bonus_prize).sum();
        info!(
            tournament_id = %tournament_id,
            claims = awards.len(),
            primary = %primary_total,
            bonus = %bonus_total,
            "tournament settled"
        );
        self.emit_event(EventPayload::TournamentTransitioned(TournamentTransitionedEvent {
            tournament_id,
            transition: Transition::Settle,
            from: TournamentStatus::Ended,
            to: TournamentStatus::Settled,
        }));
        self.emit_event(EventPayload::TournamentSettled(TournamentSettledEvent {
            tournament_id,
            claims_created: awards.len(),
            primary_total,
            bonus_total,
        }));

        Ok(SettlementSummary {
            tournament_id,
            claims_created: awards.len(),
            awards,
            already_settled: false,
        })
    }

    fn settled_summary(&self, tournament: &Tournament) -> Result<SettlementSummary, EngineError> {
        debug!(tournament_id = %tournament.id, "already settled");
        Ok(SettlementSummary {
            tournament_id: tournament.id,
            awards: self.prizes_for(tournament)?,
            claims_created: 0,
            already_settled: true,
        })
    }

    fn final_board(&self, tournament: &Tournament) -> Result<Leaderboard, EngineError> {
        if tournament.status == TournamentStatus::Upcoming || tournament.status == TournamentStatus::Active {
            return Err(EngineError::NotEnded {
                tournament_id: tournament.id,
                status: tournament.status,
            });
        }
        self.store.final_leaderboard(tournament.id).ok_or_else(|| {
            EngineError::InvariantViolation(format!("{} is {} without a frozen leaderboard", tournament.id, tournament.status))
        })
    }

    fn prizes_for(&self, tournament: &Tournament) -> Result<Vec<PrizeAward>, EngineError> {
        let board = self.final_board(tournament)?;
        Ok(prize::compute_prizes(
            &board.entries,
            tournament.prize_pool,
            tournament.bonus_jackpot,
            &self.config.prize_curve,
            self.config.payout_scale,
        ))
    }

    // 8.4: UPCOMING -> ACTIVE
    fn activate(&self, tournament: &Tournament, now: Timestamp) -> Result<Tournament, EngineError> {
        let mut next = tournament.clone();
        next.apply(Transition::Activate, now)?;
        self.store.update_tournament(&next, TournamentStatus::Upcoming)?;
        self.record_transition(&next, Transition::Activate);
        Ok(next)
    }

    // 8.5: ACTIVE -> ENDED, freezing the board valued at `now`. the status
    // flip and the snapshot are one store write, rejected if a trade landed
    // after the snapshot was read.
    fn end(&self, tournament: &Tournament, now: Timestamp) -> Result<(Tournament, Leaderboard), EngineError> {
        let mut next = tournament.clone();
        next.apply(Transition::End, now)?;

        let mut attempt = 0;
        let board = loop {
            attempt += 1;
            let snapshot = self.store.ledger_snapshot(next.id);
            let board = self.compute_leaderboard(&next, &snapshot, now, true)?;
            match self.store.freeze_leaderboard(&next, board.clone(), snapshot.trade_seq) {
                Ok(()) => break board,
                Err(StoreError::StaleSnapshot(_)) if attempt < MAX_FREEZE_ATTEMPTS => {
                    debug!(tournament_id = %next.id, attempt, "trade landed during freeze, re-reading");
                }
                Err(e) => return Err(e.into()),
            }
        };

        self.record_transition(&next, Transition::End);
        info!(
            tournament_id = %next.id,
            entries = board.len(),
            stale = board.entries.iter().filter(|e| e.has_stale_prices).count(),
            "final leaderboard frozen"
        );
        self.emit_event(EventPayload::LeaderboardFrozen(LeaderboardFrozenEvent {
            tournament_id: next.id,
            entries: board.len(),
            leader: board.entries.first().map(|e| e.wallet.clone()),
        }));
        Ok((next, board))
    }

    fn record_transition(&self, tournament: &Tournament, transition: Transition) {
        info!(tournament_id = %tournament.id, to = %tournament.status, "tournament transitioned");
        self.emit_event(EventPayload::TournamentTransitioned(TournamentTransitionedEvent {
            tournament_id: tournament.id,
            transition,
            from: transition.from_status(),
            to: transition.to_status(),
        }));
    }
}
