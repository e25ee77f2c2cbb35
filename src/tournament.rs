// 2.0: tournament record and lifecycle state machine.
// UPCOMING -> ACTIVE -> ENDED -> SETTLED. transitions are pure functions of (record, now);
// whoever calls them (scheduler sweep, admin endpoint) owns the timing.

use crate::types::{Amount, Currency, Timestamp, TokenAddress, TournamentId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TournamentStatus {
    Upcoming,
    Active,
    // quiescent: trading rejected, settlement not yet performed
    Ended,
    Settled,
}

impl fmt::Display for TournamentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TournamentStatus::Upcoming => "UPCOMING",
            TournamentStatus::Active => "ACTIVE",
            TournamentStatus::Ended => "ENDED",
            TournamentStatus::Settled => "SETTLED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Activate,
    End,
    Settle,
}

impl Transition {
    pub fn from_status(&self) -> TournamentStatus {
        match self {
            Transition::Activate => TournamentStatus::Upcoming,
            Transition::End => TournamentStatus::Active,
            Transition::Settle => TournamentStatus::Ended,
        }
    }

    pub fn to_status(&self) -> TournamentStatus {
        match self {
            Transition::Activate => TournamentStatus::Active,
            Transition::End => TournamentStatus::Ended,
            Transition::Settle => TournamentStatus::Settled,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryFees {
    pub primary: Amount,
    pub bonus: Amount,
}

impl EntryFees {
    pub fn for_currency(&self, currency: Currency) -> Amount {
        match currency {
            Currency::Primary => self.primary,
            Currency::Bonus => self.bonus,
        }
    }
}

/// Scheduling request for a new tournament.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TournamentSpec {
    pub name: String,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    pub entry_fees: EntryFees,
    pub max_participants: u32,
    pub starting_balance: Amount,
    pub token_universe: BTreeSet<TokenAddress>,
}

impl TournamentSpec {
    pub fn validate(&self) -> Result<(), TournamentError> {
        if self.start_time >= self.end_time {
            return Err(TournamentError::InvalidSpec(
                "start time must be before end time".to_string(),
            ));
        }
        if self.token_universe.is_empty() {
            return Err(TournamentError::InvalidSpec(
                "token universe cannot be empty".to_string(),
            ));
        }
        if self.max_participants == 0 {
            return Err(TournamentError::InvalidSpec(
                "max participants must be positive".to_string(),
            ));
        }
        if !self.starting_balance.is_positive() {
            return Err(TournamentError::InvalidSpec(
                "starting balance must be positive".to_string(),
            ));
        }
        if self.entry_fees.primary.is_negative() || self.entry_fees.bonus.is_negative() {
            return Err(TournamentError::InvalidSpec(
                "entry fees cannot be negative".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tournament {
    pub id: TournamentId,
    pub name: String,
    pub status: TournamentStatus,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    pub entry_fees: EntryFees,
    pub max_participants: u32,
    pub starting_balance: Amount,
    pub prize_pool: Amount,
    pub bonus_jackpot: Amount,
    pub token_universe: BTreeSet<TokenAddress>,
    pub participant_count: u32,
    pub created_at: Timestamp,
    pub activated_at: Option<Timestamp>,
    pub ended_at: Option<Timestamp>,
    pub settled_at: Option<Timestamp>,
}

impl Tournament {
    pub fn new(id: TournamentId, spec: TournamentSpec, now: Timestamp) -> Result<Self, TournamentError> {
        spec.validate()?;
        Ok(Self {
            id,
            name: spec.name,
            status: TournamentStatus::Upcoming,
            start_time: spec.start_time,
            end_time: spec.end_time,
            entry_fees: spec.entry_fees,
            max_participants: spec.max_participants,
            starting_balance: spec.starting_balance,
            prize_pool: Amount::zero(),
            bonus_jackpot: Amount::zero(),
            token_universe: spec.token_universe,
            participant_count: 0,
            created_at: now,
            activated_at: None,
            ended_at: None,
            settled_at: None,
        })
    }

    /// Trading needs ACTIVE status *and* an open window. The wall-clock check
    /// catches trades that arrive after end_time before the sweep has flipped status.
    pub fn accepts_trades(&self, now: Timestamp) -> bool {
        self.status == TournamentStatus::Active && now >= self.start_time && now < self.end_time
    }

    pub fn accepts_joins(&self, now: Timestamp) -> bool {
        matches!(self.status, TournamentStatus::Upcoming | TournamentStatus::Active) && now < self.end_time
    }

    pub fn is_full(&self) -> bool {
        self.participant_count >= self.max_participants
    }

    pub fn has_token(&self, token: &TokenAddress) -> bool {
        self.token_universe.contains(token)
    }

    // 2.1: the next time-driven transition, if one is due. Settle is never time-driven.
    pub fn next_transition(&self, now: Timestamp) -> Option<Transition> {
        match self.status {
            TournamentStatus::Upcoming if now >= self.start_time => Some(Transition::Activate),
            TournamentStatus::Active if now >= self.end_time => Some(Transition::End),
            _ => None,
        }
    }

    // 2.2: apply a transition. re-applying Settle to a settled tournament is a no-op.
    pub fn apply(&mut self, transition: Transition, now: Timestamp) -> Result<bool, TournamentError> {
        if transition == Transition::Settle && self.status == TournamentStatus::Settled {
            return Ok(false);
        }
        if self.status != transition.from_status() {
            return Err(TournamentError::InvalidTransition {
                from: self.status,
                transition,
            });
        }
        match transition {
            Transition::Activate if now < self.start_time => {
                return Err(TournamentError::NotDue { transition, due_at: self.start_time })
            }
            Transition::End if now < self.end_time => {
                return Err(TournamentError::NotDue { transition, due_at: self.end_time })
            }
            _ => {}
        }

        self.status = transition.to_status();
        match transition {
            Transition::Activate => self.activated_at = Some(now),
            Transition::End => self.ended_at = Some(now),
            Transition::Settle => self.settled_at = Some(now),
        }
        Ok(true)
    }

    pub fn set_token_universe(&mut self, tokens: BTreeSet<TokenAddress>) -> Result<(), TournamentError> {
        if self.status != TournamentStatus::Upcoming {
            return Err(TournamentError::UniverseFrozen(self.id));
        }
        if tokens.is_empty() {
            return Err(TournamentError::InvalidSpec(
                "token universe cannot be empty".to_string(),
            ));
        }
        self.token_universe = tokens;
        Ok(())
    }

    // entry fee goes straight into the pot for the currency it was paid in
    pub fn record_entry(&mut self, currency: Currency) -> Amount {
        let fee = self.entry_fees.for_currency(currency);
        match currency {
            Currency::Primary => self.prize_pool = self.prize_pool.add(fee),
            Currency::Bonus => self.bonus_jackpot = self.bonus_jackpot.add(fee),
        }
        self.participant_count += 1;
        fee
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TournamentError {
    #[error("Invalid tournament spec: {0}")]
    InvalidSpec(String),

    #[error("Cannot apply {transition:?} from status {from}")]
    InvalidTransition {
        from: TournamentStatus,
        transition: Transition,
    },

    #[error("{transition:?} not due until {due_at}")]
    NotDue { transition: Transition, due_at: Timestamp },

    #[error("Token universe of {0} is frozen")]
    UniverseFrozen(TournamentId),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn spec() -> TournamentSpec {
        TournamentSpec {
            name: "weekly".to_string(),
            start_time: Timestamp::from_millis(1_000),
            end_time: Timestamp::from_millis(5_000),
            entry_fees: EntryFees {
                primary: Amount::new(dec!(10)),
                bonus: Amount::new(dec!(500)),
            },
            max_participants: 2,
            starting_balance: Amount::new(dec!(10000)),
            token_universe: [TokenAddress::new("X")].into_iter().collect(),
        }
    }

    fn tournament() -> Tournament {
        Tournament::new(TournamentId(1), spec(), Timestamp::from_millis(0)).unwrap()
    }

    #[test]
    fn spec_validation() {
        let mut bad = spec();
        bad.end_time = bad.start_time;
        assert!(matches!(bad.validate(), Err(TournamentError::InvalidSpec(_))));

        let mut bad = spec();
        bad.token_universe.clear();
        assert!(bad.validate().is_err());

        let mut bad = spec();
        bad.starting_balance = Amount::zero();
        assert!(bad.validate().is_err());
    }

    #[test]
    fn time_driven_transitions() {
        let mut t = tournament();
        assert_eq!(t.next_transition(Timestamp::from_millis(999)), None);
        assert_eq!(t.next_transition(Timestamp::from_millis(1_000)), Some(Transition::Activate));

        t.apply(Transition::Activate, Timestamp::from_millis(1_000)).unwrap();
        assert_eq!(t.status, TournamentStatus::Active);
        assert_eq!(t.next_transition(Timestamp::from_millis(4_999)), None);
        assert_eq!(t.next_transition(Timestamp::from_millis(5_000)), Some(Transition::End));

        t.apply(Transition::End, Timestamp::from_millis(5_000)).unwrap();
        assert_eq!(t.status, TournamentStatus::Ended);
        // settle is never due on its own
        assert_eq!(t.next_transition(Timestamp::from_millis(99_999)), None);
    }

    #[test]
    fn premature_and_out_of_order_transitions_rejected() {
        let mut t = tournament();
        assert!(matches!(
            t.apply(Transition::Activate, Timestamp::from_millis(10)),
            Err(TournamentError::NotDue { .. })
        ));
        assert!(matches!(
            t.apply(Transition::Settle, Timestamp::from_millis(10)),
            Err(TournamentError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn settle_twice_is_noop() {
        let mut t = tournament();
        t.apply(Transition::Activate, Timestamp::from_millis(1_000)).unwrap();
        t.apply(Transition::End, Timestamp::from_millis(5_000)).unwrap();
        assert!(t.apply(Transition::Settle, Timestamp::from_millis(6_000)).unwrap());
        assert!(!t.apply(Transition::Settle, Timestamp::from_millis(7_000)).unwrap());
        assert_eq!(t.settled_at, Some(Timestamp::from_millis(6_000)));
    }

    #[test]
    fn trading_window_rechecks_wall_clock() {
        let mut t = tournament();
        t.apply(Transition::Activate, Timestamp::from_millis(1_000)).unwrap();
        assert!(t.accepts_trades(Timestamp::from_millis(4_999)));
        // status still reads ACTIVE, window is closed
        assert!(!t.accepts_trades(Timestamp::from_millis(5_000)));
    }

    #[test]
    fn entries_feed_the_right_pot() {
        let mut t = tournament();
        t.record_entry(Currency::Primary);
        t.record_entry(Currency::Bonus);
        assert_eq!(t.prize_pool.value(), dec!(10));
        assert_eq!(t.bonus_jackpot.value(), dec!(500));
        assert!(t.is_full());
    }

    #[test]
    fn universe_frozen_once_active() {
        let mut t = tournament();
        let tokens: BTreeSet<_> = [TokenAddress::new("Y")].into_iter().collect();
        t.set_token_universe(tokens.clone()).unwrap();
        t.apply(Transition::Activate, Timestamp::from_millis(1_000)).unwrap();
        assert!(matches!(t.set_token_universe(tokens), Err(TournamentError::UniverseFrozen(_))));
    }
}
