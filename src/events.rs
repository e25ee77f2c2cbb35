// 11.0: every state change produces an event. used for audit trails and for
// notifying external systems. the EventPayload enum lists all event types.

use crate::tournament::{TournamentStatus, Transition};
use crate::transfer::TransferRef;
use crate::types::{Amount, Currency, Price, Quantity, Side, Timestamp, TokenAddress, TournamentId, TradeId, WalletId};
use crate::claim::ClaimStatus;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub timestamp: Timestamp,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(id: EventId, timestamp: Timestamp, payload: EventPayload) -> Self {
        Self {
            id,
            timestamp,
            payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    // Tournament events
    TournamentCreated(TournamentCreatedEvent),
    TokenUniverseUpdated(TokenUniverseUpdatedEvent),
    TournamentTransitioned(TournamentTransitionedEvent),
    LeaderboardFrozen(LeaderboardFrozenEvent),
    TournamentSettled(TournamentSettledEvent),

    // Participant events
    ParticipantJoined(ParticipantJoinedEvent),
    TradeExecuted(TradeExecutedEvent),
    TradeRejected(TradeRejectedEvent),

    // Payout events
    PayoutLegPaid(PayoutLegPaidEvent),
    PayoutLegFailed(PayoutLegFailedEvent),
    ClaimReopened(ClaimReopenedEvent),

    // Defects
    ReconciliationFailed(ReconciliationFailedEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TournamentCreatedEvent {
    pub tournament_id: TournamentId,
    pub name: String,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUniverseUpdatedEvent {
    pub tournament_id: TournamentId,
    pub tokens: Vec<TokenAddress>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TournamentTransitionedEvent {
    pub tournament_id: TournamentId,
    pub transition: Transition,
    pub from: TournamentStatus,
    pub to: TournamentStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardFrozenEvent {
    pub tournament_id: TournamentId,
    pub entries: usize,
    pub leader: Option<WalletId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TournamentSettledEvent {
    pub tournament_id: TournamentId,
    pub claims_created: usize,
    pub primary_total: Amount,
    pub bonus_total: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantJoinedEvent {
    pub tournament_id: TournamentId,
    pub wallet: WalletId,
    pub entry_currency: Currency,
    pub entry_fee: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeExecutedEvent {
    pub tournament_id: TournamentId,
    pub wallet: WalletId,
    pub trade_id: TradeId,
    pub token: TokenAddress,
    pub side: Side,
    pub quantity: Quantity,
    pub price: Price,
    pub new_cash_balance: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRejectedEvent {
    pub tournament_id: TournamentId,
    pub wallet: WalletId,
    pub token: TokenAddress,
    pub side: Side,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutLegPaidEvent {
    pub tournament_id: TournamentId,
    pub wallet: WalletId,
    pub currency: Currency,
    pub amount: Amount,
    pub transfer_ref: TransferRef,
    pub attempts: u32,
    pub claim_status: ClaimStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutLegFailedEvent {
    pub tournament_id: TournamentId,
    pub wallet: WalletId,
    pub currency: Currency,
    pub amount: Amount,
    pub reason: String,
    pub retryable: bool,
    pub attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimReopenedEvent {
    pub tournament_id: TournamentId,
    pub wallet: WalletId,
    pub status: ClaimStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationFailedEvent {
    pub tournament_id: TournamentId,
    pub wallet: WalletId,
    pub reason: String,
}

/// Bounded in-memory event log. Oldest events drop off past `capacity`.
#[derive(Debug)]
pub struct EventLog {
    events: VecDeque<Event>,
    next_id: u64,
    capacity: usize,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::new(),
            next_id: 1,
            capacity,
        }
    }

    pub fn push(&mut self, timestamp: Timestamp, payload: EventPayload) -> EventId {
        let id = EventId(self.next_id);
        self.next_id += 1;
        self.events.push_back(Event::new(id, timestamp, payload));
        while self.events.len() > self.capacity {
            self.events.pop_front();
        }
        id
    }

    pub fn recent(&self, count: usize) -> Vec<Event> {
        let start = self.events.len().saturating_sub(count);
        self.events.iter().skip(start).cloned().collect()
    }

    pub fn all(&self) -> Vec<Event> {
        self.events.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
