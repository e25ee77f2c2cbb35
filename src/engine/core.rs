// 8.0 engine/core.rs: service facade. holds handles to the store, price cache,
// transfer service and clock. shared as Arc<Engine>; every method takes &self.

use super::results::EngineError;
use crate::claim::PrizeClaim;
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::events::{Event, EventLog, EventPayload};
use crate::participant::Participant;
use crate::price_feed::PriceCache;
use crate::store::{StoreError, TournamentStore};
use crate::tournament::Tournament;
use crate::trade::Trade;
use crate::transfer::TransferService;
use crate::types::{ParticipantKey, Timestamp, TournamentId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

/** 8.1: main engine struct. durable state lives behind the store */
pub struct Engine {
    pub(super) config: EngineConfig,
    pub(super) store: Arc<dyn TournamentStore>,
    pub(super) prices: Arc<PriceCache>,
    pub(super) transfers: Arc<dyn TransferService>,
    pub(super) clock: Arc<dyn Clock>,
    // one trade in flight per participant
    participant_locks: Mutex<HashMap<ParticipantKey, Arc<Mutex<()>>>>,
    // held across the transfer await, hence the async mutex
    claim_locks: Mutex<HashMap<ParticipantKey, Arc<tokio::sync::Mutex<()>>>>,
    events: Mutex<EventLog>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn TournamentStore>,
        prices: Arc<PriceCache>,
        transfers: Arc<dyn TransferService>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let events = EventLog::new(config.max_events);
        Ok(Self {
            config,
            store,
            prices,
            transfers,
            clock,
            participant_locks: Mutex::new(HashMap::new()),
            claim_locks: Mutex::new(HashMap::new()),
            events: Mutex::new(events),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn price_cache(&self) -> &Arc<PriceCache> {
        &self.prices
    }

    pub fn store(&self) -> &Arc<dyn TournamentStore> {
        &self.store
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn get_tournament(&self, tournament_id: TournamentId) -> Result<Tournament, EngineError> {
        self.store.tournament(tournament_id).map_err(|e| match e {
            StoreError::NotFound(_) => EngineError::TournamentNotFound(tournament_id),
            other => other.into(),
        })
    }

    pub fn get_participant(&self, key: &ParticipantKey) -> Result<Participant, EngineError> {
        self.store.participant(key).map_err(|e| match e {
            StoreError::NotFound(_) => EngineError::ParticipantNotFound(key.clone()),
            other => other.into(),
        })
    }

    pub(super) fn participant_with_trades(&self, key: &ParticipantKey) -> Result<(Participant, Vec<Trade>), EngineError> {
        self.store.participant_with_trades(key).map_err(|e| match e {
            StoreError::NotFound(_) => EngineError::ParticipantNotFound(key.clone()),
            other => other.into(),
        })
    }

    pub fn get_claim(&self, key: &ParticipantKey) -> Result<PrizeClaim, EngineError> {
        self.store.claim(key).map_err(|e| match e {
            StoreError::NotFound(_) => EngineError::ClaimNotFound(key.clone()),
            other => other.into(),
        })
    }

    pub fn recent_events(&self, count: usize) -> Vec<Event> {
        self.events.lock().recent(count)
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().all()
    }

    pub(super) fn participant_lock(&self, key: &ParticipantKey) -> Arc<Mutex<()>> {
        self.participant_locks.lock().entry(key.clone()).or_default().clone()
    }

    pub(super) fn claim_lock(&self, key: &ParticipantKey) -> Arc<tokio::sync::Mutex<()>> {
        self.claim_locks.lock().entry(key.clone()).or_default().clone()
    }

    // a SETTLED tournament takes no more trades
    pub(super) fn release_participant_locks(&self, tournament_id: TournamentId) {
        self.participant_locks.lock().retain(|key, _| key.tournament_id != tournament_id);
    }

    // a PAID claim is never written again
    pub(super) fn release_claim_lock(&self, key: &ParticipantKey) {
        self.claim_locks.lock().remove(key);
    }

    #[cfg(test)]
    pub(super) fn lock_counts(&self) -> (usize, usize) {
        (self.participant_locks.lock().len(), self.claim_locks.lock().len())
    }

    pub(super) fn emit_event(&self, payload: EventPayload) {
        let now = self.now();
        let id = self.events.lock().push(now, payload);
        trace!(event_id = id.0, "event recorded");
    }
}
