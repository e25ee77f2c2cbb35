// Price Feed Integration
//
// This module abstracts how the engine receives token prices. The core engine
// is agnostic to where quotes come from; it only ever reads the latest cached
// quote. Ingestion is the single writer, trade and valuation paths are readers
// and never wait on a refresh.

use crate::types::{Price, Timestamp, TokenAddress};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Latest known price of a token and when the source observed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub price: Price,
    pub observed_at: Timestamp,
}

impl PriceQuote {
    pub fn new(price: Price, observed_at: Timestamp) -> Self {
        Self { price, observed_at }
    }

    pub fn age_ms(&self, now: Timestamp) -> i64 {
        self.observed_at.age_at(now)
    }

    pub fn is_stale(&self, now: Timestamp, max_age_ms: i64) -> bool {
        self.age_ms(now) > max_age_ms
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PriceFeedError {
    #[error("No price available for {0}")]
    Unavailable(TokenAddress),

    #[error("Price for {token} is stale ({age_ms}ms old)")]
    Stale { token: TokenAddress, age_ms: i64 },
}

/// External price source. Implementations wrap a CEX, an oracle, an indexer.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn get_price(&self, token: &TokenAddress) -> Result<PriceQuote, PriceFeedError>;
}

/// Read-shared quote cache.
#[derive(Debug, Default)]
pub struct PriceCache {
    quotes: RwLock<HashMap<TokenAddress, PriceQuote>>,
}

impl PriceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a quote. Out-of-order quotes (older than what is cached) are dropped.
    /// Returns whether the cache changed.
    pub fn ingest(&self, token: TokenAddress, quote: PriceQuote) -> bool {
        let mut quotes = self.quotes.write();
        match quotes.get(&token) {
            Some(existing) if existing.observed_at > quote.observed_at => {
                debug!(token = %token, "dropping out-of-order quote");
                false
            }
            _ => {
                quotes.insert(token, quote);
                true
            }
        }
    }

    pub fn latest(&self, token: &TokenAddress) -> Option<PriceQuote> {
        self.quotes.read().get(token).copied()
    }

    /// Latest quote, but only if it is within the freshness window.
    pub fn fresh(&self, token: &TokenAddress, now: Timestamp, max_age_ms: i64) -> Result<PriceQuote, PriceFeedError> {
        let quote = self
            .latest(token)
            .ok_or_else(|| PriceFeedError::Unavailable(token.clone()))?;
        if quote.is_stale(now, max_age_ms) {
            return Err(PriceFeedError::Stale {
                token: token.clone(),
                age_ms: quote.age_ms(now),
            });
        }
        Ok(quote)
    }

    pub fn len(&self) -> usize {
        self.quotes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.quotes.read().is_empty()
    }
}

/// Pulls quotes from a source into the cache. Driven by an external scheduler.
pub struct PriceIngestor {
    source: Arc<dyn PriceSource>,
    cache: Arc<PriceCache>,
}

impl PriceIngestor {
    pub fn new(source: Arc<dyn PriceSource>, cache: Arc<PriceCache>) -> Self {
        Self { source, cache }
    }

    /// Refresh every token once. Returns the tokens the source failed on;
    /// their previous quotes stay in the cache.
    pub async fn refresh<'a, I>(&self, tokens: I) -> Vec<TokenAddress>
    where
        I: IntoIterator<Item = &'a TokenAddress>,
    {
        let mut failed = Vec::new();
        for token in tokens {
            match self.source.get_price(token).await {
                Ok(quote) => {
                    self.cache.ingest(token.clone(), quote);
                }
                Err(e) => {
                    warn!(token = %token, error = %e, "price refresh failed, keeping last quote");
                    failed.push(token.clone());
                }
            }
        }
        failed
    }
}

/// In-memory source for tests and simulation.
#[derive(Debug, Default)]
pub struct StaticPriceSource {
    quotes: RwLock<HashMap<TokenAddress, PriceQuote>>,
}

impl StaticPriceSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, token: TokenAddress, quote: PriceQuote) {
        self.quotes.write().insert(token, quote);
    }

    pub fn remove(&self, token: &TokenAddress) {
        self.quotes.write().remove(token);
    }
}

#[async_trait]
impl PriceSource for StaticPriceSource {
    async fn get_price(&self, token: &TokenAddress) -> Result<PriceQuote, PriceFeedError> {
        self.quotes
            .read()
            .get(token)
            .copied()
            .ok_or_else(|| PriceFeedError::Unavailable(token.clone()))
    }
}
