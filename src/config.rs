// 7.0 config.rs: engine settings in one place. freshness window, payout
// rounding, prize curve, transfer retry policy, env overrides and presets.

use crate::prize::PrizeCurve;
use crate::transfer::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub const ENV_PREFIX: &str = "TOURNAMENT_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    // how old a quote may be and still fill a trade
    pub max_quote_age_ms: i64,
    // audit log capacity; oldest events are dropped past this
    pub max_events: usize,
    // decimal places prize amounts are floored to
    pub payout_scale: u32,
    pub prize_curve: PrizeCurve,
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_quote_age_ms: 60_000,
            max_events: 100_000,
            payout_scale: 6,
            prize_curve: PrizeCurve::default(),
            retry: RetryPolicy::default(),
        }
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str, current: T) -> T {
    lookup(&format!("{ENV_PREFIX}{name}"))
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(current)
}

impl EngineConfig {
    /// Defaults overridden by `TOURNAMENT_*` environment variables.
    /// Unparsable values are ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    // 7.1: same as from_env but reads through `lookup`, so tests don't touch process env
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let base = Self::default();
        Self {
            max_quote_age_ms: parse_or(&lookup, "MAX_QUOTE_AGE_MS", base.max_quote_age_ms),
            max_events: parse_or(&lookup, "MAX_EVENTS", base.max_events),
            payout_scale: parse_or(&lookup, "PAYOUT_SCALE", base.payout_scale),
            prize_curve: base.prize_curve,
            retry: RetryPolicy {
                max_attempts: parse_or(&lookup, "RETRY_MAX_ATTEMPTS", base.retry.max_attempts),
                initial_backoff_ms: parse_or(&lookup, "RETRY_INITIAL_BACKOFF_MS", base.retry.initial_backoff_ms),
                max_backoff_ms: parse_or(&lookup, "RETRY_MAX_BACKOFF_MS", base.retry.max_backoff_ms),
            },
        }
    }

    // 7.2: preset for tests and the simulator: no backoff sleeps, long quote window
    pub fn testing() -> Self {
        Self {
            max_quote_age_ms: 3_600_000,
            max_events: 10_000,
            retry: RetryPolicy::no_delay(3),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.prize_curve
            .validate()
            .map_err(|e| ConfigError::InvalidPrizeCurve(e.to_string()))?;

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidRetry {
                reason: "max_attempts must be at least 1".to_string(),
            });
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(ConfigError::InvalidRetry {
                reason: "initial backoff exceeds the cap".to_string(),
            });
        }
        if self.max_quote_age_ms <= 0 {
            return Err(ConfigError::InvalidQuoteAge(self.max_quote_age_ms));
        }
        if self.payout_scale > 18 {
            return Err(ConfigError::InvalidPayoutScale(self.payout_scale));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid prize curve: {0}")]
    InvalidPrizeCurve(String),

    #[error("Invalid retry policy: {reason}")]
    InvalidRetry { reason: String },

    #[error("Quote age window must be positive, got {0}ms")]
    InvalidQuoteAge(i64),

    #[error("Payout scale {0} is out of range")]
    InvalidPayoutScale(u32),
}
