//! Configuration types for markets and the market controller.

use serde::{Deserialize, Serialize};

use crate::{Currency, LendbookError, MarketKey, Maturity, Result, constants};

/// Circuit breaker parameters.
///
/// The allowed offset around the reference price is
/// `reference * limit_range_bps / PCT_DIGIT`, clamped to
/// `[min_offset, max_offset]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub limit_range_bps: u64,
    pub min_offset: u64,
    pub max_offset: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            limit_range_bps: constants::DEFAULT_CIRCUIT_BREAKER_LIMIT_RANGE_BPS,
            min_offset: constants::DEFAULT_CIRCUIT_BREAKER_MIN_OFFSET,
            max_offset: constants::DEFAULT_CIRCUIT_BREAKER_MAX_OFFSET,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.limit_range_bps > constants::PCT_DIGIT {
            return Err(LendbookError::Configuration(format!(
                "circuit breaker range {} bps exceeds {}",
                self.limit_range_bps,
                constants::PCT_DIGIT
            )));
        }
        if self.min_offset > self.max_offset {
            return Err(LendbookError::Configuration(format!(
                "circuit breaker min offset {} exceeds max offset {}",
                self.min_offset, self.max_offset
            )));
        }
        Ok(())
    }
}

/// Per-market configuration, supplied by the controller when a book is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketConfig {
    pub currency: Currency,
    pub maturity: Maturity,
    /// UNIX seconds at which the pre-order period ends.
    pub opening_date: u64,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
}

impl MarketConfig {
    #[must_use]
    pub fn new(currency: Currency, maturity: Maturity, opening_date: u64) -> Self {
        Self {
            currency,
            maturity,
            opening_date,
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }

    #[must_use]
    pub fn with_circuit_breaker(mut self, circuit_breaker: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = circuit_breaker;
        self
    }

    #[must_use]
    pub fn key(&self) -> MarketKey {
        MarketKey::new(self.currency.clone(), self.maturity)
    }

    pub fn validate(&self) -> Result<()> {
        if self.currency.as_str().is_empty() {
            return Err(LendbookError::Configuration("currency is empty".into()));
        }
        if self.opening_date >= self.maturity.0 {
            return Err(LendbookError::Configuration(format!(
                "opening date {} must precede maturity {}",
                self.opening_date, self.maturity.0
            )));
        }
        self.circuit_breaker.validate()
    }

    /// Parse and validate a JSON market definition.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }
}

/// Settings of the market controller hosting many books.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Bounded queue length of each book actor.
    pub command_queue_capacity: usize,
    /// Capacity of the shared event broadcast channel.
    pub event_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command_queue_capacity: constants::DEFAULT_COMMAND_QUEUE_CAPACITY,
            event_channel_capacity: constants::DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

/// Test helpers.
#[cfg(any(test, feature = "test-helpers"))]
impl MarketConfig {
    /// USDC market opening at t=1_000 and maturing at t=1_000_000.
    pub fn dummy() -> Self {
        Self::new(Currency::new("USDC"), Maturity(1_000_000), 1_000)
    }
}
