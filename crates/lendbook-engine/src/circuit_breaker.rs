//! Price band around the last executed unit price.
//!
//! With reference price `r`, the offset is `r * limit_range_bps / PCT_DIGIT`
//! clamped to `[min_offset, max_offset]`. Lenders may not bid above
//! `r + offset` and borrowers may not offer below `r - offset`. Only the
//! aggressive direction is bounded. Without a reference the breaker is
//! inactive.

use lendbook_types::{
    CircuitBreakerConfig, LendbookError, Result, Side, UnitPrice, constants,
};
use serde::{Deserialize, Serialize};

use crate::price_level_tree::EMPTY;

/// Executable bounds derived from the reference price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceThresholds {
    /// Highest unit price a LEND order may execute at.
    pub max_lend_unit_price: UnitPrice,
    /// Lowest unit price a BORROW order may execute at.
    pub min_borrow_unit_price: UnitPrice,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    reference_unit_price: Option<UnitPrice>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            reference_unit_price: None,
        }
    }

    #[must_use]
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    #[must_use]
    pub fn reference_unit_price(&self) -> Option<UnitPrice> {
        self.reference_unit_price
    }

    pub fn set_reference_unit_price(&mut self, unit_price: Option<UnitPrice>) {
        self.reference_unit_price = unit_price;
    }

    /// Allowed distance from the reference, in unit-price ticks.
    #[must_use]
    pub fn offset(&self, reference: UnitPrice) -> u64 {
        let raw = reference.saturating_mul(self.config.limit_range_bps) / constants::PCT_DIGIT;
        raw.max(self.config.min_offset).min(self.config.max_offset)
    }

    /// `None` while no reference price is known.
    #[must_use]
    pub fn thresholds(&self) -> Option<PriceThresholds> {
        let reference = self.reference_unit_price?;
        let offset = self.offset(reference);
        Some(PriceThresholds {
            max_lend_unit_price: reference.saturating_add(offset).min(constants::PRICE_DIGIT),
            min_borrow_unit_price: reference
                .saturating_sub(offset)
                .max(constants::MIN_UNIT_PRICE),
        })
    }

    /// Reject a limit price beyond the band in its aggressive direction.
    pub fn check_limit(&self, side: Side, unit_price: UnitPrice) -> Result<()> {
        let Some(thresholds) = self.thresholds() else {
            return Ok(());
        };
        let rejected = match side {
            Side::Lend => unit_price > thresholds.max_lend_unit_price,
            Side::Borrow => unit_price < thresholds.min_borrow_unit_price,
        };
        if rejected {
            tracing::warn!(
                side = %side,
                unit_price,
                max_lend = thresholds.max_lend_unit_price,
                min_borrow = thresholds.min_borrow_unit_price,
                "Circuit breaker rejected order"
            );
            return Err(LendbookError::InvalidUnitPrice {
                unit_price,
                reason: match side {
                    Side::Lend => format!(
                        "above circuit breaker threshold {}",
                        thresholds.max_lend_unit_price
                    ),
                    Side::Borrow => format!(
                        "below circuit breaker threshold {}",
                        thresholds.min_borrow_unit_price
                    ),
                },
            });
        }
        Ok(())
    }

    /// Limit for sweeping the opposite tree: the order's own price, or the
    /// threshold for market orders. [`EMPTY`] means unbounded.
    #[must_use]
    pub fn sweep_limit(&self, side: Side, unit_price: Option<UnitPrice>) -> UnitPrice {
        if let Some(price) = unit_price {
            return price;
        }
        self.thresholds().map_or(EMPTY, |t| match side {
            Side::Lend => t.max_lend_unit_price,
            Side::Borrow => t.min_borrow_unit_price,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(reference: Option<UnitPrice>) -> CircuitBreaker {
        let mut cb = CircuitBreaker::new(CircuitBreakerConfig::default());
        cb.set_reference_unit_price(reference);
        cb
    }

    #[test]
    fn inactive_without_reference() {
        let cb = breaker(None);
        assert!(cb.thresholds().is_none());
        assert!(cb.check_limit(Side::Lend, 10_000).is_ok());
        assert!(cb.check_limit(Side::Borrow, 1).is_ok());
        assert_eq!(cb.sweep_limit(Side::Lend, None), EMPTY);
    }

    #[test]
    fn offset_is_clamped() {
        let cb = breaker(None);
        // 10% of 50 is 5, raised to the minimum of 10.
        assert_eq!(cb.offset(50), 10);
        // 10% of 9_000 is 900.
        assert_eq!(cb.offset(9_000), 900);

        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            limit_range_bps: 5_000,
            min_offset: 10,
            max_offset: 200,
        });
        assert_eq!(cb.offset(9_000), 200);
    }

    #[test]
    fn thresholds_are_capped_to_price_range() {
        let t = breaker(Some(9_500)).thresholds().unwrap();
        assert_eq!(t.max_lend_unit_price, 10_000);
        assert_eq!(t.min_borrow_unit_price, 8_550);

        let t = breaker(Some(5)).thresholds().unwrap();
        assert_eq!(t.min_borrow_unit_price, 1);
        assert_eq!(t.max_lend_unit_price, 15);
    }

    #[test]
    fn only_aggressive_direction_is_rejected() {
        let cb = breaker(Some(8_000));
        // band is [7_200, 8_800]
        assert!(cb.check_limit(Side::Lend, 8_800).is_ok());
        assert!(matches!(
            cb.check_limit(Side::Lend, 8_801),
            Err(LendbookError::InvalidUnitPrice { unit_price: 8_801, .. })
        ));
        assert!(cb.check_limit(Side::Lend, 1).is_ok());

        assert!(cb.check_limit(Side::Borrow, 7_200).is_ok());
        assert!(cb.check_limit(Side::Borrow, 7_199).is_err());
        assert!(cb.check_limit(Side::Borrow, 10_000).is_ok());
    }

    #[test]
    fn market_orders_sweep_to_threshold() {
        let cb = breaker(Some(8_000));
        assert_eq!(cb.sweep_limit(Side::Lend, None), 8_800);
        assert_eq!(cb.sweep_limit(Side::Borrow, None), 7_200);
        assert_eq!(cb.sweep_limit(Side::Lend, Some(8_100)), 8_100);
    }
}
