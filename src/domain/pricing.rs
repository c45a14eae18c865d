//! LMSR pricing engine.
//!
//! Pure functions over an outcome-share vector `q` and the liquidity
//! parameter `b`:
//!
//! - `C(q) = b · ln Σ exp(q_i / b)`
//! - `p_i(q) = exp(q_i / b) / Σ exp(q_j / b)`
//!
//! Every exponent is shifted by `max_j(q_j / b)` before exponentiating so large
//! share quantities never overflow. The shift cancels out of the price ratio
//! and is added back after the logarithm in the cost.
//!
//! Invalid parameters are rejected once, by [`LmsrMarketMaker::new`]. Passing a
//! share vector of the wrong length, or an outcome index outside the market,
//! is a caller bug and panics.

use serde::Serialize;

use super::error::DomainError;

/// Tolerance used when checking that prices sum to one.
pub const PRICE_SUM_TOLERANCE: f64 = 1e-9;

/// Upper bound on bracket doublings while inverting the price function.
const MAX_BRACKET_DOUBLINGS: u32 = 128;

/// Upper bound on bisection steps; float resolution usually ends the loop first.
const MAX_BISECTION_STEPS: u32 = 256;

/// Validated LMSR parameters for one market.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LmsrMarketMaker {
    liquidity: f64,
    outcomes: usize,
}

/// One level of a synthetic order book.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BookLevel {
    /// Lower price tick.
    pub from_price: f64,
    /// Upper price tick.
    pub to_price: f64,
    /// Shares of the outcome that move the price from `from_price` to `to_price`.
    pub size: f64,
}

impl LmsrMarketMaker {
    /// Create a market maker for `outcomes` outcomes with liquidity `b`.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::InvalidLiquidity`] if `b` is not a positive finite
    /// number and [`DomainError::TooFewOutcomes`] if fewer than two outcomes
    /// are requested.
    pub fn new(liquidity: f64, outcomes: usize) -> Result<Self, DomainError> {
        if !liquidity.is_finite() || liquidity <= 0.0 {
            return Err(DomainError::InvalidLiquidity { liquidity });
        }
        if outcomes < 2 {
            return Err(DomainError::TooFewOutcomes { count: outcomes });
        }
        Ok(Self {
            liquidity,
            outcomes,
        })
    }

    /// The liquidity parameter `b`.
    #[must_use]
    pub const fn liquidity(&self) -> f64 {
        self.liquidity
    }

    /// Number of outcomes.
    #[must_use]
    pub const fn outcomes(&self) -> usize {
        self.outcomes
    }

    /// Marginal price of `outcome`.
    #[must_use]
    pub fn price(&self, q: &[f64], outcome: usize) -> f64 {
        self.assert_shape(q);
        self.assert_outcome(outcome);
        let shift = self.max_exponent(q);
        let denominator: f64 = q.iter().map(|qi| (qi / self.liquidity - shift).exp()).sum();
        (q[outcome] / self.liquidity - shift).exp() / denominator
    }

    /// Marginal prices of every outcome.
    #[must_use]
    pub fn prices(&self, q: &[f64]) -> Vec<f64> {
        self.assert_shape(q);
        let shift = self.max_exponent(q);
        let weights: Vec<f64> = q
            .iter()
            .map(|qi| (qi / self.liquidity - shift).exp())
            .collect();
        let total: f64 = weights.iter().sum();
        weights.into_iter().map(|w| w / total).collect()
    }

    /// Value of the cost function `C(q)`.
    #[must_use]
    pub fn cost(&self, q: &[f64]) -> f64 {
        self.assert_shape(q);
        let shift = self.max_exponent(q);
        let sum: f64 = q.iter().map(|qi| (qi / self.liquidity - shift).exp()).sum();
        self.liquidity * (sum.ln() + shift)
    }

    /// Amount a trader pays to move the market from `before` to `after`.
    ///
    /// Identical vectors cost exactly zero.
    #[must_use]
    pub fn trade_cost(&self, before: &[f64], after: &[f64]) -> f64 {
        self.assert_shape(before);
        self.assert_shape(after);
        if before == after {
            return 0.0;
        }
        self.cost(after) - self.cost(before)
    }

    /// Cost of adding `shares` of `outcome` to `q`. Negative shares are sells.
    #[must_use]
    pub fn cost_to_buy(&self, q: &[f64], outcome: usize, shares: f64) -> f64 {
        self.assert_outcome(outcome);
        let mut after = q.to_vec();
        after[outcome] += shares;
        self.trade_cost(q, &after)
    }

    /// Shares of `outcome` to add (negative: remove) so its price equals `target`.
    ///
    /// Other components of `q` are held fixed. Returns `None` when the target
    /// is outside `(0, 1)` or cannot be reached in floating point.
    #[must_use]
    pub fn shares_to_price(&self, q: &[f64], outcome: usize, target: f64) -> Option<f64> {
        self.assert_shape(q);
        self.assert_outcome(outcome);
        if !target.is_finite() || target <= 0.0 || target >= 1.0 {
            return None;
        }

        let mut scratch = q.to_vec();
        let base = q[outcome];
        let mut gap = |delta: f64| {
            scratch[outcome] = base + delta;
            self.price(&scratch, outcome) - target
        };

        let at_zero = gap(0.0);
        if at_zero == 0.0 {
            return Some(0.0);
        }

        // Bracket the root, growing away from zero in the direction of the target.
        let direction = if at_zero < 0.0 { 1.0 } else { -1.0 };
        let mut near = 0.0_f64;
        let mut far = direction * self.liquidity;
        let mut doublings = 0;
        loop {
            let value = gap(far);
            if value.is_nan() {
                return None;
            }
            if value == 0.0 {
                return Some(far);
            }
            if value.signum() != at_zero.signum() {
                break;
            }
            doublings += 1;
            if doublings > MAX_BRACKET_DOUBLINGS {
                return None;
            }
            near = far;
            far *= 2.0;
            if !far.is_finite() {
                return None;
            }
        }

        let (mut lo, mut hi) = if near < far { (near, far) } else { (far, near) };
        for _ in 0..MAX_BISECTION_STEPS {
            let mid = lo + (hi - lo) / 2.0;
            if mid <= lo || mid >= hi {
                break;
            }
            let value = gap(mid);
            if value == 0.0 {
                return Some(mid);
            }
            if value < 0.0 {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        Some(lo + (hi - lo) / 2.0)
    }

    /// Build a synthetic order book for `outcome` over ascending price `ticks`.
    ///
    /// Each level holds the shares that move the marginal price from one tick
    /// to the next. A non-ascending pair, or a tick that is unreachable, yields
    /// a level of size zero.
    #[must_use]
    pub fn synthetic_order_book(&self, q: &[f64], outcome: usize, ticks: &[f64]) -> Vec<BookLevel> {
        let positions: Vec<Option<f64>> = ticks
            .iter()
            .map(|tick| self.shares_to_price(q, outcome, *tick))
            .collect();

        ticks
            .windows(2)
            .zip(positions.windows(2))
            .map(|(pair, deltas)| {
                let (from_price, to_price) = (pair[0], pair[1]);
                let size = match (deltas[0], deltas[1]) {
                    (Some(lower), Some(upper)) if to_price > from_price => {
                        (upper - lower).max(0.0)
                    }
                    _ => 0.0,
                };
                BookLevel {
                    from_price,
                    to_price,
                    size,
                }
            })
            .collect()
    }

    fn max_exponent(&self, q: &[f64]) -> f64 {
        q.iter()
            .map(|qi| qi / self.liquidity)
            .fold(f64::NEG_INFINITY, f64::max)
    }

    fn assert_shape(&self, q: &[f64]) {
        assert_eq!(
            q.len(),
            self.outcomes,
            "share vector has {} components, market has {} outcomes",
            q.len(),
            self.outcomes
        );
    }

    fn assert_outcome(&self, outcome: usize) {
        assert!(
            outcome < self.outcomes,
            "outcome {outcome} out of range for {} outcomes",
            self.outcomes
        );
    }
}
