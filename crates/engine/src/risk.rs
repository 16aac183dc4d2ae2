//! Stop-loss and take-profit calculators
//!
//! Three independent exit calculators: a volatility-scaled hard stop, a
//! ratcheting trailing stop whose state the caller owns and re-supplies
//! each tick, and a take-profit target that decays toward its floor as the
//! 15-minute window ages.

use serde::{Deserialize, Serialize};

use crate::math::clamp;
use crate::types::Side;

// ---------------------------------------------------------------------------
// Volatility stop
// ---------------------------------------------------------------------------

/// Volatility-based stop-loss parameters
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VolatilityStopConfig {
    pub enabled: bool,
    /// Stop distance as a multiple of 15-minute realized volatility
    pub multiplier: f64,
    pub min_stop_percent: f64,
    pub max_stop_percent: f64,
}

impl Default for VolatilityStopConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            multiplier: 1.5,
            min_stop_percent: 0.005,
            max_stop_percent: 0.03,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    InvalidEntryPrice,
    VolatilityStopDisabled,
    VolatilityStop,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VolatilityStopResult {
    pub stop_price: f64,
    pub stop_percent: f64,
    pub reason: StopReason,
}

/// Stop level scaled by realized volatility. UP stops below entry, DOWN
/// stops above.
pub fn calculate_volatility_stop(
    entry_price: f64,
    side: Side,
    volatility_15m: f64,
    config: &VolatilityStopConfig,
) -> VolatilityStopResult {
    if !entry_price.is_finite() || entry_price <= 0.0 {
        return VolatilityStopResult {
            stop_price: 0.0,
            stop_percent: 0.0,
            reason: StopReason::InvalidEntryPrice,
        };
    }
    if !config.enabled {
        return VolatilityStopResult {
            stop_price: 0.0,
            stop_percent: 0.0,
            reason: StopReason::VolatilityStopDisabled,
        };
    }

    // NaN volatility resolves to the minimum stop via the clamp.
    let stop_percent = clamp(
        volatility_15m * config.multiplier,
        config.min_stop_percent,
        config.max_stop_percent.max(config.min_stop_percent),
    );
    let stop_price = match side {
        Side::Up => entry_price - entry_price * stop_percent,
        Side::Down => entry_price + entry_price * stop_percent,
    };

    VolatilityStopResult {
        stop_price,
        stop_percent,
        reason: StopReason::VolatilityStop,
    }
}

// ---------------------------------------------------------------------------
// Trailing stop
// ---------------------------------------------------------------------------

/// Trailing-stop state, owned by the caller and re-supplied each tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrailingStopState {
    pub entry_price: f64,
    pub side: Side,
    pub highest_price: f64,
    pub lowest_price: f64,
    pub trailing_percent: f64,
    pub activated: bool,
    pub activation_percent: f64,
}

impl TrailingStopState {
    pub fn new(entry_price: f64, side: Side, trailing_percent: f64, activation_percent: f64) -> Self {
        Self {
            entry_price,
            side,
            highest_price: entry_price,
            lowest_price: entry_price,
            trailing_percent,
            activated: false,
            activation_percent,
        }
    }
}

/// Advance the trailing stop by one price tick. Returns the current stop
/// level once the move has cleared the activation threshold; the latch
/// never deactivates. An invalid price leaves the state untouched.
pub fn update_trailing_stop(state: &mut TrailingStopState, current_price: f64) -> Option<f64> {
    if !current_price.is_finite() || current_price <= 0.0 {
        return None;
    }

    if current_price > state.highest_price {
        state.highest_price = current_price;
    }
    if current_price < state.lowest_price {
        state.lowest_price = current_price;
    }

    if !state.activated {
        state.activated = match state.side {
            Side::Up => current_price >= state.entry_price * (1.0 + state.activation_percent),
            Side::Down => current_price <= state.entry_price * (1.0 - state.activation_percent),
        };
    }
    if !state.activated {
        return None;
    }

    let trailing = state.trailing_percent.max(0.0);
    Some(match state.side {
        Side::Up => state.highest_price * (1.0 - trailing),
        Side::Down => state.lowest_price * (1.0 + trailing),
    })
}

// ---------------------------------------------------------------------------
// Take profit
// ---------------------------------------------------------------------------

/// Time-decaying take-profit parameters. The target tightens as the
/// window ages, down to `min_profit_percent`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TakeProfitConfig {
    pub enabled: bool,
    pub base_profit_percent: f64,
    pub min_profit_percent: f64,
    /// Profit-percent decay per elapsed minute
    pub decay_rate: f64,
}

impl Default for TakeProfitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_profit_percent: 0.04,
            min_profit_percent: 0.01,
            decay_rate: 0.002,
        }
    }
}

/// Take-profit target for a position `minutes_elapsed` into its window.
/// None when disabled or the entry price is invalid.
pub fn calculate_take_profit(
    entry_price: f64,
    side: Side,
    minutes_elapsed: f64,
    config: &TakeProfitConfig,
) -> Option<f64> {
    if !config.enabled || !entry_price.is_finite() || entry_price <= 0.0 {
        return None;
    }

    let elapsed = if minutes_elapsed.is_finite() {
        minutes_elapsed.max(0.0)
    } else {
        0.0
    };
    let decay_rate = config.decay_rate.max(0.0);
    let profit_percent =
        (config.base_profit_percent - elapsed * decay_rate).max(config.min_profit_percent);

    Some(match side {
        Side::Up => entry_price * (1.0 + profit_percent),
        Side::Down => entry_price * (1.0 - profit_percent),
    })
}
