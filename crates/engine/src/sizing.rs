//! Fractional-Kelly position sizing
//!
//! Pure function over the caller's payout estimates: raw Kelly fraction,
//! scaled by the configured fraction and the confidence/regime multipliers,
//! hard-capped at 25% of bankroll, then clamped into the venue's size
//! bounds.

use serde::{Deserialize, Serialize};

use crate::math::clamp;
use crate::types::Side;

/// Hard cap on bankroll fraction risked per trade
pub const MAX_BANKROLL_FRACTION: f64 = 0.25;
/// Smallest order the venue accepts, used when the caller gives no floor
pub const DEFAULT_MIN_SIZE: f64 = 0.5;

const DEFAULT_KELLY_FRACTION: f64 = 0.5;
const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Regime labels used by live sizing. Broader than the backtest regime
/// enum: the live pipeline also emits plain TREND and pre-resolved
/// TREND_ALIGNED / TREND_OPPOSED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SizingRegime {
    Chop,
    Range,
    Trend,
    TrendAligned,
    TrendOpposed,
    TrendUp,
    TrendDown,
}

/// Inputs for one sizing decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KellyParams {
    pub win_probability: f64,
    /// Average payout per unit staked on a win; must be positive
    pub avg_win_payout: f64,
    /// Average loss per unit staked on a loss; must be positive
    pub avg_loss_payout: f64,
    pub bankroll: f64,
    /// Fraction of full Kelly to deploy; default 0.5
    #[serde(default)]
    pub kelly_fraction: Option<f64>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub regime: Option<SizingRegime>,
    #[serde(default)]
    pub side: Option<Side>,
    #[serde(default)]
    pub min_size: Option<f64>,
    pub max_size: f64,
}

/// Why the sizer produced the size it did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizingReason {
    InvalidInputs,
    NegativeEdge,
    KellySized,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PositionSizeResult {
    pub size: f64,
    pub raw_kelly: f64,
    pub adjusted_kelly: f64,
    pub reason: SizingReason,
}

/// Fractional-Kelly position size with confidence and regime adjustments.
pub fn calculate_kelly_position_size(params: &KellyParams) -> PositionSizeResult {
    if !params.win_probability.is_finite()
        || !params.avg_win_payout.is_finite()
        || params.avg_win_payout <= 0.0
        || !params.avg_loss_payout.is_finite()
        || params.avg_loss_payout <= 0.0
    {
        return PositionSizeResult {
            size: 0.0,
            raw_kelly: 0.0,
            adjusted_kelly: 0.0,
            reason: SizingReason::InvalidInputs,
        };
    }

    let p = clamp(params.win_probability, 0.0, 1.0);
    let b = params.avg_win_payout / params.avg_loss_payout;
    let q = 1.0 - p;
    let raw_kelly = (b * p - q) / b;

    if !raw_kelly.is_finite() || raw_kelly <= 0.0 {
        return PositionSizeResult {
            size: 0.0,
            raw_kelly,
            adjusted_kelly: 0.0,
            reason: SizingReason::NegativeEdge,
        };
    }

    let kelly_fraction = clamp(
        params.kelly_fraction.unwrap_or(DEFAULT_KELLY_FRACTION),
        0.0,
        1.0,
    );
    let confidence = clamp(params.confidence.unwrap_or(DEFAULT_CONFIDENCE), 0.0, 1.0);
    let confidence_multiplier = if confidence >= 0.8 {
        1.2
    } else if confidence >= 0.5 {
        1.0
    } else {
        0.6
    };
    let regime_multiplier = sizing_regime_multiplier(params.regime, params.side);

    let adjusted_kelly = clamp(
        raw_kelly * kelly_fraction * confidence_multiplier * regime_multiplier,
        0.0,
        MAX_BANKROLL_FRACTION,
    );

    let bankroll = if params.bankroll.is_finite() {
        params.bankroll.max(0.0)
    } else {
        0.0
    };
    let min_size = params.min_size.unwrap_or(DEFAULT_MIN_SIZE);
    let max_size = params.max_size.max(min_size);
    let size = clamp(adjusted_kelly * bankroll, min_size, max_size);

    PositionSizeResult {
        size,
        raw_kelly,
        adjusted_kelly,
        reason: SizingReason::KellySized,
    }
}

/// Directional regimes size up when aligned with the trade side and down
/// when opposed; an omitted side counts as aligned.
fn sizing_regime_multiplier(regime: Option<SizingRegime>, side: Option<Side>) -> f64 {
    match regime {
        None => 1.0,
        Some(SizingRegime::Chop) => 0.5,
        Some(SizingRegime::Range) => 0.8,
        Some(SizingRegime::Trend) | Some(SizingRegime::TrendAligned) => 1.1,
        Some(SizingRegime::TrendOpposed) => 0.6,
        Some(SizingRegime::TrendUp) => match side {
            None | Some(Side::Up) => 1.1,
            Some(Side::Down) => 0.6,
        },
        Some(SizingRegime::TrendDown) => match side {
            None | Some(Side::Down) => 1.1,
            Some(Side::Up) => 0.6,
        },
    }
}
