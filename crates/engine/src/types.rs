//! Types for the strategy evaluation engine

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Direction of an up/down market position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Side {
    Up,
    Down,
}

/// Where in the 15-minute window the signal fired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Early,
    Mid,
    Late,
}

/// Market regime classification at signal time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Regime {
    TrendUp,
    TrendDown,
    Range,
    Chop,
}

/// One value per window phase (edge thresholds, minimum model probabilities)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhaseThresholds {
    pub early: f64,
    pub mid: f64,
    pub late: f64,
}

impl PhaseThresholds {
    pub fn for_phase(&self, phase: Phase) -> f64 {
        match phase {
            Phase::Early => self.early,
            Phase::Mid => self.mid,
            Phase::Late => self.late,
        }
    }
}

/// Weighting between the volatility-implied and technical-analysis
/// probability models. Not required to sum to 1 (the UI validates that).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlendWeights {
    pub vol_implied: f64,
    pub technical: f64,
}

/// Edge-threshold multipliers per regime. Values above 1 demand more edge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegimeMultipliers {
    pub chop: f64,
    pub range: f64,
    pub trend_aligned: f64,
    pub trend_opposed: f64,
}

impl RegimeMultipliers {
    /// Multiplier for a signal: CHOP and RANGE apply directly, trends
    /// resolve to aligned/opposed against the signal's side.
    pub fn for_signal(&self, regime: Regime, side: Side) -> f64 {
        match regime {
            Regime::Chop => self.chop,
            Regime::Range => self.range,
            Regime::TrendUp => {
                if side == Side::Up {
                    self.trend_aligned
                } else {
                    self.trend_opposed
                }
            }
            Regime::TrendDown => {
                if side == Side::Down {
                    self.trend_aligned
                } else {
                    self.trend_opposed
                }
            }
        }
    }
}

/// Per-market threshold overrides derived from realized performance.
/// Carried on the config for the analysis layer; the engine's entry
/// checks do not consult them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketOverride {
    pub edge_threshold: Option<f64>,
    pub min_probability: Option<f64>,
}

/// Immutable-per-run strategy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Minimum edge required to enter, per phase
    pub edge_thresholds: PhaseThresholds,
    /// Minimum model-implied probability required to enter, per phase
    pub min_probability: PhaseThresholds,
    pub blend_weights: BlendWeights,
    pub regime_multipliers: RegimeMultipliers,
    /// Markets excluded from trading entirely
    #[serde(default)]
    pub skip_markets: Vec<String>,
    /// Optional confidence gate; absent means no gate (0)
    #[serde(default)]
    pub min_confidence: Option<f64>,
    #[serde(default)]
    pub market_overrides: HashMap<String, MarketOverride>,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            edge_thresholds: PhaseThresholds {
                early: 0.05,
                mid: 0.04,
                late: 0.03,
            },
            min_probability: PhaseThresholds {
                early: 0.55,
                mid: 0.55,
                late: 0.60,
            },
            blend_weights: BlendWeights {
                vol_implied: 0.6,
                technical: 0.4,
            },
            regime_multipliers: RegimeMultipliers {
                chop: 1.5,
                range: 1.2,
                trend_aligned: 0.9,
                trend_opposed: 1.4,
            },
            skip_markets: Vec::new(),
            min_confidence: None,
            market_overrides: HashMap::new(),
        }
    }
}

/// Config decode/validation failures
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid strategy config JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{field} must be finite, got {value}")]
    NonFinite { field: &'static str, value: f64 },
    #[error("{field} must be non-negative, got {value}")]
    NegativeMultiplier { field: &'static str, value: f64 },
}

impl StrategyConfig {
    /// Decode a persisted config and enforce the invariants.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Invariants: every threshold/probability/weight is finite, every
    /// regime multiplier is finite and non-negative.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let finite_fields = [
            ("edge_thresholds.early", self.edge_thresholds.early),
            ("edge_thresholds.mid", self.edge_thresholds.mid),
            ("edge_thresholds.late", self.edge_thresholds.late),
            ("min_probability.early", self.min_probability.early),
            ("min_probability.mid", self.min_probability.mid),
            ("min_probability.late", self.min_probability.late),
            ("blend_weights.vol_implied", self.blend_weights.vol_implied),
            ("blend_weights.technical", self.blend_weights.technical),
        ];
        for (field, value) in finite_fields {
            if !value.is_finite() {
                return Err(ConfigError::NonFinite { field, value });
            }
        }

        let multipliers = [
            ("regime_multipliers.chop", self.regime_multipliers.chop),
            ("regime_multipliers.range", self.regime_multipliers.range),
            (
                "regime_multipliers.trend_aligned",
                self.regime_multipliers.trend_aligned,
            ),
            (
                "regime_multipliers.trend_opposed",
                self.regime_multipliers.trend_opposed,
            ),
        ];
        for (field, value) in multipliers {
            if !value.is_finite() {
                return Err(ConfigError::NonFinite { field, value });
            }
            if value < 0.0 {
                return Err(ConfigError::NegativeMultiplier { field, value });
            }
        }

        if let Some(value) = self.min_confidence {
            if !value.is_finite() {
                return Err(ConfigError::NonFinite {
                    field: "min_confidence",
                    value,
                });
            }
        }

        for over in self.market_overrides.values() {
            for (field, value) in [
                ("market_overrides.edge_threshold", over.edge_threshold),
                ("market_overrides.min_probability", over.min_probability),
            ] {
                if let Some(value) = value {
                    if !value.is_finite() {
                        return Err(ConfigError::NonFinite { field, value });
                    }
                }
            }
        }

        Ok(())
    }
}

/// One historical signal observation fed to the backtest engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestSignal {
    /// ISO-8601 timestamp of the observation
    pub timestamp: String,
    pub market: String,
    pub side: Side,
    pub phase: Phase,
    pub regime: Regime,
    /// Raw model edge over the market price
    pub edge: f64,
    /// Regime-adjusted edge; the engine falls back to `edge` when this
    /// is non-finite
    pub effective_edge: f64,
    pub model_up: f64,
    pub model_down: f64,
    pub market_up: f64,
    pub market_down: f64,
    pub confidence: f64,
    pub volatility_15m: f64,
    /// The window's target price
    pub price_to_beat: f64,
    /// Settlement price; None means unsettled and excluded from entry
    pub final_price: Option<f64>,
    // Order-book / indicator context, unused by entry logic but retained
    // for downstream analysis.
    #[serde(default)]
    pub ob_imbalance: Option<f64>,
    #[serde(default)]
    pub rsi: Option<f64>,
    #[serde(default)]
    pub vwap_slope: Option<f64>,
}

impl BacktestSignal {
    /// Model probability for the signal's own side
    pub fn model_prob(&self) -> f64 {
        match self.side {
            Side::Up => self.model_up,
            Side::Down => self.model_down,
        }
    }

    /// Market price paid to enter on the signal's own side
    pub fn buy_price(&self) -> f64 {
        match self.side {
            Side::Up => self.market_up,
            Side::Down => self.market_down,
        }
    }
}

/// Per-bucket breakdown row (market / regime / phase)
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BreakdownStats {
    pub trades: u32,
    pub wins: u32,
    pub win_rate: f64,
    pub pnl: f64,
}

/// Aggregate output of one engine run; fully recomputed every run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    /// Every input signal, including skipped/unsettled ones
    pub total_signals: u32,
    pub trades_entered: u32,
    pub wins: u32,
    pub losses: u32,
    pub win_rate: f64,
    pub total_pnl: f64,
    pub avg_pnl: f64,
    /// Peak-to-trough on cumulative equity
    pub max_drawdown: f64,
    /// Annualized from per-day aggregated returns (√252)
    pub sharpe_ratio: f64,
    /// Gross profit / |gross loss|; +∞ with profit and no losses, 0 with neither
    pub profit_factor: f64,
    pub by_market: HashMap<String, BreakdownStats>,
    pub by_regime: HashMap<Regime, BreakdownStats>,
    pub by_phase: HashMap<Phase, BreakdownStats>,
}
