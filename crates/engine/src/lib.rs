//! Strategy evaluation engine for 15-minute up/down prediction markets
//!
//! The numeric core of the trading bot, consumed as a library by the data
//! pipeline and dashboard. Provides:
//! - Signal-replay backtesting engine with P&L and risk-adjusted metrics
//! - A/B config comparison with chi-squared significance testing
//! - Grid-search parameter optimizer (parallel cartesian sweep)
//! - Walk-forward cross-validation with overfit detection
//! - Fractional-Kelly position sizing and stop/take-profit calculators
//! - Similarity-weighted k-NN win-rate prediction

pub mod abtest;
pub mod engine;
pub mod math;
pub mod optimizer;
pub mod quality;
pub mod risk;
pub mod sizing;
pub mod types;
pub mod validation;

// Re-exports for convenience
pub use abtest::{chi_squared_p_value, run_ab_test, AbTestResult, SIGNIFICANCE_LEVEL};
pub use engine::{BacktestEngine, DEFAULT_TRADE_SIZE};
pub use optimizer::{
    optimize_parameters, optimize_with_progress, OptimizationEntry, OptimizationResult,
    OptimizeProgress, OptimizeStatus, ParameterGrid, SortMetric,
};
pub use quality::{
    compute_similarity, HistoricalSignal, PredictionConfidence, SignalFeatures,
    SignalQualityModel, WinRatePrediction, DEFAULT_NEIGHBORS,
};
pub use risk::{
    calculate_take_profit, calculate_volatility_stop, update_trailing_stop, StopReason,
    TakeProfitConfig, TrailingStopState, VolatilityStopConfig, VolatilityStopResult,
};
pub use sizing::{
    calculate_kelly_position_size, KellyParams, PositionSizeResult, SizingReason, SizingRegime,
    MAX_BANKROLL_FRACTION,
};
pub use types::*;
pub use validation::{cross_validate, CrossValidationResult, FoldResult};
