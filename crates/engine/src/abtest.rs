//! A/B comparison of two strategy configurations
//!
//! Runs the backtest engine once per config over the same signal history,
//! then tests win/loss divergence with a 2×2 chi-squared statistic
//! (1 degree of freedom, no Yates correction).

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::engine::{BacktestEngine, DEFAULT_TRADE_SIZE};
use crate::math::erf;
use crate::types::{BacktestResult, BacktestSignal, StrategyConfig};

/// p-value threshold for declaring the variants different
pub const SIGNIFICANCE_LEVEL: f64 = 0.05;

/// Outcome of one A/B comparison. Deltas are A − B.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbTestResult {
    pub result_a: BacktestResult,
    pub result_b: BacktestResult,
    pub chi_squared: f64,
    pub p_value: f64,
    pub is_significant: bool,
    pub win_rate_delta: f64,
    pub pnl_delta: f64,
    pub sharpe_delta: f64,
}

/// Run both configs over the same signals and compare.
pub fn run_ab_test(
    config_a: &StrategyConfig,
    config_b: &StrategyConfig,
    signals: &[BacktestSignal],
    trade_size: Option<f64>,
) -> AbTestResult {
    let trade_size = trade_size.unwrap_or(DEFAULT_TRADE_SIZE);

    let result_a = BacktestEngine::with_trade_size(config_a.clone(), trade_size).run(signals);
    let result_b = BacktestEngine::with_trade_size(config_b.clone(), trade_size).run(signals);

    let chi_squared = chi_squared_2x2(
        [f64::from(result_a.wins), f64::from(result_a.losses)],
        [f64::from(result_b.wins), f64::from(result_b.losses)],
    );
    let p_value = chi_squared_p_value(chi_squared);
    let is_significant = p_value < SIGNIFICANCE_LEVEL;

    info!(
        chi_squared,
        p_value,
        is_significant,
        trades_a = result_a.trades_entered,
        trades_b = result_b.trades_entered,
        "A/B test complete"
    );

    AbTestResult {
        win_rate_delta: result_a.win_rate - result_b.win_rate,
        pnl_delta: result_a.total_pnl - result_b.total_pnl,
        sharpe_delta: result_a.sharpe_ratio - result_b.sharpe_ratio,
        result_a,
        result_b,
        chi_squared,
        p_value,
        is_significant,
    }
}

/// Chi-squared statistic for a 2×2 strategy × win/loss table. Cells whose
/// expected count is 0 are skipped rather than dividing by zero.
fn chi_squared_2x2(row_a: [f64; 2], row_b: [f64; 2]) -> f64 {
    let observed = [row_a, row_b];
    let row_totals = [row_a[0] + row_a[1], row_b[0] + row_b[1]];
    let col_totals = [row_a[0] + row_b[0], row_a[1] + row_b[1]];
    let grand_total = row_totals[0] + row_totals[1];

    if grand_total <= 0.0 {
        return 0.0;
    }

    let mut chi_squared = 0.0;
    for (r, row) in observed.iter().enumerate() {
        for (c, &obs) in row.iter().enumerate() {
            let expected = row_totals[r] * col_totals[c] / grand_total;
            if expected > 0.0 {
                chi_squared += (obs - expected).powi(2) / expected;
            }
        }
    }
    chi_squared
}

/// p-value for a chi-squared statistic with 1 degree of freedom:
/// p = 1 − erf(√(χ²/2)). Non-positive or non-finite statistics map to 1.
pub fn chi_squared_p_value(chi_squared: f64) -> f64 {
    if !chi_squared.is_finite() || chi_squared <= 0.0 {
        return 1.0;
    }
    (1.0 - erf((chi_squared / 2.0).sqrt())).max(0.0)
}
