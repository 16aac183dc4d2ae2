//! Signal-replay backtesting engine
//!
//! Replays a time-ordered sequence of historical signals against a strategy
//! configuration and produces aggregate P&L and risk metrics. Deterministic,
//! no side effects, no I/O; unsettled or malformed records are skipped, never
//! fatal.

use std::collections::{BTreeMap, HashMap};

use tracing::info;

use crate::math::{mean, std_dev};
use crate::types::{
    BacktestResult, BacktestSignal, BreakdownStats, Phase, Regime, Side, StrategyConfig,
};

/// Fixed stake per trade unless overridden at construction
pub const DEFAULT_TRADE_SIZE: f64 = 5.0;

const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Backtesting engine. Owns its configuration, so concurrent runs share
/// nothing mutable with the caller or with each other.
pub struct BacktestEngine {
    config: StrategyConfig,
    trade_size: f64,
}

impl BacktestEngine {
    pub fn new(config: StrategyConfig) -> Self {
        Self::with_trade_size(config, DEFAULT_TRADE_SIZE)
    }

    pub fn with_trade_size(config: StrategyConfig, trade_size: f64) -> Self {
        Self { config, trade_size }
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    pub fn trade_size(&self) -> f64 {
        self.trade_size
    }

    /// Run against the engine's own configuration.
    pub fn run(&self, signals: &[BacktestSignal]) -> BacktestResult {
        self.run_with(signals, &self.config)
    }

    /// Run with a per-run configuration override (grid search shares one
    /// engine across many candidate configs this way).
    pub fn run_with(&self, signals: &[BacktestSignal], config: &StrategyConfig) -> BacktestResult {
        let min_confidence = config.min_confidence.unwrap_or(0.0);

        let mut wins: u32 = 0;
        let mut losses: u32 = 0;
        let mut gross_profit = 0.0_f64;
        let mut gross_loss = 0.0_f64;

        let mut equity = 0.0_f64;
        let mut peak_equity = 0.0_f64;
        let mut max_drawdown = 0.0_f64;

        let mut by_market: HashMap<String, BreakdownStats> = HashMap::new();
        let mut by_regime: HashMap<Regime, BreakdownStats> = HashMap::new();
        let mut by_phase: HashMap<Phase, BreakdownStats> = HashMap::new();
        let mut daily_pnl: BTreeMap<String, f64> = BTreeMap::new();

        info!(
            signals = signals.len(),
            trade_size = self.trade_size,
            "Starting backtest"
        );

        for signal in signals {
            // Unsettled windows count toward total_signals only.
            let Some(final_price) = signal.final_price else {
                continue;
            };
            if !final_price.is_finite() {
                continue;
            }
            if config.skip_markets.iter().any(|m| m == &signal.market) {
                continue;
            }

            let threshold = config.edge_thresholds.for_phase(signal.phase)
                * config.regime_multipliers.for_signal(signal.regime, signal.side);

            let model_prob = signal.model_prob();
            let buy_price = signal.buy_price();
            // NaN effective edge falls back to the raw edge.
            let edge = if signal.effective_edge.is_finite() {
                signal.effective_edge
            } else {
                signal.edge
            };

            if !model_prob.is_finite() || !buy_price.is_finite() || !edge.is_finite() {
                continue;
            }
            if edge < threshold {
                continue;
            }
            if model_prob < config.min_probability.for_phase(signal.phase) {
                continue;
            }
            if signal.confidence < min_confidence {
                continue;
            }

            // Enter: binary settlement against the price to beat. A tie
            // settles DOWN.
            let won = match signal.side {
                Side::Up => final_price > signal.price_to_beat,
                Side::Down => final_price <= signal.price_to_beat,
            };
            let pnl = if won {
                self.trade_size * (1.0 - buy_price)
            } else {
                -self.trade_size * buy_price
            };

            if won {
                wins += 1;
                gross_profit += pnl;
            } else {
                losses += 1;
                gross_loss += -pnl;
            }

            equity += pnl;
            if equity > peak_equity {
                peak_equity = equity;
            }
            let drawdown = peak_equity - equity;
            if drawdown > max_drawdown {
                max_drawdown = drawdown;
            }

            record_bucket(by_market.entry(signal.market.clone()).or_default(), won, pnl);
            record_bucket(by_regime.entry(signal.regime).or_default(), won, pnl);
            record_bucket(by_phase.entry(signal.phase).or_default(), won, pnl);
            *daily_pnl.entry(day_key(&signal.timestamp)).or_insert(0.0) += pnl;
        }

        let trades_entered = wins + losses;
        let win_rate = if trades_entered > 0 {
            f64::from(wins) / f64::from(trades_entered)
        } else {
            0.0
        };
        let total_pnl = gross_profit - gross_loss;
        let avg_pnl = if trades_entered > 0 {
            total_pnl / f64::from(trades_entered)
        } else {
            0.0
        };

        let daily_returns: Vec<f64> = daily_pnl.values().map(|p| p / self.trade_size).collect();
        let sharpe_ratio = {
            let sd = std_dev(&daily_returns);
            if sd > 0.0 {
                mean(&daily_returns) / sd * TRADING_DAYS_PER_YEAR.sqrt()
            } else {
                0.0
            }
        };

        let profit_factor = if gross_loss > 0.0 {
            gross_profit / gross_loss
        } else if gross_profit > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        finalize_buckets(&mut by_market);
        finalize_buckets(&mut by_regime);
        finalize_buckets(&mut by_phase);

        info!(
            total_signals = signals.len(),
            trades_entered,
            wins,
            win_rate,
            total_pnl,
            max_drawdown,
            "Backtest complete"
        );

        BacktestResult {
            total_signals: signals.len() as u32,
            trades_entered,
            wins,
            losses,
            win_rate,
            total_pnl,
            avg_pnl,
            max_drawdown,
            sharpe_ratio,
            profit_factor,
            by_market,
            by_regime,
            by_phase,
        }
    }
}

fn record_bucket(bucket: &mut BreakdownStats, won: bool, pnl: f64) {
    bucket.trades += 1;
    if won {
        bucket.wins += 1;
    }
    bucket.pnl += pnl;
}

fn finalize_buckets<K>(buckets: &mut HashMap<K, BreakdownStats>) {
    for bucket in buckets.values_mut() {
        bucket.win_rate = if bucket.trades > 0 {
            f64::from(bucket.wins) / f64::from(bucket.trades)
        } else {
            0.0
        };
    }
}

/// Day bucket for the Sharpe computation. Timestamps are ISO-8601; a
/// record that fails to parse falls back to its `YYYY-MM-DD` prefix so a
/// single bad row never aborts the run.
fn day_key(timestamp: &str) -> String {
    chrono::DateTime::parse_from_rfc3339(timestamp)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|_| timestamp.chars().take(10).collect())
}
