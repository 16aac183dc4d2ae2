//! Grid-search parameter optimization
//!
//! Enumerates the full cartesian product of candidate values for the ten
//! tunable strategy fields, runs one backtest per combination on a rayon
//! worker pool, and ranks every result by the requested metric. Combinations
//! are enumerated through a mixed-radix index counter rather than nested
//! loops, which keeps the product chunkable for the parallel sweep.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::RwLock;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::engine::BacktestEngine;
use crate::types::{BacktestResult, BacktestSignal, StrategyConfig};

// ============================================================================
// Types
// ============================================================================

/// Candidate values per tunable field. An omitted field keeps the base
/// config's value (a single-element candidate set).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParameterGrid {
    #[serde(default)]
    pub edge_threshold_early: Option<Vec<f64>>,
    #[serde(default)]
    pub edge_threshold_mid: Option<Vec<f64>>,
    #[serde(default)]
    pub edge_threshold_late: Option<Vec<f64>>,
    #[serde(default)]
    pub min_probability_early: Option<Vec<f64>>,
    #[serde(default)]
    pub min_probability_mid: Option<Vec<f64>>,
    #[serde(default)]
    pub min_probability_late: Option<Vec<f64>>,
    #[serde(default)]
    pub chop_multiplier: Option<Vec<f64>>,
    #[serde(default)]
    pub range_multiplier: Option<Vec<f64>>,
    #[serde(default)]
    pub trend_aligned_multiplier: Option<Vec<f64>>,
    #[serde(default)]
    pub trend_opposed_multiplier: Option<Vec<f64>>,
}

/// Ranking metric for the sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortMetric {
    #[default]
    SharpeRatio,
    WinRate,
    TotalPnl,
}

impl SortMetric {
    fn of(self, result: &BacktestResult) -> f64 {
        match self {
            SortMetric::SharpeRatio => result.sharpe_ratio,
            SortMetric::WinRate => result.win_rate,
            SortMetric::TotalPnl => result.total_pnl,
        }
    }
}

/// One evaluated combination
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationEntry {
    pub config: StrategyConfig,
    pub result: BacktestResult,
}

/// Output of a grid search: the winner plus every evaluated combination,
/// sorted descending by the requested metric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub best_config: StrategyConfig,
    pub best_result: BacktestResult,
    pub all_results: Vec<OptimizationEntry>,
    pub total_combinations: usize,
    pub sort_by: SortMetric,
}

/// Optimization run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizeStatus {
    Idle,
    Running,
    Complete,
    Cancelled,
}

/// Shared progress tracker between the sweep and a polling caller
/// (e.g. a dashboard handler).
pub struct OptimizeProgress {
    pub status: RwLock<OptimizeStatus>,
    pub total_combinations: AtomicU32,
    pub completed: AtomicU32,
    pub cancelled: AtomicBool,
}

impl OptimizeProgress {
    pub fn new() -> Self {
        Self {
            status: RwLock::new(OptimizeStatus::Idle),
            total_combinations: AtomicU32::new(0),
            completed: AtomicU32::new(0),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Request cancellation; in-flight combinations finish, queued ones
    /// are dropped.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Progress as percentage
    pub fn progress_pct(&self) -> f32 {
        let total = self.total_combinations.load(Ordering::Relaxed);
        let done = self.completed.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            (done as f32 / total as f32) * 100.0
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.status.read().unwrap_or_else(|e| e.into_inner()), OptimizeStatus::Running)
    }

    fn set_status(&self, status: OptimizeStatus) {
        *self.status.write().unwrap_or_else(|e| e.into_inner()) = status;
    }
}

impl Default for OptimizeProgress {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Grid enumeration
// ============================================================================

/// Candidate sets in fixed enumeration order (outermost first).
fn candidate_sets(base: &StrategyConfig, grid: &ParameterGrid) -> Vec<Vec<f64>> {
    let dim = |candidates: &Option<Vec<f64>>, fallback: f64| -> Vec<f64> {
        match candidates {
            Some(values) => values.clone(),
            None => vec![fallback],
        }
    };

    vec![
        dim(&grid.edge_threshold_early, base.edge_thresholds.early),
        dim(&grid.edge_threshold_mid, base.edge_thresholds.mid),
        dim(&grid.edge_threshold_late, base.edge_thresholds.late),
        dim(&grid.min_probability_early, base.min_probability.early),
        dim(&grid.min_probability_mid, base.min_probability.mid),
        dim(&grid.min_probability_late, base.min_probability.late),
        dim(&grid.chop_multiplier, base.regime_multipliers.chop),
        dim(&grid.range_multiplier, base.regime_multipliers.range),
        dim(
            &grid.trend_aligned_multiplier,
            base.regime_multipliers.trend_aligned,
        ),
        dim(
            &grid.trend_opposed_multiplier,
            base.regime_multipliers.trend_opposed,
        ),
    ]
}

/// Decode a flat combination index into one candidate per dimension
/// (mixed-radix, last dimension fastest) and apply it to the base config.
fn combination(base: &StrategyConfig, dims: &[Vec<f64>], index: usize) -> StrategyConfig {
    let mut values = [0.0_f64; 10];
    let mut rem = index;
    for (slot, dim) in dims.iter().enumerate().rev() {
        values[slot] = dim[rem % dim.len()];
        rem /= dim.len();
    }

    let mut config = base.clone();
    config.edge_thresholds.early = values[0];
    config.edge_thresholds.mid = values[1];
    config.edge_thresholds.late = values[2];
    config.min_probability.early = values[3];
    config.min_probability.mid = values[4];
    config.min_probability.late = values[5];
    config.regime_multipliers.chop = values[6];
    config.regime_multipliers.range = values[7];
    config.regime_multipliers.trend_aligned = values[8];
    config.regime_multipliers.trend_opposed = values[9];
    config
}

// ============================================================================
// Sweep
// ============================================================================

/// Run the full grid search, ranking by `sort_by`.
pub fn optimize_parameters(
    base: &StrategyConfig,
    grid: &ParameterGrid,
    signals: &[BacktestSignal],
    sort_by: SortMetric,
) -> OptimizationResult {
    optimize_with_progress(base, grid, signals, sort_by, &OptimizeProgress::new())
}

/// Grid search with an externally observable progress tracker. One engine
/// is shared across the sweep; each combination runs as a per-run config
/// override, so workers share only the read-only signal slice.
pub fn optimize_with_progress(
    base: &StrategyConfig,
    grid: &ParameterGrid,
    signals: &[BacktestSignal],
    sort_by: SortMetric,
    progress: &OptimizeProgress,
) -> OptimizationResult {
    let dims = candidate_sets(base, grid);
    let total: usize = dims.iter().map(Vec::len).product();

    let engine = BacktestEngine::new(base.clone());

    // A grid with an explicitly empty candidate list collapses the
    // product to zero; fall back to a single base-config run.
    if total == 0 {
        warn!("Empty parameter grid after defaulting; evaluating base config only");
        let result = engine.run(signals);
        progress.total_combinations.store(1, Ordering::Relaxed);
        progress.completed.store(1, Ordering::Relaxed);
        progress.set_status(OptimizeStatus::Complete);
        return OptimizationResult {
            best_config: base.clone(),
            best_result: result.clone(),
            all_results: vec![OptimizationEntry {
                config: base.clone(),
                result,
            }],
            total_combinations: 1,
            sort_by,
        };
    }

    progress.set_status(OptimizeStatus::Running);
    progress
        .total_combinations
        .store(total as u32, Ordering::Relaxed);
    progress.completed.store(0, Ordering::Relaxed);

    info!(
        combinations = total,
        signals = signals.len(),
        ?sort_by,
        "Starting grid search"
    );

    let mut entries: Vec<OptimizationEntry> = (0..total)
        .into_par_iter()
        .filter_map(|index| {
            if progress.cancelled.load(Ordering::Relaxed) {
                return None;
            }
            let config = combination(base, &dims, index);
            let result = engine.run_with(signals, &config);
            progress.completed.fetch_add(1, Ordering::Relaxed);
            Some(OptimizationEntry { config, result })
        })
        .collect();

    let was_cancelled = progress.cancelled.load(Ordering::Relaxed);
    if was_cancelled {
        warn!(
            completed = progress.completed.load(Ordering::Relaxed),
            total, "Grid search cancelled"
        );
    }

    // Order-insensitive up to here; ranking happens after collection.
    entries.sort_by(|x, y| sort_by.of(&y.result).total_cmp(&sort_by.of(&x.result)));

    if entries.is_empty() {
        // Cancelled before any combination ran; still report a best.
        let result = engine.run(signals);
        entries.push(OptimizationEntry {
            config: base.clone(),
            result,
        });
    }

    let best = entries[0].clone();
    progress.set_status(if was_cancelled {
        OptimizeStatus::Cancelled
    } else {
        OptimizeStatus::Complete
    });

    info!(
        evaluated = entries.len(),
        metric = sort_by.of(&best.result),
        trades = best.result.trades_entered,
        "Grid search complete"
    );

    OptimizationResult {
        best_config: best.config,
        best_result: best.result,
        all_results: entries,
        total_combinations: total,
        sort_by,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests::make_signal;
    use crate::types::Side;

    fn winning_signals(n: usize) -> Vec<BacktestSignal> {
        (0..n).map(|_| make_signal(Side::Up, Some(101.0))).collect()
    }

    #[test]
    fn test_empty_grid_collapses_to_base_run() {
        let base = StrategyConfig::default();
        let result = optimize_parameters(
            &base,
            &ParameterGrid::default(),
            &winning_signals(3),
            SortMetric::TotalPnl,
        );

        assert_eq!(result.total_combinations, 1);
        assert_eq!(result.all_results.len(), 1);
        assert_eq!(result.best_config, base);
        assert_eq!(result.best_result.trades_entered, 3);
    }

    #[test]
    fn test_total_combinations_is_candidate_product() {
        let grid = ParameterGrid {
            edge_threshold_mid: Some(vec![0.02, 0.04, 0.06]),
            min_probability_mid: Some(vec![0.50, 0.60]),
            chop_multiplier: Some(vec![1.0, 1.5]),
            ..Default::default()
        };
        let result = optimize_parameters(
            &StrategyConfig::default(),
            &grid,
            &winning_signals(2),
            SortMetric::SharpeRatio,
        );

        assert_eq!(result.total_combinations, 12);
        assert_eq!(result.all_results.len(), 12);
    }

    #[test]
    fn test_explicitly_empty_candidate_list_falls_back_to_base() {
        let grid = ParameterGrid {
            edge_threshold_mid: Some(vec![]),
            ..Default::default()
        };
        let result = optimize_parameters(
            &StrategyConfig::default(),
            &grid,
            &winning_signals(2),
            SortMetric::SharpeRatio,
        );
        assert_eq!(result.total_combinations, 1);
        assert_eq!(result.best_config, StrategyConfig::default());
    }

    #[test]
    fn test_best_config_maximizes_requested_metric() {
        // All signals win, so the permissive threshold out-earns the one
        // that blocks every entry.
        let grid = ParameterGrid {
            edge_threshold_mid: Some(vec![0.99, 0.01]),
            ..Default::default()
        };
        let result = optimize_parameters(
            &StrategyConfig::default(),
            &grid,
            &winning_signals(4),
            SortMetric::TotalPnl,
        );

        assert_eq!(result.best_config.edge_thresholds.mid, 0.01);
        assert!(result.best_result.total_pnl > 0.0);
        // Descending order over all evaluated combinations
        let metrics: Vec<f64> = result
            .all_results
            .iter()
            .map(|e| e.result.total_pnl)
            .collect();
        assert!(metrics.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn test_mixed_radix_enumeration_covers_every_combination() {
        let dims = vec![vec![1.0, 2.0], vec![10.0, 20.0, 30.0]];

        let mut seen = Vec::new();
        for index in 0..6 {
            let mut values = [0.0_f64; 10];
            let mut rem = index;
            for (slot, dim) in dims.iter().enumerate().rev() {
                values[slot] = dim[rem % dim.len()];
                rem /= dim.len();
            }
            seen.push((values[0], values[1]));
        }

        // Last dimension fastest, like the innermost nested loop.
        assert_eq!(
            seen,
            vec![
                (1.0, 10.0),
                (1.0, 20.0),
                (1.0, 30.0),
                (2.0, 10.0),
                (2.0, 20.0),
                (2.0, 30.0),
            ]
        );
    }

    #[test]
    fn test_combination_applies_all_ten_fields() {
        let base = StrategyConfig::default();
        let grid = ParameterGrid {
            edge_threshold_early: Some(vec![0.11]),
            edge_threshold_mid: Some(vec![0.12]),
            edge_threshold_late: Some(vec![0.13]),
            min_probability_early: Some(vec![0.61]),
            min_probability_mid: Some(vec![0.62]),
            min_probability_late: Some(vec![0.63]),
            chop_multiplier: Some(vec![2.1]),
            range_multiplier: Some(vec![2.2]),
            trend_aligned_multiplier: Some(vec![2.3]),
            trend_opposed_multiplier: Some(vec![2.4]),
        };
        let dims = candidate_sets(&base, &grid);
        let config = combination(&base, &dims, 0);

        assert_eq!(config.edge_thresholds.early, 0.11);
        assert_eq!(config.edge_thresholds.mid, 0.12);
        assert_eq!(config.edge_thresholds.late, 0.13);
        assert_eq!(config.min_probability.early, 0.61);
        assert_eq!(config.min_probability.mid, 0.62);
        assert_eq!(config.min_probability.late, 0.63);
        assert_eq!(config.regime_multipliers.chop, 2.1);
        assert_eq!(config.regime_multipliers.range, 2.2);
        assert_eq!(config.regime_multipliers.trend_aligned, 2.3);
        assert_eq!(config.regime_multipliers.trend_opposed, 2.4);
        // Untuned fields ride along from the base config
        assert_eq!(config.blend_weights, base.blend_weights);
    }

    #[test]
    fn test_progress_counters_and_status() {
        let grid = ParameterGrid {
            edge_threshold_mid: Some(vec![0.02, 0.04]),
            ..Default::default()
        };
        let progress = OptimizeProgress::new();
        optimize_with_progress(
            &StrategyConfig::default(),
            &grid,
            &winning_signals(1),
            SortMetric::WinRate,
            &progress,
        );

        assert_eq!(progress.total_combinations.load(Ordering::Relaxed), 2);
        assert_eq!(progress.completed.load(Ordering::Relaxed), 2);
        assert!((progress.progress_pct() - 100.0).abs() < f32::EPSILON);
        assert!(!progress.is_running());
    }

    #[test]
    fn test_cancellation_before_start_still_reports_a_best() {
        let grid = ParameterGrid {
            edge_threshold_mid: Some(vec![0.02, 0.04, 0.06]),
            ..Default::default()
        };
        let progress = OptimizeProgress::new();
        progress.cancel();

        let result = optimize_with_progress(
            &StrategyConfig::default(),
            &grid,
            &winning_signals(2),
            SortMetric::SharpeRatio,
            &progress,
        );

        assert_eq!(
            *progress.status.read().unwrap(),
            OptimizeStatus::Cancelled
        );
        // The base config stands in for the aborted sweep.
        assert_eq!(result.best_config, StrategyConfig::default());
    }
}
