//! Walk-forward cross-validation
//!
//! Splits a time-ordered signal history into chronological folds and
//! evaluates the same configuration on each fold's test slice. The growing
//! train slice is evaluated only for its win rate (overfit detection);
//! nothing is refit between folds — this is walk-forward evaluation, not
//! k-fold training. The first boundary slice `[0, b[1])` consequently only
//! ever serves as train data.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::engine::{BacktestEngine, DEFAULT_TRADE_SIZE};
use crate::math::{mean, std_dev};
use crate::types::{BacktestResult, BacktestSignal, StrategyConfig};

/// A fold's win rate may exceed the across-fold average by this much
/// before the run is flagged as overfit.
const OVERFIT_WIN_RATE_GAP: f64 = 0.10;

/// One walk-forward fold: train slice `[0, b)` evaluated for its win rate
/// only, test slice `[b, b')` evaluated in full.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoldResult {
    pub fold: usize,
    pub train_size: usize,
    pub test_size: usize,
    pub train_win_rate: f64,
    pub result: BacktestResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossValidationResult {
    pub fold_count: usize,
    pub fold_results: Vec<FoldResult>,
    pub avg_win_rate: f64,
    pub std_win_rate: f64,
    pub avg_pnl: f64,
    pub std_pnl: f64,
    pub avg_sharpe: f64,
    pub overfit_risk: bool,
}

/// Walk-forward cross-validation of one configuration.
///
/// `folds` is clamped to `[2, max(2, signals.len())]`; boundaries are
/// `floor(i × N / fold_count)`, so the fold layout is chronological and
/// even. Folds whose test slice is empty are skipped.
pub fn cross_validate(
    config: &StrategyConfig,
    signals: &[BacktestSignal],
    folds: usize,
    trade_size: Option<f64>,
) -> CrossValidationResult {
    let n = signals.len();
    let fold_count = folds.clamp(2, n.max(2));
    let engine = BacktestEngine::with_trade_size(
        config.clone(),
        trade_size.unwrap_or(DEFAULT_TRADE_SIZE),
    );

    let boundaries: Vec<usize> = (0..=fold_count).map(|i| i * n / fold_count).collect();

    info!(signals = n, fold_count, "Starting cross-validation");

    let mut fold_results: Vec<FoldResult> = Vec::with_capacity(fold_count.saturating_sub(1));
    for fold_index in 1..fold_count {
        let train = &signals[..boundaries[fold_index]];
        let test = &signals[boundaries[fold_index]..boundaries[fold_index + 1]];
        if test.is_empty() {
            continue;
        }

        let train_result = engine.run(train);
        let test_result = engine.run(test);
        fold_results.push(FoldResult {
            fold: fold_index,
            train_size: train.len(),
            test_size: test.len(),
            train_win_rate: train_result.win_rate,
            result: test_result,
        });
    }

    let win_rates: Vec<f64> = fold_results.iter().map(|f| f.result.win_rate).collect();
    let pnls: Vec<f64> = fold_results.iter().map(|f| f.result.total_pnl).collect();
    let sharpes: Vec<f64> = fold_results.iter().map(|f| f.result.sharpe_ratio).collect();
    let train_win_rates: Vec<f64> = fold_results.iter().map(|f| f.train_win_rate).collect();

    let avg_win_rate = mean(&win_rates);
    let best_win_rate = win_rates.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    // Overfit when one fold stands far above the rest, or the train
    // slices systematically out-score the test slices.
    let overfit_risk = !fold_results.is_empty()
        && (best_win_rate - avg_win_rate >= OVERFIT_WIN_RATE_GAP
            || mean(&train_win_rates) - avg_win_rate >= OVERFIT_WIN_RATE_GAP);

    info!(
        folds_evaluated = fold_results.len(),
        avg_win_rate,
        overfit_risk,
        "Cross-validation complete"
    );

    CrossValidationResult {
        fold_count,
        fold_results,
        avg_win_rate,
        std_win_rate: std_dev(&win_rates),
        avg_pnl: mean(&pnls),
        std_pnl: std_dev(&pnls),
        avg_sharpe: mean(&sharpes),
        overfit_risk,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests::make_signal;
    use crate::types::Side;

    fn signals(outcomes: &[bool]) -> Vec<BacktestSignal> {
        outcomes
            .iter()
            .map(|&won| make_signal(Side::Up, Some(if won { 101.0 } else { 99.0 })))
            .collect()
    }

    #[test]
    fn test_fold_count_property() {
        let result = cross_validate(
            &StrategyConfig::default(),
            &signals(&[true; 20]),
            5,
            None,
        );
        assert_eq!(result.fold_count, 5);
        assert_eq!(result.fold_results.len(), 4);
    }

    #[test]
    fn test_fold_count_clamps_to_signal_count() {
        // N=2, folds=10 → fold_count clamps to 2, exactly one fold.
        let result = cross_validate(
            &StrategyConfig::default(),
            &signals(&[true, true]),
            10,
            None,
        );
        assert_eq!(result.fold_count, 2);
        assert_eq!(result.fold_results.len(), 1);
        assert_eq!(result.fold_results[0].train_size, 1);
        assert_eq!(result.fold_results[0].test_size, 1);
    }

    #[test]
    fn test_minimum_two_folds() {
        let result = cross_validate(
            &StrategyConfig::default(),
            &signals(&[true; 10]),
            0,
            None,
        );
        assert_eq!(result.fold_count, 2);
    }

    #[test]
    fn test_empty_signals_produce_no_folds() {
        let result = cross_validate(&StrategyConfig::default(), &[], 5, None);
        assert_eq!(result.fold_count, 2);
        assert!(result.fold_results.is_empty());
        assert_eq!(result.avg_win_rate, 0.0);
        assert!(!result.overfit_risk);
    }

    #[test]
    fn test_chronological_boundaries() {
        // N=10, folds=5: boundaries 0,2,4,6,8,10 — train grows by 2, test
        // slices are 2 wide.
        let result = cross_validate(
            &StrategyConfig::default(),
            &signals(&[true; 10]),
            5,
            None,
        );
        let trains: Vec<usize> = result.fold_results.iter().map(|f| f.train_size).collect();
        let tests: Vec<usize> = result.fold_results.iter().map(|f| f.test_size).collect();
        assert_eq!(trains, vec![2, 4, 6]);
        assert_eq!(tests, vec![2, 2, 2]);
    }

    #[test]
    fn test_uniform_outcomes_not_overfit() {
        let result = cross_validate(
            &StrategyConfig::default(),
            &signals(&[true; 20]),
            4,
            None,
        );
        assert!(!result.overfit_risk);
        assert_eq!(result.avg_win_rate, 1.0);
        assert_eq!(result.std_win_rate, 0.0);
    }

    #[test]
    fn test_train_test_divergence_flags_overfit() {
        // First half wins, second half loses: every train slice out-scores
        // its test slice.
        let mut outcomes = vec![true; 10];
        outcomes.extend(vec![false; 10]);
        let result = cross_validate(&StrategyConfig::default(), &signals(&outcomes), 2, None);

        assert_eq!(result.fold_results.len(), 1);
        assert_eq!(result.fold_results[0].train_win_rate, 1.0);
        assert_eq!(result.avg_win_rate, 0.0);
        assert!(result.overfit_risk);
    }

    #[test]
    fn test_single_hot_fold_flags_overfit() {
        // Test slices are [5..10), [10..15), [15..20); only [10..15)
        // wins everything.
        let mut outcomes = vec![false; 10];
        outcomes.extend(vec![true; 5]);
        outcomes.extend(vec![false; 5]);
        let result = cross_validate(&StrategyConfig::default(), &signals(&outcomes), 4, None);

        assert_eq!(result.fold_results.len(), 3);
        let rates: Vec<f64> = result
            .fold_results
            .iter()
            .map(|f| f.result.win_rate)
            .collect();
        assert!(rates.contains(&1.0));
        assert!(result.overfit_risk);
    }
}
