//! Similarity-weighted win-rate prediction
//!
//! A k-nearest-neighbor estimator over recorded signal outcomes: the model
//! keeps a bounded global history plus bounded per-market histories, scores
//! a new signal's feature vector against past ones, and predicts a win rate
//! from the similarity²-weighted outcomes of the closest neighbors.
//!
//! The instance is explicitly caller-owned — bounds, eviction, and lifetime
//! are all visible here, with no module-level state. Callers sharing one
//! model across threads must serialize `record_outcome`.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{Phase, Regime};

pub const DEFAULT_MAX_PER_MARKET: usize = 500;
pub const DEFAULT_MAX_TOTAL: usize = 2000;
pub const DEFAULT_NEIGHBORS: usize = 20;

/// A market needs this many recorded outcomes before its own history is
/// preferred over the global pool; below it for the global pool too, the
/// prediction is INSUFFICIENT.
const MIN_POOL: usize = 10;

// Feature scales: each term is sized so typical differences land in the
// same O(1) range before squaring.
const EDGE_SCALE: f64 = 5.0;
const CONFIDENCE_SCALE: f64 = 2.0;
const VOLATILITY_SCALE: f64 = 100.0;
const MODEL_PROB_SCALE: f64 = 3.0;
const RSI_SCALE: f64 = 0.02;
const VWAP_SLOPE_SCALE: f64 = 50.0;

const PHASE_MISMATCH_PENALTY: f64 = 1.0;
const REGIME_MISMATCH_PENALTY: f64 = 0.5;
const MARKET_MISMATCH_PENALTY: f64 = 0.3;

/// Feature vector of one signal, as seen by the quality model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalFeatures {
    pub market: String,
    pub edge: f64,
    pub confidence: f64,
    pub volatility: f64,
    pub phase: Phase,
    pub regime: Regime,
    pub model_prob: f64,
    #[serde(default)]
    pub ob_imbalance: Option<f64>,
    #[serde(default)]
    pub rsi: Option<f64>,
    #[serde(default)]
    pub vwap_slope: Option<f64>,
}

/// A settled signal with its outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalSignal {
    pub features: SignalFeatures,
    pub won: bool,
    pub pnl: f64,
    pub timestamp: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PredictionConfidence {
    High,
    Medium,
    Low,
    Insufficient,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WinRatePrediction {
    pub predicted_win_rate: f64,
    pub confidence: PredictionConfidence,
    /// Neighbors actually used (pool size when INSUFFICIENT)
    pub sample_size: usize,
    /// Unweighted mean similarity of the neighbors used
    pub avg_similarity: f64,
}

/// Bounded k-NN history of signal outcomes. Entries live in both the
/// global queue and their market's queue; eviction from either side
/// removes the matching entry from the other.
pub struct SignalQualityModel {
    max_per_market: usize,
    max_total: usize,
    history: VecDeque<Arc<HistoricalSignal>>,
    by_market: HashMap<String, VecDeque<Arc<HistoricalSignal>>>,
}

impl SignalQualityModel {
    pub fn new(max_per_market: usize, max_total: usize) -> Self {
        Self {
            max_per_market: max_per_market.max(1),
            max_total: max_total.max(1),
            history: VecDeque::new(),
            by_market: HashMap::new(),
        }
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn market_history_len(&self, market: &str) -> usize {
        self.by_market.get(market).map_or(0, VecDeque::len)
    }

    /// Record one settled outcome, evicting the oldest entries once either
    /// bound is exceeded.
    pub fn record_outcome(&mut self, signal: HistoricalSignal) {
        let market = signal.features.market.clone();
        let entry = Arc::new(signal);

        self.history.push_back(Arc::clone(&entry));
        self.by_market
            .entry(market.clone())
            .or_default()
            .push_back(entry);

        if let Some(queue) = self.by_market.get_mut(&market) {
            if queue.len() > self.max_per_market {
                if let Some(evicted) = queue.pop_front() {
                    self.history.retain(|s| !Arc::ptr_eq(s, &evicted));
                    debug!(market = %market, "Evicted oldest per-market outcome");
                }
            }
        }

        if self.history.len() > self.max_total {
            if let Some(evicted) = self.history.pop_front() {
                let evicted_market = &evicted.features.market;
                if let Some(queue) = self.by_market.get_mut(evicted_market) {
                    queue.retain(|s| !Arc::ptr_eq(s, &evicted));
                    if queue.is_empty() {
                        self.by_market.remove(evicted_market);
                    }
                }
            }
        }
    }

    /// Predict the win rate for a prospective signal from its `k` nearest
    /// recorded neighbors.
    pub fn predict_win_rate(&self, features: &SignalFeatures, k: usize) -> WinRatePrediction {
        let pool = match self.by_market.get(&features.market) {
            Some(market_pool) if market_pool.len() >= MIN_POOL => market_pool,
            _ => &self.history,
        };

        if pool.len() < MIN_POOL {
            return WinRatePrediction {
                predicted_win_rate: 0.5,
                confidence: PredictionConfidence::Insufficient,
                sample_size: pool.len(),
                avg_similarity: 0.0,
            };
        }

        let mut scored: Vec<(f64, bool)> = pool
            .iter()
            .map(|s| (compute_similarity(features, &s.features), s.won))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));

        let k = k.max(1).min(scored.len());
        let neighbors = &scored[..k];

        let mut weighted_wins = 0.0;
        let mut weighted_total = 0.0;
        let mut similarity_sum = 0.0;
        for &(similarity, won) in neighbors {
            let weight = similarity * similarity;
            weighted_total += weight;
            if won {
                weighted_wins += weight;
            }
            similarity_sum += similarity;
        }

        let predicted_win_rate = if weighted_total > 0.0 {
            weighted_wins / weighted_total
        } else {
            0.5
        };
        let avg_similarity = similarity_sum / k as f64;

        let confidence = if k >= 20 && avg_similarity >= 0.7 {
            PredictionConfidence::High
        } else if k >= 15 && avg_similarity >= 0.55 {
            PredictionConfidence::Medium
        } else {
            PredictionConfidence::Low
        };

        WinRatePrediction {
            predicted_win_rate,
            confidence,
            sample_size: k,
            avg_similarity,
        }
    }
}

impl Default for SignalQualityModel {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PER_MARKET, DEFAULT_MAX_TOTAL)
    }
}

/// Similarity in (0, 1]: `1 / (1 + √distance)` over a weighted squared
/// feature distance, with flat penalties for categorical mismatches. The
/// RSI and VWAP-slope terms only apply when both sides carry them.
/// Identical features score exactly 1.
pub fn compute_similarity(a: &SignalFeatures, b: &SignalFeatures) -> f64 {
    let mut distance = ((a.edge - b.edge) * EDGE_SCALE).powi(2)
        + ((a.confidence - b.confidence) * CONFIDENCE_SCALE).powi(2)
        + ((a.volatility - b.volatility) * VOLATILITY_SCALE).powi(2)
        + ((a.model_prob - b.model_prob) * MODEL_PROB_SCALE).powi(2);

    if let (Some(x), Some(y)) = (a.rsi, b.rsi) {
        distance += ((x - y) * RSI_SCALE).powi(2);
    }
    if let (Some(x), Some(y)) = (a.vwap_slope, b.vwap_slope) {
        distance += ((x - y) * VWAP_SLOPE_SCALE).powi(2);
    }

    if a.phase != b.phase {
        distance += PHASE_MISMATCH_PENALTY;
    }
    if a.regime != b.regime {
        distance += REGIME_MISMATCH_PENALTY;
    }
    if a.market != b.market {
        distance += MARKET_MISMATCH_PENALTY;
    }

    if !distance.is_finite() {
        return 0.0;
    }
    1.0 / (1.0 + distance.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features(market: &str, edge: f64) -> SignalFeatures {
        SignalFeatures {
            market: market.to_string(),
            edge,
            confidence: 0.7,
            volatility: 0.004,
            phase: Phase::Mid,
            regime: Regime::Range,
            model_prob: 0.62,
            ob_imbalance: None,
            rsi: None,
            vwap_slope: None,
        }
    }

    fn outcome(market: &str, edge: f64, won: bool) -> HistoricalSignal {
        HistoricalSignal {
            features: features(market, edge),
            won,
            pnl: if won { 2.7 } else { -2.3 },
            timestamp: "2025-06-01T12:00:00Z".to_string(),
        }
    }

    #[test]
    fn test_identical_features_similarity_is_one() {
        let a = features("BTC-USD", 0.05);
        assert_eq!(compute_similarity(&a, &a.clone()), 1.0);
    }

    #[test]
    fn test_mismatch_penalties_reduce_similarity() {
        let a = features("BTC-USD", 0.05);

        let mut phase_off = a.clone();
        phase_off.phase = Phase::Late;
        let mut regime_off = a.clone();
        regime_off.regime = Regime::Chop;
        let mut market_off = a.clone();
        market_off.market = "ETH-USD".to_string();

        let s_phase = compute_similarity(&a, &phase_off);
        let s_regime = compute_similarity(&a, &regime_off);
        let s_market = compute_similarity(&a, &market_off);

        // Penalties 1.0 / 0.5 / 0.3 order the similarities
        assert!(s_phase < s_regime && s_regime < s_market);
        assert!(s_market < 1.0);
        assert_eq!(s_phase, 1.0 / (1.0 + 1.0_f64.sqrt()));
    }

    #[test]
    fn test_optional_terms_require_both_sides() {
        let mut a = features("BTC-USD", 0.05);
        let mut b = a.clone();
        a.rsi = Some(80.0);
        b.rsi = None;
        // One-sided RSI contributes nothing
        assert_eq!(compute_similarity(&a, &b), 1.0);

        b.rsi = Some(30.0);
        assert!(compute_similarity(&a, &b) < 1.0);
    }

    #[test]
    fn test_non_finite_features_score_zero() {
        let a = features("BTC-USD", 0.05);
        let mut bad = a.clone();
        bad.edge = f64::NAN;
        assert_eq!(compute_similarity(&a, &bad), 0.0);
    }

    #[test]
    fn test_insufficient_pool() {
        let mut model = SignalQualityModel::default();
        for i in 0..9 {
            model.record_outcome(outcome("BTC-USD", 0.05, i % 2 == 0));
        }
        let prediction = model.predict_win_rate(&features("BTC-USD", 0.05), DEFAULT_NEIGHBORS);
        assert_eq!(prediction.confidence, PredictionConfidence::Insufficient);
        assert_eq!(prediction.predicted_win_rate, 0.5);
        assert_eq!(prediction.sample_size, 9);
    }

    #[test]
    fn test_prefers_market_pool_when_large_enough() {
        let mut model = SignalQualityModel::default();
        // 10 winners on BTC, 30 losers on ETH
        for _ in 0..10 {
            model.record_outcome(outcome("BTC-USD", 0.05, true));
        }
        for _ in 0..30 {
            model.record_outcome(outcome("ETH-USD", 0.05, false));
        }

        let prediction = model.predict_win_rate(&features("BTC-USD", 0.05), DEFAULT_NEIGHBORS);
        // Scored against the BTC pool only: all winners
        assert_eq!(prediction.sample_size, 10);
        assert_eq!(prediction.predicted_win_rate, 1.0);
    }

    #[test]
    fn test_falls_back_to_global_pool_for_thin_market() {
        let mut model = SignalQualityModel::default();
        for _ in 0..5 {
            model.record_outcome(outcome("BTC-USD", 0.05, true));
        }
        for _ in 0..15 {
            model.record_outcome(outcome("ETH-USD", 0.05, true));
        }

        let prediction = model.predict_win_rate(&features("BTC-USD", 0.05), DEFAULT_NEIGHBORS);
        // BTC has only 5 entries; the global pool of 20 serves instead
        assert_eq!(prediction.sample_size, 20);
    }

    #[test]
    fn test_similarity_weighting_favors_near_neighbors() {
        let mut model = SignalQualityModel::default();
        // Near-identical winners, far-away losers
        for _ in 0..10 {
            model.record_outcome(outcome("BTC-USD", 0.05, true));
        }
        for _ in 0..10 {
            let mut loser = outcome("BTC-USD", 0.50, false);
            loser.features.confidence = 0.1;
            loser.features.phase = Phase::Late;
            model.record_outcome(loser);
        }

        let prediction = model.predict_win_rate(&features("BTC-USD", 0.05), DEFAULT_NEIGHBORS);
        assert!(prediction.predicted_win_rate > 0.7);
        assert!(prediction.predicted_win_rate < 1.0);
    }

    #[test]
    fn test_k_clamped_to_pool_size() {
        let mut model = SignalQualityModel::default();
        for _ in 0..12 {
            model.record_outcome(outcome("BTC-USD", 0.05, true));
        }
        let prediction = model.predict_win_rate(&features("BTC-USD", 0.05), 100);
        assert_eq!(prediction.sample_size, 12);
    }

    #[test]
    fn test_confidence_labels() {
        let mut model = SignalQualityModel::default();
        for _ in 0..25 {
            model.record_outcome(outcome("BTC-USD", 0.05, true));
        }
        // 20 identical neighbors: avg similarity 1.0 → HIGH
        let high = model.predict_win_rate(&features("BTC-USD", 0.05), 20);
        assert_eq!(high.confidence, PredictionConfidence::High);

        // k below 15 can never reach MEDIUM
        let low = model.predict_win_rate(&features("BTC-USD", 0.05), 10);
        assert_eq!(low.confidence, PredictionConfidence::Low);
    }

    #[test]
    fn test_per_market_cap_evicts_from_global_too() {
        let mut model = SignalQualityModel::new(3, 100);
        for i in 0..5 {
            model.record_outcome(outcome("BTC-USD", 0.01 * i as f64, true));
        }
        assert_eq!(model.market_history_len("BTC-USD"), 3);
        assert_eq!(model.history_len(), 3);
    }

    #[test]
    fn test_total_cap_evicts_from_market_too() {
        let mut model = SignalQualityModel::new(100, 4);
        model.record_outcome(outcome("BTC-USD", 0.01, true));
        model.record_outcome(outcome("BTC-USD", 0.02, true));
        for i in 0..4 {
            model.record_outcome(outcome("ETH-USD", 0.01 * i as f64, false));
        }
        // The two oldest (BTC) entries were evicted by the total cap
        assert_eq!(model.history_len(), 4);
        assert_eq!(model.market_history_len("BTC-USD"), 0);
        assert_eq!(model.market_history_len("ETH-USD"), 4);
    }
}
