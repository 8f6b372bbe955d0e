//! Regime Engine - Soft bull / sideways / crisis classification
//!
//! Two trailing statistics drive the label at each timestamp: where the
//! current volatility ranks inside its own recent history, and how often
//! jumps occurred recently. The output is a probability triple, never a
//! hard switch.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;
use crate::stats;
use crate::types::{FillPolicy, Regime, RegimeProbabilities, TimeSeries};

/// Regime classification parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeConfig {
    /// Window for the volatility percentile rank
    pub vol_window: usize,
    /// Window for the jump frequency
    pub jump_window: usize,
    /// Percentile above which volatility is high
    pub high_vol_pct: f64,
    /// Percentile below which volatility is low
    pub low_vol_pct: f64,
    /// Jump frequency that signals stress
    pub jump_rate_threshold: f64,
    /// Crisis share of a crisis-leaning triple
    pub crisis_weight: f64,
    /// Bull share of a bull-leaning triple
    pub bull_weight: f64,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            vol_window: 60,
            jump_window: 60,
            high_vol_pct: 0.8,
            low_vol_pct: 0.3,
            jump_rate_threshold: 0.05,
            crisis_weight: 0.7,
            bull_weight: 0.7,
        }
    }
}

/// Per-timestamp regime shares, for reporting
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RegimeSummary {
    pub bull_share: f64,
    pub sideways_share: f64,
    pub crisis_share: f64,
    pub current: Option<Regime>,
}

pub struct RegimeEngine {
    config: RegimeConfig,
}

impl RegimeEngine {
    pub fn new(config: RegimeConfig) -> Self {
        info!(
            "RegimeEngine initialized | vol_window={}, jump_window={}, high={}, low={}",
            config.vol_window, config.jump_window, config.high_vol_pct, config.low_vol_pct
        );
        Self { config }
    }

    pub fn config(&self) -> &RegimeConfig {
        &self.config
    }

    /// Classify a single timestamp from its statistics.
    ///
    /// First match wins: missing history, crisis, bull, sideways.
    pub fn classify(&self, vol_rank: Option<f64>, jump_rate: Option<f64>) -> RegimeProbabilities {
        let (rank, rate) = match (vol_rank, jump_rate) {
            (Some(rank), Some(rate)) if rank.is_finite() && rate.is_finite() => (rank, rate),
            _ => return RegimeProbabilities::sideways(),
        };

        let c = &self.config;
        if rank > c.high_vol_pct || rate > c.jump_rate_threshold {
            RegimeProbabilities::crisis_leaning(c.crisis_weight)
        } else if rank < c.low_vol_pct && rate < c.jump_rate_threshold / 2.0 {
            RegimeProbabilities::bull_leaning(c.bull_weight)
        } else {
            RegimeProbabilities::sideways()
        }
    }

    /// Regime probabilities on the volatility index.
    ///
    /// Jump flags are aligned onto the volatility index; timestamps without
    /// a flag count as no jump.
    pub fn detect(
        &self,
        volatility: &TimeSeries<f64>,
        is_jump: &TimeSeries<bool>,
    ) -> Result<TimeSeries<RegimeProbabilities>> {
        let flags = is_jump.reindex(volatility.index(), FillPolicy::Value(false))?;

        let ranks = stats::rolling_percentile_rank(volatility.values(), self.config.vol_window);
        let rates = stats::rolling_rate(flags.values(), self.config.jump_window);

        let probabilities: Vec<RegimeProbabilities> = ranks
            .into_iter()
            .zip(rates)
            .map(|(rank, rate)| self.classify(rank, rate))
            .collect();

        let result = TimeSeries::new(volatility.index().to_vec(), probabilities)?;
        let summary = regime_summary(&result);
        info!(
            "Regime detection complete | bull={:.1}%, sideways={:.1}%, crisis={:.1}%",
            100.0 * summary.bull_share,
            100.0 * summary.sideways_share,
            100.0 * summary.crisis_share
        );

        Ok(result)
    }
}

/// Share of timestamps by dominant regime, plus the current one
pub fn regime_summary(probabilities: &TimeSeries<RegimeProbabilities>) -> RegimeSummary {
    if probabilities.is_empty() {
        return RegimeSummary::default();
    }

    let n = probabilities.len() as f64;
    let share = |regime: Regime| {
        probabilities
            .values()
            .iter()
            .filter(|p| p.dominant() == regime)
            .count() as f64
            / n
    };

    RegimeSummary {
        bull_share: share(Regime::Bull),
        sideways_share: share(Regime::Sideways),
        crisis_share: share(Regime::Crisis),
        current: probabilities.last().map(RegimeProbabilities::dominant),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::daily_index;

    fn engine(window: usize) -> RegimeEngine {
        RegimeEngine::new(RegimeConfig {
            vol_window: window,
            jump_window: window,
            ..RegimeConfig::default()
        })
    }

    #[test]
    fn missing_history_is_sideways() {
        let e = engine(10);
        assert_eq!(e.classify(None, Some(0.0)), RegimeProbabilities::sideways());
        assert_eq!(
            e.classify(Some(f64::NAN), Some(0.0)),
            RegimeProbabilities::sideways()
        );
    }

    #[test]
    fn crisis_takes_precedence_over_bull() {
        let e = engine(10);
        // low volatility rank but frequent jumps
        let p = e.classify(Some(0.1), Some(0.2));
        assert_eq!(p, RegimeProbabilities::crisis_leaning(0.7));
        assert_eq!(p.dominant(), Regime::Crisis);
    }

    #[test]
    fn bull_requires_calm_jump_rate() {
        let e = engine(10);
        assert_eq!(
            e.classify(Some(0.1), Some(0.0)),
            RegimeProbabilities::bull_leaning(0.7)
        );
        // below the jump threshold but not below half of it
        assert_eq!(
            e.classify(Some(0.1), Some(0.03)),
            RegimeProbabilities::sideways()
        );
        assert_eq!(
            e.classify(Some(0.5), Some(0.0)),
            RegimeProbabilities::sideways()
        );
    }

    #[test]
    fn detect_labels_rising_and_falling_volatility() {
        let e = engine(10);
        let n = 40;
        let values: Vec<f64> = (0..n)
            .map(|i| if i < 25 { 0.01 + 0.001 * i as f64 } else { 0.05 - 0.001 * i as f64 })
            .collect();
        let vol = TimeSeries::new(daily_index(n), values).unwrap();
        let jumps = vol.map(|_| false);

        let probs = e.detect(&vol, &jumps).unwrap();

        assert_eq!(probs.len(), n);
        assert_eq!(probs.values()[5], RegimeProbabilities::sideways());
        assert_eq!(probs.values()[20].dominant(), Regime::Crisis);
        assert_eq!(probs.values()[35].dominant(), Regime::Bull);
        for p in probs.values() {
            assert!((p.sum() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn jump_clusters_trigger_crisis() {
        let e = engine(10);
        let n = 30;
        let vol = TimeSeries::new(daily_index(n), vec![0.02; n]).unwrap();
        let jumps = TimeSeries::new(daily_index(n), (0..n).map(|i| i == 25).collect()).unwrap();

        let probs = e.detect(&vol, &jumps).unwrap();

        // flat volatility ranks at the midpoint, so only the jump matters
        assert_eq!(probs.values()[20], RegimeProbabilities::sideways());
        assert_eq!(probs.values()[25].dominant(), Regime::Crisis);
        assert_eq!(probs.values()[29].dominant(), Regime::Crisis);
    }

    #[test]
    fn summary_counts_dominant_regimes() {
        let idx = daily_index(4);
        let probs = TimeSeries::new(
            idx,
            vec![
                RegimeProbabilities::sideways(),
                RegimeProbabilities::bull_leaning(0.7),
                RegimeProbabilities::crisis_leaning(0.7),
                RegimeProbabilities::crisis_leaning(0.7),
            ],
        )
        .unwrap();

        let summary = regime_summary(&probs);
        assert_eq!(summary.crisis_share, 0.5);
        assert_eq!(summary.current, Some(Regime::Crisis));
    }
}
