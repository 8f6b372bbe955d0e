//! Drift Engine - Kalman-filtered expected return
//!
//! The latent drift follows a random walk observed directly through each
//! diffusion return plus regime-dependent noise:
//!
//! ```text
//! state:        μ_t = μ_{t-1} + w_t,   w_t ~ N(0, Q_regime)
//! observation:  r_t = μ_t + v_t,       v_t ~ N(0, R_t)
//! ```
//!
//! The posterior variance `P_t` is a confidence measure consumed by the
//! sizing stage, not a trading signal.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;
use crate::stats;
use crate::types::{FillPolicy, Regime, RegimeProbabilities, TimeSeries, Timestamp};

/// Initial state variance when the warm-up window has fewer than two returns
pub const DEFAULT_INITIAL_VARIANCE: f64 = 1e-4;

/// Drift estimation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftConfig {
    /// State mean when no warm-up returns are available
    pub initial_drift: f64,
    /// Base process noise, scaled per regime
    pub state_noise_factor: f64,
    /// Floor for observation and initial state variance
    pub min_obs_variance: f64,
    /// Observation noise follows local volatility
    pub adaptive: bool,
    /// Returns used for the warm start
    pub warmup: usize,
    /// Observation noise when `adaptive` is off
    pub fixed_obs_variance: f64,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            initial_drift: 0.0,
            state_noise_factor: 1e-5,
            min_obs_variance: 1e-6,
            adaptive: true,
            warmup: 20,
            fixed_obs_variance: 1.0,
        }
    }
}

/// Process noise multiplier: drift is least stable in crisis
pub fn process_noise_multiplier(regime: Regime) -> f64 {
    match regime {
        Regime::Bull => 1.0,
        Regime::Sideways => 3.0,
        Regime::Crisis => 10.0,
    }
}

/// Scalar Kalman filter state (posterior mean and variance)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KalmanState {
    pub mean: f64,
    pub variance: f64,
}

impl KalmanState {
    /// Time update with identity transition
    pub fn predict(self, process_noise: f64) -> Self {
        Self {
            mean: self.mean,
            variance: self.variance + process_noise,
        }
    }

    /// Measurement update with identity observation
    pub fn update(self, observation: f64, observation_noise: f64) -> Self {
        let gain = self.variance / (self.variance + observation_noise);
        Self {
            mean: self.mean + gain * (observation - self.mean),
            variance: (1.0 - gain) * self.variance,
        }
    }
}

/// One filtered timestamp
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriftStep {
    pub timestamp: Timestamp,
    /// Regime used to tune the noise at this step
    pub regime: Regime,
    pub drift: f64,
    pub uncertainty: f64,
}

#[derive(Debug, Clone)]
pub struct DriftEstimate {
    pub drift: TimeSeries<f64>,
    pub uncertainty: TimeSeries<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DriftStats {
    pub mean_drift: f64,
    pub std_drift: f64,
    pub current_drift: f64,
    pub mean_uncertainty: f64,
    pub current_uncertainty: f64,
    pub drift_range: f64,
}

pub struct DriftEngine {
    config: DriftConfig,
}

impl DriftEngine {
    pub fn new(config: DriftConfig) -> Self {
        info!(
            "DriftEngine initialized | Q={}, min_R={}, adaptive={}",
            config.state_noise_factor, config.min_obs_variance, config.adaptive
        );
        Self { config }
    }

    pub fn config(&self) -> &DriftConfig {
        &self.config
    }

    /// Warm start from the first `warmup` finite returns instead of zero
    pub fn warm_start(&self, returns: &[f64]) -> KalmanState {
        let window: Vec<f64> = returns
            .iter()
            .copied()
            .filter(|r| r.is_finite())
            .take(self.config.warmup.max(1))
            .collect();

        match (stats::mean(&window), stats::sample_variance(&window)) {
            (Some(mean), Some(variance)) => KalmanState {
                mean,
                variance: variance.max(self.config.min_obs_variance),
            },
            (Some(mean), None) => KalmanState {
                mean,
                variance: DEFAULT_INITIAL_VARIANCE,
            },
            _ => KalmanState {
                mean: self.config.initial_drift,
                variance: DEFAULT_INITIAL_VARIANCE,
            },
        }
    }

    /// `(Q, R)` for one step
    pub fn noise(&self, regime: Regime, volatility: f64) -> (f64, f64) {
        let q = self.config.state_noise_factor * process_noise_multiplier(regime);
        let r = if self.config.adaptive {
            let r = (volatility * volatility).max(self.config.min_obs_variance);
            if regime == Regime::Crisis {
                r * 2.0
            } else {
                r
            }
        } else {
            self.config.fixed_obs_variance
        };
        (q, r)
    }

    /// Lazily filter `returns`, one [`DriftStep`] per timestamp.
    ///
    /// Volatility and regime probabilities are reindexed onto the return
    /// index. Missing or non-finite volatility uses the mean of the finite
    /// values, then `sqrt(min_obs_variance)`. Without regime probabilities
    /// every step is tuned as sideways; with them, by the dominant regime.
    pub fn steps<'a>(
        &'a self,
        returns: &'a TimeSeries<f64>,
        volatility: &TimeSeries<f64>,
        regime_probabilities: Option<&TimeSeries<RegimeProbabilities>>,
    ) -> Result<DriftSteps<'a>> {
        let aligned = volatility.reindex(returns.index(), FillPolicy::Value(f64::NAN))?;
        let fallback = stats::mean(aligned.values())
            .filter(|v| *v > 0.0)
            .unwrap_or_else(|| self.config.min_obs_variance.sqrt());
        let vol: Vec<f64> = aligned
            .values()
            .iter()
            .map(|v| if v.is_finite() && *v > 0.0 { *v } else { fallback })
            .collect();

        let regimes = match regime_probabilities {
            Some(probs) => probs
                .reindex(
                    returns.index(),
                    FillPolicy::Value(RegimeProbabilities::sideways()),
                )?
                .values()
                .iter()
                .map(RegimeProbabilities::dominant)
                .collect(),
            None => vec![Regime::Sideways; returns.len()],
        };

        Ok(DriftSteps {
            engine: self,
            returns,
            volatility: vol,
            regimes,
            state: self.warm_start(returns.values()),
            position: 0,
        })
    }

    /// Run the filter over the whole series
    pub fn estimate(
        &self,
        returns: &TimeSeries<f64>,
        volatility: &TimeSeries<f64>,
        regime_probabilities: Option<&TimeSeries<RegimeProbabilities>>,
    ) -> Result<DriftEstimate> {
        let (drift, uncertainty): (Vec<f64>, Vec<f64>) = self
            .steps(returns, volatility, regime_probabilities)?
            .map(|step| (step.drift, step.uncertainty))
            .unzip();

        let estimate = DriftEstimate {
            drift: TimeSeries::new(returns.index().to_vec(), drift)?,
            uncertainty: TimeSeries::new(returns.index().to_vec(), uncertainty)?,
        };

        let summary = drift_stats(&estimate);
        info!(
            "Drift estimation complete | mean={:.6}, current={:.6}",
            summary.mean_drift, summary.current_drift
        );

        Ok(estimate)
    }
}

/// Finite, restartable sequence of filter steps; each call to
/// [`DriftEngine::steps`] starts again from a fresh warm start
pub struct DriftSteps<'a> {
    engine: &'a DriftEngine,
    returns: &'a TimeSeries<f64>,
    volatility: Vec<f64>,
    regimes: Vec<Regime>,
    state: KalmanState,
    position: usize,
}

impl Iterator for DriftSteps<'_> {
    type Item = DriftStep;

    fn next(&mut self) -> Option<DriftStep> {
        let t = self.position;
        let ret = *self.returns.values().get(t)?;
        let timestamp = self.returns.index()[t];
        let regime = self.regimes[t];

        let (q, r) = self.engine.noise(regime, self.volatility[t]);
        let mut state = self.state.predict(q);
        if ret.is_finite() {
            state = state.update(ret, r);
        }

        self.state = state;
        self.position += 1;

        Some(DriftStep {
            timestamp,
            regime,
            drift: state.mean,
            uncertainty: state.variance,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.returns.len() - self.position;
        (remaining, Some(remaining))
    }
}

pub fn drift_stats(estimate: &DriftEstimate) -> DriftStats {
    let d = estimate.drift.values();
    let u = estimate.uncertainty.values();
    let max = d.iter().copied().filter(|v| v.is_finite()).fold(f64::NEG_INFINITY, f64::max);
    let min = d.iter().copied().filter(|v| v.is_finite()).fold(f64::INFINITY, f64::min);

    DriftStats {
        mean_drift: stats::mean(d).unwrap_or(f64::NAN),
        std_drift: stats::sample_std(d).unwrap_or(f64::NAN),
        current_drift: d.last().copied().unwrap_or(f64::NAN),
        mean_uncertainty: stats::mean(u).unwrap_or(f64::NAN),
        current_uncertainty: u.last().copied().unwrap_or(f64::NAN),
        drift_range: if max >= min { max - min } else { f64::NAN },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::daily_index;

    fn series(values: Vec<f64>) -> TimeSeries<f64> {
        TimeSeries::new(daily_index(values.len()), values).unwrap()
    }

    #[test]
    fn warm_start_uses_first_window() {
        let engine = DriftEngine::new(DriftConfig {
            warmup: 4,
            ..DriftConfig::default()
        });
        let state = engine.warm_start(&[0.01, f64::NAN, 0.03, 0.02, 0.04, 1.0]);

        assert!((state.mean - 0.025).abs() < 1e-12);
        let expected_var = stats::sample_variance(&[0.01, 0.03, 0.02, 0.04]).unwrap();
        assert!((state.variance - expected_var).abs() < 1e-15);
    }

    #[test]
    fn warm_start_never_zero_variance() {
        let engine = DriftEngine::new(DriftConfig::default());

        let flat = engine.warm_start(&[0.001; 30]);
        assert_eq!(flat.variance, engine.config().min_obs_variance);

        let empty = engine.warm_start(&[]);
        assert_eq!(empty.mean, engine.config().initial_drift);
        assert_eq!(empty.variance, DEFAULT_INITIAL_VARIANCE);
    }

    #[test]
    fn noise_scales_with_regime() {
        let engine = DriftEngine::new(DriftConfig::default());
        let (q_bull, r_bull) = engine.noise(Regime::Bull, 0.02);
        let (q_side, _) = engine.noise(Regime::Sideways, 0.02);
        let (q_crisis, r_crisis) = engine.noise(Regime::Crisis, 0.02);

        assert!((q_side / q_bull - 3.0).abs() < 1e-12);
        assert!((q_crisis / q_bull - 10.0).abs() < 1e-12);
        assert!((r_bull - 0.0004).abs() < 1e-15);
        assert!((r_crisis - 0.0008).abs() < 1e-15);

        let (_, r_floor) = engine.noise(Regime::Bull, 0.0);
        assert_eq!(r_floor, engine.config().min_obs_variance);
    }

    #[test]
    fn non_adaptive_uses_fixed_observation_noise() {
        let engine = DriftEngine::new(DriftConfig {
            adaptive: false,
            fixed_obs_variance: 0.5,
            ..DriftConfig::default()
        });
        assert_eq!(engine.noise(Regime::Crisis, 0.3).1, 0.5);
    }

    #[test]
    fn kalman_update_shrinks_variance() {
        let prior = KalmanState {
            mean: 0.0,
            variance: 1.0,
        }
        .predict(1.0);
        let posterior = prior.update(1.0, 2.0);

        assert!((posterior.mean - 0.5).abs() < 1e-12);
        assert!((posterior.variance - 1.0).abs() < 1e-12);
    }

    #[test]
    fn non_finite_returns_are_predict_only() {
        let engine = DriftEngine::new(DriftConfig::default());
        let returns = series(vec![0.01, 0.02, f64::NAN, 0.01]);
        let vol = returns.map(|_| 0.02);

        let steps: Vec<DriftStep> = engine.steps(&returns, &vol, None).unwrap().collect();
        assert_eq!(steps.len(), 4);
        assert_eq!(steps[2].drift, steps[1].drift);
        assert!(steps[2].uncertainty > steps[1].uncertainty);
        assert!(steps.iter().all(|s| s.regime == Regime::Sideways));
    }

    #[test]
    fn dominant_regime_tunes_each_step() {
        let engine = DriftEngine::new(DriftConfig::default());
        let returns = series(vec![0.01; 3]);
        let vol = returns.map(|_| 0.02);
        let probs = TimeSeries::new(
            returns.index()[..2].to_vec(),
            vec![
                RegimeProbabilities::bull_leaning(0.7),
                RegimeProbabilities::crisis_leaning(0.7),
            ],
        )
        .unwrap();

        let regimes: Vec<Regime> = engine
            .steps(&returns, &vol, Some(&probs))
            .unwrap()
            .map(|s| s.regime)
            .collect();
        assert_eq!(regimes, vec![Regime::Bull, Regime::Crisis, Regime::Sideways]);
    }

    #[test]
    fn drift_tracks_persistent_mean() {
        let engine = DriftEngine::new(DriftConfig {
            state_noise_factor: 1e-8,
            ..DriftConfig::default()
        });
        let returns = series(
            (0..300)
                .map(|i| 0.002 + if i % 2 == 0 { 0.01 } else { -0.01 })
                .collect(),
        );
        let vol = returns.map(|_| 0.01);

        let estimate = engine.estimate(&returns, &vol, None).unwrap();
        let stats = drift_stats(&estimate);

        assert_eq!(estimate.drift.len(), returns.len());
        assert!((stats.current_drift - 0.002).abs() < 0.002);
        assert!(estimate.uncertainty.values().iter().all(|p| *p > 0.0));
    }
}
