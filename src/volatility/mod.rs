//! Volatility Engine - Regime-aware volatility from diffusion returns
//!
//! Each regime has its own estimator:
//! - Bull: slow EWMA (smooth, trend-following)
//! - Sideways: GARCH(p,q), falling back to a moderate EWMA when the fit fails
//! - Crisis: fast EWMA (reactive to shocks)
//!
//! The effective volatility is the probability-weighted blend
//! `σ_eff = Σ P(regime) · σ_regime`. Inputs must be diffusion returns:
//! jump returns never enter any estimator here.

pub mod garch;

pub use garch::{FitError, GarchFitter, GarchParams, MleGarchFitter};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::stats;
use crate::types::{FillPolicy, Regime, RegimeProbabilities, TimeSeries};

/// Volatility estimation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolatilityConfig {
    /// EWMA decay for bull regimes (higher = smoother)
    pub bull_ewma_lambda: f64,
    /// EWMA decay for crisis regimes (lower = more reactive)
    pub crisis_ewma_lambda: f64,
    /// EWMA decay used when the GARCH fit fails
    pub fallback_ewma_lambda: f64,
    /// ARCH lags (squared returns)
    pub garch_p: usize,
    /// GARCH lags (conditional variance)
    pub garch_q: usize,
    /// Variance floor
    pub min_variance: f64,
}

impl Default for VolatilityConfig {
    fn default() -> Self {
        Self {
            bull_ewma_lambda: 0.94,
            crisis_ewma_lambda: 0.85,
            fallback_ewma_lambda: 0.90,
            garch_p: 1,
            garch_q: 1,
            min_variance: 1e-6,
        }
    }
}

/// Summary statistics for monitoring
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VolatilityStats {
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub median: f64,
    pub current: f64,
}

/// Running EWMA variance state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EwmaState {
    pub variance: f64,
}

impl EwmaState {
    /// `variance_t = λ · variance_{t-1} + (1 - λ) · r_t²`
    pub fn step(self, lambda: f64, ret: f64) -> Self {
        if !ret.is_finite() {
            return self;
        }
        Self {
            variance: lambda * self.variance + (1.0 - lambda) * ret * ret,
        }
    }
}

pub struct VolatilityEngine {
    config: VolatilityConfig,
    fitter: Box<dyn GarchFitter>,
}

impl VolatilityEngine {
    pub fn new(config: VolatilityConfig) -> Self {
        Self::with_fitter(config, Box::new(MleGarchFitter::new()))
    }

    pub fn with_fitter(config: VolatilityConfig, fitter: Box<dyn GarchFitter>) -> Self {
        info!(
            "VolatilityEngine initialized: bull_lambda={}, crisis_lambda={}, garch=({},{})",
            config.bull_ewma_lambda, config.crisis_ewma_lambda, config.garch_p, config.garch_q
        );
        Self { config, fitter }
    }

    pub fn config(&self) -> &VolatilityConfig {
        &self.config
    }

    pub fn min_volatility(&self) -> f64 {
        self.config.min_variance.sqrt()
    }

    /// EWMA volatility, seeded with the first squared return and floored at
    /// `min_variance` at every step
    pub fn ewma_volatility(&self, returns: &TimeSeries<f64>, lambda: f64) -> TimeSeries<f64> {
        let floor = self.config.min_variance;
        let seed = returns
            .values()
            .iter()
            .find(|r| r.is_finite())
            .map(|r| r * r)
            .unwrap_or(floor);

        let mut state = EwmaState { variance: seed };
        let mut first = true;
        returns.map(|&r| {
            if first {
                first = false;
            } else {
                state = state.step(lambda, r);
            }
            state.variance.max(floor).sqrt()
        })
    }

    /// GARCH conditional volatility; any fit failure resolves to the EWMA
    /// fallback and is never propagated
    pub fn garch_volatility(&self, returns: &TimeSeries<f64>) -> TimeSeries<f64> {
        let floor = self.min_volatility();
        match self
            .fitter
            .fit(returns.values(), self.config.garch_p, self.config.garch_q)
        {
            Ok(vol) if vol.len() == returns.len() && vol.iter().all(|v| v.is_finite()) => {
                debug!(
                    "GARCH({},{}) fitted on {} returns",
                    self.config.garch_p,
                    self.config.garch_q,
                    vol.len()
                );
                let mut values = vol.into_iter();
                returns.map(|_| values.next().unwrap_or(floor).max(floor))
            }
            Ok(vol) => {
                warn!(
                    "GARCH fit returned {} unusable values for {} returns. Falling back to EWMA.",
                    vol.len(),
                    returns.len()
                );
                self.ewma_volatility(returns, self.config.fallback_ewma_lambda)
            }
            Err(e) => {
                warn!("GARCH fitting failed: {}. Falling back to EWMA.", e);
                self.ewma_volatility(returns, self.config.fallback_ewma_lambda)
            }
        }
    }

    /// Volatility under the model assigned to `regime`
    pub fn regime_volatility(&self, returns: &TimeSeries<f64>, regime: Regime) -> TimeSeries<f64> {
        match regime {
            Regime::Bull => {
                debug!("Computing bull regime volatility (slow EWMA)");
                self.ewma_volatility(returns, self.config.bull_ewma_lambda)
            }
            Regime::Sideways => {
                debug!("Computing sideways regime volatility (GARCH)");
                self.garch_volatility(returns)
            }
            Regime::Crisis => {
                debug!("Computing crisis regime volatility (fast EWMA)");
                self.ewma_volatility(returns, self.config.crisis_ewma_lambda)
            }
        }
    }

    /// Same as [`regime_volatility`](Self::regime_volatility) for a textual
    /// label; unknown labels are a hard error
    pub fn regime_volatility_by_label(
        &self,
        returns: &TimeSeries<f64>,
        label: &str,
    ) -> Result<TimeSeries<f64>> {
        let regime: Regime = label.parse()?;
        Ok(self.regime_volatility(returns, regime))
    }

    /// Regime-weighted volatility `σ_eff,t = Σ P_regime,t · σ_regime,t`.
    ///
    /// Probabilities are reindexed onto the return index; timestamps without
    /// a probability triple take the sideways default.
    pub fn effective_volatility(
        &self,
        returns: &TimeSeries<f64>,
        regime_probabilities: &TimeSeries<RegimeProbabilities>,
    ) -> Result<TimeSeries<f64>> {
        let probs = regime_probabilities.reindex(
            returns.index(),
            FillPolicy::Value(RegimeProbabilities::sideways()),
        )?;

        let bull = self.regime_volatility(returns, Regime::Bull);
        let sideways = self.regime_volatility(returns, Regime::Sideways);
        let crisis = self.regime_volatility(returns, Regime::Crisis);

        let floor = self.min_volatility();
        let values = (0..returns.len())
            .map(|t| {
                let p = probs.values()[t];
                p.blend(|regime| match regime {
                    Regime::Bull => bull.values()[t],
                    Regime::Sideways => sideways.values()[t],
                    Regime::Crisis => crisis.values()[t],
                })
                .max(floor)
            })
            .collect();

        info!("Computed effective volatility (regime-weighted)");
        TimeSeries::new(returns.index().to_vec(), values)
    }
}

pub fn volatility_stats(volatility: &TimeSeries<f64>) -> VolatilityStats {
    let values = volatility.values();
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return VolatilityStats::default();
    }
    VolatilityStats {
        mean: stats::mean(&finite).unwrap_or(0.0),
        std: stats::sample_std(&finite).unwrap_or(0.0),
        min: finite.iter().copied().fold(f64::INFINITY, f64::min),
        max: finite.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        median: stats::median(&finite).unwrap_or(0.0),
        current: values.last().copied().unwrap_or(f64::NAN),
    }
}

/// Per-period volatility → annual, for reporting (`σ · sqrt(periods)`)
pub fn annualize_volatility(volatility: f64, periods_per_year: f64) -> f64 {
    volatility * periods_per_year.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::daily_index;
    use super::garch::MockGarchFitter;

    fn series(values: Vec<f64>) -> TimeSeries<f64> {
        TimeSeries::new(daily_index(values.len()), values).unwrap()
    }

    fn failing_engine(err: FitError) -> VolatilityEngine {
        let mut fitter = MockGarchFitter::new();
        fitter
            .expect_fit()
            .returning(move |_, _, _| Err(err.clone()));
        VolatilityEngine::with_fitter(VolatilityConfig::default(), Box::new(fitter))
    }

    #[test]
    fn ewma_follows_recursion() {
        let engine = VolatilityEngine::new(VolatilityConfig {
            min_variance: 1e-12,
            ..VolatilityConfig::default()
        });
        let returns = series(vec![0.02, 0.01, -0.03]);
        let vol = engine.ewma_volatility(&returns, 0.9);

        let v0 = 0.02_f64.powi(2);
        let v1 = 0.9 * v0 + 0.1 * 0.01_f64.powi(2);
        let v2 = 0.9 * v1 + 0.1 * 0.03_f64.powi(2);
        assert!((vol.values()[0] - v0.sqrt()).abs() < 1e-12);
        assert!((vol.values()[1] - v1.sqrt()).abs() < 1e-12);
        assert!((vol.values()[2] - v2.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn volatility_never_below_floor() {
        let engine = VolatilityEngine::new(VolatilityConfig::default());
        let returns = series(vec![0.0; 40]);
        let floor = engine.min_volatility();

        for regime in Regime::ALL {
            let vol = engine.regime_volatility(&returns, regime);
            assert_eq!(vol.len(), returns.len());
            assert!(vol.values().iter().all(|v| v.is_finite() && *v >= floor));
        }
    }

    #[test]
    fn garch_failure_falls_back_to_ewma() {
        let engine = failing_engine(FitError::NonConvergence(10));
        let returns = series((0..50).map(|i| 0.01 * ((i % 5) as f64 - 2.0)).collect());

        let garch = engine.garch_volatility(&returns);
        let fallback = engine.ewma_volatility(&returns, engine.config().fallback_ewma_lambda);
        assert_eq!(garch, fallback);
    }

    #[test]
    fn degenerate_input_uses_fallback_with_real_fitter() {
        let engine = VolatilityEngine::new(VolatilityConfig::default());
        let returns = series(vec![0.0; 5]);

        let vol = engine.regime_volatility(&returns, Regime::Sideways);
        assert!(vol.values().iter().all(|v| (*v - engine.min_volatility()).abs() < 1e-15));
    }

    #[test]
    fn successful_fit_is_floored_and_used() {
        let mut fitter = MockGarchFitter::new();
        fitter
            .expect_fit()
            .withf(|r, p, q| r.len() == 3 && *p == 1 && *q == 1)
            .returning(|_, _, _| Ok(vec![0.02, 0.0, 0.03]));
        let engine = VolatilityEngine::with_fitter(VolatilityConfig::default(), Box::new(fitter));

        let vol = engine.garch_volatility(&series(vec![0.01, 0.02, 0.03]));
        assert_eq!(vol.values(), &[0.02, engine.min_volatility(), 0.03]);
    }

    #[test]
    fn unknown_label_is_hard_error() {
        let engine = failing_engine(FitError::Degenerate);
        let returns = series(vec![0.01; 5]);

        assert!(engine.regime_volatility_by_label(&returns, "crisis").is_ok());
        assert!(engine.regime_volatility_by_label(&returns, "bear").is_err());
    }

    #[test]
    fn effective_volatility_blends_by_probability() {
        let engine = failing_engine(FitError::Degenerate);
        let returns = series((0..30).map(|i| if i % 2 == 0 { 0.02 } else { -0.01 }).collect());
        let probs = returns.map(|_| RegimeProbabilities::crisis_leaning(0.7));

        let eff = engine.effective_volatility(&returns, &probs).unwrap();
        let sideways = engine.regime_volatility(&returns, Regime::Sideways);
        let crisis = engine.regime_volatility(&returns, Regime::Crisis);

        for t in 0..returns.len() {
            let expected = 0.3 * sideways.values()[t] + 0.7 * crisis.values()[t];
            assert!((eff.values()[t] - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn stats_summarize_series() {
        let s = volatility_stats(&series(vec![0.01, 0.03, 0.02]));
        assert!((s.mean - 0.02).abs() < 1e-12);
        assert_eq!(s.min, 0.01);
        assert_eq!(s.max, 0.03);
        assert_eq!(s.median, 0.02);
        assert_eq!(s.current, 0.02);
        assert!((annualize_volatility(0.01, 252.0) - 0.01 * 252f64.sqrt()).abs() < 1e-15);
    }
}
