//! Jump Detector - Separates discontinuous jumps from diffusion returns
//!
//! A return is a jump when its standardized residual against a trailing
//! window exceeds `threshold`. Jumps pollute volatility estimates, so every
//! downstream volatility estimator consumes the diffusion component only.
//!
//! - Robust mode (default): center = rolling median, spread = rolling MAD × 1.4826
//! - Classic mode: center = rolling mean, spread = rolling sample std

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Result;
use crate::stats;
use crate::types::TimeSeries;

/// MAD → standard deviation under normality
pub const MAD_SCALE: f64 = 1.4826;

/// Rolling statistics score points once this many observations are in the window
pub const MIN_ROLLING_PERIODS: usize = 5;

/// Jump detection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JumpConfig {
    /// Standardized residual above which a return is a jump
    pub threshold: f64,
    /// Trailing window for center/spread
    pub window: usize,
    /// Below this many observations nothing is flagged
    pub min_observations: usize,
    /// Median/MAD instead of mean/std
    pub use_robust: bool,
}

impl Default for JumpConfig {
    fn default() -> Self {
        Self {
            threshold: 3.0,
            window: 20,
            min_observations: 30,
            use_robust: true,
        }
    }
}

/// Jump/diffusion decomposition of a return series
///
/// For every timestamp `jump_returns + diffusion_returns == returns`.
#[derive(Debug, Clone)]
pub struct JumpClassification {
    pub is_jump: TimeSeries<bool>,
    pub jump_returns: TimeSeries<f64>,
    pub diffusion_returns: TimeSeries<f64>,
}

impl JumpClassification {
    pub fn jump_count(&self) -> usize {
        self.is_jump.values().iter().filter(|j| **j).count()
    }

    /// Everything passes through as diffusion
    fn no_jumps(returns: &TimeSeries<f64>) -> Self {
        Self {
            is_jump: returns.map(|_| false),
            jump_returns: returns.map(|_| 0.0),
            diffusion_returns: returns.clone(),
        }
    }
}

/// Jump-size distribution and intensity
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct JumpParameters {
    /// Mean jump size
    pub mu_j: f64,
    /// Jump size standard deviation
    pub sigma_j: f64,
    /// Jumps per observation (per day for daily data)
    pub lambda: f64,
}

pub struct JumpDetector {
    config: JumpConfig,
}

impl JumpDetector {
    pub fn new(config: JumpConfig) -> Self {
        info!(
            "JumpDetector initialized with threshold={}, window={}, robust={}",
            config.threshold, config.window, config.use_robust
        );
        Self { config }
    }

    pub fn config(&self) -> &JumpConfig {
        &self.config
    }

    /// Split `returns` into jump and diffusion components.
    ///
    /// Fewer than `min_observations` returns is not an error: nothing is
    /// flagged and all returns pass through as diffusion.
    pub fn detect(&self, returns: &TimeSeries<f64>) -> Result<JumpClassification> {
        if returns.len() < self.config.min_observations {
            warn!(
                "Only {} observations, need {} for jump detection; treating all as diffusion",
                returns.len(),
                self.config.min_observations
            );
            return Ok(JumpClassification::no_jumps(returns));
        }

        let flags = self.flag_jumps(returns.values());

        let (jump_values, diffusion_values): (Vec<f64>, Vec<f64>) = returns
            .values()
            .iter()
            .zip(flags.iter())
            .map(|(&r, &jump)| if jump { (r, 0.0) } else { (0.0, r) })
            .unzip();

        let index = returns.index().to_vec();
        let classification = JumpClassification {
            is_jump: TimeSeries::new(index.clone(), flags)?,
            jump_returns: TimeSeries::new(index.clone(), jump_values)?,
            diffusion_returns: TimeSeries::new(index, diffusion_values)?,
        };

        let n_jumps = classification.jump_count();
        info!(
            "Detected {} jumps ({:.2}% of data)",
            n_jumps,
            100.0 * n_jumps as f64 / returns.len() as f64
        );
        if n_jumps > 0 {
            let magnitudes: Vec<f64> = classification
                .jump_returns
                .values()
                .iter()
                .zip(classification.is_jump.values())
                .filter(|(_, jump)| **jump)
                .map(|(r, _)| r.abs())
                .collect();
            if let Some(avg) = stats::mean(&magnitudes) {
                info!("Average jump magnitude: {:.4}", avg);
            }
        }

        Ok(classification)
    }

    /// Jump flags for a raw slice; non-finite returns and undefined
    /// residuals (no spread yet, zero spread) are never jumps.
    fn flag_jumps(&self, returns: &[f64]) -> Vec<bool> {
        let window = self.config.window;

        let (center, spread) = if self.config.use_robust {
            let median = stats::rolling_median(returns, window, MIN_ROLLING_PERIODS);
            let deviations: Vec<f64> = returns
                .iter()
                .zip(median.iter())
                .map(|(r, m)| match m {
                    Some(m) => (r - m).abs(),
                    None => f64::NAN,
                })
                .collect();
            let mad = stats::rolling_median(&deviations, window, MIN_ROLLING_PERIODS);
            let spread = mad.into_iter().map(|m| m.map(|m| m * MAD_SCALE)).collect();
            (median, spread)
        } else {
            (
                stats::rolling_mean(returns, window, MIN_ROLLING_PERIODS),
                stats::rolling_std(returns, window, MIN_ROLLING_PERIODS),
            )
        };

        returns
            .iter()
            .zip(center.iter().zip(spread.iter()))
            .map(|(&r, (c, s))| match (c, s) {
                (Some(c), Some(s)) if r.is_finite() && s.is_finite() && *s > 0.0 => {
                    ((r - c) / s).abs() > self.config.threshold
                }
                _ => false,
            })
            .collect()
    }

    /// Estimate `{mu_j, sigma_j, lambda}` from the jump-only series.
    ///
    /// Zero entries are non-jumps. With no jumps every parameter is zero;
    /// with a single jump `sigma_j` is zero.
    pub fn estimate_jump_parameters(&self, jump_returns: &TimeSeries<f64>) -> JumpParameters {
        estimate_jump_parameters(jump_returns.values())
    }
}

/// Slice form of [`JumpDetector::estimate_jump_parameters`]
pub fn estimate_jump_parameters(jump_returns: &[f64]) -> JumpParameters {
    let jumps: Vec<f64> = jump_returns
        .iter()
        .copied()
        .filter(|r| r.is_finite() && *r != 0.0)
        .collect();

    if jumps.is_empty() {
        warn!("No jumps found for parameter estimation");
        return JumpParameters::default();
    }

    let params = JumpParameters {
        mu_j: stats::mean(&jumps).unwrap_or(0.0),
        sigma_j: stats::sample_std(&jumps).unwrap_or(0.0),
        lambda: jumps.len() as f64 / jump_returns.len() as f64,
    };

    info!(
        "Jump parameters: mu_j={:.4}, sigma_j={:.4}, lambda={:.4}",
        params.mu_j, params.sigma_j, params.lambda
    );

    params
}
