//! Mispricing Engine - Smoothed relative deviation of market from model
//!
//! Measures only; it never trades. `raw_t = (market_t − model_t) / model_t`
//! is smoothed with a bias-adjusted EWMA and any smoothed value below
//! `min_signal_strength` in magnitude is snapped to exactly zero.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::types::TimeSeries;

/// Mispricing parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MispricingConfig {
    /// EWMA smoothing factor in (0, 1]
    pub ema_alpha: f64,
    /// Dead-zone half-width
    pub min_signal_strength: f64,
    /// Mispricing at which confidence saturates
    pub buy_threshold: f64,
}

impl Default for MispricingConfig {
    fn default() -> Self {
        Self {
            ema_alpha: 0.3,
            min_signal_strength: 0.01,
            buy_threshold: 0.05,
        }
    }
}

pub struct MispricingEngine {
    config: MispricingConfig,
}

impl MispricingEngine {
    pub fn new(config: MispricingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MispricingConfig {
        &self.config
    }

    /// Relative deviation for one pair; a zero or non-finite model price
    /// is rejected rather than producing `inf`
    pub fn relative_deviation(&self, market: f64, model: f64) -> Result<f64> {
        if !model.is_finite() || model == 0.0 {
            return Err(EngineError::DegenerateInput(format!(
                "model price must be non-zero and finite, got {}",
                model
            )));
        }
        if !market.is_finite() {
            return Err(EngineError::DegenerateInput(format!(
                "market price must be finite, got {}",
                market
            )));
        }
        Ok((market - model) / model)
    }

    /// Smoothed, dead-zoned mispricing for aligned price slices
    pub fn compute(&self, market: &[f64], model: &[f64]) -> Result<Vec<f64>> {
        if market.len() != model.len() {
            return Err(EngineError::Misaligned(format!(
                "{} market prices vs {} model prices",
                market.len(),
                model.len()
            )));
        }

        let raw = market
            .iter()
            .zip(model.iter())
            .map(|(&m, &p)| self.relative_deviation(m, p))
            .collect::<Result<Vec<f64>>>()?;

        let decay = 1.0 - self.config.ema_alpha;
        let mut numerator = 0.0;
        let mut denominator = 0.0;
        let signal: Vec<f64> = raw
            .iter()
            .map(|&x| {
                numerator = x + decay * numerator;
                denominator = 1.0 + decay * denominator;
                self.dead_zone(numerator / denominator)
            })
            .collect();

        if let Some(last) = signal.last() {
            debug!("Mispricing over {} observations, latest={:.4}", signal.len(), last);
        }

        Ok(signal)
    }

    /// Series form of [`compute`](Self::compute); both series must share an index
    pub fn compute_series(
        &self,
        market: &TimeSeries<f64>,
        model: &TimeSeries<f64>,
    ) -> Result<TimeSeries<f64>> {
        if market.index() != model.index() {
            return Err(EngineError::Misaligned(
                "market and model prices have different indexes".to_string(),
            ));
        }
        let values = self.compute(market.values(), model.values())?;
        TimeSeries::new(market.index().to_vec(), values)
    }

    /// Latest mispricing for a single quote
    pub fn latest(&self, market: f64, model: f64) -> Result<f64> {
        Ok(self
            .compute(&[market], &[model])?
            .last()
            .copied()
            .unwrap_or(0.0))
    }

    fn dead_zone(&self, value: f64) -> f64 {
        if value.abs() < self.config.min_signal_strength {
            0.0
        } else {
            value
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> MispricingEngine {
        MispricingEngine::new(MispricingConfig::default())
    }

    #[test]
    fn single_quote_is_raw_deviation() {
        let m = engine().latest(9.0, 10.0).unwrap();
        assert!((m + 0.1).abs() < 1e-12);
    }

    #[test]
    fn small_deviations_snap_to_zero() {
        assert_eq!(engine().latest(10.05, 10.0).unwrap(), 0.0);
        assert_eq!(engine().latest(9.95, 10.0).unwrap(), 0.0);
    }

    #[test]
    fn zero_model_price_is_rejected() {
        assert!(matches!(
            engine().latest(1.0, 0.0),
            Err(EngineError::DegenerateInput(_))
        ));
    }

    #[test]
    fn smoothing_uses_adjusted_weights() {
        // raw deviations 0.1 then 0.3, alpha 0.3 → (0.3 + 0.7·0.1) / 1.7
        let signal = engine().compute(&[11.0, 13.0], &[10.0, 10.0]).unwrap();
        assert!((signal[0] - 0.1).abs() < 1e-12);
        assert!((signal[1] - 0.37 / 1.7).abs() < 1e-12);
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        assert!(matches!(
            engine().compute(&[1.0, 2.0], &[1.0]),
            Err(EngineError::Misaligned(_))
        ));
    }
}
