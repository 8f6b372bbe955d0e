//! Position Sizing - Confidence and risk-penalized Kelly fraction
//!
//! Two strategies share the same inputs, direction convention and final
//! `±max_position` clamp:
//!
//! - `ConfidenceScaled`: `fraction · confidence / max(σ·m_jump, ε)`,
//!   shrunk by drift uncertainty, bounded by the blended regime cap
//! - `KellyCriterion`: `fraction · |mispricing| / σ²`, shrunk by jump
//!   intensity and drift uncertainty, bounded by `max_position` and the
//!   blended regime cap, with a minimum-size filter
//!
//! Negative mispricing (market cheaper than model) is a long position.

use serde::{Deserialize, Serialize};

use crate::types::{Regime, RegimeProbabilities};

/// Floor on the risk denominator of the confidence-scaled size
pub const MIN_RISK: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizingStrategy {
    #[default]
    ConfidenceScaled,
    KellyCriterion,
}

/// Sizing parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizingConfig {
    pub strategy: SizingStrategy,
    /// Fraction of full Kelly
    pub fraction: f64,
    /// Hard cap on |position|
    pub max_position: f64,
    /// Smallest tradeable |position|
    pub min_position: f64,
    pub jump_risk_multiplier: f64,
    pub uncertainty_scale: f64,
    pub bull_max_position: f64,
    pub sideways_max_position: f64,
    pub crisis_max_position: f64,
    /// Sigmoid steepness of the confidence map
    pub confidence_steepness: f64,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            strategy: SizingStrategy::ConfidenceScaled,
            fraction: 0.25,
            max_position: 0.10,
            min_position: 0.01,
            jump_risk_multiplier: 1.5,
            uncertainty_scale: 100.0,
            bull_max_position: 0.10,
            sideways_max_position: 0.05,
            crisis_max_position: 0.02,
            confidence_steepness: 5.0,
        }
    }
}

impl SizingConfig {
    pub fn regime_max_position(&self, regime: Regime) -> f64 {
        match regime {
            Regime::Bull => self.bull_max_position,
            Regime::Sideways => self.sideways_max_position,
            Regime::Crisis => self.crisis_max_position,
        }
    }
}

/// Logistic map centred at 0.5
#[inline]
pub fn sigmoid(x: f64, steepness: f64) -> f64 {
    1.0 / (1.0 + (-steepness * (x - 0.5)).exp())
}

/// Confidence in `(0, 1)`, non-decreasing in `|mispricing|`
pub fn confidence(mispricing: f64, buy_threshold: f64, steepness: f64) -> f64 {
    let raw_bias = if buy_threshold > 0.0 {
        (mispricing.abs() / buy_threshold).min(1.0)
    } else if mispricing != 0.0 {
        1.0
    } else {
        0.0
    };
    sigmoid(raw_bias, steepness)
}

/// +1 long, −1 short, 0 flat
pub fn direction(mispricing: f64) -> f64 {
    if mispricing < 0.0 {
        1.0
    } else if mispricing > 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Everything the sizer needs for one decision
#[derive(Debug, Clone, Copy)]
pub struct SizingInputs {
    pub mispricing: f64,
    pub confidence: f64,
    /// Per-observation volatility
    pub volatility: f64,
    /// Jumps per observation
    pub jump_intensity: f64,
    /// Drift posterior variance
    pub drift_uncertainty: f64,
    pub regime: RegimeProbabilities,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SizingQuote {
    pub direction: f64,
    /// Unsigned size before any cap
    pub kelly: f64,
    pub regime_cap: f64,
    /// Signed fraction of capital
    pub position: f64,
}

pub struct PositionSizer {
    config: SizingConfig,
}

impl PositionSizer {
    pub fn new(config: SizingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SizingConfig {
        &self.config
    }

    /// Probability-weighted per-regime cap
    pub fn regime_cap(&self, regime: &RegimeProbabilities) -> f64 {
        regime.blend(|r| self.config.regime_max_position(r))
    }

    pub fn size(&self, inputs: &SizingInputs) -> SizingQuote {
        let quote = match self.config.strategy {
            SizingStrategy::ConfidenceScaled => self.confidence_scaled(inputs),
            SizingStrategy::KellyCriterion => self.kelly_criterion(inputs),
        };

        let max = self.config.max_position;
        let position = if quote.position.is_finite() {
            quote.position.clamp(-max, max)
        } else {
            0.0
        };
        SizingQuote { position, ..quote }
    }

    fn uncertainty_penalty(&self, uncertainty: f64) -> f64 {
        1.0 / (1.0 + self.config.uncertainty_scale * uncertainty.max(0.0))
    }

    fn confidence_scaled(&self, inputs: &SizingInputs) -> SizingQuote {
        let c = &self.config;
        let risk = (inputs.volatility * c.jump_risk_multiplier).max(MIN_RISK);
        let kelly = c.fraction * (inputs.confidence / risk)
            * self.uncertainty_penalty(inputs.drift_uncertainty);
        let regime_cap = self.regime_cap(&inputs.regime);
        let dir = direction(inputs.mispricing);

        SizingQuote {
            direction: dir,
            kelly,
            regime_cap,
            position: dir * kelly.min(regime_cap),
        }
    }

    fn kelly_criterion(&self, inputs: &SizingInputs) -> SizingQuote {
        let c = &self.config;
        let regime_cap = self.regime_cap(&inputs.regime);
        let dir = direction(inputs.mispricing);

        let vol = inputs.volatility;
        if !vol.is_finite() || vol <= 0.0 {
            return SizingQuote {
                direction: dir,
                kelly: 0.0,
                regime_cap,
                position: 0.0,
            };
        }

        let kelly = c.fraction * inputs.mispricing.abs() / (vol * vol)
            / (1.0 + c.jump_risk_multiplier * inputs.jump_intensity.max(0.0))
            * self.uncertainty_penalty(inputs.drift_uncertainty);

        let capped = kelly.min(c.max_position).min(regime_cap);
        let position = if capped < c.min_position {
            0.0
        } else {
            dir * capped
        };

        SizingQuote {
            direction: dir,
            kelly,
            regime_cap,
            position,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(mispricing: f64) -> SizingInputs {
        SizingInputs {
            mispricing,
            confidence: confidence(mispricing, 0.05, 5.0),
            volatility: 0.02,
            jump_intensity: 0.02,
            drift_uncertainty: 1e-5,
            regime: RegimeProbabilities::sideways(),
        }
    }

    #[test]
    fn confidence_is_monotonic_and_saturates() {
        let mut prev = 0.0;
        for i in 0..=100 {
            let m = i as f64 * 0.001;
            let c = confidence(-m, 0.05, 5.0);
            assert!(c >= prev);
            assert!(c > 0.0 && c < 1.0);
            prev = c;
        }
        assert_eq!(confidence(0.05, 0.05, 5.0), confidence(0.5, 0.05, 5.0));
        assert!((confidence(0.025, 0.05, 5.0) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn direction_follows_cheap_market() {
        assert_eq!(direction(-0.1), 1.0);
        assert_eq!(direction(0.1), -1.0);
        assert_eq!(direction(0.0), 0.0);
    }

    #[test]
    fn confidence_scaled_respects_regime_cap() {
        let sizer = PositionSizer::new(SizingConfig::default());

        let long = sizer.size(&inputs(-0.08));
        assert!((long.position - 0.05).abs() < 1e-12);

        let short = sizer.size(&SizingInputs {
            regime: RegimeProbabilities::crisis_leaning(0.7),
            ..inputs(0.08)
        });
        assert!((short.regime_cap - (0.3 * 0.05 + 0.7 * 0.02)).abs() < 1e-12);
        assert!((short.position + short.regime_cap).abs() < 1e-12);
    }

    #[test]
    fn kelly_criterion_filters_small_sizes() {
        let sizer = PositionSizer::new(SizingConfig {
            strategy: SizingStrategy::KellyCriterion,
            ..SizingConfig::default()
        });

        // 0.25 · 0.001 / 0.0004 ≈ 0.62 before penalties → capped at 0.05
        let capped = sizer.size(&inputs(-0.001));
        assert!((capped.position - 0.05).abs() < 1e-12);

        // tiny edge on a volatile underlying falls under min_position
        let small = sizer.size(&SizingInputs {
            volatility: 1.0,
            ..inputs(0.02)
        });
        assert_eq!(small.position, 0.0);

        let flat = sizer.size(&SizingInputs {
            volatility: 0.0,
            ..inputs(0.08)
        });
        assert_eq!(flat.position, 0.0);
    }

    #[test]
    fn position_never_exceeds_max() {
        let config = SizingConfig {
            bull_max_position: 5.0,
            sideways_max_position: 5.0,
            crisis_max_position: 5.0,
            ..SizingConfig::default()
        };
        for strategy in [SizingStrategy::ConfidenceScaled, SizingStrategy::KellyCriterion] {
            let sizer = PositionSizer::new(SizingConfig {
                strategy,
                ..config.clone()
            });
            for m in [-1.0, -0.2, -0.01, 0.0, 0.03, 0.4, 2.0] {
                for vol in [1e-9, 0.001, 0.02, 0.3] {
                    let q = sizer.size(&SizingInputs {
                        volatility: vol,
                        ..inputs(m)
                    });
                    assert!(q.position.abs() <= sizer.config().max_position + 1e-15);
                }
            }
        }
    }
}
