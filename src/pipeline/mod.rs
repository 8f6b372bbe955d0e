//! Pipeline - Prices in, verdict out
//!
//! `analyze` runs the market-side stages once per price history:
//!
//! ```text
//! prices → log returns → jumps → base vol (slow EWMA, diffusion only)
//!        → regimes → effective vol (regime blend) → drift → Merton price
//! ```
//!
//! `decide` then compares an observed option price with the model price and
//! sizes the trade. Every pipeline owns its own stage instances, so separate
//! instruments never share filter state.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

use crate::decision::{
    Decision, DecisionConfig, DecisionEngine, DecisionInputs, RefusalReason, Verdict,
};
use crate::drift::{drift_stats, DriftConfig, DriftEngine, DriftEstimate, DriftStats};
use crate::error::{EngineError, Result};
use crate::jumps::{JumpClassification, JumpConfig, JumpDetector, JumpParameters};
use crate::mispricing::{MispricingConfig, MispricingEngine};
use crate::pricing::{effective_jump_intensity, OptionInputs, PricingConfig, PricingEngine};
use crate::regime::{RegimeConfig, RegimeEngine};
use crate::sizing::{self, PositionSizer, SizingConfig, SizingInputs, SizingStrategy};
use crate::types::{log_returns, RegimeProbabilities, TimeSeries};
use crate::volatility::{
    volatility_stats, GarchFitter, VolatilityConfig, VolatilityEngine, VolatilityStats,
};

/// Fewest prices that yield a return
pub const MIN_PRICES: usize = 2;

/// Fully resolved parameters for every stage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineParams {
    pub jump: JumpConfig,
    pub volatility: VolatilityConfig,
    pub drift: DriftConfig,
    pub regime: RegimeConfig,
    pub pricing: PricingConfig,
    pub mispricing: MispricingConfig,
    pub sizing: SizingConfig,
    pub decision: DecisionConfig,
}

/// Market-side result of one analysis
#[derive(Debug, Clone)]
pub struct Analysis {
    pub as_of: NaiveDate,
    pub spot: f64,
    pub returns: TimeSeries<f64>,
    pub jumps: JumpClassification,
    pub jump_parameters: JumpParameters,
    /// Slow EWMA on diffusion returns, the regime classifier's input
    pub base_volatility: TimeSeries<f64>,
    pub regime_probabilities: TimeSeries<RegimeProbabilities>,
    pub effective_volatility: TimeSeries<f64>,
    pub drift: DriftEstimate,
    pub option: OptionInputs,
    pub model_price: f64,
}

impl Analysis {
    pub fn current_regime(&self) -> RegimeProbabilities {
        self.regime_probabilities.last().copied().unwrap_or_default()
    }

    /// Latest per-observation effective volatility
    pub fn current_volatility(&self) -> f64 {
        self.effective_volatility.last().copied().unwrap_or(f64::NAN)
    }

    pub fn current_uncertainty(&self) -> f64 {
        self.drift.uncertainty.last().copied().unwrap_or(f64::NAN)
    }
}

/// Everything a caller needs to print or persist one decision
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub as_of: NaiveDate,
    pub spot: f64,
    pub regime: RegimeProbabilities,
    pub model_price: f64,
    pub market_price: f64,
    pub mispricing: f64,
    pub confidence: f64,
    pub position: f64,
    pub verdict: Verdict,
    pub refusals: Vec<RefusalReason>,
    pub strategy: SizingStrategy,
    pub jump_count: usize,
    pub jump_parameters: JumpParameters,
    pub volatility: VolatilityStats,
    pub drift: DriftStats,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "REGIME PROBABILITIES")?;
        writeln!(f, "Bull     : {:.2}", self.regime.bull)?;
        writeln!(f, "Sideways : {:.2}", self.regime.sideways)?;
        writeln!(f, "Crisis   : {:.2}", self.regime.crisis)?;
        writeln!(f)?;
        writeln!(f, "PRICING")?;
        writeln!(f, "Model Price  : {:.4}", self.model_price)?;
        writeln!(f, "Market Price : {:.4}", self.market_price)?;
        writeln!(f)?;
        writeln!(f, "MISPRICING & CONFIDENCE")?;
        writeln!(f, "Mispricing        : {:.4}", self.mispricing)?;
        writeln!(f, "Confidence        : {:.2}", self.confidence)?;
        writeln!(f)?;
        writeln!(f, "FINAL VERDICT")?;
        writeln!(f, "Action        : {}", self.verdict)?;
        write!(f, "Position Size : {:.2}%", self.position * 100.0)?;
        if !self.refusals.is_empty() {
            let reasons: Vec<String> = self.refusals.iter().map(|r| r.to_string()).collect();
            write!(f, "\nRefused       : {}", reasons.join(", "))?;
        }
        Ok(())
    }
}

pub struct Pipeline {
    params: PipelineParams,
    jumps: JumpDetector,
    volatility: VolatilityEngine,
    drift: DriftEngine,
    regime: RegimeEngine,
    pricing: PricingEngine,
    mispricing: MispricingEngine,
    sizer: PositionSizer,
    decision: DecisionEngine,
}

impl Pipeline {
    pub fn new(params: PipelineParams) -> Self {
        let volatility = VolatilityEngine::new(params.volatility.clone());
        Self::build(params, volatility)
    }

    /// Use a specific GARCH fitter for the sideways volatility model
    pub fn with_fitter(params: PipelineParams, fitter: Box<dyn GarchFitter>) -> Self {
        let volatility = VolatilityEngine::with_fitter(params.volatility.clone(), fitter);
        Self::build(params, volatility)
    }

    fn build(params: PipelineParams, volatility: VolatilityEngine) -> Self {
        Self {
            jumps: JumpDetector::new(params.jump.clone()),
            volatility,
            drift: DriftEngine::new(params.drift.clone()),
            regime: RegimeEngine::new(params.regime.clone()),
            pricing: PricingEngine::new(params.pricing.clone()),
            mispricing: MispricingEngine::new(params.mispricing.clone()),
            sizer: PositionSizer::new(params.sizing.clone()),
            decision: DecisionEngine::new(params.decision.clone(), params.sizing.min_position),
            params,
        }
    }

    pub fn params(&self) -> &PipelineParams {
        &self.params
    }

    pub fn analyze(&self, prices: &TimeSeries<f64>) -> Result<Analysis> {
        if prices.len() < MIN_PRICES {
            return Err(EngineError::InsufficientData {
                required: MIN_PRICES,
                available: prices.len(),
            });
        }

        let returns = log_returns(prices)?;
        let jumps = self.jumps.detect(&returns)?;
        let jump_parameters = self.jumps.estimate_jump_parameters(&jumps.jump_returns);

        let diffusion = &jumps.diffusion_returns;
        let base_volatility = self
            .volatility
            .ewma_volatility(diffusion, self.params.volatility.bull_ewma_lambda);
        let regime_probabilities = self.regime.detect(&base_volatility, &jumps.is_jump)?;
        let effective_volatility = self
            .volatility
            .effective_volatility(diffusion, &regime_probabilities)?;
        let drift = self
            .drift
            .estimate(diffusion, &effective_volatility, Some(&regime_probabilities))?;

        let (as_of, spot) = match (prices.last_timestamp(), prices.last()) {
            (Some(ts), Some(&p)) => (ts, p),
            _ => {
                return Err(EngineError::InsufficientData {
                    required: MIN_PRICES,
                    available: 0,
                })
            }
        };

        let regime_now = regime_probabilities.last().copied().unwrap_or_default();
        let sigma = effective_volatility
            .last()
            .copied()
            .unwrap_or_else(|| self.volatility.min_volatility());
        let option = self
            .pricing
            .option_inputs(spot, sigma, &jump_parameters, regime_now.crisis);
        let model_price = self.pricing.price(&option)?;

        info!(
            "Analysis complete | as_of={}, spot={:.2}, σ={:.4}, {}, model={:.4}",
            as_of, spot, sigma, regime_now, model_price
        );

        Ok(Analysis {
            as_of,
            spot,
            returns,
            jumps,
            jump_parameters,
            base_volatility,
            regime_probabilities,
            effective_volatility,
            drift,
            option,
            model_price,
        })
    }

    /// Compare `market_price` with the model price and produce a verdict
    pub fn decide(&self, analysis: &Analysis, market_price: f64) -> Result<Report> {
        let mispricing = self.mispricing.latest(market_price, analysis.model_price)?;
        let confidence = sizing::confidence(
            mispricing,
            self.params.mispricing.buy_threshold,
            self.params.sizing.confidence_steepness,
        );

        let regime = analysis.current_regime();
        let quote = self.sizer.size(&SizingInputs {
            mispricing,
            confidence,
            volatility: analysis.current_volatility(),
            jump_intensity: effective_jump_intensity(
                analysis.jump_parameters.lambda,
                regime.crisis,
                self.params.pricing.crisis_jump_scale,
            ),
            drift_uncertainty: analysis.current_uncertainty(),
            regime,
        });

        let Decision {
            verdict,
            position,
            confidence,
            refusals,
        } = self.decision.decide(&DecisionInputs {
            mispricing,
            confidence,
            position: quote.position,
            crisis_probability: regime.crisis,
        });

        Ok(Report {
            as_of: analysis.as_of,
            spot: analysis.spot,
            regime,
            model_price: analysis.model_price,
            market_price,
            mispricing,
            confidence,
            position,
            verdict,
            refusals,
            strategy: self.params.sizing.strategy,
            jump_count: analysis.jumps.jump_count(),
            jump_parameters: analysis.jump_parameters,
            volatility: volatility_stats(&analysis.effective_volatility),
            drift: drift_stats(&analysis.drift),
        })
    }

    /// `analyze` followed by `decide`
    pub fn evaluate(&self, prices: &TimeSeries<f64>, market_price: f64) -> Result<Report> {
        let analysis = self.analyze(prices)?;
        self.decide(&analysis, market_price)
    }
}
