//! Pricing Engine - Black-Scholes and Merton jump-diffusion calls
//!
//! Merton prices a European call as a Poisson mixture of Black-Scholes
//! prices, one per jump count `k`:
//!
//! ```text
//! C = Σ_k  e^{-λ'T} (λ'T)^k / k!  ·  BS(S, K, T, r_k, σ_k)
//! λ'   = λ(1 + κ),                   κ = e^{μ_j + σ_j²/2} − 1
//! σ_k² = σ² + k·σ_j² / T
//! r_k  = r − λκ + k·ln(1 + κ) / T
//! ```
//!
//! The `−λκ` compensator keeps the discounted underlying a martingale, and
//! the weights at `λ'` make the strike legs sum to `K·e^{-rT}`.

use serde::{Deserialize, Serialize};
use statrs::function::erf::erfc;
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::jumps::JumpParameters;

/// Pricing parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Annual continuously compounded rate
    pub risk_free_rate: f64,
    /// Option horizon in trading days
    pub days_to_expiry: u32,
    /// Trading days per year
    pub periods_per_year: u32,
    /// Strike as a multiple of spot
    pub moneyness: f64,
    /// Poisson terms kept in the Merton series
    pub n_terms: usize,
    /// Jump intensity scale under crisis probability
    pub crisis_jump_scale: f64,
    /// Convert daily volatility and intensity to annual units before
    /// pricing with `T` in years. `false` prices with the raw per-day
    /// estimates against the same `T`.
    pub annualize: bool,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            risk_free_rate: 0.05,
            days_to_expiry: 30,
            periods_per_year: 252,
            moneyness: 1.0,
            n_terms: 20,
            crisis_jump_scale: 2.0,
            annualize: true,
        }
    }
}

/// Fully resolved inputs for a single call price, in annual units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptionInputs {
    pub spot: f64,
    pub strike: f64,
    /// Years
    pub time_to_expiry: f64,
    pub risk_free_rate: f64,
    pub volatility: f64,
    /// Jump sizes are per jump; `lambda` is jumps per year
    pub jumps: JumpParameters,
}

#[inline]
fn standard_normal_cdf(x: f64) -> f64 {
    0.5 * erfc(-x / std::f64::consts::SQRT_2)
}

/// Black-Scholes European call. Non-positive time or volatility
/// returns intrinsic value.
#[inline]
pub fn black_scholes_call(
    spot: f64,
    strike: f64,
    time_to_expiry: f64,
    rate: f64,
    volatility: f64,
) -> f64 {
    if time_to_expiry <= 0.0 || volatility <= 0.0 {
        return (spot - strike).max(0.0);
    }

    let sqrt_t = time_to_expiry.sqrt();
    let d1 = ((spot / strike).ln() + (rate + 0.5 * volatility * volatility) * time_to_expiry)
        / (volatility * sqrt_t);
    let d2 = d1 - volatility * sqrt_t;

    spot * standard_normal_cdf(d1) - strike * (-rate * time_to_expiry).exp() * standard_normal_cdf(d2)
}

/// Merton jump-diffusion call, series truncated at `n_terms`
pub fn merton_call(
    spot: f64,
    strike: f64,
    time_to_expiry: f64,
    rate: f64,
    volatility: f64,
    jumps: &JumpParameters,
    n_terms: usize,
) -> f64 {
    if time_to_expiry <= 0.0 {
        return (spot - strike).max(0.0);
    }

    let log_jump = jumps.mu_j + 0.5 * jumps.sigma_j * jumps.sigma_j;
    let kappa = log_jump.exp() - 1.0;
    let lambda_t = jumps.lambda * (1.0 + kappa) * time_to_expiry;

    let mut weight = (-lambda_t).exp();
    let mut price = 0.0;
    for k in 0..n_terms.max(1) {
        if k > 0 {
            weight *= lambda_t / k as f64;
        }
        if weight == 0.0 {
            break;
        }
        let kf = k as f64;
        let sigma_k = (volatility * volatility + kf * jumps.sigma_j * jumps.sigma_j / time_to_expiry).sqrt();
        let r_k = rate - jumps.lambda * kappa + kf * log_jump / time_to_expiry;
        price += weight * black_scholes_call(spot, strike, time_to_expiry, r_k, sigma_k);
    }

    price
}

/// Jump intensity used for pricing: `λ · (1 + scale · P(crisis))`
pub fn effective_jump_intensity(lambda: f64, crisis_probability: f64, crisis_jump_scale: f64) -> f64 {
    lambda * (1.0 + crisis_jump_scale * crisis_probability)
}

pub struct PricingEngine {
    config: PricingConfig,
}

impl PricingEngine {
    pub fn new(config: PricingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PricingConfig {
        &self.config
    }

    /// Horizon in years
    pub fn time_to_expiry(&self) -> f64 {
        if self.config.periods_per_year == 0 {
            return 0.0;
        }
        self.config.days_to_expiry as f64 / self.config.periods_per_year as f64
    }

    /// Build pricing inputs from per-observation estimates.
    ///
    /// The jump intensity is scaled up by the crisis probability, then
    /// daily volatility and intensity are annualized when configured.
    pub fn option_inputs(
        &self,
        spot: f64,
        volatility: f64,
        jumps: &JumpParameters,
        crisis_probability: f64,
    ) -> OptionInputs {
        let lambda =
            effective_jump_intensity(jumps.lambda, crisis_probability, self.config.crisis_jump_scale);
        let periods = self.config.periods_per_year as f64;
        let (volatility, lambda) = if self.config.annualize {
            (volatility * periods.sqrt(), lambda * periods)
        } else {
            (volatility, lambda)
        };

        OptionInputs {
            spot,
            strike: spot * self.config.moneyness,
            time_to_expiry: self.time_to_expiry(),
            risk_free_rate: self.config.risk_free_rate,
            volatility,
            jumps: JumpParameters {
                lambda,
                ..*jumps
            },
        }
    }

    /// Merton call price; rejects inputs that would divide by zero or
    /// propagate NaN
    pub fn price(&self, inputs: &OptionInputs) -> Result<f64> {
        if !inputs.spot.is_finite() || inputs.spot <= 0.0 {
            return Err(EngineError::DegenerateInput(format!(
                "spot must be positive, got {}",
                inputs.spot
            )));
        }
        if !inputs.strike.is_finite() || inputs.strike <= 0.0 {
            return Err(EngineError::DegenerateInput(format!(
                "strike must be positive, got {}",
                inputs.strike
            )));
        }
        let fields = [
            ("time_to_expiry", inputs.time_to_expiry),
            ("risk_free_rate", inputs.risk_free_rate),
            ("volatility", inputs.volatility),
            ("mu_j", inputs.jumps.mu_j),
            ("sigma_j", inputs.jumps.sigma_j),
            ("lambda", inputs.jumps.lambda),
        ];
        if let Some((name, value)) = fields.iter().find(|(_, v)| !v.is_finite()) {
            return Err(EngineError::DegenerateInput(format!(
                "{} is not finite ({})",
                name, value
            )));
        }
        if inputs.jumps.lambda < 0.0 {
            return Err(EngineError::InvalidParameter(format!(
                "jump intensity must be non-negative, got {}",
                inputs.jumps.lambda
            )));
        }

        let price = merton_call(
            inputs.spot,
            inputs.strike,
            inputs.time_to_expiry,
            inputs.risk_free_rate,
            inputs.volatility,
            &inputs.jumps,
            self.config.n_terms,
        );

        debug!(
            "Merton price={:.4} (S={:.2}, K={:.2}, T={:.4}, σ={:.4}, λ={:.4})",
            price,
            inputs.spot,
            inputs.strike,
            inputs.time_to_expiry,
            inputs.volatility,
            inputs.jumps.lambda
        );

        Ok(price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jumps(lambda: f64) -> JumpParameters {
        JumpParameters {
            mu_j: -0.05,
            sigma_j: 0.1,
            lambda,
        }
    }

    #[test]
    fn black_scholes_reference_value() {
        // S=100, K=100, T=1, r=5%, σ=20%
        let price = black_scholes_call(100.0, 100.0, 1.0, 0.05, 0.2);
        assert!((price - 10.4506).abs() < 1e-3);
    }

    #[test]
    fn degenerate_inputs_return_intrinsic() {
        assert_eq!(black_scholes_call(110.0, 100.0, 0.0, 0.05, 0.2), 10.0);
        assert_eq!(black_scholes_call(90.0, 100.0, 0.5, 0.05, 0.0), 0.0);
        assert_eq!(merton_call(110.0, 100.0, -1.0, 0.05, 0.2, &jumps(1.0), 20), 10.0);
    }

    #[test]
    fn merton_converges_to_black_scholes() {
        let bs = black_scholes_call(100.0, 100.0, 0.25, 0.05, 0.3);
        let at_zero = merton_call(100.0, 100.0, 0.25, 0.05, 0.3, &jumps(0.0), 20);
        let near_zero = merton_call(100.0, 100.0, 0.25, 0.05, 0.3, &jumps(1e-9), 20);

        assert!((at_zero - bs).abs() < 1e-12);
        assert!((near_zero - bs).abs() < 1e-6);
    }

    #[test]
    fn jumps_add_value_to_at_the_money_calls() {
        let bs = black_scholes_call(100.0, 100.0, 0.25, 0.05, 0.2);
        let merton = merton_call(100.0, 100.0, 0.25, 0.05, 0.2, &jumps(2.0), 20);
        assert!(merton > bs);
    }

    #[test]
    fn merton_respects_arbitrage_lower_bound() {
        let up_jumps = JumpParameters {
            mu_j: 0.3,
            sigma_j: 0.0,
            lambda: 2.0,
        };
        let call = merton_call(100.0, 50.0, 1.0, 0.05, 0.2, &up_jumps, 40);
        let bound = 100.0 - 50.0 * (-0.05f64).exp();

        assert!(call >= bound);
        assert!((call - 52.8861).abs() < 1e-3);
    }

    #[test]
    fn deep_in_the_money_call_matches_forward_parity() {
        // every jump-count term is deep in the money, so C = S - K·e^{-rT}
        let up_jumps = JumpParameters {
            mu_j: 0.05,
            sigma_j: 0.0,
            lambda: 2.0,
        };
        let call = merton_call(100.0, 20.0, 1.0, 0.05, 0.2, &up_jumps, 40);
        let forward = 100.0 - 20.0 * (-0.05f64).exp();

        assert!((call - forward).abs() < 1e-6);
    }

    #[test]
    fn effective_intensity_scales_with_crisis() {
        assert_eq!(effective_jump_intensity(0.02, 0.0, 2.0), 0.02);
        assert!((effective_jump_intensity(0.02, 0.7, 2.0) - 0.048).abs() < 1e-12);
    }

    #[test]
    fn option_inputs_annualize_daily_estimates() {
        let engine = PricingEngine::new(PricingConfig::default());
        let inputs = engine.option_inputs(100.0, 0.02, &jumps(0.01), 0.0);

        assert!((inputs.volatility - 0.02 * 252f64.sqrt()).abs() < 1e-12);
        assert!((inputs.jumps.lambda - 2.52).abs() < 1e-12);
        assert!((inputs.time_to_expiry - 30.0 / 252.0).abs() < 1e-12);
        assert_eq!(inputs.strike, 100.0);
        assert_eq!(inputs.jumps.mu_j, -0.05);
    }

    #[test]
    fn option_inputs_keep_daily_units_when_not_annualized() {
        let engine = PricingEngine::new(PricingConfig {
            annualize: false,
            ..PricingConfig::default()
        });
        let inputs = engine.option_inputs(100.0, 0.02, &jumps(0.01), 0.0);

        assert_eq!(inputs.volatility, 0.02);
        assert_eq!(inputs.jumps.lambda, 0.01);
    }

    #[test]
    fn price_rejects_degenerate_spot() {
        let engine = PricingEngine::new(PricingConfig::default());
        let mut inputs = engine.option_inputs(100.0, 0.02, &jumps(0.01), 0.0);
        assert!(engine.price(&inputs).unwrap() > 0.0);

        inputs.spot = 0.0;
        assert!(matches!(
            engine.price(&inputs),
            Err(EngineError::DegenerateInput(_))
        ));

        inputs.spot = 100.0;
        inputs.volatility = f64::NAN;
        assert!(engine.price(&inputs).is_err());
    }
}
