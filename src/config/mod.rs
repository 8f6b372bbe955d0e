//! Configuration management for the pricer
//!
//! Defaults, then `config/default.yaml` and `config/local.yaml`, then
//! `REGIME_PRICER__*` environment variables (`.env` is loaded first).

mod types;

pub use types::*;

use anyhow::{bail, Context, Result};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use serde::Deserialize;

use crate::decision::DecisionConfig;
use crate::drift::DriftConfig;
use crate::jumps::JumpConfig;
use crate::mispricing::MispricingConfig;
use crate::pipeline::PipelineParams;
use crate::pricing::PricingConfig;
use crate::regime::RegimeConfig;
use crate::sizing::SizingConfig;
use crate::volatility::VolatilityConfig;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub jump: JumpConfig,
    pub volatility: VolatilityConfig,
    pub drift: DriftConfig,
    pub regime: RegimeConfig,
    pub pricing: PricingConfig,
    pub mispricing: MispricingConfig,
    pub sizing: SizingConfig,
    pub decision: DecisionConfig,
    pub data: DataConfig,
    pub logging: LoggingConfig,
    pub report: ReportConfig,
}

impl AppConfig {
    /// Builder holding the documented default for every option
    fn defaults() -> Result<ConfigBuilder<DefaultState>> {
        let builder = Config::builder()
            // Jump detection
            .set_default("jump.threshold", 3.0)?
            .set_default("jump.window", 20)?
            .set_default("jump.min_observations", 30)?
            .set_default("jump.use_robust", true)?
            // Volatility
            .set_default("volatility.bull_ewma_lambda", 0.94)?
            .set_default("volatility.crisis_ewma_lambda", 0.85)?
            .set_default("volatility.fallback_ewma_lambda", 0.90)?
            .set_default("volatility.garch_p", 1)?
            .set_default("volatility.garch_q", 1)?
            .set_default("volatility.min_variance", 1e-6)?
            // Drift
            .set_default("drift.initial_drift", 0.0)?
            .set_default("drift.state_noise_factor", 1e-5)?
            .set_default("drift.min_obs_variance", 1e-6)?
            .set_default("drift.adaptive", true)?
            .set_default("drift.warmup", 20)?
            .set_default("drift.fixed_obs_variance", 1.0)?
            // Regime
            .set_default("regime.vol_window", 60)?
            .set_default("regime.jump_window", 60)?
            .set_default("regime.high_vol_pct", 0.8)?
            .set_default("regime.low_vol_pct", 0.3)?
            .set_default("regime.jump_rate_threshold", 0.05)?
            .set_default("regime.crisis_weight", 0.7)?
            .set_default("regime.bull_weight", 0.7)?
            // Pricing
            .set_default("pricing.risk_free_rate", 0.05)?
            .set_default("pricing.days_to_expiry", 30)?
            .set_default("pricing.periods_per_year", 252)?
            .set_default("pricing.moneyness", 1.0)?
            .set_default("pricing.n_terms", 20)?
            .set_default("pricing.crisis_jump_scale", 2.0)?
            .set_default("pricing.annualize", true)?
            // Mispricing
            .set_default("mispricing.ema_alpha", 0.3)?
            .set_default("mispricing.min_signal_strength", 0.01)?
            .set_default("mispricing.buy_threshold", 0.05)?
            // Sizing
            .set_default("sizing.strategy", "confidence_scaled")?
            .set_default("sizing.fraction", 0.25)?
            .set_default("sizing.max_position", 0.10)?
            .set_default("sizing.min_position", 0.01)?
            .set_default("sizing.jump_risk_multiplier", 1.5)?
            .set_default("sizing.uncertainty_scale", 100.0)?
            .set_default("sizing.bull_max_position", 0.10)?
            .set_default("sizing.sideways_max_position", 0.05)?
            .set_default("sizing.crisis_max_position", 0.02)?
            .set_default("sizing.confidence_steepness", 5.0)?
            // Decision
            .set_default("decision.min_confidence", 0.6)?
            .set_default("decision.allow_crisis_trades", false)?
            // Data
            .set_default("data.load_timeout_secs", 30)?
            .set_default("data.market_noise_sd", 0.05)?
            .set_default("data.synthetic.days", 500)?
            .set_default("data.synthetic.start", "2022-01-01")?
            .set_default("data.synthetic.initial_price", 100.0)?
            .set_default("data.synthetic.mu", 0.0005)?
            .set_default("data.synthetic.sigma", 0.02)?
            // Logging
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            // Report
            .set_default("report.decision_log", "./data/decisions.csv")?
            .set_default("report.json_dir", "./data/reports")?
            .set_default("report.write_json", true)?;

        Ok(builder)
    }

    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Self::defaults()?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (REGIME_PRICER__*)
            .add_source(Environment::with_prefix("REGIME_PRICER").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config.validate()?;
        Ok(app_config)
    }

    /// Defaults only, ignoring files and environment
    pub fn default_config() -> Result<Self> {
        let config = Self::defaults()?
            .build()
            .context("Failed to build default configuration")?;
        config
            .try_deserialize()
            .context("Failed to deserialize default configuration")
    }

    /// Parameters for the analytical pipeline
    pub fn pipeline_params(&self) -> PipelineParams {
        PipelineParams {
            jump: self.jump.clone(),
            volatility: self.volatility.clone(),
            drift: self.drift.clone(),
            regime: self.regime.clone(),
            pricing: self.pricing.clone(),
            mispricing: self.mispricing.clone(),
            sizing: self.sizing.clone(),
            decision: self.decision.clone(),
        }
    }

    /// Reject values the engines cannot work with
    pub fn validate(&self) -> Result<()> {
        let unit_open = |name: &str, v: f64| -> Result<()> {
            if !(v > 0.0 && v < 1.0) {
                bail!("{} must be in (0, 1), got {}", name, v);
            }
            Ok(())
        };
        let positive = |name: &str, v: f64| -> Result<()> {
            if !(v > 0.0 && v.is_finite()) {
                bail!("{} must be positive, got {}", name, v);
            }
            Ok(())
        };

        positive("jump.threshold", self.jump.threshold)?;
        if self.jump.window == 0 {
            bail!("jump.window must be at least 1");
        }

        unit_open("volatility.bull_ewma_lambda", self.volatility.bull_ewma_lambda)?;
        unit_open("volatility.crisis_ewma_lambda", self.volatility.crisis_ewma_lambda)?;
        unit_open("volatility.fallback_ewma_lambda", self.volatility.fallback_ewma_lambda)?;
        positive("volatility.min_variance", self.volatility.min_variance)?;
        if self.volatility.garch_p == 0 {
            bail!("volatility.garch_p must be at least 1");
        }

        positive("drift.min_obs_variance", self.drift.min_obs_variance)?;
        if self.drift.state_noise_factor < 0.0 {
            bail!("drift.state_noise_factor must be non-negative");
        }
        positive("drift.fixed_obs_variance", self.drift.fixed_obs_variance)?;

        if self.regime.vol_window == 0 || self.regime.jump_window == 0 {
            bail!("regime windows must be at least 1");
        }
        if self.regime.low_vol_pct > self.regime.high_vol_pct {
            bail!(
                "regime.low_vol_pct ({}) exceeds regime.high_vol_pct ({})",
                self.regime.low_vol_pct,
                self.regime.high_vol_pct
            );
        }
        for (name, w) in [
            ("regime.crisis_weight", self.regime.crisis_weight),
            ("regime.bull_weight", self.regime.bull_weight),
        ] {
            if !(0.0..=1.0).contains(&w) {
                bail!("{} must be in [0, 1], got {}", name, w);
            }
        }

        if self.pricing.periods_per_year == 0 {
            bail!("pricing.periods_per_year must be at least 1");
        }
        positive("pricing.moneyness", self.pricing.moneyness)?;
        if self.pricing.n_terms == 0 {
            bail!("pricing.n_terms must be at least 1");
        }

        let alpha = self.mispricing.ema_alpha;
        if !(alpha > 0.0 && alpha <= 1.0) {
            bail!("mispricing.ema_alpha must be in (0, 1], got {}", alpha);
        }
        positive("mispricing.buy_threshold", self.mispricing.buy_threshold)?;
        if self.mispricing.min_signal_strength < 0.0 {
            bail!("mispricing.min_signal_strength must be non-negative");
        }

        let s = &self.sizing;
        positive("sizing.fraction", s.fraction)?;
        positive("sizing.max_position", s.max_position)?;
        if s.min_position < 0.0 || s.min_position > s.max_position {
            bail!(
                "sizing.min_position ({}) must be in [0, max_position ({})]",
                s.min_position,
                s.max_position
            );
        }
        for (name, cap) in [
            ("sizing.bull_max_position", s.bull_max_position),
            ("sizing.sideways_max_position", s.sideways_max_position),
            ("sizing.crisis_max_position", s.crisis_max_position),
        ] {
            if cap < 0.0 {
                bail!("{} must be non-negative, got {}", name, cap);
            }
        }
        if s.jump_risk_multiplier < 0.0 || s.uncertainty_scale < 0.0 {
            bail!("sizing penalties must be non-negative");
        }

        if !(0.0..=1.0).contains(&self.decision.min_confidence) {
            bail!(
                "decision.min_confidence must be in [0, 1], got {}",
                self.decision.min_confidence
            );
        }

        if self.data.load_timeout_secs == 0 {
            bail!("data.load_timeout_secs must be at least 1");
        }

        Ok(())
    }

    /// One-line summary for logging
    pub fn digest(&self) -> String {
        format!(
            "instruments={} strategy={:?} robust={} garch=({},{}) T={}d r={:.3} min_conf={:.2} crisis_trades={}",
            self.data.instruments.len(),
            self.sizing.strategy,
            self.jump.use_robust,
            self.volatility.garch_p,
            self.volatility.garch_q,
            self.pricing.days_to_expiry,
            self.pricing.risk_free_rate,
            self.decision.min_confidence,
            self.decision.allow_crisis_trades
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sizing::SizingStrategy;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default_config().unwrap();
        config.validate().unwrap();

        assert_eq!(config.jump.window, 20);
        assert_eq!(config.sizing.strategy, SizingStrategy::ConfidenceScaled);
        assert_eq!(config.pricing.days_to_expiry, 30);
        assert_eq!(config.data.instruments.len(), 1);
        assert!(!config.logging.json);
    }

    #[test]
    fn default_sections_match_engine_defaults() {
        let params = AppConfig::default_config().unwrap().pipeline_params();

        assert_eq!(params.jump.threshold, JumpConfig::default().threshold);
        assert_eq!(
            params.volatility.fallback_ewma_lambda,
            VolatilityConfig::default().fallback_ewma_lambda
        );
        assert_eq!(params.regime.vol_window, RegimeConfig::default().vol_window);
        assert_eq!(params.sizing.crisis_max_position, SizingConfig::default().crisis_max_position);
        assert_eq!(params.drift.warmup, DriftConfig::default().warmup);
    }

    #[test]
    fn validate_rejects_inverted_position_bounds() {
        let mut config = AppConfig::default_config().unwrap();
        config.sizing.min_position = 0.5;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default_config().unwrap();
        config.volatility.bull_ewma_lambda = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn digest_names_strategy() {
        let config = AppConfig::default_config().unwrap();
        assert!(config.to_string().contains("strategy=ConfidenceScaled"));
    }
}
