//! Regime Pricer Library
//!
//! Regime-aware jump-diffusion pricing and risk-penalized position sizing
//! for a single underlying/option pair

pub mod config;
pub mod data;
pub mod decision;
pub mod drift;
pub mod error;
pub mod jumps;
pub mod mispricing;
pub mod persistence;
pub mod pipeline;
pub mod pricing;
pub mod regime;
pub mod sizing;
pub mod stats;
pub mod types;
pub mod volatility;

pub use decision::{Decision, RefusalReason, Verdict};
pub use error::{EngineError, Result};
pub use pipeline::{Analysis, Pipeline, PipelineParams, Report};
pub use types::{log_returns, Regime, RegimeProbabilities, TimeSeries};
