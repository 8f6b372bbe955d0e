//! Application-layer configuration sections

use chrono::NaiveDate;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct DataConfig {
    /// Instruments to analyze, each with its own price file
    #[serde(default = "default_instruments")]
    pub instruments: Vec<InstrumentConfig>,
    /// Timeout for loading one instrument's prices
    pub load_timeout_secs: u64,
    /// Relative noise of the simulated market option price
    pub market_noise_sd: f64,
    pub synthetic: SyntheticConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstrumentConfig {
    pub name: String,
    /// CSV with a date column and a `Close` column; synthesized if missing
    pub path: String,
}

/// Geometric random walk used when an instrument has no price file
#[derive(Debug, Clone, Deserialize)]
pub struct SyntheticConfig {
    pub days: usize,
    pub start: NaiveDate,
    pub initial_price: f64,
    /// Daily log drift
    pub mu: f64,
    /// Daily log volatility
    pub sigma: f64,
    /// Fixed seed for reproducible runs
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
    /// JSON lines instead of human-readable output
    pub json: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReportConfig {
    /// CSV appended with one row per decision
    pub decision_log: String,
    /// Directory for full JSON reports
    pub json_dir: String,
    pub write_json: bool,
}

fn default_instruments() -> Vec<InstrumentConfig> {
    vec![InstrumentConfig {
        name: "sample".to_string(),
        path: "./data/raw/sample_data.csv".to_string(),
    }]
}
