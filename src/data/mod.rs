//! Price data: CSV files, synthetic series and the async loader
//!
//! Files hold a date column first (`YYYY-MM-DD`) and a `Close` column
//! found by header name. Instruments without a file get a seeded geometric
//! random walk that is written back so later runs see the same prices.

use anyhow::{anyhow, bail, Context, Result};
use chrono::{Duration as ChronoDuration, NaiveDate, NaiveDateTime};
use csv::{ReaderBuilder, WriterBuilder};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::{DataConfig, InstrumentConfig, SyntheticConfig};
use crate::types::TimeSeries;

fn parse_date(raw: &str) -> Result<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|dt| dt.date()))
        .with_context(|| format!("Invalid date {:?}", raw))
}

/// Load a daily close series from CSV
pub fn load_prices_csv(path: impl AsRef<Path>) -> Result<TimeSeries<f64>> {
    let path = path.as_ref();
    let file = fs::File::open(path)
        .with_context(|| format!("Failed to open price file {}", path.display()))?;
    let mut reader = ReaderBuilder::new().has_headers(true).from_reader(file);

    let headers = reader.headers().context("Failed to read CSV header")?.clone();
    let close_col = headers
        .iter()
        .position(|h| h.trim().eq_ignore_ascii_case("close"))
        .ok_or_else(|| anyhow!("No Close column in {}", path.display()))?;

    let mut index = Vec::new();
    let mut values = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("Bad CSV row {}", line + 2))?;
        let date = parse_date(record.get(0).unwrap_or_default())
            .with_context(|| format!("Row {} of {}", line + 2, path.display()))?;
        let close: f64 = record
            .get(close_col)
            .unwrap_or_default()
            .trim()
            .parse()
            .with_context(|| format!("Invalid close on row {} of {}", line + 2, path.display()))?;
        index.push(date);
        values.push(close);
    }

    if values.is_empty() {
        bail!("Price file {} has no rows", path.display());
    }

    let series = TimeSeries::new(index, values)
        .with_context(|| format!("Price file {} is not a valid series", path.display()))?;
    info!("Loaded {} prices from {}", series.len(), path.display());
    Ok(series)
}

/// Write a close series as `Date,Close`, creating parent directories
pub fn write_prices_csv(path: impl AsRef<Path>, prices: &TimeSeries<f64>) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    writer.write_record(["Date", "Close"])?;
    for (date, close) in prices.iter() {
        writer.write_record([date.format("%Y-%m-%d").to_string(), close.to_string()])?;
    }
    writer.flush().context("Failed to flush price file")?;
    Ok(())
}

/// `n` daily closes `s0 · exp(Σ r_i)` with `r_i ~ N(mu, sigma)`
pub fn generate_synthetic_prices(
    n: usize,
    start: NaiveDate,
    s0: f64,
    mu: f64,
    sigma: f64,
    seed: Option<u64>,
) -> Result<TimeSeries<f64>> {
    if !(s0 > 0.0 && s0.is_finite()) {
        bail!("Initial price must be positive, got {}", s0);
    }
    let step = Normal::new(mu, sigma)
        .map_err(|e| anyhow!("Invalid synthetic return distribution: {}", e))?;
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let mut log_price = s0.ln();
    let mut index = Vec::with_capacity(n);
    let mut values = Vec::with_capacity(n);
    for i in 0..n {
        log_price += step.sample(&mut rng);
        index.push(start + ChronoDuration::days(i as i64));
        values.push(log_price.exp());
    }

    Ok(TimeSeries::new(index, values)?)
}

/// Stand-in market quote: `model · (1 + N(0, noise_sd))`
pub fn synthetic_market_price<R: Rng + ?Sized>(model_price: f64, noise_sd: f64, rng: &mut R) -> f64 {
    match Normal::new(0.0, noise_sd) {
        Ok(noise) if noise_sd > 0.0 => model_price * (1.0 + noise.sample(rng)),
        _ => model_price,
    }
}

fn generate_from_config(config: &SyntheticConfig) -> Result<TimeSeries<f64>> {
    generate_synthetic_prices(
        config.days,
        config.start,
        config.initial_price,
        config.mu,
        config.sigma,
        config.seed,
    )
}

/// Read the instrument's file, synthesizing and persisting it when absent
pub fn load_or_generate(
    instrument: &InstrumentConfig,
    synthetic: &SyntheticConfig,
) -> Result<TimeSeries<f64>> {
    let path = Path::new(&instrument.path);
    if path.exists() {
        return load_prices_csv(path);
    }

    warn!(
        "No price file for {} at {}; generating {} synthetic days",
        instrument.name,
        path.display(),
        synthetic.days
    );
    let prices = generate_from_config(synthetic)?;
    write_prices_csv(path, &prices)?;
    Ok(prices)
}

/// Load on the blocking pool with the configured timeout
pub async fn load_instrument(
    instrument: &InstrumentConfig,
    data: &DataConfig,
) -> Result<TimeSeries<f64>> {
    let timeout = Duration::from_secs(data.load_timeout_secs);
    let task_instrument = instrument.clone();
    let synthetic = data.synthetic.clone();

    let handle =
        tokio::task::spawn_blocking(move || load_or_generate(&task_instrument, &synthetic));

    tokio::time::timeout(timeout, handle)
        .await
        .map_err(|_| {
            anyhow!(
                "Timed out loading {} after {}s",
                instrument.name,
                data.load_timeout_secs
            )
        })?
        .context("Price loader task failed")?
}
