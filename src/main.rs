//! Regime-aware pricing - final decision run
//!
//! Loads every configured instrument, runs an independent pipeline for each
//! on the blocking pool and prints the verdict.

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use regime_pricer::config::{AppConfig, InstrumentConfig, LoggingConfig};
use regime_pricer::data;
use regime_pricer::persistence::{write_report_json, DecisionLog};
use regime_pricer::pipeline::{Pipeline, Report};

fn init_logging(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    if config.json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn run_instrument(
    instrument: InstrumentConfig,
    config: AppConfig,
    log: DecisionLog,
) -> Result<()> {
    let prices = data::load_instrument(&instrument, &config.data).await?;
    info!("{}: {} prices loaded", instrument.name, prices.len());

    let params = config.pipeline_params();
    let noise_sd = config.data.market_noise_sd;
    let report = tokio::task::spawn_blocking(move || -> Result<Report> {
        let pipeline = Pipeline::new(params);
        let analysis = pipeline.analyze(&prices)?;
        // Mock market quote until a live option feed exists
        let market_price =
            data::synthetic_market_price(analysis.model_price, noise_sd, &mut rand::thread_rng());
        Ok(pipeline.decide(&analysis, market_price)?)
    })
    .await
    .context("Pipeline task failed")??;

    println!(
        "\n[{}] as of {}\n\n{}\n",
        instrument.name, report.as_of, report
    );

    log.record(&instrument.name, &report).await?;
    if config.report.write_json {
        write_report_json(&config.report.json_dir, &instrument.name, &report)?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    init_logging(&config.logging);

    println!("\n{}", "=".repeat(70));
    println!("REGIME-AWARE PRICING - FINAL DECISION SYSTEM");
    println!("{}\n", "=".repeat(70));

    info!("Configuration: {}", config);

    let log = DecisionLog::open(&config.report.decision_log)?;

    let mut handles = Vec::new();
    for instrument in config.data.instruments.clone() {
        let name = instrument.name.clone();
        let task = tokio::spawn(run_instrument(instrument, config.clone(), log.clone()));
        handles.push((name, task));
    }

    let mut failures = 0usize;
    for (name, handle) in handles {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                failures += 1;
                error!("{}: {:#}", name, e);
            }
            Err(e) => {
                failures += 1;
                error!("{}: worker panicked: {}", name, e);
            }
        }
    }

    println!("{}", "=".repeat(70));
    println!("SYSTEM EXECUTION COMPLETE");
    println!("{}\n", "=".repeat(70));

    if failures > 0 {
        anyhow::bail!("{} instrument(s) failed; see log", failures);
    }
    Ok(())
}
