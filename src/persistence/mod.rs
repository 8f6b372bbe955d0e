//! CSV Persistence Module
//!
//! Appends one row per decision to a CSV log and writes full reports as JSON

use anyhow::{Context, Result};
use chrono::Utc;
use csv::WriterBuilder;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock as AsyncRwLock;
use tracing::info;

use crate::pipeline::Report;

/// Decision record for CSV storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    /// Wall-clock time the decision was logged (ms)
    pub timestamp: i64,
    pub instrument: String,
    pub as_of: String,
    pub spot: f64,
    pub bull: f64,
    pub sideways: f64,
    pub crisis: f64,
    pub model_price: f64,
    pub market_price: f64,
    pub mispricing: f64,
    pub confidence: f64,
    pub position: f64,
    pub verdict: String,
    pub strategy: String,
    /// Failed gates separated by `;`
    pub refusals: String,
}

impl DecisionRecord {
    pub fn from_report(instrument: &str, report: &Report) -> Self {
        Self {
            timestamp: Utc::now().timestamp_millis(),
            instrument: instrument.to_string(),
            as_of: report.as_of.format("%Y-%m-%d").to_string(),
            spot: report.spot,
            bull: report.regime.bull,
            sideways: report.regime.sideways,
            crisis: report.regime.crisis,
            model_price: report.model_price,
            market_price: report.market_price,
            mispricing: report.mispricing,
            confidence: report.confidence,
            position: report.position,
            verdict: report.verdict.to_string(),
            strategy: format!("{:?}", report.strategy),
            refusals: report
                .refusals
                .iter()
                .map(|r| r.to_string())
                .collect::<Vec<_>>()
                .join(";"),
        }
    }
}

/// Append-only decision log shared by all instrument workers
#[derive(Clone)]
pub struct DecisionLog {
    path: PathBuf,
    writer: Arc<AsyncRwLock<csv::Writer<fs::File>>>,
}

impl DecisionLog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create decision log directory")?;
        }

        let file_has_data =
            path.exists() && fs::metadata(&path).map(|m| m.len() > 0).unwrap_or(false);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .context("Failed to open decision log")?;

        let writer = WriterBuilder::new()
            .has_headers(!file_has_data)
            .from_writer(file);

        Ok(Self {
            path,
            writer: Arc::new(AsyncRwLock::new(writer)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Save a decision
    pub async fn record(&self, instrument: &str, report: &Report) -> Result<()> {
        let record = DecisionRecord::from_report(instrument, report);
        let mut writer = self.writer.write().await;
        writer
            .serialize(&record)
            .context("Failed to write decision record")?;
        writer.flush().context("Failed to flush decision log")?;
        Ok(())
    }
}

/// Write `report` to `<dir>/<instrument>_<as_of>.json`
pub fn write_report_json(dir: impl AsRef<Path>, instrument: &str, report: &Report) -> Result<PathBuf> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir).context("Failed to create report directory")?;

    let path = dir.join(format!(
        "{}_{}.json",
        instrument,
        report.as_of.format("%Y-%m-%d")
    ));
    let json = serde_json::to_string_pretty(report).context("Failed to serialize report")?;
    fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;

    info!("Report written to {}", path.display());
    Ok(path)
}
