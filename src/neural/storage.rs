// projeto: lstmhealthforecast
// file: src/neural/storage.rs
// Model bundle persistence, forecast reports and the SQLite forecast history

use chrono::{Local, NaiveDate};
use log::info;
use ndarray::Array2;
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::neural::features::{FeatureManifest, ScalerSet};
use crate::neural::model::{ModelWeights, TrainConfig};
use crate::neural::utils::{ForecastError, Result};

/// Everything needed to forecast again later: weights, the column manifest
/// they were trained against, the scalers that normalized the data, and the
/// training configuration the run used.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelBundle {
    pub barangay: String,
    pub weights: ModelWeights,
    pub manifest: FeatureManifest,
    pub scalers: ScalerSet,
    pub config: TrainConfig,
    pub saved_at: String,
}

impl ModelBundle {
    pub fn new(
        barangay: &str,
        weights: ModelWeights,
        manifest: FeatureManifest,
        scalers: ScalerSet,
        config: TrainConfig,
    ) -> Self {
        ModelBundle {
            barangay: barangay.to_string(),
            weights,
            manifest,
            scalers,
            config,
            saved_at: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

pub fn save_bundle(bundle: &ModelBundle, path: &str) -> Result<()> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let bytes = bincode::serde::encode_to_vec(bundle, bincode::config::standard())
        .map_err(|e| ForecastError::Serialization(format!("Cannot encode model bundle: {}", e)))?;
    fs::write(path, &bytes)?;
    info!("💾 Model bundle saved to {} ({} bytes)", path, bytes.len());
    Ok(())
}

pub fn load_bundle(path: &str) -> Result<ModelBundle> {
    if !Path::new(path).exists() {
        return Err(ForecastError::FileNotFound {
            path: path.to_string(),
        });
    }
    let bytes = fs::read(path)?;
    let (bundle, _): (ModelBundle, usize) =
        bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
            .map_err(|e| ForecastError::Serialization(format!("Cannot decode model bundle: {}", e)))?;
    info!("📂 Model bundle loaded from {}", path);
    Ok(bundle)
}

/// Forecast in real units, one row per month, one value per target column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastReport {
    pub barangay: String,
    pub generated_at: String,
    pub horizon: usize,
    pub targets: Vec<String>,
    pub months: Vec<String>,
    pub values: Vec<Vec<f64>>,
}

impl ForecastReport {
    pub fn new(barangay: &str, targets: &[String], months: &[NaiveDate], predictions: &Array2<f64>) -> Self {
        ForecastReport {
            barangay: barangay.to_string(),
            generated_at: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            horizon: months.len(),
            targets: targets.to_vec(),
            months: months.iter().map(|m| m.format("%Y-%m-%d").to_string()).collect(),
            values: predictions.rows().into_iter().map(|r| r.to_vec()).collect(),
        }
    }

    pub fn print(&self) {
        println!("📊 Forecast for '{}' ({} months):", self.barangay, self.horizon);
        for (i, (month, row)) in self.months.iter().zip(&self.values).enumerate() {
            let cells = self
                .targets
                .iter()
                .zip(row)
                .map(|(target, value)| format!("{}={:.1}", target, value))
                .collect::<Vec<_>>()
                .join("  ");
            let branch = if i + 1 == self.months.len() { "└──" } else { "├──" };
            println!("   {} {}: {}", branch, month, cells);
        }
    }

    pub fn save_json(&self, path: &str) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ForecastError::Serialization(format!("Cannot encode report: {}", e)))?;
        fs::write(path, json)?;
        info!("📄 Forecast report saved to {}", path);
        Ok(())
    }
}

/// Appends a forecast run to the history database, creating the schema on
/// first use.
pub fn save_history(report: &ForecastReport, db_path: &str) -> Result<()> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS forecast_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            barangay TEXT NOT NULL,
            targets TEXT NOT NULL,
            horizon INTEGER NOT NULL,
            generated_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS forecast_values (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id INTEGER NOT NULL,
            month TEXT NOT NULL,
            column_name TEXT NOT NULL,
            value REAL NOT NULL,
            FOREIGN KEY (run_id) REFERENCES forecast_runs (id)
        );
        CREATE INDEX IF NOT EXISTS idx_forecast_runs_barangay ON forecast_runs (barangay);
        CREATE INDEX IF NOT EXISTS idx_forecast_values_run ON forecast_values (run_id);",
    )?;

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO forecast_runs (barangay, targets, horizon, generated_at) VALUES (?1, ?2, ?3, ?4)",
        params![
            report.barangay,
            report.targets.join(","),
            report.horizon as i64,
            report.generated_at
        ],
    )?;
    let run_id = tx.last_insert_rowid();
    {
        let mut stmt = tx.prepare(
            "INSERT INTO forecast_values (run_id, month, column_name, value) VALUES (?1, ?2, ?3, ?4)",
        )?;
        for (month, row) in report.months.iter().zip(&report.values) {
            for (target, value) in report.targets.iter().zip(row) {
                stmt.execute(params![run_id, month, target, value])?;
            }
        }
    }
    tx.commit()?;

    info!(
        "🗄️ Forecast run {} saved to history database {}",
        run_id, db_path
    );
    Ok(())
}
