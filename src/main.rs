// projeto: lstmhealthforecast
// file: src/main.rs
// Entry point: trains an LSTM on barangay health records and forecasts case counts

mod neural;

use chrono::Local;
use clap::Parser;
use log::{error, info};
use ndarray::s;
use serde::Deserialize;
use std::path::Path;
use std::time::Instant;

use crate::neural::data::{create_sequences, forecast_months, load_and_filter};
use crate::neural::features::{
    FeatureManifest, apply_features, inverse_transform_predictions, prepare_features,
};
use crate::neural::metrics::calculate_regression_metrics;
use crate::neural::model::{LstmForecaster, TrainConfig};
use crate::neural::plot::save_loss_plot;
use crate::neural::storage::{
    ForecastReport, ModelBundle, load_bundle, save_bundle, save_history,
};
use crate::neural::utils::{ForecastError, Result};

#[derive(Parser, Debug)]
#[command(
    name = "health-forecast",
    version,
    about = "LSTM forecasting of monthly disease case counts per barangay",
    long_about = "Loads barangay-level health, climate and environmental records, trains a stacked LSTM on sliding monthly windows and produces a multi-month forecast of disease case counts in real units."
)]
struct Cli {
    /// Data source: a directory of <Sheet_Name>.csv files or a single CSV
    #[arg(long, default_value_t = String::from("data"))]
    data: String,

    /// Barangay to train and forecast for
    #[arg(long)]
    barangay: String,

    /// Comma-separated disease count columns to predict
    #[arg(long, default_value_t = String::from("dengue_cases"))]
    targets: String,

    /// Months of history per training window
    #[arg(long, help = "Input window length in months (default 6)")]
    sequence_length: Option<usize>,

    /// Months to forecast ahead
    #[arg(long, help = "Forecast horizon in months (default 6)")]
    horizon: Option<usize>,

    /// Maximum training epochs
    #[arg(long, help = "Upper bound on training epochs (default 100)")]
    epochs: Option<usize>,

    /// Training batch size
    #[arg(long, help = "Samples per optimizer step (default 16)")]
    batch_size: Option<usize>,

    /// Early stopping patience
    #[arg(long, help = "Epochs without improvement before stopping (default 15)")]
    patience: Option<usize>,

    /// Adam learning rate
    #[arg(long, help = "Learning rate for the Adam optimizer (default 0.001)")]
    learning_rate: Option<f64>,

    /// Comma-separated hidden layer sizes
    #[arg(long, help = "Stacked LSTM layer sizes, e.g. 64,32 (the default)")]
    hidden_sizes: Option<String>,

    /// Seed for reproducible weight initialization
    #[arg(long)]
    seed: Option<u64>,

    /// Path of the saved model bundle
    #[arg(long, default_value_t = String::from("trained_models/forecaster.bin"))]
    model: String,

    /// SQLite database collecting past forecast runs
    #[arg(long, default_value_t = String::from("forecasts.db"))]
    history_db: String,

    /// Write the forecast report as JSON to this path
    #[arg(long)]
    report: Option<String>,

    /// Write the training loss curve as HTML to this path
    #[arg(long)]
    loss_plot: Option<String>,

    /// TOML file overriding the training defaults
    #[arg(long)]
    config: Option<String>,

    /// Skip training and forecast from the saved model bundle
    #[arg(long)]
    forecast_only: bool,

    /// Do not record this run in the history database
    #[arg(long)]
    no_history: bool,

    /// Verbose logging
    #[arg(long)]
    verbose: bool,
}

/// Optional overrides loaded from --config. Flags given on the command line
/// win over these.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    sequence_length: Option<usize>,
    horizon: Option<usize>,
    epochs: Option<usize>,
    batch_size: Option<usize>,
    patience: Option<usize>,
    learning_rate: Option<f64>,
    hidden_sizes: Option<Vec<usize>>,
}

#[derive(Debug, Clone)]
struct RunSettings {
    sequence_length: usize,
    horizon: usize,
    epochs: usize,
    batch_size: usize,
    patience: usize,
    learning_rate: f64,
    hidden_sizes: Vec<usize>,
}

impl Default for RunSettings {
    fn default() -> Self {
        RunSettings {
            sequence_length: 6,
            horizon: 6,
            epochs: 100,
            batch_size: 16,
            patience: 15,
            learning_rate: 0.001,
            hidden_sizes: vec![64, 32],
        }
    }
}

fn main() {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let start_time = Instant::now();
    info!("🚀 Barangay health forecasting system started");
    info!(
        "📊 Barangay: {} | Data: {} | Mode: {}",
        cli.barangay,
        cli.data,
        if cli.forecast_only { "forecast-only" } else { "train + forecast" }
    );
    info!("🕐 Started at: {}", Local::now().format("%Y-%m-%d %H:%M:%S"));

    match run(&cli) {
        Ok(_) => {
            info!("✅ Finished successfully in {:.2}s", start_time.elapsed().as_secs_f64());
        }
        Err(e) => {
            error!("❌ Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn setup_logging(verbose: bool) {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(level)
        .format_timestamp_secs()
        .init();
}

fn run(cli: &Cli) -> Result<()> {
    let file = match &cli.config {
        Some(path) => load_config_file(path)?,
        None => FileConfig::default(),
    };
    let settings = resolve_settings(cli, file)?;

    if cli.forecast_only {
        forecast_from_bundle(cli, &settings)
    } else {
        train_and_forecast(cli, &settings)
    }
}

fn load_config_file(path: &str) -> Result<FileConfig> {
    if !Path::new(path).exists() {
        return Err(ForecastError::FileNotFound {
            path: path.to_string(),
        });
    }
    let raw = std::fs::read_to_string(path)?;
    toml::from_str(&raw).map_err(|e| {
        ForecastError::Serialization(format!("Cannot parse config file {}: {}", path, e))
    })
}

/// Merges command line flags, config file values and built-in defaults, in
/// that order of precedence.
fn resolve_settings(cli: &Cli, file: FileConfig) -> Result<RunSettings> {
    let defaults = RunSettings::default();

    let hidden_sizes = match &cli.hidden_sizes {
        Some(raw) => parse_hidden_sizes(raw)?,
        None => file.hidden_sizes.unwrap_or(defaults.hidden_sizes),
    };

    let settings = RunSettings {
        sequence_length: cli
            .sequence_length
            .or(file.sequence_length)
            .unwrap_or(defaults.sequence_length),
        horizon: cli.horizon.or(file.horizon).unwrap_or(defaults.horizon),
        epochs: cli.epochs.or(file.epochs).unwrap_or(defaults.epochs),
        batch_size: cli.batch_size.or(file.batch_size).unwrap_or(defaults.batch_size),
        patience: cli.patience.or(file.patience).unwrap_or(defaults.patience),
        learning_rate: cli
            .learning_rate
            .or(file.learning_rate)
            .unwrap_or(defaults.learning_rate),
        hidden_sizes,
    };

    if settings.horizon == 0 {
        return Err(ForecastError::ModelConfiguration(
            "Forecast horizon must be at least 1 month".to_string(),
        ));
    }
    if settings.sequence_length == 0 {
        return Err(ForecastError::ModelConfiguration(
            "Sequence length must be at least 1 month".to_string(),
        ));
    }
    Ok(settings)
}

fn parse_targets(raw: &str) -> Result<Vec<String>> {
    let targets: Vec<String> = raw
        .split(',')
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    if targets.is_empty() {
        return Err(ForecastError::DataProcessing(
            "No target columns requested".to_string(),
        ));
    }
    Ok(targets)
}

fn parse_hidden_sizes(raw: &str) -> Result<Vec<usize>> {
    let mut sizes = Vec::new();
    for part in raw.split(',') {
        let trimmed = part.trim();
        if trimmed.is_empty() {
            continue;
        }
        let size = trimmed.parse::<usize>().map_err(|_| {
            ForecastError::ModelConfiguration(format!("Invalid hidden layer size: '{}'", trimmed))
        })?;
        sizes.push(size);
    }
    if sizes.is_empty() {
        return Err(ForecastError::ModelConfiguration(
            "No hidden layer sizes given".to_string(),
        ));
    }
    Ok(sizes)
}

fn train_and_forecast(cli: &Cli, settings: &RunSettings) -> Result<()> {
    let targets = parse_targets(&cli.targets)?;

    let (frame, dates) = load_and_filter(&cli.data, &cli.barangay)?;
    let manifest = FeatureManifest::negotiate(&frame, &targets)?;
    let (matrix, scalers) = prepare_features(&frame, &manifest)?;

    let (sequences, sequence_targets) =
        create_sequences(&matrix, settings.sequence_length, manifest.n_outputs(), &cli.barangay)?;
    info!(
        "🔧 {} training sequences of {} months each",
        sequences.len(),
        settings.sequence_length
    );

    let mut model = LstmForecaster::new(
        settings.sequence_length,
        manifest.n_features(),
        manifest.n_outputs(),
        &settings.hidden_sizes,
        cli.seed,
    )?;
    info!("🛠️ Model initialized with {} parameters", model.num_parameters());

    let config = TrainConfig {
        epochs: settings.epochs,
        batch_size: settings.batch_size,
        patience: settings.patience,
        learning_rate: settings.learning_rate,
    };
    let tracker = model.train(&sequences, &sequence_targets, &config, &cli.barangay)?;
    tracker.print_summary();

    // goodness of fit over the training pairs
    let fitted = model.predict_batch(&sequences)?;
    let predicted: Vec<f64> = fitted.iter().flat_map(|p| p.iter().copied()).collect();
    let actual: Vec<f64> = sequence_targets.iter().flat_map(|t| t.iter().copied()).collect();
    calculate_regression_metrics(&predicted, &actual).print("Fit");

    if let Some(path) = &cli.loss_plot {
        let losses: Vec<f64> = tracker.history.iter().map(|m| m.train_loss).collect();
        save_loss_plot(&losses, path);
    }

    let n_rows = matrix.nrows();
    let window = matrix.slice(s![n_rows - settings.sequence_length.., ..]).to_owned();
    let normalized = model.forecast(&window, settings.horizon)?;
    let forecast = inverse_transform_predictions(&normalized, manifest.targets(), &scalers)?;

    let last_date = dates.last().copied().ok_or_else(|| {
        ForecastError::DataProcessing("No dated rows available".to_string())
    })?;
    let months = forecast_months(last_date, settings.horizon)?;

    let report = ForecastReport::new(&cli.barangay, manifest.targets(), &months, &forecast);
    report.print();

    let bundle = ModelBundle::new(&cli.barangay, model.to_weights(), manifest, scalers, config);
    save_bundle(&bundle, &cli.model)?;

    if let Some(path) = &cli.report {
        report.save_json(path)?;
    }
    if !cli.no_history {
        save_history(&report, &cli.history_db)?;
    }
    Ok(())
}

fn forecast_from_bundle(cli: &Cli, settings: &RunSettings) -> Result<()> {
    let bundle = load_bundle(&cli.model)?;
    if bundle.barangay != cli.barangay {
        return Err(ForecastError::ModelConfiguration(format!(
            "Saved model was trained for barangay '{}', requested '{}'",
            bundle.barangay, cli.barangay
        )));
    }
    let model = LstmForecaster::from_weights(&bundle.weights)?;
    if model.n_features() != bundle.manifest.n_features()
        || model.n_outputs() != bundle.manifest.n_outputs()
    {
        return Err(ForecastError::ModelConfiguration(
            "Saved weights do not match the saved feature manifest".to_string(),
        ));
    }
    info!(
        "🎯 Forecasting {} months for '{}' with saved model (targets: {:?})",
        settings.horizon,
        cli.barangay,
        bundle.manifest.targets()
    );

    let (frame, dates) = load_and_filter(&cli.data, &cli.barangay)?;
    let matrix = apply_features(&frame, &bundle.manifest, &bundle.scalers)?;

    let sequence_length = model.sequence_length();
    if matrix.nrows() < sequence_length {
        return Err(ForecastError::InsufficientData {
            barangay: cli.barangay.clone(),
            required: sequence_length,
            actual: matrix.nrows(),
        });
    }
    let window = matrix.slice(s![matrix.nrows() - sequence_length.., ..]).to_owned();
    let normalized = model.forecast(&window, settings.horizon)?;
    let forecast = inverse_transform_predictions(&normalized, bundle.manifest.targets(), &bundle.scalers)?;

    let last_date = dates.last().copied().ok_or_else(|| {
        ForecastError::DataProcessing("No dated rows available".to_string())
    })?;
    let months = forecast_months(last_date, settings.horizon)?;

    let report = ForecastReport::new(&cli.barangay, bundle.manifest.targets(), &months, &forecast);
    report.print();

    if let Some(path) = &cli.report {
        report.save_json(path)?;
    }
    if !cli.no_history {
        save_history(&report, &cli.history_db)?;
    }
    Ok(())
}


// Example usage:
// cargo run --release -- --barangay Commonwealth --data data --targets dengue_cases --epochs 100 --verbose
// cargo run --release -- --barangay "Holy Spirit" --targets dengue_cases,typhoid_cases --sequence-length 12 --horizon 3
// cargo run --release -- --barangay Commonwealth --forecast-only --model trained_models/forecaster.bin --report forecast.json
// cargo run --release -- --barangay Commonwealth --config training.toml --loss-plot loss.html --seed 42
