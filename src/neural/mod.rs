// projeto: lstmhealthforecast
// file: src/neural/mod.rs
// Module declarations for the disease forecasting pipeline

pub mod utils;    // Error types, activations and the Adam optimizer
pub mod data;     // Sheet loading, merging, filtering and sequence building
pub mod features; // Feature manifest, min-max scaling and inverse transform
pub mod metrics;  // Training metrics, tracking and regression evaluation
pub mod model;    // Stacked LSTM forecaster with autoregressive rollout
pub mod storage;  // Model bundle persistence, forecast reports and history DB
pub mod plot;     // Training loss curve export

// Re-export commonly used items for convenience
pub use features::{FeatureManifest, ScalerSet};
pub use model::LstmForecaster;
pub use utils::{ForecastError, Result};
