// projeto: lstmhealthforecast
// file: src/neural/features.rs
// Driver selection, min-max scaling and the manifest binding a model to its columns

use log::{info, warn};
use ndarray::{Array1, Array2};
use ndarray_stats::QuantileExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::neural::data::Frame;
use crate::neural::utils::{ForecastError, Result};

/// Driver columns in priority order. Only names present in the data are
/// used; order here fixes their position in the feature matrix.
pub const FEATURE_PRIORITY: [&str; 21] = [
    // climate
    "avg_temperature_c",
    "max_temperature_c",
    "min_temperature_c",
    "total_rainfall_mm",
    "avg_humidity_pct",
    "wind_speed_mps",
    "solar_radiation_wm2",
    "pressure_hpa",
    // environmental
    "flood_incidence",
    "air_quality_index",
    "pm25_ugm3",
    "pm10_ugm3",
    "solid_waste_collection_coverage_pct",
    "water_quality_index",
    "ndvi",
    "distance_to_water_m",
    // socioeconomic
    "population_density_per_km2",
    "poverty_incidence_pct",
    "employment_rate_pct",
    "health_facilities_count",
    "literacy_rate_pct",
];

/// Column layout a trained model commits to: driver columns first, target
/// columns last. Targets occupying the trailing positions is what lets the
/// forecast loop overwrite just the tail of each synthesized row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureManifest {
    drivers: Vec<String>,
    targets: Vec<String>,
}

impl FeatureManifest {
    /// Resolves the manifest against the columns actually present: drivers
    /// are the priority names found in the data (minus any requested as
    /// targets), targets are the requested case columns found in the data.
    pub fn negotiate(frame: &Frame, requested_targets: &[String]) -> Result<Self> {
        let targets: Vec<String> = requested_targets
            .iter()
            .filter(|t| frame.has_column(t))
            .cloned()
            .collect();

        let skipped: Vec<&String> = requested_targets
            .iter()
            .filter(|t| !frame.has_column(t))
            .collect();
        if !skipped.is_empty() {
            warn!("⚠️ Requested targets not found in data, skipping: {:?}", skipped);
        }
        if targets.is_empty() {
            return Err(ForecastError::DataProcessing(format!(
                "None of the requested target columns {:?} exist in the data",
                requested_targets
            )));
        }

        let drivers: Vec<String> = FEATURE_PRIORITY
            .iter()
            .filter(|f| frame.has_column(f) && !targets.iter().any(|t| t == *f))
            .map(|f| f.to_string())
            .collect();

        info!(
            "📊 Feature manifest: {} drivers + {} targets",
            drivers.len(),
            targets.len()
        );
        Ok(FeatureManifest { drivers, targets })
    }

    /// All model columns in matrix order, targets last.
    pub fn columns(&self) -> Vec<String> {
        let mut all = self.drivers.clone();
        all.extend(self.targets.iter().cloned());
        all
    }

    pub fn drivers(&self) -> &[String] {
        &self.drivers
    }

    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    pub fn n_features(&self) -> usize {
        self.drivers.len() + self.targets.len()
    }

    pub fn n_outputs(&self) -> usize {
        self.targets.len()
    }
}

/// Per-column min-max scaler mapping observed [min, max] onto [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MinMaxScaler {
    pub min: f64,
    pub max: f64,
}

impl MinMaxScaler {
    pub fn fit(values: &Array1<f64>) -> Result<Self> {
        let min = *values
            .min()
            .map_err(|e| ForecastError::DataProcessing(format!("Cannot fit scaler: {}", e)))?;
        let max = *values
            .max()
            .map_err(|e| ForecastError::DataProcessing(format!("Cannot fit scaler: {}", e)))?;
        Ok(MinMaxScaler { min, max })
    }

    pub fn transform(&self, value: f64) -> f64 {
        let range = self.max - self.min;
        if range > 0.0 { (value - self.min) / range } else { 0.0 }
    }

    pub fn inverse(&self, value: f64) -> f64 {
        let range = self.max - self.min;
        if range > 0.0 { value * range + self.min } else { self.min }
    }
}

/// Named scalers for every model column, persisted with the model so
/// forecasts can be mapped back to real units.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScalerSet {
    scalers: HashMap<String, MinMaxScaler>,
}

impl ScalerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, column: String, scaler: MinMaxScaler) {
        self.scalers.insert(column, scaler);
    }

    pub fn get(&self, column: &str) -> Result<&MinMaxScaler> {
        self.scalers.get(column).ok_or_else(|| ForecastError::MissingScaler {
            column: column.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.scalers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scalers.is_empty()
    }
}

fn fill_missing(name: &str, raw: &[Option<f64>]) -> Result<Array1<f64>> {
    let present: Vec<f64> = raw.iter().filter_map(|v| *v).collect();
    if present.is_empty() {
        return Err(ForecastError::DataProcessing(format!(
            "Column '{}' has no usable values",
            name
        )));
    }
    let mean = present.iter().sum::<f64>() / present.len() as f64;
    Ok(raw.iter().map(|v| v.unwrap_or(mean)).collect())
}

fn column_values(frame: &Frame, name: &str) -> Result<Vec<Option<f64>>> {
    let idx = frame.column_index(name).ok_or_else(|| {
        ForecastError::DataProcessing(format!("Column '{}' missing from data", name))
    })?;
    Ok(frame.rows.iter().map(|row| row[idx].as_f64()).collect())
}

/// Builds the normalized feature matrix for training: per manifest column,
/// mean-fill missing values, fit a scaler on the filled series, transform.
/// Rows follow the frame, columns follow the manifest.
pub fn prepare_features(frame: &Frame, manifest: &FeatureManifest) -> Result<(Array2<f64>, ScalerSet)> {
    let columns = manifest.columns();
    let mut matrix = Array2::zeros((frame.rows.len(), columns.len()));
    let mut scalers = ScalerSet::new();

    for (j, name) in columns.iter().enumerate() {
        let raw = column_values(frame, name)?;
        let filled = fill_missing(name, &raw)?;
        let scaler = MinMaxScaler::fit(&filled)?;
        for (i, value) in filled.iter().enumerate() {
            matrix[[i, j]] = scaler.transform(*value);
        }
        scalers.insert(name.clone(), scaler);
    }

    info!("✅ Features used ({}): {:?}", columns.len(), columns);
    Ok((matrix, scalers))
}

/// Same matrix construction as `prepare_features`, but transforming with
/// previously fitted scalers. Used when forecasting from a saved model.
pub fn apply_features(frame: &Frame, manifest: &FeatureManifest, scalers: &ScalerSet) -> Result<Array2<f64>> {
    let columns = manifest.columns();
    let mut matrix = Array2::zeros((frame.rows.len(), columns.len()));

    for (j, name) in columns.iter().enumerate() {
        let raw = column_values(frame, name)?;
        let filled = fill_missing(name, &raw)?;
        let scaler = scalers.get(name)?;
        for (i, value) in filled.iter().enumerate() {
            matrix[[i, j]] = scaler.transform(*value);
        }
    }

    Ok(matrix)
}

/// Maps normalized predictions back to case counts, one scaler per target
/// column. Counts cannot go below zero.
pub fn inverse_transform_predictions(
    predictions: &Array2<f64>,
    targets: &[String],
    scalers: &ScalerSet,
) -> Result<Array2<f64>> {
    if predictions.ncols() != targets.len() {
        return Err(ForecastError::ModelConfiguration(format!(
            "Prediction width {} does not match {} target columns",
            predictions.ncols(),
            targets.len()
        )));
    }

    let mut output = predictions.clone();
    for (j, name) in targets.iter().enumerate() {
        let scaler = *scalers.get(name)?;
        for value in output.column_mut(j).iter_mut() {
            *value = scaler.inverse(*value).max(0.0);
        }
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neural::data::Cell;
    use ndarray::array;

    fn frame_from(columns: &[&str], rows: &[&[&str]]) -> Frame {
        Frame {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: rows
                .iter()
                .map(|r| r.iter().map(|v| Cell::parse(v)).collect())
                .collect(),
        }
    }

    #[test]
    fn test_manifest_targets_sit_last() {
        let frame = frame_from(
            &["barangay", "total_rainfall_mm", "dengue_cases", "avg_temperature_c"],
            &[&["Commonwealth", "200", "10", "28"]],
        );
        let targets = vec!["dengue_cases".to_string()];
        let manifest = FeatureManifest::negotiate(&frame, &targets).unwrap();

        assert_eq!(manifest.drivers(), ["avg_temperature_c", "total_rainfall_mm"]);
        assert_eq!(manifest.targets(), ["dengue_cases"]);
        assert_eq!(
            manifest.columns(),
            vec!["avg_temperature_c", "total_rainfall_mm", "dengue_cases"]
        );
        assert_eq!(manifest.n_features(), 3);
        assert_eq!(manifest.n_outputs(), 1);
    }

    #[test]
    fn test_manifest_target_removed_from_drivers() {
        // A priority column requested as a target must not appear twice
        let frame = frame_from(
            &["flood_incidence", "avg_temperature_c", "dengue_cases"],
            &[&["0", "28", "10"]],
        );
        let targets = vec!["flood_incidence".to_string()];
        let manifest = FeatureManifest::negotiate(&frame, &targets).unwrap();

        assert_eq!(manifest.drivers(), ["avg_temperature_c"]);
        assert_eq!(manifest.targets(), ["flood_incidence"]);
    }

    #[test]
    fn test_manifest_no_targets_fails() {
        let frame = frame_from(&["avg_temperature_c"], &[&["28"]]);
        let targets = vec!["dengue_cases".to_string()];
        assert!(FeatureManifest::negotiate(&frame, &targets).is_err());
    }

    #[test]
    fn test_manifest_skips_absent_target_keeps_present() {
        let frame = frame_from(
            &["avg_temperature_c", "dengue_cases"],
            &[&["28", "10"]],
        );
        let targets = vec!["dengue_cases".to_string(), "typhoid_cases".to_string()];
        let manifest = FeatureManifest::negotiate(&frame, &targets).unwrap();
        assert_eq!(manifest.targets(), ["dengue_cases"]);
    }

    #[test]
    fn test_scaler_round_trip() {
        let values = array![3.0, 9.0, 15.0];
        let scaler = MinMaxScaler::fit(&values).unwrap();

        assert_eq!(scaler.min, 3.0);
        assert_eq!(scaler.max, 15.0);
        assert!((scaler.transform(9.0) - 0.5).abs() < 1e-12);
        assert!((scaler.inverse(scaler.transform(9.0)) - 9.0).abs() < 1e-12);
    }

    #[test]
    fn test_scaler_constant_column() {
        let values = array![4.0, 4.0, 4.0];
        let scaler = MinMaxScaler::fit(&values).unwrap();
        assert_eq!(scaler.transform(4.0), 0.0);
        assert_eq!(scaler.inverse(0.0), 4.0);
    }

    #[test]
    fn test_prepare_features_mean_fills_missing() {
        let frame = frame_from(
            &["avg_temperature_c", "dengue_cases"],
            &[&["10", "0"], &["", "5"], &["30", "10"]],
        );
        let targets = vec!["dengue_cases".to_string()];
        let manifest = FeatureManifest::negotiate(&frame, &targets).unwrap();

        let (matrix, scalers) = prepare_features(&frame, &manifest).unwrap();
        assert_eq!(matrix.dim(), (3, 2));
        // Missing temperature fills with mean(10, 30) = 20, scaled to 0.5
        assert!((matrix[[1, 0]] - 0.5).abs() < 1e-12);
        // Target column scaled to [0, 1]
        assert_eq!(matrix[[0, 1]], 0.0);
        assert_eq!(matrix[[2, 1]], 1.0);
        assert_eq!(scalers.len(), 2);
    }

    #[test]
    fn test_prepare_features_all_missing_column_fails() {
        let frame = frame_from(
            &["avg_temperature_c", "dengue_cases"],
            &[&["", "1"], &["", "2"]],
        );
        let targets = vec!["dengue_cases".to_string()];
        let manifest = FeatureManifest::negotiate(&frame, &targets).unwrap();
        assert!(prepare_features(&frame, &manifest).is_err());
    }

    #[test]
    fn test_apply_features_uses_persisted_scalers() {
        let frame = frame_from(
            &["avg_temperature_c", "dengue_cases"],
            &[&["25", "4"]],
        );
        let targets = vec!["dengue_cases".to_string()];
        let manifest = FeatureManifest::negotiate(&frame, &targets).unwrap();

        let mut scalers = ScalerSet::new();
        scalers.insert("avg_temperature_c".to_string(), MinMaxScaler { min: 20.0, max: 30.0 });
        scalers.insert("dengue_cases".to_string(), MinMaxScaler { min: 0.0, max: 8.0 });

        let matrix = apply_features(&frame, &manifest, &scalers).unwrap();
        assert!((matrix[[0, 0]] - 0.5).abs() < 1e-12);
        assert!((matrix[[0, 1]] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_inverse_transform_clips_negative_counts() {
        let mut scalers = ScalerSet::new();
        scalers.insert("dengue_cases".to_string(), MinMaxScaler { min: 5.0, max: 25.0 });

        let predictions = array![[0.5], [-0.5]];
        let targets = vec!["dengue_cases".to_string()];
        let restored = inverse_transform_predictions(&predictions, &targets, &scalers).unwrap();

        assert!((restored[[0, 0]] - 15.0).abs() < 1e-12);
        // -0.5 maps to -5.0, clipped to zero
        assert_eq!(restored[[1, 0]], 0.0);
    }

    #[test]
    fn test_inverse_transform_missing_scaler() {
        let scalers = ScalerSet::new();
        let predictions = array![[0.5]];
        let targets = vec!["dengue_cases".to_string()];
        match inverse_transform_predictions(&predictions, &targets, &scalers) {
            Err(ForecastError::MissingScaler { column }) => assert_eq!(column, "dengue_cases"),
            other => panic!("expected MissingScaler, got {:?}", other.map(|m| m.dim())),
        }
    }

    #[test]
    fn test_inverse_transform_width_mismatch() {
        let mut scalers = ScalerSet::new();
        scalers.insert("dengue_cases".to_string(), MinMaxScaler { min: 0.0, max: 1.0 });
        let predictions = array![[0.5, 0.5]];
        let targets = vec!["dengue_cases".to_string()];
        assert!(inverse_transform_predictions(&predictions, &targets, &scalers).is_err());
    }
}
