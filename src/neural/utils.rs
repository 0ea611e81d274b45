// projeto: lstmhealthforecast
// file: src/neural/utils.rs
// Error types, activations and the Adam optimizer shared across the pipeline

use ndarray::{Array1, ShapeError};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ForecastError {
    #[error("No data found for barangay '{barangay}'")]
    BarangayNotFound { barangay: String },

    #[error("Insufficient data for barangay '{barangay}': need at least {required} rows, got {actual}")]
    InsufficientData {
        barangay: String,
        required: usize,
        actual: usize,
    },

    #[error("No scaler fitted for column '{column}'")]
    MissingScaler { column: String },

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("Data processing error: {0}")]
    DataProcessing(String),

    #[error("Model configuration error: {0}")]
    ModelConfiguration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Shape error: {0}")]
    Shape(String),
}

impl From<ShapeError> for ForecastError {
    fn from(err: ShapeError) -> Self {
        ForecastError::Shape(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ForecastError>;

/// Saturating sigmoid, stable for large positive/negative inputs.
pub fn sigmoid(x: f64) -> f64 {
    if x > 500.0 {
        1.0
    } else if x < -500.0 {
        0.0
    } else {
        1.0 / (1.0 + (-x).exp())
    }
}

/// Saturating tanh.
pub fn tanh_activation(x: f64) -> f64 {
    if x > 20.0 {
        1.0
    } else if x < -20.0 {
        -1.0
    } else {
        x.tanh()
    }
}

pub fn mse_loss(predictions: &[f64], targets: &[f64]) -> f64 {
    assert_eq!(predictions.len(), targets.len());
    let n = predictions.len() as f64;
    predictions
        .iter()
        .zip(targets.iter())
        .map(|(p, t)| (p - t).powi(2))
        .sum::<f64>()
        / n
}

#[derive(Debug, Clone)]
pub struct AdamOptimizer {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
    pub t: usize,
    m: HashMap<String, Array1<f64>>,
    v: HashMap<String, Array1<f64>>,
}

impl AdamOptimizer {
    pub fn new(learning_rate: f64, beta1: f64, beta2: f64, epsilon: f64) -> Self {
        AdamOptimizer {
            learning_rate,
            beta1,
            beta2,
            epsilon,
            t: 0,
            m: HashMap::new(),
            v: HashMap::new(),
        }
    }

    /// Bias-corrected Adam step; returns the update to subtract from the parameter.
    pub fn update(&mut self, param_name: &str, gradient: &Array1<f64>) -> Array1<f64> {
        self.t += 1;

        let m = self
            .m
            .entry(param_name.to_string())
            .or_insert_with(|| Array1::zeros(gradient.len()));
        let v = self
            .v
            .entry(param_name.to_string())
            .or_insert_with(|| Array1::zeros(gradient.len()));

        *m = &*m * self.beta1 + gradient * (1.0 - self.beta1);
        *v = &*v * self.beta2 + &gradient.mapv(|x| x.powi(2)) * (1.0 - self.beta2);

        let m_hat = &*m / (1.0 - self.beta1.powi(self.t as i32));
        let v_hat = &*v / (1.0 - self.beta2.powi(self.t as i32));

        &m_hat / (&v_hat.mapv(|x| x.sqrt()) + self.epsilon) * self.learning_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array1;

    #[test]
    fn test_adam_optimizer() {
        let mut optimizer = AdamOptimizer::new(0.001, 0.9, 0.999, 1e-8);
        let gradient = Array1::from_vec(vec![0.1, -0.2, 0.3]);
        let update = optimizer.update("w_out_0", &gradient);
        assert_eq!(update.len(), 3);
        // Update direction follows the gradient sign
        assert!(update[0] > 0.0);
        assert!(update[1] < 0.0);
        assert!(update[2] > 0.0);
        assert_eq!(optimizer.t, 1);
    }

    #[test]
    fn test_adam_separate_parameters() {
        let mut optimizer = AdamOptimizer::new(0.01, 0.9, 0.999, 1e-8);
        let g1 = Array1::from_vec(vec![1.0, 1.0]);
        let g2 = Array1::from_vec(vec![-1.0]);
        let u1 = optimizer.update("w_out_0", &g1);
        let u2 = optimizer.update("b_out", &g2);
        assert_eq!(u1.len(), 2);
        assert_eq!(u2.len(), 1);
        assert!(u2[0] < 0.0);
    }

    #[test]
    fn test_activation_functions() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-12);
        assert_eq!(sigmoid(1000.0), 1.0);
        assert_eq!(sigmoid(-1000.0), 0.0);
        assert!(sigmoid(2.0) > 0.5);

        assert!(tanh_activation(0.0).abs() < 1e-12);
        assert_eq!(tanh_activation(100.0), 1.0);
        assert_eq!(tanh_activation(-100.0), -1.0);
        assert!(tanh_activation(1.0) > 0.0);
    }

    #[test]
    fn test_mse_loss() {
        let predictions = vec![1.0, 2.0, 3.0];
        let targets = vec![1.0, 2.0, 3.0];
        assert_eq!(mse_loss(&predictions, &targets), 0.0);

        let off = vec![2.0, 3.0, 4.0];
        assert!((mse_loss(&off, &targets) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_error_messages() {
        let err = ForecastError::BarangayNotFound {
            barangay: "Commonwealth".to_string(),
        };
        assert!(err.to_string().contains("Commonwealth"));

        let err = ForecastError::InsufficientData {
            barangay: "Holy Spirit".to_string(),
            required: 7,
            actual: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains('7') && msg.contains('3'));

        let err = ForecastError::MissingScaler {
            column: "dengue_cases".to_string(),
        };
        assert!(err.to_string().contains("dengue_cases"));
    }
}
