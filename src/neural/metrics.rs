// projeto: lstmhealthforecast
// file: src/neural/metrics.rs
// Per-epoch training metrics, early-stopping tracker and regression summaries

use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::neural::utils::mse_loss;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub barangay: String,
    pub epoch: usize,
    pub train_loss: f64,
    pub timestamp: String,
}

impl TrainingMetrics {
    pub fn new(barangay: &str, epoch: usize, train_loss: f64) -> Self {
        TrainingMetrics {
            barangay: barangay.to_string(),
            epoch,
            train_loss,
            timestamp: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

/// Tracks the loss history and decides when training has stopped improving.
#[derive(Debug, Clone)]
pub struct MetricsTracker {
    pub history: Vec<TrainingMetrics>,
    pub best_loss: f64,
    pub best_epoch: usize,
    patience_counter: usize,
}

impl MetricsTracker {
    pub fn new() -> Self {
        MetricsTracker {
            history: Vec::new(),
            best_loss: f64::INFINITY,
            best_epoch: 0,
            patience_counter: 0,
        }
    }

    /// Records one epoch and returns true once `patience` epochs have passed
    /// without the training loss improving.
    pub fn add_metrics(&mut self, metrics: TrainingMetrics, patience: usize) -> bool {
        if metrics.train_loss < self.best_loss {
            self.best_loss = metrics.train_loss;
            self.best_epoch = metrics.epoch;
            self.patience_counter = 0;
            println!(
                "🎯 [Metrics] New best training loss: {:.6} at epoch {}",
                metrics.train_loss, metrics.epoch
            );
        } else {
            self.patience_counter += 1;
        }
        self.history.push(metrics);
        self.patience_counter >= patience
    }

    pub fn best_metrics(&self) -> Option<&TrainingMetrics> {
        self.history.iter().find(|m| m.epoch == self.best_epoch)
    }

    pub fn print_summary(&self) {
        println!("📊 Training Summary:");
        println!("   ├── Best epoch: {}", self.best_epoch);
        println!("   ├── Best training loss: {:.6}", self.best_loss);
        println!("   └── Epochs run: {}", self.history.len());
    }
}

impl Default for MetricsTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionMetrics {
    pub mse: f64,
    pub rmse: f64,
    pub mae: f64,
    pub mape: f64,
    pub r_squared: f64,
    pub n_samples: usize,
}

impl RegressionMetrics {
    pub fn print(&self, prefix: &str) {
        println!("📈 {} Metrics ({} samples):", prefix, self.n_samples);
        println!("   ├── MSE:  {:.6}", self.mse);
        println!("   ├── RMSE: {:.6}", self.rmse);
        println!("   ├── MAE:  {:.6}", self.mae);
        println!("   ├── MAPE: {:.2}%", self.mape);
        println!("   └── R²:   {:.4}", self.r_squared);
    }
}

/// Standard regression metrics over paired prediction/actual slices.
pub fn calculate_regression_metrics(predictions: &[f64], actuals: &[f64]) -> RegressionMetrics {
    let n = predictions.len().min(actuals.len());
    if n == 0 {
        return RegressionMetrics {
            mse: 0.0,
            rmse: 0.0,
            mae: 0.0,
            mape: 0.0,
            r_squared: 0.0,
            n_samples: 0,
        };
    }

    let mut sum_abs = 0.0;
    let mut sum_pct = 0.0;
    let mut pct_count = 0usize;
    for i in 0..n {
        let error = actuals[i] - predictions[i];
        sum_abs += error.abs();
        if actuals[i].abs() > f64::EPSILON {
            sum_pct += (error / actuals[i]).abs() * 100.0;
            pct_count += 1;
        }
    }

    let mse = mse_loss(&predictions[..n], &actuals[..n]);
    let mae = sum_abs / n as f64;
    let mape = if pct_count > 0 { sum_pct / pct_count as f64 } else { 0.0 };

    let mean_actual = actuals[..n].iter().sum::<f64>() / n as f64;
    let ss_tot: f64 = actuals[..n].iter().map(|a| (a - mean_actual).powi(2)).sum();
    let r_squared = if ss_tot > f64::EPSILON {
        1.0 - (mse * n as f64) / ss_tot
    } else {
        0.0
    };

    RegressionMetrics {
        mse,
        rmse: mse.sqrt(),
        mae,
        mape,
        r_squared,
        n_samples: n,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regression_metrics_perfect_fit() {
        let values = [1.0, 2.0, 3.0, 4.0];
        let metrics = calculate_regression_metrics(&values, &values);
        assert_eq!(metrics.mse, 0.0);
        assert_eq!(metrics.rmse, 0.0);
        assert_eq!(metrics.mae, 0.0);
        assert!((metrics.r_squared - 1.0).abs() < 1e-12);
        assert_eq!(metrics.n_samples, 4);
    }

    #[test]
    fn test_regression_metrics_known_values() {
        let predictions = [2.0, 4.0];
        let actuals = [1.0, 5.0];
        let metrics = calculate_regression_metrics(&predictions, &actuals);
        // errors are -1 and 1
        assert!((metrics.mse - 1.0).abs() < 1e-12);
        assert!((metrics.rmse - 1.0).abs() < 1e-12);
        assert!((metrics.mae - 1.0).abs() < 1e-12);
        // |−1/1| and |1/5| → (100 + 20) / 2
        assert!((metrics.mape - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_regression_metrics_empty() {
        let metrics = calculate_regression_metrics(&[], &[]);
        assert_eq!(metrics.n_samples, 0);
        assert_eq!(metrics.mse, 0.0);
    }

    #[test]
    fn test_tracker_records_best_epoch() {
        let mut tracker = MetricsTracker::new();
        tracker.add_metrics(TrainingMetrics::new("Commonwealth", 1, 0.5), 3);
        tracker.add_metrics(TrainingMetrics::new("Commonwealth", 2, 0.3), 3);
        tracker.add_metrics(TrainingMetrics::new("Commonwealth", 3, 0.4), 3);

        assert_eq!(tracker.best_epoch, 2);
        assert!((tracker.best_loss - 0.3).abs() < 1e-12);
        assert_eq!(tracker.best_metrics().unwrap().epoch, 2);
        assert_eq!(tracker.history.len(), 3);
    }

    #[test]
    fn test_tracker_stops_after_patience() {
        let mut tracker = MetricsTracker::new();
        assert!(!tracker.add_metrics(TrainingMetrics::new("Commonwealth", 1, 0.5), 2));
        assert!(!tracker.add_metrics(TrainingMetrics::new("Commonwealth", 2, 0.6), 2));
        // second epoch without improvement reaches patience
        assert!(tracker.add_metrics(TrainingMetrics::new("Commonwealth", 3, 0.6), 2));
    }

    #[test]
    fn test_tracker_improvement_resets_patience() {
        let mut tracker = MetricsTracker::new();
        tracker.add_metrics(TrainingMetrics::new("Commonwealth", 1, 0.5), 2);
        tracker.add_metrics(TrainingMetrics::new("Commonwealth", 2, 0.6), 2);
        // improvement resets the counter
        assert!(!tracker.add_metrics(TrainingMetrics::new("Commonwealth", 3, 0.4), 2));
        assert!(!tracker.add_metrics(TrainingMetrics::new("Commonwealth", 4, 0.5), 2));
        assert!(tracker.add_metrics(TrainingMetrics::new("Commonwealth", 5, 0.5), 2));
    }
}
