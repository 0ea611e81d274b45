// projeto: lstmhealthforecast
// file: src/neural/model.rs
// Stacked LSTM forecaster: cells, training loop and recursive multi-month rollout

use log::info;
use ndarray::{Array1, Array2, s};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::neural::data::create_batches;
use crate::neural::metrics::{MetricsTracker, TrainingMetrics};
use crate::neural::utils::{AdamOptimizer, ForecastError, Result, sigmoid, tanh_activation};

fn random_matrix<R: Rng>(rows: usize, cols: usize, scale: f64, rng: &mut R) -> Array2<f64> {
    let normal = Normal::new(0.0, scale).unwrap();
    Array2::from_shape_fn((rows, cols), |_| normal.sample(rng))
}

/// One LSTM layer: input, forget, output and candidate gates with their
/// recurrent weights.
#[derive(Debug, Clone)]
struct LstmCell {
    hidden_size: usize,
    w_input: Array2<f64>,
    u_input: Array2<f64>,
    b_input: Array1<f64>,
    w_forget: Array2<f64>,
    u_forget: Array2<f64>,
    b_forget: Array1<f64>,
    w_output: Array2<f64>,
    u_output: Array2<f64>,
    b_output: Array1<f64>,
    w_cell: Array2<f64>,
    u_cell: Array2<f64>,
    b_cell: Array1<f64>,
}

impl LstmCell {
    fn new<R: Rng>(input_size: usize, hidden_size: usize, rng: &mut R) -> Self {
        let input_scale = (2.0 / input_size as f64).sqrt();
        let hidden_scale = (2.0 / hidden_size as f64).sqrt();
        LstmCell {
            hidden_size,
            w_input: random_matrix(hidden_size, input_size, input_scale, rng),
            u_input: random_matrix(hidden_size, hidden_size, hidden_scale, rng),
            b_input: Array1::zeros(hidden_size),
            w_forget: random_matrix(hidden_size, input_size, input_scale, rng),
            u_forget: random_matrix(hidden_size, hidden_size, hidden_scale, rng),
            // forget gate starts open so early epochs keep cell state
            b_forget: Array1::ones(hidden_size),
            w_output: random_matrix(hidden_size, input_size, input_scale, rng),
            u_output: random_matrix(hidden_size, hidden_size, hidden_scale, rng),
            b_output: Array1::zeros(hidden_size),
            w_cell: random_matrix(hidden_size, input_size, input_scale, rng),
            u_cell: random_matrix(hidden_size, hidden_size, hidden_scale, rng),
            b_cell: Array1::zeros(hidden_size),
        }
    }

    fn forward(&self, input: &Array1<f64>, h_prev: &Array1<f64>, c_prev: &Array1<f64>) -> (Array1<f64>, Array1<f64>) {
        let i_gate = (self.w_input.dot(input) + self.u_input.dot(h_prev) + &self.b_input).mapv(sigmoid);
        let f_gate = (self.w_forget.dot(input) + self.u_forget.dot(h_prev) + &self.b_forget).mapv(sigmoid);
        let o_gate = (self.w_output.dot(input) + self.u_output.dot(h_prev) + &self.b_output).mapv(sigmoid);
        let c_tilde = (self.w_cell.dot(input) + self.u_cell.dot(h_prev) + &self.b_cell).mapv(tanh_activation);

        let c = &f_gate * c_prev + &i_gate * &c_tilde;
        let h = &o_gate * c.mapv(tanh_activation);
        (h, c)
    }

    /// Shifts the gate biases against the mean output error. The forget bias
    /// moves slower and never drops below 0.1, keeping the memory path alive.
    fn nudge_biases(&mut self, delta: f64) {
        self.b_input.mapv_inplace(|b| b - delta);
        self.b_output.mapv_inplace(|b| b - delta);
        self.b_cell.mapv_inplace(|b| b - delta);
        self.b_forget.mapv_inplace(|b| (b - delta * 0.05).max(0.1));
    }

    fn to_layer_weights(&self) -> LstmLayerWeights {
        LstmLayerWeights {
            w_input: self.w_input.clone(),
            u_input: self.u_input.clone(),
            b_input: self.b_input.clone(),
            w_forget: self.w_forget.clone(),
            u_forget: self.u_forget.clone(),
            b_forget: self.b_forget.clone(),
            w_output: self.w_output.clone(),
            u_output: self.u_output.clone(),
            b_output: self.b_output.clone(),
            w_cell: self.w_cell.clone(),
            u_cell: self.u_cell.clone(),
            b_cell: self.b_cell.clone(),
        }
    }

    fn from_layer_weights(weights: &LstmLayerWeights) -> Self {
        LstmCell {
            hidden_size: weights.b_input.len(),
            w_input: weights.w_input.clone(),
            u_input: weights.u_input.clone(),
            b_input: weights.b_input.clone(),
            w_forget: weights.w_forget.clone(),
            u_forget: weights.u_forget.clone(),
            b_forget: weights.b_forget.clone(),
            w_output: weights.w_output.clone(),
            u_output: weights.u_output.clone(),
            b_output: weights.b_output.clone(),
            w_cell: weights.w_cell.clone(),
            u_cell: weights.u_cell.clone(),
            b_cell: weights.b_cell.clone(),
        }
    }

    fn num_parameters(&self) -> usize {
        self.w_input.len()
            + self.u_input.len()
            + self.b_input.len()
            + self.w_forget.len()
            + self.u_forget.len()
            + self.b_forget.len()
            + self.w_output.len()
            + self.u_output.len()
            + self.b_output.len()
            + self.w_cell.len()
            + self.u_cell.len()
            + self.b_cell.len()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LstmLayerWeights {
    pub w_input: Array2<f64>,
    pub u_input: Array2<f64>,
    pub b_input: Array1<f64>,
    pub w_forget: Array2<f64>,
    pub u_forget: Array2<f64>,
    pub b_forget: Array1<f64>,
    pub w_output: Array2<f64>,
    pub u_output: Array2<f64>,
    pub b_output: Array1<f64>,
    pub w_cell: Array2<f64>,
    pub u_cell: Array2<f64>,
    pub b_cell: Array1<f64>,
}

/// Serializable snapshot of a trained forecaster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelWeights {
    pub layers: Vec<LstmLayerWeights>,
    pub w_out: Array2<f64>,
    pub b_out: Array1<f64>,
    pub sequence_length: usize,
    pub n_features: usize,
    pub n_outputs: usize,
    pub hidden_sizes: Vec<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub patience: usize,
    pub learning_rate: f64,
}

/// Stacked LSTM layers with a linear readout over the last hidden state.
/// Input windows are `sequence_length × n_features`; output vectors hold one
/// value per target column.
pub struct LstmForecaster {
    layers: Vec<LstmCell>,
    w_out: Array2<f64>,
    b_out: Array1<f64>,
    sequence_length: usize,
    n_features: usize,
    n_outputs: usize,
    hidden_sizes: Vec<usize>,
}

impl LstmForecaster {
    pub fn new(
        sequence_length: usize,
        n_features: usize,
        n_outputs: usize,
        hidden_sizes: &[usize],
        seed: Option<u64>,
    ) -> Result<Self> {
        if sequence_length == 0 {
            return Err(ForecastError::ModelConfiguration(
                "Sequence length must be at least 1".to_string(),
            ));
        }
        if n_outputs == 0 || n_outputs > n_features {
            return Err(ForecastError::ModelConfiguration(format!(
                "Need 1..={} output columns, got {}",
                n_features, n_outputs
            )));
        }
        if hidden_sizes.is_empty() || hidden_sizes.contains(&0) {
            return Err(ForecastError::ModelConfiguration(
                "Hidden layer sizes must be non-empty and positive".to_string(),
            ));
        }

        let mut rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_os_rng(),
        };

        let mut layers = Vec::with_capacity(hidden_sizes.len());
        for (j, &hidden) in hidden_sizes.iter().enumerate() {
            let input_size = if j == 0 { n_features } else { hidden_sizes[j - 1] };
            layers.push(LstmCell::new(input_size, hidden, &mut rng));
        }

        let last_hidden = hidden_sizes[hidden_sizes.len() - 1];
        let out_scale = (2.0 / last_hidden as f64).sqrt();
        Ok(LstmForecaster {
            layers,
            w_out: random_matrix(n_outputs, last_hidden, out_scale, &mut rng),
            b_out: Array1::zeros(n_outputs),
            sequence_length,
            n_features,
            n_outputs,
            hidden_sizes: hidden_sizes.to_vec(),
        })
    }

    pub fn sequence_length(&self) -> usize {
        self.sequence_length
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_outputs(&self) -> usize {
        self.n_outputs
    }

    pub fn num_parameters(&self) -> usize {
        self.layers.iter().map(|l| l.num_parameters()).sum::<usize>()
            + self.w_out.len()
            + self.b_out.len()
    }

    /// Runs the window through every layer and returns the last layer's
    /// final hidden state.
    fn run_layers(&self, window: &Array2<f64>) -> Array1<f64> {
        let mut h_states: Vec<Array1<f64>> =
            self.layers.iter().map(|l| Array1::zeros(l.hidden_size)).collect();
        let mut c_states = h_states.clone();

        for row in window.rows() {
            let input_row = row.to_owned();
            for j in 0..self.layers.len() {
                let (h, c) = if j == 0 {
                    self.layers[j].forward(&input_row, &h_states[j], &c_states[j])
                } else {
                    self.layers[j].forward(&h_states[j - 1], &h_states[j], &c_states[j])
                };
                h_states[j] = h;
                c_states[j] = c;
            }
        }

        let last = h_states.len() - 1;
        h_states.swap_remove(last)
    }

    pub fn predict(&self, window: &Array2<f64>) -> Result<Array1<f64>> {
        if window.nrows() != self.sequence_length || window.ncols() != self.n_features {
            return Err(ForecastError::ModelConfiguration(format!(
                "Expected input window {}×{}, got {}×{}",
                self.sequence_length,
                self.n_features,
                window.nrows(),
                window.ncols()
            )));
        }
        let hidden = self.run_layers(window);
        Ok(self.w_out.dot(&hidden) + &self.b_out)
    }

    pub fn predict_batch(&self, windows: &[Array2<f64>]) -> Result<Vec<Array1<f64>>> {
        windows.par_iter().map(|w| self.predict(w)).collect()
    }

    /// Trains against (window, target) pairs, monitoring the training loss.
    /// Stops once `patience` epochs pass without improvement and restores
    /// the weights of the best epoch seen.
    pub fn train(
        &mut self,
        sequences: &[Array2<f64>],
        targets: &[Array1<f64>],
        config: &TrainConfig,
        barangay: &str,
    ) -> Result<MetricsTracker> {
        if sequences.is_empty() {
            return Err(ForecastError::DataProcessing(
                "No training sequences provided".to_string(),
            ));
        }
        if sequences.len() != targets.len() {
            return Err(ForecastError::DataProcessing(format!(
                "{} sequences but {} targets",
                sequences.len(),
                targets.len()
            )));
        }

        let mut optimizer = AdamOptimizer::new(config.learning_rate, 0.9, 0.999, 1e-8);
        let mut tracker = MetricsTracker::new();
        let mut best_weights = self.to_weights();

        info!(
            "🎓 Training on {} sequences for up to {} epochs (batch size {}, patience {})",
            sequences.len(),
            config.epochs,
            config.batch_size,
            config.patience
        );

        let batches = create_batches(sequences, targets, config.batch_size);
        let n_batches = batches.len();

        for epoch in 1..=config.epochs {
            let mut epoch_loss = 0.0;
            for (batch_sequences, batch_targets) in &batches {
                epoch_loss += self.train_batch(batch_sequences, batch_targets, &mut optimizer);
            }
            let avg_loss = epoch_loss / n_batches as f64;

            if epoch <= 5 || epoch % 10 == 0 {
                info!("📈 Epoch {}/{} - loss: {:.6}", epoch, config.epochs, avg_loss);
            }

            let should_stop =
                tracker.add_metrics(TrainingMetrics::new(barangay, epoch, avg_loss), config.patience);
            if tracker.best_epoch == epoch {
                best_weights = self.to_weights();
            }
            if should_stop {
                info!(
                    "⏹️ Early stopping at epoch {} (no improvement for {} epochs)",
                    epoch, config.patience
                );
                break;
            }
        }

        self.apply_weights(&best_weights)?;
        info!("✅ Restored best weights from epoch {}", tracker.best_epoch);
        Ok(tracker)
    }

    /// One optimizer pass over a batch. The readout head takes exact MSE
    /// gradients through Adam; the gate biases get a small clamped shift
    /// against the mean error. Returns the mean sample loss.
    fn train_batch(
        &mut self,
        sequences: &[Array2<f64>],
        targets: &[Array1<f64>],
        optimizer: &mut AdamOptimizer,
    ) -> f64 {
        let batch_size = sequences.len();
        let mut batch_loss = 0.0;
        let mut error_sum = 0.0;
        let grad_scale = 2.0 / (self.n_outputs * batch_size) as f64;

        for (window, target) in sequences.iter().zip(targets) {
            let hidden = self.run_layers(window);
            let prediction = self.w_out.dot(&hidden) + &self.b_out;
            let error = &prediction - target;

            batch_loss += error.iter().map(|e| e * e).sum::<f64>() / self.n_outputs as f64;
            error_sum += error.iter().sum::<f64>() / self.n_outputs as f64;

            for k in 0..self.n_outputs {
                let grad_w = &hidden * (error[k] * grad_scale);
                let update = optimizer.update(&format!("w_out_{}", k), &grad_w);
                let mut row = self.w_out.row_mut(k);
                row -= &update;
            }
            let grad_b = &error * grad_scale;
            let update = optimizer.update("b_out", &grad_b);
            self.b_out -= &update;
        }

        let mean_error = error_sum / batch_size as f64;
        let nudge = (optimizer.learning_rate * mean_error * 0.01).clamp(-0.1, 0.1);
        for layer in &mut self.layers {
            layer.nudge_biases(nudge);
        }

        batch_loss / batch_size as f64
    }

    /// Recursive rollout: predict one month, synthesize the next input row
    /// from the window's last row with the predicted targets written over
    /// its tail, slide the window forward, repeat. Returns exactly
    /// `horizon` rows of normalized target vectors.
    pub fn forecast(&self, window: &Array2<f64>, horizon: usize) -> Result<Array2<f64>> {
        if window.nrows() != self.sequence_length || window.ncols() != self.n_features {
            return Err(ForecastError::ModelConfiguration(format!(
                "Expected forecast window {}×{}, got {}×{}",
                self.sequence_length,
                self.n_features,
                window.nrows(),
                window.ncols()
            )));
        }

        let mut current = window.to_owned();
        let mut output = Array2::zeros((horizon, self.n_outputs));
        for step in 0..horizon {
            let prediction = self.predict(&current)?;
            output.row_mut(step).assign(&prediction);
            let next_row = synthesize_next_row(&current, &prediction);
            slide_window(&mut current, &next_row);
        }
        Ok(output)
    }

    pub fn to_weights(&self) -> ModelWeights {
        ModelWeights {
            layers: self.layers.iter().map(|l| l.to_layer_weights()).collect(),
            w_out: self.w_out.clone(),
            b_out: self.b_out.clone(),
            sequence_length: self.sequence_length,
            n_features: self.n_features,
            n_outputs: self.n_outputs,
            hidden_sizes: self.hidden_sizes.clone(),
        }
    }

    pub fn from_weights(weights: &ModelWeights) -> Result<Self> {
        if weights.hidden_sizes.is_empty() || weights.layers.len() != weights.hidden_sizes.len() {
            return Err(ForecastError::ModelConfiguration(format!(
                "Saved model has {} layers for {} hidden sizes",
                weights.layers.len(),
                weights.hidden_sizes.len()
            )));
        }
        let last_hidden = weights.hidden_sizes[weights.hidden_sizes.len() - 1];
        if weights.w_out.dim() != (weights.n_outputs, last_hidden)
            || weights.b_out.len() != weights.n_outputs
        {
            return Err(ForecastError::ModelConfiguration(
                "Saved readout weights do not match the model architecture".to_string(),
            ));
        }

        Ok(LstmForecaster {
            layers: weights.layers.iter().map(LstmCell::from_layer_weights).collect(),
            w_out: weights.w_out.clone(),
            b_out: weights.b_out.clone(),
            sequence_length: weights.sequence_length,
            n_features: weights.n_features,
            n_outputs: weights.n_outputs,
            hidden_sizes: weights.hidden_sizes.clone(),
        })
    }

    fn apply_weights(&mut self, weights: &ModelWeights) -> Result<()> {
        if weights.hidden_sizes != self.hidden_sizes
            || weights.n_features != self.n_features
            || weights.n_outputs != self.n_outputs
        {
            return Err(ForecastError::ModelConfiguration(
                "Weight snapshot does not match the model architecture".to_string(),
            ));
        }
        self.layers = weights.layers.iter().map(LstmCell::from_layer_weights).collect();
        self.w_out = weights.w_out.clone();
        self.b_out = weights.b_out.clone();
        Ok(())
    }
}

/// Next input row for the rollout: copy of the window's last row with the
/// trailing target positions replaced by the prediction. Driver columns
/// persist at their last observed values.
fn synthesize_next_row(window: &Array2<f64>, prediction: &Array1<f64>) -> Array1<f64> {
    let n_features = window.ncols();
    let n_outputs = prediction.len();
    let mut next = window.row(window.nrows() - 1).to_owned();
    next.slice_mut(s![n_features - n_outputs..]).assign(prediction);
    next
}

/// Drops the oldest row and appends `next_row`, in place.
fn slide_window(window: &mut Array2<f64>, next_row: &Array1<f64>) {
    let n_rows = window.nrows();
    for i in 0..n_rows - 1 {
        let src = window.row(i + 1).to_owned();
        window.row_mut(i).assign(&src);
    }
    window.row_mut(n_rows - 1).assign(next_row);
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn sample_window() -> Array2<f64> {
        Array2::from_shape_fn((6, 4), |(i, j)| ((i * 4 + j) as f64 * 0.37).sin().abs())
    }

    #[test]
    fn test_seeded_models_are_deterministic() {
        let a = LstmForecaster::new(6, 4, 1, &[8], Some(42)).unwrap();
        let b = LstmForecaster::new(6, 4, 1, &[8], Some(42)).unwrap();
        let window = sample_window();
        assert_eq!(a.predict(&window).unwrap(), b.predict(&window).unwrap());
    }

    #[test]
    fn test_predict_output_shape() {
        let model = LstmForecaster::new(6, 4, 2, &[8, 4], Some(1)).unwrap();
        let window = sample_window();
        let prediction = model.predict(&window).unwrap();
        assert_eq!(prediction.len(), 2);
        assert!(prediction.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_predict_rejects_wrong_window() {
        let model = LstmForecaster::new(6, 4, 1, &[8], Some(1)).unwrap();
        let too_short = Array2::zeros((5, 4));
        assert!(model.predict(&too_short).is_err());
        let too_narrow = Array2::zeros((6, 3));
        assert!(model.predict(&too_narrow).is_err());
    }

    #[test]
    fn test_invalid_configurations_rejected() {
        assert!(LstmForecaster::new(0, 4, 1, &[8], Some(1)).is_err());
        assert!(LstmForecaster::new(6, 4, 0, &[8], Some(1)).is_err());
        assert!(LstmForecaster::new(6, 4, 5, &[8], Some(1)).is_err());
        assert!(LstmForecaster::new(6, 4, 1, &[], Some(1)).is_err());
        assert!(LstmForecaster::new(6, 4, 1, &[8, 0], Some(1)).is_err());
    }

    #[test]
    fn test_synthesize_next_row_overwrites_tail() {
        let window = array![[1.0, 2.0, 3.0, 4.0], [5.0, 6.0, 7.0, 8.0]];
        let prediction = array![0.25];
        let next = synthesize_next_row(&window, &prediction);
        // drivers come from the last row, targets from the prediction
        assert_eq!(next, array![5.0, 6.0, 7.0, 0.25]);
    }

    #[test]
    fn test_slide_window_drops_oldest() {
        let mut window = array![[1.0, 1.0], [2.0, 2.0], [3.0, 3.0]];
        slide_window(&mut window, &array![4.0, 4.0]);
        assert_eq!(window, array![[2.0, 2.0], [3.0, 3.0], [4.0, 4.0]]);
    }

    #[test]
    fn test_forecast_returns_horizon_rows() {
        let model = LstmForecaster::new(6, 4, 2, &[8], Some(7)).unwrap();
        let window = sample_window();
        let forecast = model.forecast(&window, 6).unwrap();
        assert_eq!(forecast.dim(), (6, 2));
        assert!(forecast.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_training_reduces_loss() {
        // constant targets: the readout head must move toward the mean
        let sequences: Vec<Array2<f64>> = (0..20)
            .map(|k| Array2::from_shape_fn((6, 3), |(i, j)| ((k + i * 3 + j) as f64 * 0.21).sin().abs()))
            .collect();
        let targets: Vec<Array1<f64>> = (0..20).map(|_| array![0.5]).collect();

        let mut model = LstmForecaster::new(6, 3, 1, &[8], Some(99)).unwrap();
        let config = TrainConfig {
            epochs: 40,
            batch_size: 4,
            patience: 40,
            learning_rate: 0.01,
        };
        let tracker = model.train(&sequences, &targets, &config, "Commonwealth").unwrap();

        assert!(!tracker.history.is_empty());
        let first_loss = tracker.history[0].train_loss;
        assert!(
            tracker.best_loss < first_loss,
            "best {} should improve on first {}",
            tracker.best_loss,
            first_loss
        );
    }

    #[test]
    fn test_train_rejects_mismatched_pairs() {
        let mut model = LstmForecaster::new(6, 3, 1, &[8], Some(1)).unwrap();
        let config = TrainConfig {
            epochs: 1,
            batch_size: 4,
            patience: 1,
            learning_rate: 0.01,
        };
        let sequences = vec![Array2::zeros((6, 3))];
        let targets: Vec<Array1<f64>> = Vec::new();
        assert!(model.train(&sequences, &targets, &config, "Commonwealth").is_err());
        assert!(model.train(&[], &[], &config, "Commonwealth").is_err());
    }

    #[test]
    fn test_weights_round_trip_preserves_predictions() {
        let model = LstmForecaster::new(6, 4, 1, &[8, 4], Some(11)).unwrap();
        let restored = LstmForecaster::from_weights(&model.to_weights()).unwrap();
        let window = sample_window();
        assert_eq!(model.predict(&window).unwrap(), restored.predict(&window).unwrap());
        assert_eq!(model.num_parameters(), restored.num_parameters());
    }

    #[test]
    fn test_from_weights_rejects_bad_architecture() {
        let model = LstmForecaster::new(6, 4, 1, &[8], Some(11)).unwrap();
        let mut weights = model.to_weights();
        weights.hidden_sizes.push(16);
        assert!(LstmForecaster::from_weights(&weights).is_err());

        let mut weights = model.to_weights();
        weights.w_out = Array2::zeros((1, 3));
        assert!(LstmForecaster::from_weights(&weights).is_err());
    }
}
