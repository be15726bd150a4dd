//! Models - stacked LSTM regressor on ndarray
//!
//! Layout: LSTM layers (dropout after each while training) -> optional hidden
//! dense layer -> one linear output unit. The network maps a normalized
//! `(sequence_length, features)` window to the normalized next value of the
//! primary feature.

pub mod dense;
pub mod lstm;
pub mod optimizer;

pub use dense::{Activation, DenseGrads, DenseLayer};
pub use lstm::{LstmGrads, LstmLayer};
pub use optimizer::{Adam, AdamConfig};

use ndarray::{Array1, ArrayView2};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{ForecastError, Result};
use dense::DenseCache;
use lstm::LstmCache;

/// Shape and regularization of the network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Features per step
    pub input_size: usize,
    /// Hidden units per LSTM layer, bottom to top
    pub lstm_units: Vec<usize>,
    /// Fraction of LSTM outputs zeroed while training
    pub dropout: f64,
    /// Hidden dense width, 0 for none
    pub dense_units: usize,
    pub dense_activation: Activation,
    /// Initial bias of the output unit
    pub output_bias: f64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            input_size: 5,
            lstm_units: vec![50, 50],
            dropout: 0.2,
            dense_units: 25,
            dense_activation: Activation::Linear,
            output_bias: 0.5,
        }
    }
}

impl NetworkConfig {
    pub fn validate(&self) -> Result<()> {
        if self.input_size == 0 {
            return Err(ForecastError::ComputationError("input_size must be > 0".into()));
        }
        if self.lstm_units.is_empty() || self.lstm_units.contains(&0) {
            return Err(ForecastError::ComputationError(format!(
                "invalid LSTM layer sizes {:?}",
                self.lstm_units
            )));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(ForecastError::ComputationError(format!(
                "dropout {} outside [0, 1)",
                self.dropout
            )));
        }
        Ok(())
    }
}

/// Gradients for every layer of an `LstmNetwork`
#[derive(Debug, Clone)]
pub struct NetworkGrads {
    pub lstm: Vec<LstmGrads>,
    pub dense: Vec<DenseGrads>,
}

impl NetworkGrads {
    pub fn zeros_like(network: &LstmNetwork) -> Self {
        Self {
            lstm: network.lstm.iter().map(LstmGrads::zeros_like).collect(),
            dense: network.dense.iter().map(DenseGrads::zeros_like).collect(),
        }
    }

    pub fn global_norm(&self) -> f64 {
        let lstm: f64 = self.lstm.iter().map(LstmGrads::sum_squares).sum();
        let dense: f64 = self.dense.iter().map(DenseGrads::sum_squares).sum();
        (lstm + dense).sqrt()
    }

    pub fn scale(&mut self, factor: f64) {
        self.lstm.iter_mut().for_each(|g| g.scale(factor));
        self.dense.iter_mut().for_each(|g| g.scale(factor));
    }

    /// Rescale so the global norm is at most `max_norm`. Returns the norm before clipping.
    pub fn clip_global_norm(&mut self, max_norm: f64) -> f64 {
        let norm = self.global_norm();
        if max_norm > 0.0 && norm > max_norm {
            self.scale(max_norm / norm);
        }
        norm
    }
}

/// Intermediate values of one training forward pass
#[derive(Debug, Clone)]
pub struct ForwardTrace {
    steps: usize,
    lstm: Vec<LstmCache>,
    masks: Vec<Option<Vec<Array1<f64>>>>,
    dense: Vec<DenseCache>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LstmNetwork {
    pub config: NetworkConfig,
    pub lstm: Vec<LstmLayer>,
    /// Hidden dense layer (if any) followed by the output unit
    pub dense: Vec<DenseLayer>,
}

impl LstmNetwork {
    pub fn new<R: Rng + ?Sized>(config: NetworkConfig, rng: &mut R) -> Result<Self> {
        config.validate()?;

        let mut lstm = Vec::with_capacity(config.lstm_units.len());
        let mut width = config.input_size;
        for &units in &config.lstm_units {
            lstm.push(LstmLayer::new(width, units, rng));
            width = units;
        }

        let mut dense = Vec::with_capacity(2);
        if config.dense_units > 0 {
            dense.push(DenseLayer::new(width, config.dense_units, config.dense_activation, rng));
            width = config.dense_units;
        }
        let mut output = DenseLayer::new(width, 1, Activation::Linear, rng);
        output.b.fill(config.output_bias);
        dense.push(output);

        Ok(Self { config, lstm, dense })
    }

    pub fn input_size(&self) -> usize {
        self.config.input_size
    }

    pub fn parameter_count(&self) -> usize {
        let lstm: usize = self
            .lstm
            .iter()
            .map(|l| l.w_x.len() + l.w_h.len() + l.b.len())
            .sum();
        let dense: usize = self.dense.iter().map(|d| d.w.len() + d.b.len()).sum();
        lstm + dense
    }

    fn check_window(&self, window: &ArrayView2<'_, f64>) -> Result<()> {
        if window.nrows() == 0 || window.ncols() != self.input_size() {
            return Err(ForecastError::ArtifactMismatch(format!(
                "window shape ({}, {}) does not fit a network with {} inputs",
                window.nrows(),
                window.ncols(),
                self.input_size()
            )));
        }
        Ok(())
    }

    fn steps(window: &ArrayView2<'_, f64>) -> Vec<Array1<f64>> {
        window.outer_iter().map(|row| row.to_owned()).collect()
    }

    /// Inference pass, dropout disabled
    pub fn predict(&self, window: ArrayView2<'_, f64>) -> Result<f64> {
        self.check_window(&window)?;

        let mut seq = Self::steps(&window);
        for layer in &self.lstm {
            seq = layer.forward(&seq);
        }
        let mut x = seq
            .pop()
            .ok_or_else(|| ForecastError::ComputationError("empty sequence".into()))?;
        for layer in &self.dense {
            x = layer.forward(&x);
        }
        Ok(x[0])
    }

    /// Training pass with inverted dropout; keeps what `backward` needs
    pub fn forward_train<R: Rng + ?Sized>(
        &self,
        window: ArrayView2<'_, f64>,
        rng: &mut R,
    ) -> Result<(f64, ForwardTrace)> {
        self.check_window(&window)?;

        let p = self.config.dropout;
        let mut seq = Self::steps(&window);
        let steps = seq.len();
        let mut lstm_caches = Vec::with_capacity(self.lstm.len());
        let mut masks = Vec::with_capacity(self.lstm.len());

        for layer in &self.lstm {
            let (mut out, cache) = layer.forward_cached(&seq);
            let mask = if p > 0.0 {
                let m: Vec<Array1<f64>> = out
                    .iter()
                    .map(|_| dropout_mask(layer.hidden_size, p, rng))
                    .collect();
                for (o, m) in out.iter_mut().zip(&m) {
                    *o *= m;
                }
                Some(m)
            } else {
                None
            };
            lstm_caches.push(cache);
            masks.push(mask);
            seq = out;
        }

        let mut x = seq
            .pop()
            .ok_or_else(|| ForecastError::ComputationError("empty sequence".into()))?;
        let mut dense_caches = Vec::with_capacity(self.dense.len());
        for layer in &self.dense {
            let (y, cache) = layer.forward_cached(&x);
            dense_caches.push(cache);
            x = y;
        }

        let trace = ForwardTrace {
            steps,
            lstm: lstm_caches,
            masks,
            dense: dense_caches,
        };
        Ok((x[0], trace))
    }

    /// Accumulate gradients for d(loss)/d(output) = `d_output`
    pub fn backward(&self, trace: &ForwardTrace, d_output: f64, grads: &mut NetworkGrads) {
        let mut grad = Array1::from_elem(1, d_output);
        for (i, layer) in self.dense.iter().enumerate().rev() {
            grad = layer.backward(&trace.dense[i], &grad, &mut grads.dense[i]);
        }

        // only the last step of the top layer feeds the head
        let top = self.lstm.len() - 1;
        let mut d_seq = vec![Array1::zeros(self.lstm[top].hidden_size); trace.steps];
        d_seq[trace.steps - 1] = grad;

        for l in (0..self.lstm.len()).rev() {
            if let Some(masks) = &trace.masks[l] {
                for (d, m) in d_seq.iter_mut().zip(masks) {
                    *d *= m;
                }
            }
            d_seq = self.lstm[l].backward(&trace.lstm[l], &d_seq, &mut grads.lstm[l]);
        }
    }
}

fn dropout_mask<R: Rng + ?Sized>(size: usize, p: f64, rng: &mut R) -> Array1<f64> {
    let keep = 1.0 / (1.0 - p);
    Array1::from_shape_fn(size, |_| if rng.gen::<f64>() < p { 0.0 } else { keep })
}
