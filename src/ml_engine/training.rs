//! Training Pipeline - mini-batch Adam over chronological sequence windows

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ForecastError, Result};
use crate::ml_engine::dataset::SequenceDataset;
use crate::ml_engine::models::{Adam, AdamConfig, LstmNetwork, NetworkGrads};

/// Knobs for one training run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub batch_size: usize,
    /// Most recent fraction of windows held out for validation
    pub validation_fraction: f64,
    /// Shuffle the training windows each epoch (validation windows never move)
    pub shuffle: bool,
    /// Epochs without validation improvement before stopping, 0 disables
    pub early_stopping_patience: usize,
    pub optimizer: AdamConfig,
    /// Global gradient norm ceiling, 0 disables clipping
    pub clip_norm: f64,
    /// Fixed seed for weight init, dropout and shuffling
    pub seed: Option<u64>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 50,
            batch_size: 32,
            validation_fraction: 0.2,
            shuffle: true,
            early_stopping_patience: 0,
            optimizer: AdamConfig::default(),
            clip_norm: 5.0,
            seed: None,
        }
    }
}

impl TrainingConfig {
    pub fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 || self.batch_size == 0 {
            return Err(ForecastError::ComputationError(
                "epochs and batch_size must be > 0".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.validation_fraction) {
            return Err(ForecastError::ComputationError(format!(
                "validation_fraction {} outside [0, 1)",
                self.validation_fraction
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    /// Mean squared error on normalized targets, dropout active
    pub train_loss: f64,
    pub val_loss: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochMetrics>,
    /// Epoch whose weights were kept
    pub best_epoch: usize,
    pub stopped_early: bool,
    pub train_samples: usize,
    pub val_samples: usize,
}

impl TrainingHistory {
    pub fn final_train_loss(&self) -> Option<f64> {
        self.epochs.last().map(|e| e.train_loss)
    }

    pub fn final_val_loss(&self) -> Option<f64> {
        self.epochs.last().and_then(|e| e.val_loss)
    }
}

/// Drives epochs over a network in place
pub struct TrainingPipeline {
    config: TrainingConfig,
}

impl TrainingPipeline {
    pub fn new(config: TrainingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Split `dataset` chronologically and fit `network` on the older part.
    pub fn fit(
        &self,
        network: &mut LstmNetwork,
        dataset: &SequenceDataset,
        rng: &mut StdRng,
    ) -> Result<TrainingHistory> {
        self.config.validate()?;
        if dataset.is_empty() {
            return Err(ForecastError::InsufficientHistory {
                required: 1,
                available: 0,
            });
        }

        let (train, val) = if self.config.validation_fraction > 0.0 {
            dataset.temporal_split(self.config.validation_fraction)?
        } else {
            (dataset.clone(), empty_like(dataset))
        };

        info!(
            "🧠 Training LSTM: {} train / {} validation windows, {} epochs, batch {}",
            train.len(),
            val.len(),
            self.config.epochs,
            self.config.batch_size
        );

        let mut optimizer = Adam::new(self.config.optimizer, network);
        let mut order: Vec<usize> = (0..train.len()).collect();
        let mut history = TrainingHistory {
            train_samples: train.len(),
            val_samples: val.len(),
            ..Default::default()
        };

        let patience = self.config.early_stopping_patience;
        let mut best: Option<(f64, LstmNetwork)> = None;
        let mut since_best = 0usize;

        for epoch in 1..=self.config.epochs {
            if self.config.shuffle {
                order.shuffle(rng);
            }

            let mut loss_sum = 0.0;
            for batch in order.chunks(self.config.batch_size) {
                loss_sum += self.train_batch(network, &mut optimizer, &train, batch, rng)?;
            }
            let train_loss = loss_sum / train.len() as f64;

            let val_loss = if val.is_empty() {
                None
            } else {
                Some(mse(network, &val)?)
            };

            if !train_loss.is_finite() || val_loss.map_or(false, |v| !v.is_finite()) {
                return Err(ForecastError::ComputationError(format!(
                    "training diverged at epoch {}",
                    epoch
                )));
            }

            debug!(
                "Epoch {}/{}: loss={:.6} val_loss={}",
                epoch,
                self.config.epochs,
                train_loss,
                val_loss.map_or_else(|| "-".to_string(), |v| format!("{:.6}", v))
            );
            history.epochs.push(EpochMetrics {
                epoch,
                train_loss,
                val_loss,
            });
            history.best_epoch = epoch;

            if patience == 0 {
                continue;
            }
            if let Some(v) = val_loss {
                let improved = best.as_ref().map_or(true, |(best_loss, _)| v < *best_loss);
                if improved {
                    best = Some((v, network.clone()));
                    since_best = 0;
                } else {
                    since_best += 1;
                    if since_best >= patience {
                        history.stopped_early = true;
                        break;
                    }
                }
            }
        }

        if let Some((best_loss, weights)) = best {
            history.best_epoch = history
                .epochs
                .iter()
                .find(|e| e.val_loss == Some(best_loss))
                .map_or(history.best_epoch, |e| e.epoch);
            *network = weights;
        }

        info!(
            "✅ Training finished after {} epochs (best epoch {}, final loss {:.6})",
            history.epochs.len(),
            history.best_epoch,
            history.final_train_loss().unwrap_or(f64::NAN)
        );
        Ok(history)
    }

    /// One optimizer step. Returns the summed squared error of the batch.
    fn train_batch(
        &self,
        network: &mut LstmNetwork,
        optimizer: &mut Adam,
        data: &SequenceDataset,
        batch: &[usize],
        rng: &mut StdRng,
    ) -> Result<f64> {
        let mut grads = NetworkGrads::zeros_like(network);
        let mut sse = 0.0;
        let n = batch.len() as f64;

        for &i in batch {
            let (pred, trace) = network.forward_train(data.window(i), rng)?;
            let err = pred - data.targets[i];
            sse += err * err;
            network.backward(&trace, 2.0 * err / n, &mut grads);
        }

        grads.clip_global_norm(self.config.clip_norm);
        optimizer.step(network, &grads);
        Ok(sse)
    }
}

/// Mean squared error of inference predictions on normalized targets
pub fn mse(network: &LstmNetwork, data: &SequenceDataset) -> Result<f64> {
    if data.is_empty() {
        return Err(ForecastError::InsufficientHistory {
            required: 1,
            available: 0,
        });
    }
    let mut sse = 0.0;
    for i in 0..data.len() {
        let err = network.predict(data.window(i))? - data.targets[i];
        sse += err * err;
    }
    Ok(sse / data.len() as f64)
}

fn empty_like(dataset: &SequenceDataset) -> SequenceDataset {
    SequenceDataset {
        windows: ndarray::Array3::zeros((0, dataset.sequence_length(), dataset.n_features())),
        targets: ndarray::Array1::zeros(0),
    }
}
