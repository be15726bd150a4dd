//! Forecast model - Untrained / Trained wrapper around a model artifact
//!
//! All inference goes through a `ModelArtifact`, so a network is never used
//! with a scaler it was not trained with.

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::error::{ForecastError, Result};
use crate::ml_engine::dataset::SequenceDataset;
use crate::ml_engine::features::FeatureVector;
use crate::ml_engine::models::{LstmNetwork, NetworkConfig};
use crate::ml_engine::persistence::ModelArtifact;
use crate::ml_engine::scaler::ScalerState;
use crate::ml_engine::training::{TrainingConfig, TrainingHistory, TrainingPipeline};

/// Error metrics in original price units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    pub mse: f64,
    pub rmse: f64,
    pub mae: f64,
    pub samples: usize,
}

impl EvaluationMetrics {
    pub fn from_pairs(actual: &[f64], predicted: &[f64]) -> Result<Self> {
        if actual.len() != predicted.len() {
            return Err(ForecastError::ComputationError(format!(
                "{} actual values vs {} predictions",
                actual.len(),
                predicted.len()
            )));
        }
        if actual.is_empty() {
            return Err(ForecastError::InsufficientHistory {
                required: 1,
                available: 0,
            });
        }

        let n = actual.len() as f64;
        let (sse, sae) = actual
            .iter()
            .zip(predicted)
            .fold((0.0, 0.0), |(sse, sae), (a, p)| {
                let e = a - p;
                (sse + e * e, sae + e.abs())
            });
        let mse = sse / n;
        let metrics = Self {
            mse,
            rmse: mse.sqrt(),
            mae: sae / n,
            samples: actual.len(),
        };
        if !metrics.is_finite() {
            return Err(ForecastError::ComputationError("non-finite error metrics".into()));
        }
        Ok(metrics)
    }

    pub fn is_finite(&self) -> bool {
        self.mse.is_finite() && self.rmse.is_finite() && self.mae.is_finite()
    }
}

#[derive(Debug, Clone)]
pub enum ModelState {
    Untrained,
    Trained(Arc<ModelArtifact>),
}

pub struct ForecastModel {
    network_config: NetworkConfig,
    state: ModelState,
}

impl ForecastModel {
    pub fn new(network_config: NetworkConfig) -> Self {
        Self {
            network_config,
            state: ModelState::Untrained,
        }
    }

    /// Wrap an already trained (e.g. loaded) artifact
    pub fn from_artifact(artifact: Arc<ModelArtifact>) -> Self {
        Self {
            network_config: artifact.network.config.clone(),
            state: ModelState::Trained(artifact),
        }
    }

    pub fn state(&self) -> &ModelState {
        &self.state
    }

    pub fn is_trained(&self) -> bool {
        matches!(self.state, ModelState::Trained(_))
    }

    pub fn artifact(&self) -> Result<&Arc<ModelArtifact>> {
        match &self.state {
            ModelState::Trained(artifact) => Ok(artifact),
            ModelState::Untrained => Err(ForecastError::ModelNotTrained),
        }
    }

    /// Fit a fresh network on `dataset` (already normalized with `scaler`).
    /// Replaces any previously trained state.
    pub fn train(
        &mut self,
        dataset: &SequenceDataset,
        scaler: ScalerState,
        config: &TrainingConfig,
    ) -> Result<TrainingHistory> {
        if dataset.is_empty() {
            return Err(ForecastError::InsufficientHistory {
                required: 1,
                available: 0,
            });
        }
        if scaler.width() != dataset.n_features() {
            return Err(ForecastError::ArtifactMismatch(format!(
                "scaler fitted on {} features, dataset has {}",
                scaler.width(),
                dataset.n_features()
            )));
        }

        let mut rng = config.rng();
        let network_config = NetworkConfig {
            input_size: dataset.n_features(),
            ..self.network_config.clone()
        };
        let mut network = LstmNetwork::new(network_config, &mut rng)?;
        info!(
            "Initialized LSTM {:?} + dense {} ({} parameters)",
            network.config.lstm_units,
            network.config.dense_units,
            network.parameter_count()
        );

        let history = TrainingPipeline::new(config.clone()).fit(&mut network, dataset, &mut rng)?;
        let artifact = ModelArtifact::new(network, scaler, dataset.sequence_length(), Some(&history))?;
        self.state = ModelState::Trained(Arc::new(artifact));
        Ok(history)
    }

    fn check_window(artifact: &ModelArtifact, window: &ArrayView2<'_, f64>) -> Result<()> {
        let expected = (artifact.sequence_length(), artifact.scaler.width());
        if window.dim() != expected {
            return Err(ForecastError::ArtifactMismatch(format!(
                "window shape {:?}, model expects {:?}",
                window.dim(),
                expected
            )));
        }
        Ok(())
    }

    /// Normalized next-step value of the primary feature for one window
    pub fn predict(&self, window: ArrayView2<'_, f64>) -> Result<f64> {
        let artifact = self.artifact()?;
        Self::check_window(artifact, &window)?;
        artifact.network.predict(window)
    }

    /// `predict` mapped back to price units
    pub fn predict_price(&self, window: ArrayView2<'_, f64>) -> Result<f64> {
        let scaled = self.predict(window)?;
        let artifact = self.artifact()?;
        Ok(artifact
            .scaler
            .inverse_transform_value(FeatureVector::PRIMARY_INDEX, scaled))
    }

    /// Normalized predictions for every window of `dataset`
    pub fn predict_batch(&self, dataset: &SequenceDataset) -> Result<Vec<f64>> {
        let artifact = self.artifact()?;
        (0..dataset.len())
            .map(|i| {
                let window = dataset.window(i);
                Self::check_window(artifact, &window)?;
                artifact.network.predict(window)
            })
            .collect()
    }

    /// MSE / RMSE / MAE over every window, in price units
    pub fn evaluate(&self, dataset: &SequenceDataset) -> Result<EvaluationMetrics> {
        let artifact = self.artifact()?;
        let predictions = self.predict_batch(dataset)?;
        let scaler = &artifact.scaler;

        let unscale = |v: f64| scaler.inverse_transform_value(FeatureVector::PRIMARY_INDEX, v);
        let actual: Vec<f64> = dataset.targets.iter().map(|&v| unscale(v)).collect();
        let predicted: Vec<f64> = predictions.into_iter().map(unscale).collect();
        EvaluationMetrics::from_pairs(&actual, &predicted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml_engine::dataset::make_windows;
    use crate::ml_engine::models::Activation;
    use ndarray::Array2;

    fn network_config() -> NetworkConfig {
        NetworkConfig {
            input_size: 1,
            lstm_units: vec![4],
            dropout: 0.0,
            dense_units: 0,
            dense_activation: Activation::Linear,
            output_bias: 0.5,
        }
    }

    fn training_config() -> TrainingConfig {
        TrainingConfig {
            epochs: 3,
            batch_size: 8,
            seed: Some(7),
            ..TrainingConfig::default()
        }
    }

    fn price_scaler() -> ScalerState {
        ScalerState {
            feature_names: vec!["price".into()],
            min: vec![100.0],
            max: vec![200.0],
        }
    }

    fn dataset() -> SequenceDataset {
        let data = Array2::from_shape_fn((40, 1), |(i, _)| (i as f64 / 40.0).powi(2));
        make_windows(data.view(), 5).unwrap()
    }

    #[test]
    fn test_untrained_model_refuses_work() {
        let model = ForecastModel::new(network_config());
        let ds = dataset();
        assert!(!model.is_trained());
        assert_eq!(model.predict(ds.window(0)).unwrap_err(), ForecastError::ModelNotTrained);
        assert_eq!(model.evaluate(&ds).unwrap_err(), ForecastError::ModelNotTrained);
        assert!(model.artifact().is_err());
    }

    #[test]
    fn test_train_then_predict() {
        let mut model = ForecastModel::new(network_config());
        let ds = dataset();
        let history = model.train(&ds, price_scaler(), &training_config()).unwrap();
        assert_eq!(history.epochs.len(), 3);
        assert!(model.is_trained());

        let scaled = model.predict(ds.window(0)).unwrap();
        let price = model.predict_price(ds.window(0)).unwrap();
        assert!((price - (100.0 + scaled * 100.0)).abs() < 1e-9);
        assert_eq!(model.artifact().unwrap().sequence_length(), 5);
    }

    #[test]
    fn test_wrong_window_shape() {
        let mut model = ForecastModel::new(network_config());
        let ds = dataset();
        model.train(&ds, price_scaler(), &training_config()).unwrap();
        let short = Array2::<f64>::zeros((4, 1));
        assert!(matches!(
            model.predict(short.view()),
            Err(ForecastError::ArtifactMismatch(_))
        ));
    }

    #[test]
    fn test_evaluate_is_deterministic_and_in_price_units() {
        let mut model = ForecastModel::new(network_config());
        let ds = dataset();
        model.train(&ds, price_scaler(), &training_config()).unwrap();

        let a = model.evaluate(&ds).unwrap();
        let b = model.evaluate(&ds).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.samples, ds.len());
        assert!((a.rmse - a.mse.sqrt()).abs() < 1e-12);
        assert!(a.mae <= a.rmse + 1e-12);
    }

    #[test]
    fn test_scaler_width_must_match_dataset() {
        let mut model = ForecastModel::new(network_config());
        let scaler = ScalerState {
            feature_names: vec!["price".into(), "return".into()],
            min: vec![0.0, 0.0],
            max: vec![1.0, 1.0],
        };
        assert!(matches!(
            model.train(&dataset(), scaler, &training_config()),
            Err(ForecastError::ArtifactMismatch(_))
        ));
    }

    #[test]
    fn test_metrics_from_pairs() {
        let m = EvaluationMetrics::from_pairs(&[1.0, 2.0, 3.0], &[1.0, 3.0, 1.0]).unwrap();
        assert!((m.mse - 5.0 / 3.0).abs() < 1e-12);
        assert!((m.mae - 1.0).abs() < 1e-12);
        assert!(EvaluationMetrics::from_pairs(&[], &[]).is_err());
        assert!(EvaluationMetrics::from_pairs(&[1.0], &[f64::NAN]).is_err());
    }
}
