//! ML Engine - next-step price forecasting with a recurrent network
//!
//! Este módulo implementa:
//! - Feature engineering sobre series de precios
//! - Escalado min-max con estado explícito
//! - Ventanas de secuencia cronológicas
//! - Red LSTM entrenada con BPTT + Adam
//! - Artefactos de modelo persistentes

pub mod config_bridge;
pub mod dataset;
pub mod features;
pub mod models;
pub mod persistence;
pub mod predictor;
pub mod scaler;
pub mod training;

pub use dataset::{last_window, make_windows, SequenceDataset};
pub use features::{FeatureConfig, FeatureEngine, FeatureMatrix, FeatureSet, FeatureVector};
pub use models::{Activation, LstmNetwork, NetworkConfig};
pub use persistence::{ArtifactStore, ModelArtifact};
pub use predictor::{EvaluationMetrics, ForecastModel, ModelState};
pub use scaler::{MinMaxScaler, ScalerState};
pub use training::{TrainingConfig, TrainingHistory, TrainingPipeline};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Configuración global del ML Engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MLEngineConfig {
    pub features: FeatureConfig,
    /// Steps per input window
    pub sequence_length: usize,
    pub network: NetworkConfig,
    pub training: TrainingConfig,
}

impl Default for MLEngineConfig {
    fn default() -> Self {
        Self {
            features: FeatureConfig::default(),
            sequence_length: 60,
            network: NetworkConfig::default(),
            training: TrainingConfig::default(),
        }
    }
}

impl MLEngineConfig {
    pub fn feature_engine(&self) -> FeatureEngine {
        FeatureEngine::new(self.features.clone())
    }

    pub fn forecast_model(&self) -> ForecastModel {
        ForecastModel::new(self.network.clone())
    }
}

/// Normalized training windows plus the scaler fitted to produce them
#[derive(Debug, Clone)]
pub struct PreparedData {
    pub scaler: ScalerState,
    pub dataset: SequenceDataset,
}

/// Fit a fresh scaler on `matrix` and cut it into windows of `sequence_length`
pub fn prepare_training_data(matrix: &FeatureMatrix, sequence_length: usize) -> Result<PreparedData> {
    features::ensure_rows(matrix, sequence_length)?;
    let mut scaler = MinMaxScaler::new();
    let scaled = scaler.fit_transform(matrix)?;
    let dataset = make_windows(scaled.view(), sequence_length)?;
    Ok(PreparedData {
        scaler: scaler.into_state()?,
        dataset,
    })
}

/// Scale `matrix` with an existing artifact's scaler and window it for inference
pub fn prepare_inference_data(
    artifact: &ModelArtifact,
    matrix: &FeatureMatrix,
) -> Result<SequenceDataset> {
    let sequence_length = artifact.sequence_length();
    features::ensure_rows(matrix, sequence_length)?;
    let scaled = artifact.scaler.transform_matrix(matrix)?;
    make_windows(scaled.view(), sequence_length)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ForecastError;

    #[test]
    fn test_prepare_training_data() {
        let engine = FeatureEngine::new(FeatureConfig {
            feature_set: FeatureSet::PriceOnly,
            ..FeatureConfig::default()
        });
        let prices: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let matrix = engine.compute_from_prices(&prices).unwrap();

        let prepared = prepare_training_data(&matrix, 10).unwrap();
        assert_eq!(prepared.dataset.len(), 20);
        assert_eq!(prepared.scaler.min, vec![100.0]);
        assert_eq!(prepared.scaler.max, vec![129.0]);
        assert!(prepared.dataset.targets.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_prepare_training_data_insufficient() {
        let engine = FeatureEngine::new(FeatureConfig {
            feature_set: FeatureSet::PriceOnly,
            ..FeatureConfig::default()
        });
        let matrix = engine.compute_from_prices(&[1.0, 2.0, 3.0]).unwrap();
        assert!(matches!(
            prepare_training_data(&matrix, 3),
            Err(ForecastError::InsufficientHistory { .. })
        ));
    }
}
