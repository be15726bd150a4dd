//! ML Persistence - trained model artifacts on disk
//!
//! An artifact is two co-located JSON files written together:
//! `network.json` (metadata + parameters) and `scaler.json` (fitted min/max
//! plus the SHA-256 of `network.json`). Loading refuses any pair that was not
//! produced by the same training run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

use crate::error::{ForecastError, Result};
use crate::ml_engine::features::FeatureSet;
use crate::ml_engine::models::LstmNetwork;
use crate::ml_engine::scaler::ScalerState;
use crate::ml_engine::training::TrainingHistory;

pub const ARTIFACT_VERSION: &str = "1.0";
pub const NETWORK_FILE: &str = "network.json";
pub const SCALER_FILE: &str = "scaler.json";

/// Condensed `TrainingHistory` kept with the artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub epochs_run: usize,
    pub best_epoch: usize,
    pub stopped_early: bool,
    pub final_train_loss: Option<f64>,
    pub final_val_loss: Option<f64>,
    pub train_samples: usize,
    pub val_samples: usize,
}

impl From<&TrainingHistory> for TrainingSummary {
    fn from(h: &TrainingHistory) -> Self {
        Self {
            epochs_run: h.epochs.len(),
            best_epoch: h.best_epoch,
            stopped_early: h.stopped_early,
            final_train_loss: h.final_train_loss(),
            final_val_loss: h.final_val_loss(),
            train_samples: h.train_samples,
            val_samples: h.val_samples,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub artifact_id: Uuid,
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub feature_set: FeatureSet,
    pub feature_names: Vec<String>,
    pub sequence_length: usize,
    pub training: Option<TrainingSummary>,
}

/// Network and scaler that were fitted together
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub metadata: ArtifactMetadata,
    pub network: LstmNetwork,
    pub scaler: ScalerState,
}

impl ModelArtifact {
    pub fn new(
        network: LstmNetwork,
        scaler: ScalerState,
        sequence_length: usize,
        history: Option<&TrainingHistory>,
    ) -> Result<Self> {
        let feature_set = FeatureSet::from_names(&scaler.feature_names).ok_or_else(|| {
            ForecastError::ArtifactMismatch(format!(
                "unknown feature layout {:?}",
                scaler.feature_names
            ))
        })?;

        let artifact = Self {
            metadata: ArtifactMetadata {
                artifact_id: Uuid::new_v4(),
                version: ARTIFACT_VERSION.to_string(),
                created_at: Utc::now(),
                feature_set,
                feature_names: scaler.feature_names.clone(),
                sequence_length,
                training: history.map(TrainingSummary::from),
            },
            network,
            scaler,
        };
        artifact.validate()?;
        Ok(artifact)
    }

    pub fn artifact_id(&self) -> Uuid {
        self.metadata.artifact_id
    }

    pub fn feature_set(&self) -> FeatureSet {
        self.metadata.feature_set
    }

    pub fn sequence_length(&self) -> usize {
        self.metadata.sequence_length
    }

    /// Internal consistency between metadata, scaler and network
    pub fn validate(&self) -> Result<()> {
        let meta = &self.metadata;
        if meta.sequence_length == 0 {
            return Err(ForecastError::ArtifactMismatch("sequence_length is 0".into()));
        }
        let expected: Vec<&str> = meta.feature_set.feature_names().to_vec();
        if meta.feature_names != expected {
            return Err(ForecastError::ArtifactMismatch(format!(
                "feature set {} expects {:?}, metadata lists {:?}",
                meta.feature_set, expected, meta.feature_names
            )));
        }
        if self.scaler.feature_names != meta.feature_names {
            return Err(ForecastError::ArtifactMismatch(format!(
                "scaler features {:?} differ from network features {:?}",
                self.scaler.feature_names, meta.feature_names
            )));
        }
        let names = self.scaler.feature_names.len();
        if self.scaler.min.len() != names || self.scaler.max.len() != names {
            return Err(ForecastError::ArtifactMismatch("scaler min/max lengths differ".into()));
        }
        if self.scaler.width() != self.network.input_size() {
            return Err(ForecastError::ArtifactMismatch(format!(
                "scaler width {} but network expects {} inputs",
                self.scaler.width(),
                self.network.input_size()
            )));
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct NetworkFile {
    metadata: ArtifactMetadata,
    network: LstmNetwork,
}

#[derive(Serialize, Deserialize)]
struct ScalerFile {
    artifact_id: Uuid,
    scaler: ScalerState,
    network_sha256: String,
}

/// Directory holding one artifact
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn network_path(&self) -> PathBuf {
        self.dir.join(NETWORK_FILE)
    }

    pub fn scaler_path(&self) -> PathBuf {
        self.dir.join(SCALER_FILE)
    }

    pub fn exists(&self) -> bool {
        self.network_path().exists() && self.scaler_path().exists()
    }

    pub fn save(&self, artifact: &ModelArtifact) -> Result<()> {
        artifact.validate()?;
        fs::create_dir_all(&self.dir)?;

        let network_json = serde_json::to_vec_pretty(&NetworkFile {
            metadata: artifact.metadata.clone(),
            network: artifact.network.clone(),
        })?;
        let scaler_json = serde_json::to_vec_pretty(&ScalerFile {
            artifact_id: artifact.artifact_id(),
            scaler: artifact.scaler.clone(),
            network_sha256: sha256_hex(&network_json),
        })?;

        fs::write(self.network_path(), network_json)?;
        fs::write(self.scaler_path(), scaler_json)?;

        info!(
            "💾 Model artifact {} saved to {}",
            artifact.artifact_id(),
            self.dir.display()
        );
        Ok(())
    }

    pub fn load(&self) -> Result<ModelArtifact> {
        let network_bytes = read_required(&self.network_path())?;
        let scaler_bytes = read_required(&self.scaler_path())?;

        let scaler_file: ScalerFile = serde_json::from_slice(&scaler_bytes)?;
        let checksum = sha256_hex(&network_bytes);
        if checksum != scaler_file.network_sha256 {
            return Err(ForecastError::ArtifactMismatch(format!(
                "{} checksum {} does not match {} ({})",
                NETWORK_FILE, checksum, SCALER_FILE, scaler_file.network_sha256
            )));
        }

        let network_file: NetworkFile = serde_json::from_slice(&network_bytes)?;
        if network_file.metadata.artifact_id != scaler_file.artifact_id {
            return Err(ForecastError::ArtifactMismatch(format!(
                "network artifact {} paired with scaler of artifact {}",
                network_file.metadata.artifact_id, scaler_file.artifact_id
            )));
        }

        let artifact = ModelArtifact {
            metadata: network_file.metadata,
            network: network_file.network,
            scaler: scaler_file.scaler,
        };
        artifact.validate()?;

        info!(
            "📂 Model artifact {} loaded from {} (version {}, {} features, L={})",
            artifact.artifact_id(),
            self.dir.display(),
            artifact.metadata.version,
            artifact.scaler.width(),
            artifact.sequence_length()
        );
        Ok(artifact)
    }

    /// Load and require the artifact to have been trained on `feature_set`
    pub fn load_for(&self, feature_set: FeatureSet) -> Result<ModelArtifact> {
        let artifact = self.load()?;
        if artifact.feature_set() != feature_set {
            return Err(ForecastError::ArtifactMismatch(format!(
                "artifact trained on {} features, configured for {}",
                artifact.feature_set(),
                feature_set
            )));
        }
        Ok(artifact)
    }
}

fn read_required(path: &Path) -> Result<Vec<u8>> {
    if !path.exists() {
        return Err(ForecastError::ArtifactMismatch(format!(
            "missing artifact file {}",
            path.display()
        )));
    }
    Ok(fs::read(path)?)
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml_engine::models::{Activation, NetworkConfig};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn artifact(feature_set: FeatureSet) -> ModelArtifact {
        let width = feature_set.width();
        let cfg = NetworkConfig {
            input_size: width,
            lstm_units: vec![3],
            dropout: 0.0,
            dense_units: 2,
            dense_activation: Activation::Linear,
            output_bias: 0.5,
        };
        let network = LstmNetwork::new(cfg, &mut StdRng::seed_from_u64(1)).unwrap();
        let scaler = ScalerState {
            feature_names: feature_set.feature_names().iter().map(|s| s.to_string()).collect(),
            min: vec![0.0; width],
            max: vec![10.0; width],
        };
        ModelArtifact::new(network, scaler, 4, None).unwrap()
    }

    fn temp_store(name: &str) -> ArtifactStore {
        let dir = std::env::temp_dir().join(format!("portafi-{}-{}", name, Uuid::new_v4()));
        ArtifactStore::new(dir)
    }

    #[test]
    fn test_save_load_round_trip() {
        let store = temp_store("roundtrip");
        let original = artifact(FeatureSet::Engineered);
        assert!(!store.exists());
        store.save(&original).unwrap();
        assert!(store.exists());

        let loaded = store.load().unwrap();
        assert_eq!(loaded, original);
        let _ = fs::remove_dir_all(store.dir());
    }

    #[test]
    fn test_missing_scaler_file() {
        let store = temp_store("missing");
        store.save(&artifact(FeatureSet::Engineered)).unwrap();
        fs::remove_file(store.scaler_path()).unwrap();
        assert!(matches!(store.load(), Err(ForecastError::ArtifactMismatch(_))));
        let _ = fs::remove_dir_all(store.dir());
    }

    #[test]
    fn test_scaler_from_other_run_is_rejected() {
        let a = temp_store("a");
        let b = temp_store("b");
        a.save(&artifact(FeatureSet::Engineered)).unwrap();
        b.save(&artifact(FeatureSet::Engineered)).unwrap();
        fs::copy(b.scaler_path(), a.scaler_path()).unwrap();

        assert!(matches!(a.load(), Err(ForecastError::ArtifactMismatch(_))));
        let _ = fs::remove_dir_all(a.dir());
        let _ = fs::remove_dir_all(b.dir());
    }

    #[test]
    fn test_tampered_network_is_rejected() {
        let store = temp_store("tamper");
        store.save(&artifact(FeatureSet::PriceOnly)).unwrap();
        let mut text = fs::read_to_string(store.network_path()).unwrap();
        text.push('\n');
        fs::write(store.network_path(), text).unwrap();
        assert!(matches!(store.load(), Err(ForecastError::ArtifactMismatch(_))));
        let _ = fs::remove_dir_all(store.dir());
    }

    #[test]
    fn test_load_for_checks_feature_set() {
        let store = temp_store("featureset");
        store.save(&artifact(FeatureSet::PriceOnly)).unwrap();
        assert!(store.load_for(FeatureSet::PriceOnly).is_ok());
        assert!(matches!(
            store.load_for(FeatureSet::Engineered),
            Err(ForecastError::ArtifactMismatch(_))
        ));
        let _ = fs::remove_dir_all(store.dir());
    }

    #[test]
    fn test_width_mismatch_rejected_at_construction() {
        let cfg = NetworkConfig {
            input_size: 5,
            lstm_units: vec![2],
            dense_units: 0,
            ..NetworkConfig::default()
        };
        let network = LstmNetwork::new(cfg, &mut StdRng::seed_from_u64(1)).unwrap();
        let scaler = ScalerState {
            feature_names: vec!["price".into()],
            min: vec![0.0],
            max: vec![1.0],
        };
        assert!(matches!(
            ModelArtifact::new(network, scaler, 4, None),
            Err(ForecastError::ArtifactMismatch(_))
        ));
    }
}
