//! Tests para ML Engine

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use portafi::error::ForecastError;
    use portafi::ml_engine::models::{Activation, NetworkConfig};
    use portafi::ml_engine::{
        last_window, make_windows, prepare_inference_data, prepare_training_data, ArtifactStore,
        FeatureConfig, FeatureEngine, FeatureSet, ForecastModel, MinMaxScaler, TrainingConfig,
    };
    use portafi::types::PriceSeries;
    use std::sync::Arc;

    fn series(n: usize) -> PriceSeries {
        let prices: Vec<f64> = (0..n)
            .map(|i| 100.0 + (i as f64 * 0.25).sin() * 4.0 + i as f64 * 0.05)
            .collect();
        PriceSeries::from_prices("AAA", NaiveDate::from_ymd_opt(2023, 1, 2).unwrap(), &prices)
            .unwrap()
    }

    fn engine() -> FeatureEngine {
        FeatureEngine::new(FeatureConfig {
            feature_set: FeatureSet::Engineered,
            volatility_window: 5,
            short_ma_window: 5,
            long_ma_window: 10,
        })
    }

    fn network() -> NetworkConfig {
        NetworkConfig {
            lstm_units: vec![6, 4],
            dropout: 0.1,
            dense_units: 4,
            dense_activation: Activation::Relu,
            ..NetworkConfig::default()
        }
    }

    fn training(seed: u64) -> TrainingConfig {
        TrainingConfig {
            epochs: 4,
            batch_size: 8,
            seed: Some(seed),
            ..TrainingConfig::default()
        }
    }

    fn temp_store() -> ArtifactStore {
        let dir = std::env::temp_dir().join(format!("portafi-it-{}", uuid::Uuid::new_v4()));
        ArtifactStore::new(dir)
    }

    // ============================================================================
    // Tests de Features / Scaler / Windows
    // ============================================================================

    #[test]
    fn test_feature_rows_after_warmup() {
        let matrix = engine().compute(&series(50)).unwrap();
        // first valid row is max(5, 4, 9) = 9
        assert_eq!(matrix.nrows(), 41);
        assert_eq!(matrix.ncols(), 5);
        assert!(matrix.data().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_scaler_round_trip_on_features() {
        let matrix = engine().compute(&series(80)).unwrap();
        let mut scaler = MinMaxScaler::new();
        let scaled = scaler.fit_transform(&matrix).unwrap();
        let restored = scaler.inverse_transform(scaled.view()).unwrap();

        for (a, b) in matrix.data().iter().zip(restored.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_window_count_and_targets() {
        let matrix = engine().compute(&series(50)).unwrap();
        let dataset = make_windows(matrix.data().view(), 7).unwrap();
        assert_eq!(dataset.len(), matrix.nrows() - 7);
        assert_eq!(dataset.targets[0], matrix.data()[[7, 0]]);

        let last = last_window(matrix.data().view(), 7).unwrap();
        assert_eq!(last.nrows(), 7);
        assert_eq!(last[[6, 0]], matrix.data()[[matrix.nrows() - 1, 0]]);
    }

    #[test]
    fn test_build_for_training_insufficient_history() {
        // 15 bars - 9 warmup = 6 rows, a window of 6 needs 7
        let err = engine().build_for_training(&series(15), 6).unwrap_err();
        assert_eq!(
            err,
            ForecastError::InsufficientHistory {
                required: 7,
                available: 6
            }
        );
    }

    // ============================================================================
    // Tests de Modelo
    // ============================================================================

    #[test]
    fn test_untrained_model() {
        let model = ForecastModel::new(network());
        assert!(!model.is_trained());
        assert_eq!(model.artifact().unwrap_err(), ForecastError::ModelNotTrained);
    }

    #[test]
    fn test_train_predict_evaluate() {
        let matrix = engine().build_for_training(&series(120), 10).unwrap();
        let prepared = prepare_training_data(&matrix, 10).unwrap();

        let mut model = ForecastModel::new(network());
        let history = model
            .train(&prepared.dataset, prepared.scaler.clone(), &training(11))
            .unwrap();
        assert_eq!(history.epochs.len(), 4);
        assert!(history.epochs.iter().all(|e| e.train_loss.is_finite()));
        assert!(history.final_val_loss().is_some());

        let first = model.evaluate(&prepared.dataset).unwrap();
        let second = model.evaluate(&prepared.dataset).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.samples, prepared.dataset.len());
        assert!((first.rmse - first.mse.sqrt()).abs() < 1e-12);

        let window = prepared.dataset.window(0);
        let scaled = model.predict(window).unwrap();
        let price = model.predict_price(window).unwrap();
        let scaler = &prepared.scaler;
        assert!((price - (scaler.min[0] + scaled * (scaler.max[0] - scaler.min[0]))).abs() < 1e-9);
    }

    #[test]
    fn test_seeded_training_is_reproducible() {
        let matrix = engine().build_for_training(&series(90), 8).unwrap();
        let prepared = prepare_training_data(&matrix, 8).unwrap();

        let mut a = ForecastModel::new(network());
        let mut b = ForecastModel::new(network());
        let ha = a
            .train(&prepared.dataset, prepared.scaler.clone(), &training(3))
            .unwrap();
        let hb = b
            .train(&prepared.dataset, prepared.scaler.clone(), &training(3))
            .unwrap();

        assert_eq!(ha, hb);
        assert_eq!(a.artifact().unwrap().network, b.artifact().unwrap().network);
    }

    // ============================================================================
    // Tests de Persistencia
    // ============================================================================

    #[test]
    fn test_artifact_survives_save_and_load() {
        let matrix = engine().build_for_training(&series(100), 8).unwrap();
        let prepared = prepare_training_data(&matrix, 8).unwrap();
        let mut model = ForecastModel::new(network());
        model
            .train(&prepared.dataset, prepared.scaler.clone(), &training(5))
            .unwrap();
        let artifact = model.artifact().unwrap().clone();

        let store = temp_store();
        store.save(&artifact).unwrap();
        let loaded = store.load_for(FeatureSet::Engineered).unwrap();
        assert_eq!(loaded, *artifact);

        // Same predictions from the reloaded artifact on fresh data
        let fresh = engine().compute(&series(60)).unwrap();
        let dataset = prepare_inference_data(&loaded, &fresh).unwrap();
        let reloaded = ForecastModel::from_artifact(Arc::new(loaded));
        assert_eq!(
            model.predict_batch(&dataset).unwrap(),
            reloaded.predict_batch(&dataset).unwrap()
        );

        assert!(matches!(
            store.load_for(FeatureSet::PriceOnly),
            Err(ForecastError::ArtifactMismatch(_))
        ));
        let _ = std::fs::remove_dir_all(store.dir());
    }

    #[test]
    fn test_price_only_artifact_rejects_engineered_windows() {
        let price_engine = FeatureEngine::new(FeatureConfig {
            feature_set: FeatureSet::PriceOnly,
            ..FeatureConfig::default()
        });
        let matrix = price_engine.build_for_training(&series(40), 5).unwrap();
        let prepared = prepare_training_data(&matrix, 5).unwrap();
        let mut model = ForecastModel::new(network());
        model
            .train(&prepared.dataset, prepared.scaler, &training(1))
            .unwrap();

        let engineered = engine().compute(&series(40)).unwrap();
        let artifact = model.artifact().unwrap();
        assert!(matches!(
            prepare_inference_data(artifact, &engineered),
            Err(ForecastError::ArtifactMismatch(_))
        ));
    }
}
