//! ML Engine Configuration Bridge
//!
//! Converts the string-typed `AppConfig` (files / env vars) into the typed
//! engine and analyzer configurations. Unknown values fall back to defaults
//! with a warning.

use std::time::Duration;

use crate::analysis::{AnalyzerConfig, ForecastMode};
use crate::config::AppConfig;
use crate::market_data::FetchConfig;
use crate::ml_engine::models::{Activation, AdamConfig, NetworkConfig};
use crate::ml_engine::{FeatureConfig, FeatureSet, MLEngineConfig, TrainingConfig};
use crate::portfolio::MissingDataPolicy;
use crate::types::{HistoryRange, Period};

/// Build typed engine configuration from the application config
pub trait EngineConfigConvertible {
    fn to_ml_engine_config(&self) -> MLEngineConfig;
    fn to_analyzer_config(&self) -> AnalyzerConfig;
}

impl EngineConfigConvertible for AppConfig {
    fn to_ml_engine_config(&self) -> MLEngineConfig {
        MLEngineConfig {
            features: FeatureConfig {
                feature_set: parse_feature_set(&self.features.feature_set),
                volatility_window: self.features.volatility_window,
                short_ma_window: self.features.short_ma_window,
                long_ma_window: self.features.long_ma_window,
            },
            sequence_length: self.model.sequence_length,
            network: NetworkConfig {
                lstm_units: self.model.lstm_units.clone(),
                dropout: self.model.dropout,
                dense_units: self.model.dense_units,
                dense_activation: parse_activation(&self.model.dense_activation),
                ..NetworkConfig::default()
            },
            training: TrainingConfig {
                epochs: self.training.epochs,
                batch_size: self.training.batch_size,
                validation_fraction: self.training.validation_fraction,
                shuffle: self.training.shuffle,
                early_stopping_patience: self.training.early_stopping_patience,
                optimizer: AdamConfig {
                    learning_rate: self.training.learning_rate,
                    ..AdamConfig::default()
                },
                clip_norm: self.training.clip_norm,
                seed: self.training.seed,
            },
        }
    }

    fn to_analyzer_config(&self) -> AnalyzerConfig {
        AnalyzerConfig {
            engine: self.to_ml_engine_config(),
            weight_tolerance: self.portfolio.weight_tolerance,
            trading_days: self.portfolio.trading_days,
            missing_data: parse_missing_policy(
                &self.portfolio.missing_data_policy,
                self.portfolio.min_weight_coverage,
            ),
            forecast_mode: parse_forecast_mode(&self.portfolio.forecast_mode),
            fetch: FetchConfig {
                max_concurrent: self.data.max_concurrent_fetches.max(1),
                timeout: Duration::from_secs(self.data.fetch_timeout_secs),
            },
            default_range: parse_history_range(&self.data.default_period),
        }
    }
}

pub fn parse_feature_set(s: &str) -> FeatureSet {
    match s.to_lowercase().as_str() {
        "engineered" | "full" | "default" => FeatureSet::Engineered,
        "price_only" | "priceonly" | "price" | "legacy" => FeatureSet::PriceOnly,
        _ => {
            tracing::warn!("Unknown feature_set '{}', using engineered", s);
            FeatureSet::Engineered
        }
    }
}

pub fn parse_activation(s: &str) -> Activation {
    match s.to_lowercase().as_str() {
        "linear" | "none" => Activation::Linear,
        "relu" => Activation::Relu,
        _ => {
            tracing::warn!("Unknown dense_activation '{}', using linear", s);
            Activation::Linear
        }
    }
}

pub fn parse_missing_policy(s: &str, min_weight_coverage: f64) -> MissingDataPolicy {
    match s.to_lowercase().as_str() {
        "exclude" | "drop" => MissingDataPolicy::Exclude {
            min_weight_coverage,
        },
        "fail_fast" | "failfast" | "strict" => MissingDataPolicy::FailFast,
        _ => {
            tracing::warn!("Unknown missing_data_policy '{}', using exclude", s);
            MissingDataPolicy::Exclude {
                min_weight_coverage,
            }
        }
    }
}

pub fn parse_forecast_mode(s: &str) -> ForecastMode {
    match s.to_lowercase().as_str() {
        "portfolio_series" | "portfolio" => ForecastMode::PortfolioSeries,
        "instrument_models" | "instruments" => ForecastMode::InstrumentModels,
        _ => {
            tracing::warn!("Unknown forecast_mode '{}', using portfolio_series", s);
            ForecastMode::PortfolioSeries
        }
    }
}

pub fn parse_history_range(s: &str) -> HistoryRange {
    match Period::parse(s) {
        Some(period) => HistoryRange::Period(period),
        None => {
            tracing::warn!("Unknown default_period '{}', using 2y", s);
            HistoryRange::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_config_conversion() {
        let app = AppConfig::defaults().unwrap();
        let engine = app.to_ml_engine_config();

        assert_eq!(engine.features.feature_set, FeatureSet::Engineered);
        assert_eq!(engine.features.volatility_window, 10);
        assert_eq!(engine.sequence_length, 60);
        assert_eq!(engine.network.lstm_units, vec![50, 50]);
        assert_eq!(engine.network.dense_activation, Activation::Linear);
        assert_eq!(engine.training.optimizer.learning_rate, 0.001);

        let analyzer = app.to_analyzer_config();
        assert_eq!(analyzer.forecast_mode, ForecastMode::PortfolioSeries);
        assert_eq!(
            analyzer.missing_data,
            MissingDataPolicy::Exclude {
                min_weight_coverage: 0.5
            }
        );
        assert_eq!(analyzer.fetch.max_concurrent, 5);
        assert_eq!(analyzer.fetch.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_parse_values() {
        assert_eq!(parse_feature_set("PRICE_ONLY"), FeatureSet::PriceOnly);
        assert_eq!(parse_feature_set("bogus"), FeatureSet::Engineered);
        assert_eq!(parse_activation("ReLU"), Activation::Relu);
        assert_eq!(parse_missing_policy("fail_fast", 0.5), MissingDataPolicy::FailFast);
        assert_eq!(parse_forecast_mode("instruments"), ForecastMode::InstrumentModels);
        assert_eq!(parse_history_range("nonsense"), HistoryRange::default());
        assert_eq!(
            parse_history_range("6mo"),
            HistoryRange::Period(Period::Months(6))
        );
    }
}
