//! Configuration management for PortaFi
//!
//! Loads from optional config files + environment variables via .env

mod types;

pub use types::*;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub features: FeaturesConfig,
    pub model: ModelConfig,
    pub training: TrainingSection,
    pub portfolio: PortfolioConfig,
    pub data: DataConfig,
    pub artifacts: ArtifactsConfig,
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Self::builder()?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (PORTAFI__*)
            .add_source(Environment::with_prefix("PORTAFI").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        Ok(app_config)
    }

    /// Built-in defaults only, no files or environment
    pub fn defaults() -> Result<Self> {
        Self::builder()?
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    fn builder() -> Result<config::ConfigBuilder<config::builder::DefaultState>> {
        let builder = Config::builder()
            // Features defaults
            .set_default("features.feature_set", "engineered")?
            .set_default("features.volatility_window", 10)?
            .set_default("features.short_ma_window", 50)?
            .set_default("features.long_ma_window", 200)?
            // Model defaults
            .set_default("model.sequence_length", 60)?
            .set_default("model.lstm_units", vec![50, 50])?
            .set_default("model.dropout", 0.2)?
            .set_default("model.dense_units", 25)?
            .set_default("model.dense_activation", "linear")?
            // Training defaults
            .set_default("training.epochs", 50)?
            .set_default("training.batch_size", 32)?
            .set_default("training.validation_fraction", 0.2)?
            .set_default("training.shuffle", true)?
            .set_default("training.early_stopping_patience", 0)?
            .set_default("training.learning_rate", 0.001)?
            .set_default("training.clip_norm", 5.0)?
            // Portfolio defaults
            .set_default("portfolio.weight_tolerance", 0.01)?
            .set_default("portfolio.trading_days", 252.0)?
            .set_default("portfolio.missing_data_policy", "exclude")?
            .set_default("portfolio.min_weight_coverage", 0.5)?
            .set_default("portfolio.forecast_mode", "portfolio_series")?
            // Data defaults
            .set_default("data.provider", "yahoo")?
            .set_default("data.yahoo_base_url", "https://query1.finance.yahoo.com")?
            .set_default("data.csv_dir", "./data/prices")?
            .set_default("data.max_concurrent_fetches", 5)?
            .set_default("data.fetch_timeout_secs", 5)?
            .set_default("data.default_period", "2y")?
            // Artifact defaults
            .set_default("artifacts.dir", "./models/default")?
            .set_default("artifacts.load_on_start", true)?;
        Ok(builder)
    }

    /// Generate a digest of the config for logging
    pub fn digest(&self) -> String {
        format!(
            "features={} L={} lstm={:?} epochs={} provider={} policy={} mode={} artifacts={}",
            self.features.feature_set,
            self.model.sequence_length,
            self.model.lstm_units,
            self.training.epochs,
            self.data.provider,
            self.portfolio.missing_data_policy,
            self.portfolio.forecast_mode,
            self.artifacts.dir
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}
