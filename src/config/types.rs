//! Configuration sections, one per table in the config files

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct FeaturesConfig {
    /// "engineered" or "price_only"
    pub feature_set: String,
    /// Rolling window of returns for volatility
    pub volatility_window: usize,
    /// Short moving average window
    pub short_ma_window: usize,
    /// Long moving average window
    pub long_ma_window: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    /// Steps per input window
    pub sequence_length: usize,
    /// Hidden units per LSTM layer
    pub lstm_units: Vec<usize>,
    /// Dropout after each LSTM layer
    pub dropout: f64,
    /// Hidden dense layer width (0 = none)
    pub dense_units: usize,
    /// "linear" or "relu"
    pub dense_activation: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrainingSection {
    pub epochs: usize,
    pub batch_size: usize,
    /// Most recent fraction of windows used for validation
    pub validation_fraction: f64,
    pub shuffle: bool,
    /// 0 disables early stopping
    pub early_stopping_patience: usize,
    pub learning_rate: f64,
    pub clip_norm: f64,
    /// Fixed RNG seed for reproducible runs
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortfolioConfig {
    /// Allowed distance of the weight sum from 1
    pub weight_tolerance: f64,
    /// Annualization factor
    pub trading_days: f64,
    /// "exclude" or "fail_fast"
    pub missing_data_policy: String,
    /// Minimum declared weight that must survive exclusion
    pub min_weight_coverage: f64,
    /// "portfolio_series" or "instrument_models"
    pub forecast_mode: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataConfig {
    /// "yahoo" or "csv"
    pub provider: String,
    /// Yahoo chart API base URL
    pub yahoo_base_url: String,
    /// Directory of <TICKER>.csv files for the csv provider
    pub csv_dir: String,
    /// Upper bound on simultaneous instrument fetches
    pub max_concurrent_fetches: usize,
    /// Per-instrument fetch timeout in seconds
    pub fetch_timeout_secs: u64,
    /// History window when a request names none
    pub default_period: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactsConfig {
    /// Directory holding network.json + scaler.json
    pub dir: String,
    /// Load the artifact at startup if present
    pub load_on_start: bool,
}
