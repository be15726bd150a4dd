//! Feature Engineering - per-step feature vectors from a raw price series
//!
//! The canonical feature set is the 5-field engineered vector
//! (price, return, volatility, short MA, long MA). The single-field
//! `PriceOnly` set is a degraded legacy mode and must be selected explicitly;
//! a network trained on one width cannot consume the other.

use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ForecastError, Result};
use crate::stats;
use crate::types::PriceSeries;

/// Which columns the pipeline derives from a price series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureSet {
    /// price, return, volatility, short_ma, long_ma
    Engineered,
    /// price only (legacy)
    PriceOnly,
}

impl FeatureSet {
    pub fn feature_names(&self) -> &'static [&'static str] {
        match self {
            FeatureSet::Engineered => FeatureVector::feature_names(),
            FeatureSet::PriceOnly => &["price"],
        }
    }

    pub fn width(&self) -> usize {
        self.feature_names().len()
    }

    /// Recover the set that produces exactly these column names
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Option<Self> {
        [FeatureSet::Engineered, FeatureSet::PriceOnly]
            .into_iter()
            .find(|set| {
                let expected = set.feature_names();
                expected.len() == names.len()
                    && expected.iter().zip(names).all(|(e, n)| *e == n.as_ref())
            })
    }
}

impl Default for FeatureSet {
    fn default() -> Self {
        FeatureSet::Engineered
    }
}

impl fmt::Display for FeatureSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureSet::Engineered => write!(f, "engineered"),
            FeatureSet::PriceOnly => write!(f, "price_only"),
        }
    }
}

/// Rolling-window lengths and feature set selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureConfig {
    pub feature_set: FeatureSet,
    /// Window of returns used for the rolling standard deviation
    pub volatility_window: usize,
    pub short_ma_window: usize,
    pub long_ma_window: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            feature_set: FeatureSet::Engineered,
            volatility_window: 10,
            short_ma_window: 50,
            long_ma_window: 200,
        }
    }
}

/// One engineered row
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct FeatureVector {
    /// Price level (primary feature)
    pub price: f64,
    /// Period-over-period simple return
    pub returns: f64,
    /// Sample std of the last `volatility_window` returns
    pub volatility: f64,
    pub short_ma: f64,
    pub long_ma: f64,
}

impl FeatureVector {
    pub const NUM_FEATURES: usize = 5;

    /// Index of the column the model predicts
    pub const PRIMARY_INDEX: usize = 0;

    pub fn feature_names() -> &'static [&'static str] {
        &["price", "return", "volatility", "short_ma", "long_ma"]
    }

    pub fn to_vec(&self) -> Vec<f64> {
        vec![
            self.price,
            self.returns,
            self.volatility,
            self.short_ma,
            self.long_ma,
        ]
    }

    fn is_finite(&self) -> bool {
        self.to_vec().iter().all(|v| v.is_finite())
    }
}

/// Matrix of feature rows, one per valid time step.
///
/// Never contains undefined values: rows lacking rolling history are dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    feature_set: FeatureSet,
    data: Array2<f64>,
}

impl FeatureMatrix {
    pub fn new(feature_set: FeatureSet, data: Array2<f64>) -> Result<Self> {
        if data.ncols() != feature_set.width() {
            return Err(ForecastError::ArtifactMismatch(format!(
                "feature set {} expects {} columns, got {}",
                feature_set,
                feature_set.width(),
                data.ncols()
            )));
        }
        if data.iter().any(|v| !v.is_finite()) {
            return Err(ForecastError::ComputationError(
                "feature matrix contains non-finite values".to_string(),
            ));
        }
        Ok(Self { feature_set, data })
    }

    pub fn feature_set(&self) -> FeatureSet {
        self.feature_set
    }

    pub fn feature_names(&self) -> &'static [&'static str] {
        self.feature_set.feature_names()
    }

    pub fn data(&self) -> &Array2<f64> {
        &self.data
    }

    pub fn nrows(&self) -> usize {
        self.data.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.data.ncols()
    }

    pub fn primary(&self) -> ArrayView1<'_, f64> {
        self.data.column(FeatureVector::PRIMARY_INDEX)
    }
}

/// Derives feature matrices from price series
#[derive(Debug, Clone, Default)]
pub struct FeatureEngine {
    config: FeatureConfig,
}

impl FeatureEngine {
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    pub fn feature_set(&self) -> FeatureSet {
        self.config.feature_set
    }

    /// Number of leading observations consumed by the rolling windows
    pub fn warmup(&self) -> usize {
        match self.config.feature_set {
            FeatureSet::PriceOnly => 0,
            FeatureSet::Engineered => self
                .config
                .volatility_window
                .max(self.config.short_ma_window.saturating_sub(1))
                .max(self.config.long_ma_window.saturating_sub(1)),
        }
    }

    pub fn compute(&self, series: &PriceSeries) -> Result<FeatureMatrix> {
        if series.is_empty() {
            return Err(ForecastError::EmptyOrMissingSeries {
                missing: vec![series.ticker().to_string()],
            });
        }
        self.compute_from_prices(&series.prices())
    }

    /// Compute features and require enough rows for at least one window
    pub fn build_for_training(
        &self,
        series: &PriceSeries,
        sequence_length: usize,
    ) -> Result<FeatureMatrix> {
        let matrix = self.compute(series)?;
        ensure_rows(&matrix, sequence_length)?;
        Ok(matrix)
    }

    pub fn compute_from_prices(&self, prices: &[f64]) -> Result<FeatureMatrix> {
        if prices.iter().any(|p| !p.is_finite()) {
            return Err(ForecastError::ComputationError(
                "price series contains non-finite values".to_string(),
            ));
        }

        match self.config.feature_set {
            FeatureSet::PriceOnly => {
                let data = Array2::from_shape_vec((prices.len(), 1), prices.to_vec())
                    .map_err(|e| ForecastError::ComputationError(e.to_string()))?;
                FeatureMatrix::new(FeatureSet::PriceOnly, data)
            }
            FeatureSet::Engineered => self.compute_engineered(prices),
        }
    }

    fn compute_engineered(&self, prices: &[f64]) -> Result<FeatureMatrix> {
        let cfg = &self.config;
        if cfg.volatility_window < 2 || cfg.short_ma_window == 0 || cfg.long_ma_window == 0 {
            return Err(ForecastError::ComputationError(format!(
                "invalid rolling windows: volatility={} short_ma={} long_ma={}",
                cfg.volatility_window, cfg.short_ma_window, cfg.long_ma_window
            )));
        }

        let start = self.warmup();
        let mut rows: Vec<FeatureVector> = Vec::with_capacity(prices.len().saturating_sub(start));

        // returns[t] is defined for t >= 1; keep index aligned with prices
        let mut returns = vec![f64::NAN; prices.len()];
        for t in 1..prices.len() {
            if prices[t - 1] == 0.0 {
                return Err(ForecastError::ComputationError(format!(
                    "zero price at step {} makes the return undefined",
                    t - 1
                )));
            }
            returns[t] = prices[t] / prices[t - 1] - 1.0;
        }

        for t in start..prices.len() {
            let vol_slice = &returns[t + 1 - cfg.volatility_window..=t];
            let volatility = stats::sample_std(vol_slice).unwrap_or(f64::NAN);
            let short_ma = stats::mean(&prices[t + 1 - cfg.short_ma_window..=t]).unwrap_or(f64::NAN);
            let long_ma = stats::mean(&prices[t + 1 - cfg.long_ma_window..=t]).unwrap_or(f64::NAN);

            let row = FeatureVector {
                price: prices[t],
                returns: returns[t],
                volatility,
                short_ma,
                long_ma,
            };
            if !row.is_finite() {
                return Err(ForecastError::ComputationError(format!(
                    "undefined feature value at step {}",
                    t
                )));
            }
            rows.push(row);
        }

        let mut data = Array2::zeros((rows.len(), FeatureVector::NUM_FEATURES));
        for (i, row) in rows.iter().enumerate() {
            for (j, val) in row.to_vec().into_iter().enumerate() {
                data[[i, j]] = val;
            }
        }

        FeatureMatrix::new(FeatureSet::Engineered, data)
    }
}

/// A matrix must hold `sequence_length + 1` rows to yield one window
pub fn ensure_rows(matrix: &FeatureMatrix, sequence_length: usize) -> Result<()> {
    let required = sequence_length + 1;
    if matrix.nrows() < required {
        return Err(ForecastError::InsufficientHistory {
            required,
            available: matrix.nrows(),
        });
    }
    Ok(())
}
