//! Analysis - request-level pipeline entry points
//!
//! Ties market data, the ML engine and portfolio aggregation together:
//! - `analyze_instrument` / `analyze_instruments`: return and risk of the
//!   model's predicted path for single tickers (needs a loaded artifact)
//! - `analyze_portfolio`: risk stats from the weighted raw prices plus a
//!   next-step forecast
//! - `train_instrument`: fit a new artifact on one ticker's history

mod request;

pub use request::{PortfolioRequest, WeightsInput};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{ForecastError, Result};
use crate::market_data::{fetch_all, fetch_one, FetchConfig, PriceProvider};
use crate::ml_engine::persistence::TrainingSummary;
use crate::ml_engine::{
    last_window, prepare_inference_data, prepare_training_data, EvaluationMetrics, FeatureConfig,
    FeatureEngine, FeatureVector, ForecastModel, MLEngineConfig, ModelArtifact, TrainingHistory,
};
use crate::portfolio::{
    aggregate, apply_missing_policy, combine_forecasts, DroppedInstrument, MissingDataPolicy,
    PortfolioStats, PortfolioWeights, DEFAULT_WEIGHT_TOLERANCE, TRADING_DAYS,
};
use crate::types::{HistoryRange, PriceSeries};

/// Where the portfolio `prediction` comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastMode {
    /// Fit a fresh model on the aggregated portfolio value series
    #[default]
    PortfolioSeries,
    /// Forecast every instrument with the loaded artifact and combine by weight
    InstrumentModels,
}

#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    pub engine: MLEngineConfig,
    pub weight_tolerance: f64,
    pub trading_days: f64,
    pub missing_data: MissingDataPolicy,
    pub forecast_mode: ForecastMode,
    pub fetch: FetchConfig,
    /// Used when a request names neither a period nor dates
    pub default_range: HistoryRange,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            engine: MLEngineConfig::default(),
            weight_tolerance: DEFAULT_WEIGHT_TOLERANCE,
            trading_days: TRADING_DAYS,
            missing_data: MissingDataPolicy::default(),
            forecast_mode: ForecastMode::default(),
            fetch: FetchConfig::default(),
            default_range: HistoryRange::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentAnalysis {
    pub ticker: String,
    pub expected_return: f64,
    pub volatility: f64,
    /// Predicted points the statistics were computed from
    pub observations: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstrumentBatch {
    pub results: Vec<InstrumentAnalysis>,
    pub failures: Vec<DroppedInstrument>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioAnalysis {
    pub prediction: f64,
    pub expected_return: f64,
    pub volatility: f64,
    pub sharpe_ratio: f64,
    pub mse: f64,
    pub rmse: f64,
    pub mae: f64,
    pub observations: usize,
    pub forecast_mode: ForecastMode,
    pub instruments_used: Vec<String>,
    /// Renormalized weights actually applied
    pub weights: BTreeMap<String, f64>,
    pub coverage: f64,
    pub dropped: Vec<DroppedInstrument>,
    pub training: Option<TrainingSummary>,
}

impl PortfolioAnalysis {
    fn ensure_finite(self) -> Result<Self> {
        let values = [
            self.prediction,
            self.expected_return,
            self.volatility,
            self.sharpe_ratio,
            self.mse,
            self.rmse,
            self.mae,
        ];
        if values.iter().all(|v| v.is_finite()) {
            Ok(self)
        } else {
            Err(ForecastError::ComputationError(format!(
                "non-finite analysis result: prediction={} er={} vol={} sharpe={} mse={} mae={}",
                self.prediction,
                self.expected_return,
                self.volatility,
                self.sharpe_ratio,
                self.mse,
                self.mae
            )))
        }
    }
}

/// Next-step forecast and in-sample error, in price units
#[derive(Debug, Clone, Copy)]
struct Forecast {
    prediction: f64,
    metrics: EvaluationMetrics,
}

pub struct PortfolioAnalyzer {
    config: AnalyzerConfig,
    provider: Arc<dyn PriceProvider>,
    artifact: Option<Arc<ModelArtifact>>,
}

impl PortfolioAnalyzer {
    pub fn new(config: AnalyzerConfig, provider: Arc<dyn PriceProvider>) -> Self {
        Self {
            config,
            provider,
            artifact: None,
        }
    }

    pub fn with_artifact(mut self, artifact: Arc<ModelArtifact>) -> Self {
        self.artifact = Some(artifact);
        self
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    pub fn artifact(&self) -> Result<&Arc<ModelArtifact>> {
        self.artifact.as_ref().ok_or(ForecastError::ModelNotTrained)
    }

    /// Configured windows, with the feature layout the artifact was trained on
    fn feature_engine_for(&self, artifact: &ModelArtifact) -> FeatureEngine {
        FeatureEngine::new(FeatureConfig {
            feature_set: artifact.feature_set(),
            ..self.config.engine.features.clone()
        })
    }

    fn instrument_stats(
        &self,
        artifact: &Arc<ModelArtifact>,
        series: &PriceSeries,
    ) -> Result<InstrumentAnalysis> {
        let matrix = self.feature_engine_for(artifact).compute(series)?;
        let dataset = prepare_inference_data(artifact, &matrix)?;
        let model = ForecastModel::from_artifact(artifact.clone());

        let predicted: Vec<f64> = model
            .predict_batch(&dataset)?
            .into_iter()
            .map(|v| {
                artifact
                    .scaler
                    .inverse_transform_value(FeatureVector::PRIMARY_INDEX, v)
            })
            .collect();
        let stats = PortfolioStats::from_series(&predicted, self.config.trading_days)?;

        Ok(InstrumentAnalysis {
            ticker: series.ticker().to_string(),
            expected_return: stats.expected_return,
            volatility: stats.volatility,
            observations: predicted.len(),
        })
    }

    fn instrument_forecast(
        &self,
        artifact: &Arc<ModelArtifact>,
        series: &PriceSeries,
    ) -> Result<Forecast> {
        let matrix = self.feature_engine_for(artifact).compute(series)?;
        let dataset = prepare_inference_data(artifact, &matrix)?;
        let model = ForecastModel::from_artifact(artifact.clone());

        let scaled = artifact.scaler.transform_matrix(&matrix)?;
        let window = last_window(scaled.view(), artifact.sequence_length())?;
        Ok(Forecast {
            prediction: model.predict_price(window.view())?,
            metrics: model.evaluate(&dataset)?,
        })
    }

    /// Predicted-path return and volatility for one ticker
    pub async fn analyze_instrument(
        &self,
        ticker: &str,
        range: HistoryRange,
    ) -> Result<InstrumentAnalysis> {
        let artifact = self.artifact()?;
        let series = fetch_one(self.provider.as_ref(), ticker, &range, self.config.fetch.timeout).await?;
        let analysis = self.instrument_stats(artifact, &series)?;
        info!(
            "📊 {}: expected return {:.4}, volatility {:.4}",
            analysis.ticker, analysis.expected_return, analysis.volatility
        );
        Ok(analysis)
    }

    /// `analyze_instrument` for many tickers; failures are reported per ticker
    pub async fn analyze_instruments(
        &self,
        tickers: &[String],
        range: HistoryRange,
    ) -> Result<InstrumentBatch> {
        let artifact = self.artifact()?;
        let outcome = fetch_all(self.provider.as_ref(), tickers, range, self.config.fetch).await;

        let mut batch = InstrumentBatch {
            results: Vec::with_capacity(outcome.series.len()),
            failures: outcome
                .failure_reasons()
                .into_iter()
                .map(|(ticker, reason)| DroppedInstrument { ticker, reason })
                .collect(),
        };

        let mut fetched: Vec<&PriceSeries> = outcome.series.values().collect();
        fetched.sort_by(|a, b| a.ticker().cmp(b.ticker()));
        for series in fetched {
            match self.instrument_stats(artifact, series) {
                Ok(analysis) => batch.results.push(analysis),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("⚠️ Analysis failed for {}: {}", series.ticker(), e);
                    batch.failures.push(DroppedInstrument {
                        ticker: series.ticker().to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        batch.failures.sort_by(|a, b| a.ticker.cmp(&b.ticker));

        info!(
            "📊 Analyzed {} instruments ({} failed)",
            batch.results.len(),
            batch.failures.len()
        );
        Ok(batch)
    }

    /// Weighted portfolio statistics and next-step forecast.
    ///
    /// Weights and range are validated before anything is fetched.
    pub async fn analyze_portfolio(&self, request: &PortfolioRequest) -> Result<PortfolioAnalysis> {
        let (weights, range) =
            request.normalize(self.config.weight_tolerance, self.config.default_range)?;
        let mode = self.config.forecast_mode;
        let artifact = match mode {
            ForecastMode::InstrumentModels => Some(self.artifact()?.clone()),
            ForecastMode::PortfolioSeries => None,
        };

        info!(
            "🧮 Portfolio analysis: {} instruments, {}, mode {:?}",
            weights.len(),
            range,
            mode
        );

        let tickers = weights.tickers();
        let outcome = fetch_all(self.provider.as_ref(), &tickers, range, self.config.fetch).await;
        let mut failures = outcome.failure_reasons();
        let mut series = outcome.series;

        let mut forecasts: HashMap<String, Forecast> = HashMap::new();
        if let Some(artifact) = &artifact {
            for (ticker, s) in &series {
                match self.instrument_forecast(artifact, s) {
                    Ok(f) => {
                        forecasts.insert(ticker.clone(), f);
                    }
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        warn!("⚠️ Forecast failed for {}: {}", ticker, e);
                        failures.insert(ticker.clone(), e.to_string());
                    }
                }
            }
        }

        let effective = apply_missing_policy(&weights, &failures, self.config.missing_data)?;
        series.retain(|ticker, _| effective.weights.get(ticker).is_some());

        let prices: HashMap<String, Vec<f64>> = series
            .iter()
            .map(|(ticker, s)| (ticker.clone(), s.prices()))
            .collect();
        let portfolio = aggregate(&prices, &effective.weights)?;
        let stats = PortfolioStats::from_series(&portfolio, self.config.trading_days)?;
        debug!("Portfolio stats: {:?}", stats);

        let (forecast, training) = match artifact {
            Some(_) => (combine_instrument_forecasts(&forecasts, &effective.weights)?, None),
            None => {
                let (forecast, history) =
                    forecast_series(self.config.engine.clone(), portfolio).await?;
                (forecast, Some(TrainingSummary::from(&history)))
            }
        };

        let analysis = PortfolioAnalysis {
            prediction: forecast.prediction,
            expected_return: stats.expected_return,
            volatility: stats.volatility,
            sharpe_ratio: stats.sharpe_ratio,
            mse: forecast.metrics.mse,
            rmse: forecast.metrics.rmse,
            mae: forecast.metrics.mae,
            observations: stats.observations,
            forecast_mode: mode,
            instruments_used: effective.weights.tickers(),
            weights: effective
                .weights
                .iter()
                .map(|(t, w)| (t.to_string(), w))
                .collect(),
            coverage: effective.coverage,
            dropped: effective.dropped,
            training,
        }
        .ensure_finite()?;

        info!(
            "✅ Portfolio prediction {:.4} | ER {:.4} | vol {:.4} | sharpe {:.3} | rmse {:.4}",
            analysis.prediction,
            analysis.expected_return,
            analysis.volatility,
            analysis.sharpe_ratio,
            analysis.rmse
        );
        Ok(analysis)
    }

    /// Fit a new artifact on one ticker's history and evaluate it in-sample
    pub async fn train_instrument(
        &self,
        ticker: &str,
        range: HistoryRange,
    ) -> Result<(ModelArtifact, TrainingHistory, EvaluationMetrics)> {
        let series = fetch_one(self.provider.as_ref(), ticker, &range, self.config.fetch.timeout).await?;
        info!("🧠 Training on {} ({} bars, {})", ticker, series.len(), range);

        let engine = self.config.engine.clone();
        let (model, history, metrics) = tokio::task::spawn_blocking(move || {
            let matrix = engine
                .feature_engine()
                .build_for_training(&series, engine.sequence_length)?;
            let prepared = prepare_training_data(&matrix, engine.sequence_length)?;
            let mut model = engine.forecast_model();
            let history = model.train(&prepared.dataset, prepared.scaler, &engine.training)?;
            let metrics = model.evaluate(&prepared.dataset)?;
            Ok::<_, ForecastError>((model, history, metrics))
        })
        .await
        .map_err(|e| ForecastError::ComputationError(format!("training task failed: {}", e)))??;

        let artifact = ModelArtifact::clone(model.artifact()?);
        info!(
            "✅ {} trained: artifact {} | rmse {:.4} | mae {:.4}",
            ticker,
            artifact.artifact_id(),
            metrics.rmse,
            metrics.mae
        );
        Ok((artifact, history, metrics))
    }
}

/// Train on the portfolio value series and forecast its next value.
/// CPU-bound, so it runs on the blocking pool.
async fn forecast_series(
    engine: MLEngineConfig,
    portfolio: Vec<f64>,
) -> Result<(Forecast, TrainingHistory)> {
    tokio::task::spawn_blocking(move || {
        let matrix = engine.feature_engine().compute_from_prices(&portfolio)?;
        let prepared = prepare_training_data(&matrix, engine.sequence_length)?;

        let mut model = engine.forecast_model();
        let history = model.train(&prepared.dataset, prepared.scaler, &engine.training)?;
        let artifact = model.artifact()?;

        let scaled = artifact.scaler.transform_matrix(&matrix)?;
        let window = last_window(scaled.view(), engine.sequence_length)?;
        let forecast = Forecast {
            prediction: model.predict_price(window.view())?,
            metrics: model.evaluate(&prepared.dataset)?,
        };
        Ok((forecast, history))
    })
    .await
    .map_err(|e| ForecastError::ComputationError(format!("forecast task failed: {}", e)))?
}

/// Weight-combine per-instrument forecasts and error metrics
fn combine_instrument_forecasts(
    forecasts: &HashMap<String, Forecast>,
    weights: &PortfolioWeights,
) -> Result<Forecast> {
    let pick = |f: fn(&Forecast) -> f64| -> HashMap<String, f64> {
        forecasts.iter().map(|(t, fc)| (t.clone(), f(fc))).collect()
    };

    let prediction = combine_forecasts(&pick(|f| f.prediction), weights)?;
    let mse = combine_forecasts(&pick(|f| f.metrics.mse), weights)?;
    let mae = combine_forecasts(&pick(|f| f.metrics.mae), weights)?;
    let samples = weights
        .iter()
        .filter_map(|(t, _)| forecasts.get(t))
        .map(|f| f.metrics.samples)
        .min()
        .unwrap_or(0);

    Ok(Forecast {
        prediction,
        metrics: EvaluationMetrics {
            mse,
            rmse: mse.sqrt(),
            mae,
            samples,
        },
    })
}
