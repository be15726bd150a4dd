//! Incoming portfolio request shapes, normalized before any work starts

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{ForecastError, Result};
use crate::portfolio::PortfolioWeights;
use crate::types::{HistoryRange, Period};

/// Weights either by position (aligned with `tickers`) or keyed by ticker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WeightsInput {
    List(Vec<f64>),
    Map(BTreeMap<String, f64>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioRequest {
    #[serde(default)]
    pub tickers: Vec<String>,
    pub weights: WeightsInput,
    #[serde(default)]
    pub period: Option<String>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
}

impl PortfolioRequest {
    pub fn aligned<S: AsRef<str>>(tickers: &[S], weights: &[f64]) -> Self {
        Self {
            tickers: tickers.iter().map(|t| t.as_ref().to_string()).collect(),
            weights: WeightsInput::List(weights.to_vec()),
            period: None,
            start_date: None,
            end_date: None,
        }
    }

    pub fn keyed(weights: BTreeMap<String, f64>) -> Self {
        Self {
            tickers: Vec::new(),
            weights: WeightsInput::Map(weights),
            period: None,
            start_date: None,
            end_date: None,
        }
    }

    pub fn with_period(mut self, period: impl Into<String>) -> Self {
        self.period = Some(period.into());
        self
    }

    pub fn with_dates(mut self, start: NaiveDate, end: Option<NaiveDate>) -> Self {
        self.start_date = Some(start);
        self.end_date = end;
        self
    }

    /// Canonical weights and history range.
    ///
    /// Explicit dates take precedence over `period`; a missing `end_date`
    /// means "through today".
    pub fn normalize(
        &self,
        tolerance: f64,
        default_range: HistoryRange,
    ) -> Result<(PortfolioWeights, HistoryRange)> {
        let weights = match &self.weights {
            WeightsInput::List(list) => PortfolioWeights::from_aligned(&self.tickers, list, tolerance)?,
            WeightsInput::Map(map) => {
                if !self.tickers.is_empty() {
                    let mut listed: Vec<&str> = self.tickers.iter().map(String::as_str).collect();
                    listed.sort_unstable();
                    let keyed: Vec<&str> = map.keys().map(String::as_str).collect();
                    if listed != keyed {
                        return Err(ForecastError::InvalidWeights(format!(
                            "tickers {:?} do not match weight keys {:?}",
                            self.tickers, keyed
                        )));
                    }
                }
                PortfolioWeights::from_map(map.clone(), tolerance)?
            }
        };

        let range = match (self.start_date, self.end_date, &self.period) {
            (Some(start), end, _) => {
                let end = match end {
                    Some(end) => end,
                    None => Utc::now()
                        .date_naive()
                        .succ_opt()
                        .ok_or_else(|| ForecastError::ComputationError("date overflow".into()))?,
                };
                HistoryRange::between(start, end)?
            }
            (None, Some(end), _) => {
                return Err(ForecastError::ComputationError(format!(
                    "end_date {} given without start_date",
                    end
                )))
            }
            (None, None, Some(period)) => HistoryRange::Period(Period::parse(period).ok_or_else(
                || ForecastError::ComputationError(format!("unknown period '{}'", period)),
            )?),
            (None, None, None) => default_range,
        };

        Ok((weights, range))
    }
}
