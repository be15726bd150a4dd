//! Portfolio aggregation
//!
//! Weighted combination of per-instrument series, annualized risk/return
//! statistics and the missing-data policy applied after a multi-instrument
//! fetch. Raw price series and per-instrument model outputs both go through
//! [`aggregate`], so weighting and truncation live in one place.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

use crate::error::{ForecastError, Result};
use crate::stats;

pub const TRADING_DAYS: f64 = 252.0;
pub const DEFAULT_WEIGHT_TOLERANCE: f64 = 0.01;

/// Volatility below this is treated as zero when computing Sharpe
const ZERO_VOLATILITY: f64 = 1e-12;

/// Canonical ticker -> weight mapping, validated on construction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioWeights {
    weights: BTreeMap<String, f64>,
}

impl PortfolioWeights {
    /// Weights given by position, aligned with `tickers`
    pub fn from_aligned<S: AsRef<str>>(tickers: &[S], weights: &[f64], tolerance: f64) -> Result<Self> {
        if tickers.len() != weights.len() {
            return Err(ForecastError::InvalidWeights(format!(
                "{} tickers but {} weights",
                tickers.len(),
                weights.len()
            )));
        }
        let entries = tickers
            .iter()
            .map(|t| t.as_ref().to_string())
            .zip(weights.iter().copied())
            .collect();
        Self::validate(entries, tolerance)
    }

    /// Weights given by ticker
    pub fn from_map<I>(map: I, tolerance: f64) -> Result<Self>
    where
        I: IntoIterator<Item = (String, f64)>,
    {
        Self::validate(map.into_iter().collect(), tolerance)
    }

    fn validate(entries: Vec<(String, f64)>, tolerance: f64) -> Result<Self> {
        if entries.is_empty() {
            return Err(ForecastError::InvalidWeights("ticker list is empty".into()));
        }

        let mut weights = BTreeMap::new();
        for (ticker, weight) in entries {
            let ticker = ticker.trim().to_string();
            if ticker.is_empty() {
                return Err(ForecastError::InvalidWeights("blank ticker".into()));
            }
            if !weight.is_finite() || !(0.0..=1.0).contains(&weight) {
                return Err(ForecastError::InvalidWeights(format!(
                    "weight {} for {} outside [0, 1]",
                    weight, ticker
                )));
            }
            if weights.insert(ticker.clone(), weight).is_some() {
                return Err(ForecastError::InvalidWeights(format!("duplicate ticker {}", ticker)));
            }
        }

        let total: f64 = weights.values().sum();
        if (total - 1.0).abs() > tolerance + 1e-12 {
            return Err(ForecastError::InvalidWeights(format!(
                "weights sum to {:.4}, expected 1 ± {}",
                total, tolerance
            )));
        }

        Ok(Self { weights })
    }

    pub fn get(&self, ticker: &str) -> Option<f64> {
        self.weights.get(ticker).copied()
    }

    pub fn tickers(&self) -> Vec<String> {
        self.weights.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.weights.iter().map(|(t, w)| (t.as_str(), *w))
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn total(&self) -> f64 {
        self.weights.values().sum()
    }

    /// Keep the listed tickers, rescaled to sum to 1. `None` if nothing with
    /// positive weight survives.
    fn renormalized(&self, keep: impl Fn(&str) -> bool) -> Option<(Self, f64)> {
        let kept: BTreeMap<String, f64> = self
            .weights
            .iter()
            .filter(|(t, _)| keep(t))
            .map(|(t, w)| (t.clone(), *w))
            .collect();
        let covered: f64 = kept.values().sum();
        if kept.is_empty() || covered <= 0.0 {
            return None;
        }
        let weights = kept.into_iter().map(|(t, w)| (t, w / covered)).collect();
        Some((Self { weights }, covered / self.total()))
    }
}

/// Weighted sum of tail-aligned series.
///
/// Every weighted ticker must have data. All series are truncated to the
/// shortest length, keeping the most recent observations.
pub fn aggregate<S: AsRef<[f64]>>(
    series: &HashMap<String, S>,
    weights: &PortfolioWeights,
) -> Result<Vec<f64>> {
    let mut missing = Vec::new();
    let mut inputs = Vec::with_capacity(weights.len());
    for (ticker, weight) in weights.iter() {
        match series.get(ticker) {
            Some(s) => inputs.push((weight, s.as_ref())),
            None => missing.push(ticker.to_string()),
        }
    }
    if !missing.is_empty() {
        return Err(ForecastError::InvalidWeights(format!(
            "no data for weighted tickers: {}",
            missing.join(", ")
        )));
    }

    let min_length = inputs.iter().map(|(_, s)| s.len()).min().unwrap_or(0);
    if min_length == 0 {
        return Err(ForecastError::ComputationError(
            "zero-length portfolio after truncation".into(),
        ));
    }
    debug!(
        "Aggregating {} series, truncated to {} observations",
        inputs.len(),
        min_length
    );

    let mut out = vec![0.0; min_length];
    for (weight, s) in inputs {
        let tail = &s[s.len() - min_length..];
        for (acc, v) in out.iter_mut().zip(tail) {
            *acc += weight * v;
        }
    }
    Ok(out)
}

/// Weighted combination of one value per instrument (e.g. model forecasts)
pub fn combine_forecasts(values: &HashMap<String, f64>, weights: &PortfolioWeights) -> Result<f64> {
    let series: HashMap<String, [f64; 1]> = values.iter().map(|(t, v)| (t.clone(), [*v])).collect();
    let combined = aggregate(&series, weights)?;
    combined
        .first()
        .copied()
        .ok_or_else(|| ForecastError::ComputationError("empty forecast combination".into()))
}

/// Annualized return / risk summary
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PortfolioStats {
    pub expected_return: f64,
    pub volatility: f64,
    pub sharpe_ratio: f64,
    pub observations: usize,
}

impl PortfolioStats {
    /// Stats of a level series (prices or portfolio values)
    pub fn from_series(values: &[f64], trading_days: f64) -> Result<Self> {
        if values.len() < 3 {
            return Err(ForecastError::ComputationError(format!(
                "need at least 3 observations for return statistics, got {}",
                values.len()
            )));
        }
        let returns = stats::simple_returns(values).ok_or_else(|| {
            ForecastError::ComputationError("zero level makes returns undefined".into())
        })?;
        Self::from_returns(&returns, trading_days).map(|s| Self {
            observations: values.len(),
            ..s
        })
    }

    pub fn from_returns(returns: &[f64], trading_days: f64) -> Result<Self> {
        let mean = stats::mean(returns);
        let std = stats::sample_std(returns);
        let (mean, std) = match (mean, std) {
            (Some(m), Some(s)) => (m, s),
            _ => {
                return Err(ForecastError::ComputationError(format!(
                    "need at least 2 returns, got {}",
                    returns.len()
                )))
            }
        };

        let expected_return = mean * trading_days;
        let mut volatility = std * trading_days.sqrt();
        let sharpe_ratio = if volatility < ZERO_VOLATILITY {
            volatility = 0.0;
            0.0
        } else {
            expected_return / volatility
        };

        let stats = Self {
            expected_return,
            volatility,
            sharpe_ratio,
            observations: returns.len() + 1,
        };
        if !(expected_return.is_finite() && volatility.is_finite() && sharpe_ratio.is_finite()) {
            return Err(ForecastError::ComputationError(format!(
                "non-finite portfolio statistics: {:?}",
                stats
            )));
        }
        Ok(stats)
    }
}

/// What to do when some instruments could not be fetched or featurized
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MissingDataPolicy {
    /// Drop failed instruments and renormalize the rest, as long as at least
    /// `min_weight_coverage` of the declared weight survives
    Exclude { min_weight_coverage: f64 },
    /// Any failure fails the request
    FailFast,
}

impl Default for MissingDataPolicy {
    fn default() -> Self {
        MissingDataPolicy::Exclude {
            min_weight_coverage: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DroppedInstrument {
    pub ticker: String,
    pub reason: String,
}

/// Weights that survived the missing-data policy
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveWeights {
    pub weights: PortfolioWeights,
    pub dropped: Vec<DroppedInstrument>,
    /// Fraction of the declared weight still represented
    pub coverage: f64,
}

/// Apply `policy` given per-ticker failure reasons
pub fn apply_missing_policy(
    weights: &PortfolioWeights,
    failures: &BTreeMap<String, String>,
    policy: MissingDataPolicy,
) -> Result<EffectiveWeights> {
    let failed: Vec<&String> = failures
        .keys()
        .filter(|t| weights.get(t).is_some())
        .collect();
    if failed.is_empty() {
        return Ok(EffectiveWeights {
            weights: weights.clone(),
            dropped: Vec::new(),
            coverage: 1.0,
        });
    }

    let missing: Vec<String> = failed.iter().map(|t| t.to_string()).collect();
    let dropped: Vec<DroppedInstrument> = failed
        .iter()
        .map(|t| DroppedInstrument {
            ticker: t.to_string(),
            reason: failures[*t].clone(),
        })
        .collect();

    let min_weight_coverage = match policy {
        MissingDataPolicy::FailFast => {
            return Err(ForecastError::EmptyOrMissingSeries { missing });
        }
        MissingDataPolicy::Exclude {
            min_weight_coverage,
        } => min_weight_coverage,
    };

    let (kept, coverage) = weights
        .renormalized(|t| !failures.contains_key(t))
        .ok_or_else(|| ForecastError::EmptyOrMissingSeries {
            missing: missing.clone(),
        })?;
    if coverage < min_weight_coverage {
        warn!(
            "Only {:.0}% of portfolio weight has data (minimum {:.0}%)",
            coverage * 100.0,
            min_weight_coverage * 100.0
        );
        return Err(ForecastError::EmptyOrMissingSeries { missing });
    }

    for d in &dropped {
        warn!("⚠️ Dropping {} from portfolio: {}", d.ticker, d.reason);
    }

    Ok(EffectiveWeights {
        weights: kept,
        dropped,
        coverage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weights(pairs: &[(&str, f64)]) -> PortfolioWeights {
        PortfolioWeights::from_map(
            pairs.iter().map(|(t, w)| (t.to_string(), *w)),
            DEFAULT_WEIGHT_TOLERANCE,
        )
        .unwrap()
    }

    #[test]
    fn test_weight_validation() {
        let tol = DEFAULT_WEIGHT_TOLERANCE;
        assert!(PortfolioWeights::from_aligned(&["A", "B"], &[0.5, 0.5], tol).is_ok());
        assert!(PortfolioWeights::from_aligned(&["A", "B"], &[0.5, 0.6], tol).is_err());
        assert!(PortfolioWeights::from_aligned(&["A", "B"], &[1.0], tol).is_err());
        assert!(PortfolioWeights::from_aligned::<&str>(&[], &[], tol).is_err());
        assert!(PortfolioWeights::from_aligned(&["A", "A"], &[0.5, 0.5], tol).is_err());
        assert!(PortfolioWeights::from_aligned(&["A", "B"], &[1.2, -0.2], tol).is_err());
        assert!(PortfolioWeights::from_aligned(&["A", " "], &[0.5, 0.5], tol).is_err());
        // within tolerance
        assert!(PortfolioWeights::from_aligned(&["A", "B"], &[0.5, 0.505], tol).is_ok());
    }

    #[test]
    fn test_validation_errors_are_invalid_weights() {
        let err = PortfolioWeights::from_aligned(&["A", "B"], &[0.5, 0.6], 0.01).unwrap_err();
        assert!(matches!(err, ForecastError::InvalidWeights(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_aggregate_tail_aligned() {
        let w = weights(&[("A", 0.5), ("B", 0.5)]);
        let mut series = HashMap::new();
        series.insert("A".to_string(), vec![1.0, 2.0, 3.0, 4.0]);
        series.insert("B".to_string(), vec![10.0, 20.0]);

        let out = aggregate(&series, &w).unwrap();
        assert_eq!(out, vec![0.5 * 3.0 + 0.5 * 10.0, 0.5 * 4.0 + 0.5 * 20.0]);
    }

    #[test]
    fn test_aggregate_requires_every_weighted_ticker() {
        let w = weights(&[("A", 0.5), ("B", 0.5)]);
        let mut series = HashMap::new();
        series.insert("A".to_string(), vec![1.0, 2.0]);
        assert!(matches!(
            aggregate(&series, &w),
            Err(ForecastError::InvalidWeights(_))
        ));
    }

    #[test]
    fn test_aggregate_zero_length() {
        let w = weights(&[("A", 1.0)]);
        let mut series = HashMap::new();
        series.insert("A".to_string(), Vec::<f64>::new());
        assert!(matches!(
            aggregate(&series, &w),
            Err(ForecastError::ComputationError(_))
        ));
    }

    #[test]
    fn test_combine_forecasts_uses_weights() {
        let w = weights(&[("A", 0.25), ("B", 0.75)]);
        let mut values = HashMap::new();
        values.insert("A".to_string(), 100.0);
        values.insert("B".to_string(), 200.0);
        assert_eq!(combine_forecasts(&values, &w).unwrap(), 175.0);
    }

    #[test]
    fn test_stats_annualization() {
        let s = PortfolioStats::from_series(&[100.0, 110.0, 99.0], TRADING_DAYS).unwrap();
        let r = [0.1, 99.0 / 110.0 - 1.0];
        let mean = (r[0] + r[1]) / 2.0;
        assert!((s.expected_return - mean * 252.0).abs() < 1e-9);
        let std = stats::sample_std(&r).unwrap();
        assert!((s.volatility - std * 252f64.sqrt()).abs() < 1e-9);
        assert!((s.sharpe_ratio - s.expected_return / s.volatility).abs() < 1e-9);
        assert_eq!(s.observations, 3);
    }

    #[test]
    fn test_zero_variance_sharpe_is_zero() {
        let s = PortfolioStats::from_series(&[50.0; 10], TRADING_DAYS).unwrap();
        assert_eq!(s.volatility, 0.0);
        assert_eq!(s.sharpe_ratio, 0.0);
        assert_eq!(s.expected_return, 0.0);
    }

    #[test]
    fn test_stats_degenerate_inputs() {
        assert!(PortfolioStats::from_series(&[1.0, 2.0], TRADING_DAYS).is_err());
        assert!(PortfolioStats::from_series(&[1.0, 0.0, 2.0], TRADING_DAYS).is_err());
    }

    #[test]
    fn test_exclude_policy_drops_and_renormalizes() {
        let w = weights(&[("AAA", 0.4), ("BBB", 0.4), ("ZZZ", 0.2)]);
        let mut failures = BTreeMap::new();
        failures.insert("ZZZ".to_string(), "no data".to_string());

        let eff = apply_missing_policy(&w, &failures, MissingDataPolicy::default()).unwrap();
        assert_eq!(eff.weights.len(), 2);
        assert!((eff.weights.get("AAA").unwrap() - 0.5).abs() < 1e-12);
        assert!((eff.coverage - 0.8).abs() < 1e-12);
        assert_eq!(eff.dropped[0].ticker, "ZZZ");
        assert_eq!(eff.dropped[0].reason, "no data");
    }

    #[test]
    fn test_exclude_policy_all_failed() {
        let w = weights(&[("AAA", 0.5), ("BBB", 0.5)]);
        let failures: BTreeMap<String, String> = [("AAA", "x"), ("BBB", "y")]
            .iter()
            .map(|(t, r)| (t.to_string(), r.to_string()))
            .collect();
        match apply_missing_policy(&w, &failures, MissingDataPolicy::default()) {
            Err(ForecastError::EmptyOrMissingSeries { missing }) => {
                assert_eq!(missing, vec!["AAA".to_string(), "BBB".to_string()])
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_exclude_policy_coverage_floor() {
        let w = weights(&[("AAA", 0.7), ("BBB", 0.3)]);
        let mut failures = BTreeMap::new();
        failures.insert("AAA".to_string(), "timeout".to_string());
        assert!(matches!(
            apply_missing_policy(&w, &failures, MissingDataPolicy::default()),
            Err(ForecastError::EmptyOrMissingSeries { .. })
        ));
    }

    #[test]
    fn test_fail_fast_policy() {
        let w = weights(&[("AAA", 0.5), ("BBB", 0.5)]);
        let mut failures = BTreeMap::new();
        failures.insert("BBB".to_string(), "no data".to_string());
        assert!(apply_missing_policy(&w, &failures, MissingDataPolicy::FailFast).is_err());
        assert!(apply_missing_policy(&w, &BTreeMap::new(), MissingDataPolicy::FailFast).is_ok());
    }
}
