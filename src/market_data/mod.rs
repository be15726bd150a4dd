//! Market data - price history providers and bounded concurrent fetching

mod csv_source;
mod yahoo;

pub use csv_source::CsvPriceSource;
pub use yahoo::YahooChartClient;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{ForecastError, Result};
use crate::types::{HistoryRange, PriceSeries};

/// Source of daily price history for one instrument
#[async_trait]
pub trait PriceProvider: Send + Sync {
    /// Get the provider name
    fn name(&self) -> &str;

    /// Ordered bars for `ticker` over `range`
    async fn fetch(&self, ticker: &str, range: &HistoryRange) -> Result<PriceSeries>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FetchConfig {
    /// Simultaneous outbound fetches
    pub max_concurrent: usize,
    /// Per-instrument deadline; a late fetch is dropped and counted as failed
    pub timeout: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            timeout: Duration::from_secs(5),
        }
    }
}

/// Per-ticker results of a multi-instrument fetch
#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub series: HashMap<String, PriceSeries>,
    pub failures: BTreeMap<String, ForecastError>,
}

impl FetchOutcome {
    pub fn failure_reasons(&self) -> BTreeMap<String, String> {
        self.failures
            .iter()
            .map(|(t, e)| (t.clone(), e.to_string()))
            .collect()
    }
}

/// Fetch one ticker under the configured deadline. Empty series are failures.
pub async fn fetch_one(
    provider: &dyn PriceProvider,
    ticker: &str,
    range: &HistoryRange,
    timeout: Duration,
) -> Result<PriceSeries> {
    match tokio::time::timeout(timeout, provider.fetch(ticker, range)).await {
        Ok(Ok(series)) if series.is_empty() => Err(ForecastError::EmptyOrMissingSeries {
            missing: vec![ticker.to_string()],
        }),
        Ok(result) => result,
        Err(_) => Err(ForecastError::Timeout {
            ticker: ticker.to_string(),
            millis: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}

/// Fetch every ticker with at most `max_concurrent` requests in flight.
///
/// One ticker failing never aborts the others; results are keyed by ticker
/// so completion order does not matter.
pub async fn fetch_all(
    provider: &dyn PriceProvider,
    tickers: &[String],
    range: HistoryRange,
    config: FetchConfig,
) -> FetchOutcome {
    let mut unique: Vec<&String> = tickers.iter().collect();
    unique.sort();
    unique.dedup();

    info!(
        "📥 Fetching {} instruments from {} ({}, max {} concurrent)",
        unique.len(),
        provider.name(),
        range,
        config.max_concurrent
    );

    let results: Vec<(String, Result<PriceSeries>)> = stream::iter(unique)
        .map(|ticker| async move {
            let result = fetch_one(provider, ticker, &range, config.timeout).await;
            (ticker.clone(), result)
        })
        .buffer_unordered(config.max_concurrent.max(1))
        .collect()
        .await;

    let mut outcome = FetchOutcome::default();
    for (ticker, result) in results {
        match result {
            Ok(series) => {
                debug!("{}: {} bars", ticker, series.len());
                outcome.series.insert(ticker, series);
            }
            Err(e) => {
                warn!("⚠️ Fetch failed for {}: {}", ticker, e);
                outcome.failures.insert(ticker, e);
            }
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct SlowProvider {
        in_flight: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PriceProvider for SlowProvider {
        fn name(&self) -> &str {
            "slow"
        }

        async fn fetch(&self, ticker: &str, _range: &HistoryRange) -> Result<PriceSeries> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let delay = if ticker == "HANG" { 10_000 } else { 20 };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            match ticker {
                "EMPTY" => PriceSeries::new(ticker, Vec::new()),
                "FAIL" => Err(ForecastError::Provider {
                    ticker: ticker.to_string(),
                    reason: "HTTP 500".into(),
                }),
                _ => PriceSeries::from_prices(
                    ticker,
                    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                    &[1.0, 2.0, 3.0],
                ),
            }
        }
    }

    #[tokio::test]
    async fn test_fetch_all_bounds_concurrency_and_keys_results() {
        let peak = Arc::new(AtomicUsize::new(0));
        let provider = SlowProvider {
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: peak.clone(),
        };
        let tickers: Vec<String> = (0..12).map(|i| format!("T{}", i)).collect();
        let config = FetchConfig {
            max_concurrent: 3,
            timeout: Duration::from_secs(2),
        };

        let outcome = fetch_all(&provider, &tickers, HistoryRange::default(), config).await;
        assert_eq!(outcome.series.len(), 12);
        assert!(outcome.failures.is_empty());
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_fetch_all_isolates_failures() {
        let provider = SlowProvider {
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        };
        let tickers: Vec<String> = ["AAA", "EMPTY", "FAIL", "HANG"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let config = FetchConfig {
            max_concurrent: 5,
            timeout: Duration::from_millis(200),
        };

        let outcome = fetch_all(&provider, &tickers, HistoryRange::default(), config).await;
        assert_eq!(outcome.series.len(), 1);
        assert!(outcome.series.contains_key("AAA"));
        assert!(matches!(
            outcome.failures["EMPTY"],
            ForecastError::EmptyOrMissingSeries { .. }
        ));
        assert!(matches!(outcome.failures["FAIL"], ForecastError::Provider { .. }));
        assert!(matches!(outcome.failures["HANG"], ForecastError::Timeout { .. }));
        assert_eq!(outcome.failure_reasons().len(), 3);
    }

    #[tokio::test]
    async fn test_sub_second_timeout_message() {
        let provider = SlowProvider {
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        };
        let err = fetch_one(&provider, "HANG", &HistoryRange::default(), Duration::from_millis(150))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "fetch for HANG timed out after 150ms");
    }
}
