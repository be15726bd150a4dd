//! Yahoo Finance chart API client (daily bars)

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::PriceProvider;
use crate::error::{ForecastError, Result};
use crate::types::{HistoryRange, PriceBar, PriceSeries};

pub const YAHOO_BASE_URL: &str = "https://query1.finance.yahoo.com";

pub struct YahooChartClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<Quote>,
    #[serde(default)]
    adjclose: Vec<AdjClose>,
}

#[derive(Debug, Default, Deserialize)]
struct Quote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct AdjClose {
    #[serde(default)]
    adjclose: Vec<Option<f64>>,
}

impl YahooChartClient {
    pub fn new(base_url: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("portafi/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn query(range: &HistoryRange) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("interval", "1d".to_string()),
            ("includeAdjustedClose", "true".to_string()),
        ];
        match range {
            HistoryRange::Period(period) => params.push(("range", period.to_string())),
            HistoryRange::Between { start, end } => {
                params.push(("period1", day_start(*start).to_string()));
                params.push(("period2", day_start(*end).to_string()));
            }
        }
        params
    }
}

fn day_start(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or_default()
}

#[async_trait]
impl PriceProvider for YahooChartClient {
    fn name(&self) -> &str {
        "yahoo"
    }

    async fn fetch(&self, ticker: &str, range: &HistoryRange) -> Result<PriceSeries> {
        let url = format!("{}/v8/finance/chart/{}", self.base_url, ticker);
        let provider_err = |reason: String| ForecastError::Provider {
            ticker: ticker.to_string(),
            reason,
        };

        let response = self
            .client
            .get(&url)
            .query(&Self::query(range))
            .send()
            .await
            .map_err(|e| provider_err(e.to_string()))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| provider_err(e.to_string()))?;
        if status.as_u16() == 404 {
            return Err(ForecastError::EmptyOrMissingSeries {
                missing: vec![ticker.to_string()],
            });
        }
        if !status.is_success() {
            return Err(provider_err(format!("HTTP {}", status)));
        }

        let series = parse_chart(ticker, &body)?;
        debug!("Yahoo returned {} bars for {}", series.len(), ticker);
        Ok(series)
    }
}

/// Convert a chart v8 JSON body into a series. Rows without a close are skipped.
fn parse_chart(ticker: &str, body: &str) -> Result<PriceSeries> {
    let parsed: ChartResponse = serde_json::from_str(body).map_err(|e| ForecastError::Provider {
        ticker: ticker.to_string(),
        reason: format!("malformed chart response: {}", e),
    })?;

    if let Some(err) = parsed.chart.error {
        return Err(ForecastError::Provider {
            ticker: ticker.to_string(),
            reason: format!("{}: {}", err.code, err.description),
        });
    }

    let result = match parsed.chart.result.and_then(|r| r.into_iter().next()) {
        Some(r) => r,
        None => {
            return Err(ForecastError::EmptyOrMissingSeries {
                missing: vec![ticker.to_string()],
            })
        }
    };

    let quote = result.indicators.quote.into_iter().next().unwrap_or_default();
    let adjclose = result
        .indicators
        .adjclose
        .into_iter()
        .next()
        .map(|a| a.adjclose)
        .unwrap_or_default();
    let at = |v: &[Option<f64>], i: usize| v.get(i).copied().flatten();

    let mut bars: Vec<PriceBar> = Vec::with_capacity(result.timestamp.len());
    for (i, &ts) in result.timestamp.iter().enumerate() {
        let close = match at(&quote.close, i) {
            Some(c) if c.is_finite() => c,
            _ => continue,
        };
        let timestamp = match DateTime::<Utc>::from_timestamp(ts, 0) {
            Some(t) => t,
            None => continue,
        };
        // the live quote can repeat the last daily timestamp
        if bars.last().map_or(false, |b| b.timestamp >= timestamp) {
            continue;
        }
        bars.push(PriceBar {
            timestamp,
            open: at(&quote.open, i).unwrap_or(close),
            high: at(&quote.high, i).unwrap_or(close),
            low: at(&quote.low, i).unwrap_or(close),
            close,
            adj_close: at(&adjclose, i),
            volume: at(&quote.volume, i).unwrap_or(0.0),
        });
    }

    PriceSeries::new(ticker, bars)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = r#"{
        "chart": {
            "result": [{
                "meta": {"symbol": "AAA"},
                "timestamp": [1704153600, 1704240000, 1704326400, 1704412800],
                "indicators": {
                    "quote": [{
                        "open": [10.0, 11.0, null, 12.5],
                        "high": [10.5, 11.5, null, 13.0],
                        "low": [9.5, 10.5, null, 12.0],
                        "close": [10.2, 11.1, null, 12.8],
                        "volume": [1000, 1200, null, 900]
                    }],
                    "adjclose": [{"adjclose": [10.0, 11.0, null, 12.6]}]
                }
            }],
            "error": null
        }
    }"#;

    #[test]
    fn test_parse_chart_skips_null_rows_and_prefers_adjclose() {
        let series = parse_chart("AAA", BODY).unwrap();
        assert_eq!(series.len(), 3);
        assert_eq!(series.prices(), vec![10.0, 11.0, 12.6]);
        assert_eq!(series.bars()[0].close, 10.2);
        assert_eq!(series.bars()[2].volume, 900.0);
    }

    #[test]
    fn test_parse_chart_error_payload() {
        let body = r#"{"chart": {"result": null, "error": {"code": "Not Found", "description": "No data found, symbol may be delisted"}}}"#;
        assert!(matches!(
            parse_chart("ZZZ", body),
            Err(ForecastError::Provider { .. })
        ));
    }

    #[test]
    fn test_parse_chart_empty_result() {
        let body = r#"{"chart": {"result": [], "error": null}}"#;
        assert!(matches!(
            parse_chart("ZZZ", body),
            Err(ForecastError::EmptyOrMissingSeries { .. })
        ));
    }

    #[test]
    fn test_query_params() {
        let q = YahooChartClient::query(&HistoryRange::default());
        assert!(q.contains(&("range", "2y".to_string())));

        let range = HistoryRange::between(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
        )
        .unwrap();
        let q = YahooChartClient::query(&range);
        assert!(q.contains(&("period1", "1704067200".to_string())));
    }
}
