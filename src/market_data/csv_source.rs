//! Local CSV price files, one `<TICKER>.csv` per instrument

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use std::path::PathBuf;

use super::PriceProvider;
use crate::error::{ForecastError, Result};
use crate::types::{HistoryRange, PriceBar, PriceSeries};

/// Reads `date,open,high,low,close[,adj_close],volume` files from a directory
#[derive(Debug, Clone)]
pub struct CsvPriceSource {
    dir: PathBuf,
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    date: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    adj_close: Option<f64>,
    #[serde(default)]
    volume: Option<f64>,
}

impl CsvPriceSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, ticker: &str) -> PathBuf {
        self.dir.join(format!("{}.csv", ticker))
    }
}

#[async_trait]
impl PriceProvider for CsvPriceSource {
    fn name(&self) -> &str {
        "csv"
    }

    async fn fetch(&self, ticker: &str, range: &HistoryRange) -> Result<PriceSeries> {
        let path = self.path_for(ticker);
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ForecastError::EmptyOrMissingSeries {
                    missing: vec![ticker.to_string()],
                })
            }
            Err(e) => {
                return Err(ForecastError::Provider {
                    ticker: ticker.to_string(),
                    reason: format!("{}: {}", path.display(), e),
                })
            }
        };
        parse_csv(ticker, bytes.as_slice(), range, Utc::now().date_naive())
    }
}

fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    let day = NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()?;
    Some(day.and_hms_opt(0, 0, 0)?.and_utc())
}

/// Parse CSV rows, keep those inside `range`, sort chronologically
fn parse_csv<R: std::io::Read>(
    ticker: &str,
    reader: R,
    range: &HistoryRange,
    today: NaiveDate,
) -> Result<PriceSeries> {
    let invalid = |reason: String| ForecastError::Provider {
        ticker: ticker.to_string(),
        reason,
    };

    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut bars = Vec::new();
    for (line, row) in rdr.deserialize::<CsvRow>().enumerate() {
        let row = row.map_err(|e| invalid(format!("row {}: {}", line + 1, e)))?;
        let timestamp = parse_date(&row.date)
            .ok_or_else(|| invalid(format!("row {}: bad date '{}'", line + 1, row.date)))?;
        if !range.contains(timestamp.date_naive(), today) {
            continue;
        }
        bars.push(PriceBar {
            timestamp,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            adj_close: row.adj_close,
            volume: row.volume.unwrap_or(0.0),
        });
    }

    bars.sort_by_key(|b| b.timestamp);
    PriceSeries::new(ticker, bars)
}
