//! Core types used throughout PortaFi
//!
//! Price bars, per-instrument price series and the history range a series is
//! requested for.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ForecastError, Result};

/// One OHLC bar of an instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    /// Bar timestamp (start of the trading day for daily bars)
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Split/dividend adjusted close when the provider supplies one
    #[serde(default)]
    pub adj_close: Option<f64>,
    #[serde(default)]
    pub volume: f64,
}

impl PriceBar {
    /// Bar with identical OHLC values, handy for synthetic series
    pub fn flat(timestamp: DateTime<Utc>, price: f64) -> Self {
        Self {
            timestamp,
            open: price,
            high: price,
            low: price,
            close: price,
            adj_close: None,
            volume: 0.0,
        }
    }

    /// Price level used by the pipeline (adjusted close preferred)
    pub fn price(&self) -> f64 {
        self.adj_close.unwrap_or(self.close)
    }
}

/// Ordered price history of a single instrument.
///
/// Timestamps are strictly increasing; the series is immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSeries {
    ticker: String,
    bars: Vec<PriceBar>,
}

impl PriceSeries {
    pub fn new(ticker: impl Into<String>, bars: Vec<PriceBar>) -> Result<Self> {
        let ticker = ticker.into();

        for pair in bars.windows(2) {
            if pair[1].timestamp <= pair[0].timestamp {
                return Err(ForecastError::InvalidSeries {
                    ticker,
                    reason: format!(
                        "timestamps not strictly increasing at {}",
                        pair[1].timestamp
                    ),
                });
            }
        }

        Ok(Self { ticker, bars })
    }

    /// Build a daily series from bare prices, one bar per day from `start`
    pub fn from_prices(ticker: impl Into<String>, start: NaiveDate, prices: &[f64]) -> Result<Self> {
        let bars = prices
            .iter()
            .enumerate()
            .map(|(i, &p)| {
                let day = start + chrono::Duration::days(i as i64);
                let ts = day
                    .and_hms_opt(0, 0, 0)
                    .map(|dt| dt.and_utc())
                    .unwrap_or_default();
                PriceBar::flat(ts, p)
            })
            .collect();
        Self::new(ticker, bars)
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    pub fn bars(&self) -> &[PriceBar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Price levels in chronological order
    pub fn prices(&self) -> Vec<f64> {
        self.bars.iter().map(PriceBar::price).collect()
    }
}

/// Trailing period, in the vocabulary price providers commonly accept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Period {
    Days(u32),
    Months(u32),
    Years(u32),
    YearToDate,
    Max,
}

impl Period {
    /// Parse "5d", "6mo", "1y", "10y", "ytd" or "max"
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_lowercase();
        match s.as_str() {
            "ytd" => return Some(Period::YearToDate),
            "max" => return Some(Period::Max),
            _ => {}
        }

        let split = s.find(|c: char| !c.is_ascii_digit())?;
        let (num, unit) = s.split_at(split);
        let n: u32 = num.parse().ok()?;
        if n == 0 {
            return None;
        }

        match unit {
            "d" => Some(Period::Days(n)),
            "mo" => Some(Period::Months(n)),
            "y" => Some(Period::Years(n)),
            _ => None,
        }
    }

    /// First date covered by the period when it ends at `today`
    pub fn start_date(&self, today: NaiveDate) -> Option<NaiveDate> {
        match *self {
            Period::Days(n) => today.checked_sub_days(chrono::Days::new(n as u64)),
            Period::Months(n) => today.checked_sub_months(chrono::Months::new(n)),
            Period::Years(n) => today.checked_sub_months(chrono::Months::new(n * 12)),
            Period::YearToDate => NaiveDate::from_ymd_opt(chrono::Datelike::year(&today), 1, 1),
            Period::Max => None,
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Period::Days(n) => write!(f, "{}d", n),
            Period::Months(n) => write!(f, "{}mo", n),
            Period::Years(n) => write!(f, "{}y", n),
            Period::YearToDate => write!(f, "ytd"),
            Period::Max => write!(f, "max"),
        }
    }
}

/// Range of history requested from a price provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryRange {
    /// Trailing period ending today
    Period(Period),
    /// Explicit dates, `end` exclusive
    Between { start: NaiveDate, end: NaiveDate },
}

impl HistoryRange {
    pub fn between(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if end <= start {
            return Err(ForecastError::ComputationError(format!(
                "empty date range {} .. {}",
                start, end
            )));
        }
        Ok(HistoryRange::Between { start, end })
    }

    /// Whether `date` falls inside the range, given today's date
    pub fn contains(&self, date: NaiveDate, today: NaiveDate) -> bool {
        match *self {
            HistoryRange::Between { start, end } => date >= start && date < end,
            HistoryRange::Period(period) => match period.start_date(today) {
                Some(start) => date >= start && date <= today,
                None => date <= today,
            },
        }
    }
}

/// Two years: the default feature windows need about 260 daily bars
impl Default for HistoryRange {
    fn default() -> Self {
        HistoryRange::Period(Period::Years(2))
    }
}

impl fmt::Display for HistoryRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HistoryRange::Period(p) => write!(f, "{}", p),
            HistoryRange::Between { start, end } => write!(f, "{}..{}", start, end),
        }
    }
}
