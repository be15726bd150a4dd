//! PortaFi command line
//!
//! ```bash
//! portafi train AAPL --period 2y
//! portafi analyze AAPL MSFT --start 2023-01-01
//! portafi portfolio AAPL=0.6 MSFT=0.4 --period 1y
//! portafi portfolio --request request.json
//! ```
//!
//! Results are printed to stdout as JSON; logs go to stderr.

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use portafi::analysis::{PortfolioAnalyzer, PortfolioRequest};
use portafi::config::AppConfig;
use portafi::market_data::{CsvPriceSource, PriceProvider, YahooChartClient};
use portafi::ml_engine::config_bridge::{parse_history_range, EngineConfigConvertible};
use portafi::ml_engine::ArtifactStore;
use portafi::types::HistoryRange;

/// PortaFi - LSTM forecasts and risk statistics for price portfolios
#[derive(Parser, Debug)]
#[command(name = "portafi")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train a model on one ticker's history and save the artifact
    Train {
        ticker: String,

        #[command(flatten)]
        range: RangeArgs,
    },

    /// Predicted-path return and volatility for each ticker
    Analyze {
        #[arg(required = true)]
        tickers: Vec<String>,

        #[command(flatten)]
        range: RangeArgs,
    },

    /// Weighted portfolio statistics and next-step forecast
    Portfolio {
        /// TICKER=WEIGHT pairs
        #[arg(value_parser = parse_weight, required_unless_present = "request")]
        weights: Vec<(String, f64)>,

        /// JSON request file with tickers, weights and range
        #[arg(long, conflicts_with = "weights")]
        request: Option<PathBuf>,

        #[command(flatten)]
        range: RangeArgs,
    },
}

/// History selection shared by every command
#[derive(Args, Debug, Clone, Default)]
struct RangeArgs {
    /// Trailing period: 5d, 6mo, 1y, 2y, ytd or max
    #[arg(long)]
    period: Option<String>,

    /// First day of history (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    start: Option<NaiveDate>,

    /// End of history, exclusive (YYYY-MM-DD). Defaults to today.
    #[arg(long, value_parser = parse_date, requires = "start")]
    end: Option<NaiveDate>,
}

fn parse_date(s: &str) -> std::result::Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| format!("expected YYYY-MM-DD: {}", e))
}

fn parse_weight(s: &str) -> std::result::Result<(String, f64), String> {
    let (ticker, weight) = s
        .split_once('=')
        .ok_or_else(|| format!("expected TICKER=WEIGHT, got '{}'", s))?;
    let weight = weight
        .parse::<f64>()
        .map_err(|e| format!("invalid weight in '{}': {}", s, e))?;
    Ok((ticker.to_uppercase(), weight))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("PORTAFI_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn build_provider(config: &AppConfig) -> Result<Arc<dyn PriceProvider>> {
    match config.data.provider.to_lowercase().as_str() {
        "yahoo" => Ok(Arc::new(YahooChartClient::new(&config.data.yahoo_base_url)?)),
        "csv" => Ok(Arc::new(CsvPriceSource::new(&config.data.csv_dir))),
        other => bail!("Unknown data provider '{}' (expected yahoo or csv)", other),
    }
}

/// Range from CLI flags, falling back to the configured default
fn resolve_range(args: &RangeArgs, config: &AppConfig) -> Result<HistoryRange> {
    if let Some(start) = args.start {
        let end = args
            .end
            .unwrap_or_else(|| chrono::Utc::now().date_naive() + chrono::Days::new(1));
        return Ok(HistoryRange::between(start, end)?);
    }
    Ok(match &args.period {
        Some(period) => parse_history_range(period),
        None => parse_history_range(&config.data.default_period),
    })
}

fn portfolio_request(
    weights: Vec<(String, f64)>,
    request: Option<PathBuf>,
    range: RangeArgs,
) -> Result<PortfolioRequest> {
    let mut request = match request {
        Some(path) => {
            let json = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read request file {}", path.display()))?;
            serde_json::from_str::<PortfolioRequest>(&json)
                .with_context(|| format!("Failed to parse request file {}", path.display()))?
        }
        None => {
            let mut keyed = BTreeMap::new();
            for (ticker, weight) in weights {
                if keyed.insert(ticker.clone(), weight).is_some() {
                    bail!("Ticker {} given more than once", ticker);
                }
            }
            PortfolioRequest::keyed(keyed)
        }
    };

    if range.period.is_some() {
        request.period = range.period;
    }
    if range.start.is_some() {
        request.start_date = range.start;
        request.end_date = range.end;
    }
    Ok(request)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("Failed to serialize result")?;
    println!("{}", out);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = AppConfig::load()?;
    info!("🚀 PortaFi starting: {}", config.digest());

    let provider = build_provider(&config)?;
    let store = ArtifactStore::new(&config.artifacts.dir);
    let mut analyzer = PortfolioAnalyzer::new(config.to_analyzer_config(), provider);

    let trains = matches!(cli.command, Commands::Train { .. });
    if !trains && config.artifacts.load_on_start && store.exists() {
        let feature_set = analyzer.config().engine.features.feature_set;
        match store.load_for(feature_set) {
            Ok(artifact) => {
                info!("📂 Loaded artifact {} from {}", artifact.artifact_id(), store.dir().display());
                analyzer = analyzer.with_artifact(Arc::new(artifact));
            }
            Err(e) => warn!("⚠️ Could not load artifact from {}: {}", store.dir().display(), e),
        }
    }

    match cli.command {
        Commands::Train { ticker, range } => {
            let ticker = ticker.to_uppercase();
            let range = resolve_range(&range, &config)?;
            let (artifact, history, metrics) = analyzer.train_instrument(&ticker, range).await?;
            store
                .save(&artifact)
                .with_context(|| format!("Failed to save artifact to {}", store.dir().display()))?;
            info!("💾 Artifact saved to {}", store.dir().display());
            print_json(&serde_json::json!({
                "ticker": ticker,
                "artifact_id": artifact.artifact_id(),
                "history": history,
                "metrics": metrics,
            }))?;
        }
        Commands::Analyze { tickers, range } => {
            let tickers: Vec<String> = tickers.iter().map(|t| t.to_uppercase()).collect();
            let range = resolve_range(&range, &config)?;
            if let [ticker] = tickers.as_slice() {
                print_json(&analyzer.analyze_instrument(ticker, range).await?)?;
            } else {
                print_json(&analyzer.analyze_instruments(&tickers, range).await?)?;
            }
        }
        Commands::Portfolio {
            weights,
            request,
            range,
        } => {
            let request = portfolio_request(weights, request, range)?;
            print_json(&analyzer.analyze_portfolio(&request).await?)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_portfolio_pairs_and_dates() {
        let cli = Cli::try_parse_from([
            "portafi",
            "portfolio",
            "aapl=0.6",
            "MSFT=0.4",
            "--start",
            "2023-01-01",
        ])
        .unwrap();
        match cli.command {
            Commands::Portfolio { weights, request, range } => {
                assert_eq!(
                    weights,
                    vec![("AAPL".to_string(), 0.6), ("MSFT".to_string(), 0.4)]
                );
                assert!(request.is_none());
                assert_eq!(range.start, NaiveDate::from_ymd_opt(2023, 1, 1));
                assert!(range.end.is_none());
            }
            other => panic!("expected portfolio, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_malformed_arguments() {
        for args in [
            vec!["portafi", "train", "AAPL", "--start", "01/02/2023"],
            vec!["portafi", "train", "AAPL", "--end", "2023-06-01"],
            vec!["portafi", "analyze"],
            vec!["portafi", "portfolio"],
            vec!["portafi", "portfolio", "AAPL:1.0"],
            vec!["portafi", "portfolio", "AAPL=1.0", "--request", "req.json"],
        ] {
            assert!(Cli::try_parse_from(args.iter().copied()).is_err(), "{:?} should be rejected", args);
        }
    }

    #[test]
    fn test_portfolio_request_from_pairs() {
        let range = RangeArgs {
            period: Some("6mo".to_string()),
            ..RangeArgs::default()
        };
        let request = portfolio_request(vec![("AAA".to_string(), 1.0)], None, range).unwrap();
        assert_eq!(request.period.as_deref(), Some("6mo"));
        assert!(request.start_date.is_none());

        let duplicate = vec![("AAA".to_string(), 0.5), ("AAA".to_string(), 0.5)];
        assert!(portfolio_request(duplicate, None, RangeArgs::default()).is_err());
    }
}
