mod api;
mod config;
mod correlation;
mod db;
mod error;
mod extractor;
mod fetcher;
mod ingest;
mod pipeline;
mod prices;
mod registry;
mod retention;
mod scorer;
mod types;

use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::{router, ApiState};
use crate::config::Config;
use crate::correlation::correlate;
use crate::db::{AggregationStore, StoreSettings};
use crate::error::{AppError, Result};
use crate::fetcher::HttpRedditClient;
use crate::pipeline::{verify_ticker, PipelineOrchestrator, PipelineSettings};
use crate::prices::HttpPriceSource;
use crate::registry::TickerRegistry;
use crate::scorer::HttpSentimentModel;

/// Reddit ticker mentions and sentiment, aggregated per time bucket.
#[derive(Debug, Parser)]
#[command(name = "retail-radar", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// One full pass: ingest, extract, score, prune.
    Run,
    /// Fetch and store new posts only.
    Ingest,
    /// Delete processed posts past the retention horizon.
    Prune,
    /// Replay every bucket of a ticker and compare with the stored aggregates.
    Verify {
        #[arg(long)]
        ticker: String,
    },
    /// Correlate a ticker's daily sentiment with its daily closing prices.
    Correlate {
        #[arg(long)]
        ticker: String,
        /// Trailing window in days.
        #[arg(long, default_value_t = 30)]
        days: u32,
    },
    /// Serve the read-only query API.
    Serve {
        /// Overrides API_PORT.
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    match run(cli.command, cfg).await {
        Ok(()) => {}
        Err(e) if e.is_stage_fatal() => {
            error!("Fatal error: {e}");
            std::process::exit(1);
        }
        Err(e) => warn!("Finished with a recoverable error: {e}"),
    }
}

async fn run(command: Command, cfg: Config) -> Result<()> {
    let settings = StoreSettings { bucket: cfg.bucket, representative_k: cfg.representative_k };

    match command {
        Command::Run => {
            let orchestrator = orchestrator(&cfg, settings).await?;
            let report = orchestrator.run_pass(Utc::now()).await?;
            print_json(&report)?;
        }
        Command::Ingest => {
            let orchestrator = orchestrator(&cfg, settings).await?;
            let report = orchestrator.run_ingest_only().await?;
            print_json(&report)?;
        }
        Command::Prune => {
            let orchestrator = orchestrator(&cfg, settings).await?;
            let summary = orchestrator.run_prune_only(Utc::now()).await?;
            print_json(&summary)?;
        }
        Command::Verify { ticker } => {
            let store = AggregationStore::new(db::store::connect(&cfg.db_path).await?, settings);
            let ticker = ticker.to_ascii_uppercase();
            let report = verify_ticker(&store, &ticker).await?;
            print_json(&report)?;
            if !report.mismatched.is_empty() {
                return Err(AppError::Corrupt(format!(
                    "{} bucket(s) of {ticker} disagree with a replay",
                    report.mismatched.len()
                )));
            }
        }
        Command::Correlate { ticker, days } => {
            let store = AggregationStore::new(db::store::connect_read_only(&cfg.db_path).await?, settings);
            let prices = HttpPriceSource::new(&cfg)?;
            let ticker = ticker.to_ascii_uppercase();
            let report = correlate(&store, &prices, &ticker, Utc::now(), days).await?;
            print_json(&report)?;
        }
        Command::Serve { port } => {
            let pool = db::store::connect_read_only(&cfg.db_path).await?;
            let app = router(ApiState { store: AggregationStore::new(pool, settings) });
            let bind_addr = format!("0.0.0.0:{}", port.unwrap_or(cfg.api_port));
            let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
            info!("HTTP API listening on {bind_addr}");
            axum::serve(listener, app).await?;
        }
    }
    Ok(())
}

/// Registry and store must come up before anything runs.
async fn orchestrator(cfg: &Config, settings: StoreSettings) -> Result<PipelineOrchestrator> {
    let registry = Arc::new(TickerRegistry::load(&cfg.lexicon_path, &cfg.extra_ambiguous)?);
    let store = AggregationStore::new(db::store::connect(&cfg.db_path).await?, settings);
    let reddit = HttpRedditClient::new(cfg)
        .map_err(|e| AppError::Config(format!("reddit client: {e}")))?;
    let model = HttpSentimentModel::new(cfg)
        .map_err(|e| AppError::Config(format!("sentiment client: {e}")))?;
    info!(
        subreddits = ?cfg.subreddits,
        bucket = %cfg.bucket,
        k = cfg.representative_k,
        window = ?cfg.scoring_window,
        "Pipeline configured"
    );
    Ok(PipelineOrchestrator::new(
        store,
        registry,
        Arc::new(reddit),
        Arc::new(model),
        PipelineSettings::from_config(cfg),
    ))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
