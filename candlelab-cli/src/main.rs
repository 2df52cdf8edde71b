//! candlelab CLI — download, process, train, run, live, status.
//!
//! Commands:
//! - `download` — fetch candles from the exchange archive into parquet
//! - `process`  — compute features and triple-barrier labels
//! - `train`    — walk-forward train a classifier on the processed frame
//! - `run`      — download + process + train in one go
//! - `live`     — stream closed candles from the exchange WebSocket
//! - `status`   — report what the data directory holds

use anyhow::{Context, Result};
use candlelab_core::{BarStore, BinanceProvider};
use candlelab_runner::{
    pipeline, CandleSnapshot, KlineFeed, KlineFeedConfig, PipelineConfig, TrainReport,
};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "candlelab",
    about = "candlelab CLI — candle labeling and walk-forward training pipeline"
)]
struct Cli {
    /// Path to a TOML pipeline config. Flags below override its fields.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Exchange symbol, e.g. BTCUSDT.
    #[arg(long, global = true)]
    symbol: Option<String>,

    /// Candle interval, e.g. 5m.
    #[arg(long, global = true)]
    interval: Option<String>,

    /// Data directory for parquet files and artifacts.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch candles from the exchange archive into the raw store.
    Download {
        /// Start date (YYYY-MM-DD).
        #[arg(long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD). Defaults to now.
        #[arg(long)]
        end: Option<String>,
    },
    /// Compute features and labels over the stored raw series.
    Process,
    /// Walk-forward train on the stored processed frame.
    Train,
    /// Full pipeline: download, process, train.
    Run {
        /// Start date (YYYY-MM-DD).
        #[arg(long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD). Defaults to now.
        #[arg(long)]
        end: Option<String>,
    },
    /// Stream closed candles from the exchange WebSocket.
    Live,
    /// Report stored series and model artifacts.
    Status,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = build_config(&cli)?;
    let store = BarStore::new(&cfg.data_dir);

    match cli.command {
        Commands::Download { start, end } => {
            let cfg = with_dates(cfg, start.as_deref(), end.as_deref())?;
            let provider = BinanceProvider::new()?;
            let stored = pipeline::download(&cfg, &provider, &store)?;
            println!("Stored {stored} bars for {} {}", cfg.symbol, cfg.interval);
            Ok(())
        }
        Commands::Process => {
            let summary = pipeline::process(&cfg, &store)?;
            println!(
                "Processed {} rows ({} features): down={} flat={} up={}",
                summary.rows,
                summary.feature_names.len(),
                summary.label_counts[0],
                summary.label_counts[1],
                summary.label_counts[2],
            );
            Ok(())
        }
        Commands::Train => {
            let report = pipeline::train(&cfg, &store)?;
            print_report(&cfg, &report);
            Ok(())
        }
        Commands::Run { start, end } => {
            let cfg = with_dates(cfg, start.as_deref(), end.as_deref())?;
            let provider = BinanceProvider::new()?;
            let report = pipeline::run(&cfg, &provider, &store)?;
            print_report(&cfg, &report);
            Ok(())
        }
        Commands::Live => run_live(&cfg),
        Commands::Status => run_status(&cfg, &store),
    }
}

/// Load the config file (or defaults) and apply global flag overrides.
fn build_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut cfg = match &cli.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(symbol) = &cli.symbol {
        cfg.symbol = symbol.to_uppercase();
    }
    if let Some(interval) = &cli.interval {
        cfg.interval = interval.clone();
    }
    if let Some(data_dir) = &cli.data_dir {
        cfg.data_dir = data_dir.clone();
    }
    cfg.validate()?;
    Ok(cfg)
}

fn with_dates(
    mut cfg: PipelineConfig,
    start: Option<&str>,
    end: Option<&str>,
) -> Result<PipelineConfig> {
    if let Some(s) = start {
        cfg.start = NaiveDate::parse_from_str(s, "%Y-%m-%d").context("parsing --start")?;
    }
    if let Some(e) = end {
        cfg.end = Some(NaiveDate::parse_from_str(e, "%Y-%m-%d").context("parsing --end")?);
    }
    cfg.validate()?;
    Ok(cfg)
}

fn print_report(cfg: &PipelineConfig, report: &TrainReport) {
    println!();
    println!("=== Walk-forward report: {} {} ===", cfg.symbol, cfg.interval);
    println!("Rows:            {}", report.rows);
    println!("Features:        {}", report.feature_names.join(", "));
    println!();
    println!(
        "{:<6} {:>12} {:>11} {:>10}",
        "Round", "Train rows", "Test rows", "Accuracy"
    );
    println!("{}", "-".repeat(42));
    for block_report in &report.blocks {
        println!(
            "{:<6} {:>12} {:>11} {:>9.1}%",
            block_report.block.index,
            block_report.block.train_rows(),
            block_report.block.test_rows(),
            block_report.accuracy * 100.0,
        );
    }
    println!("{}", "-".repeat(42));
    println!("Mean accuracy:   {:.1}%", report.mean_accuracy * 100.0);
    println!(
        "Model artifact:  {}",
        pipeline::model_path(cfg).display()
    );
    println!();
}

/// Stream closed candles, printing each snapshot update until the feed
/// gives up reconnecting or the process is interrupted.
fn run_live(cfg: &PipelineConfig) -> Result<()> {
    let feed_config = KlineFeedConfig {
        symbol: cfg.symbol.to_lowercase(),
        interval: cfg.interval.clone(),
        ..KlineFeedConfig::default()
    };
    println!(
        "Streaming closed {} candles for {} (ctrl-c to stop)...",
        cfg.interval, cfg.symbol
    );

    let runtime = tokio::runtime::Runtime::new().context("starting async runtime")?;
    runtime.block_on(async move {
        let snapshot: CandleSnapshot = Arc::new(tokio::sync::RwLock::new(HashMap::new()));
        let mut feed = KlineFeed::new(feed_config, snapshot.clone());

        let printer = tokio::spawn(async move {
            let mut last_seen: HashMap<String, i64> = HashMap::new();
            loop {
                tokio::time::sleep(Duration::from_secs(1)).await;
                let map = snapshot.read().await;
                for (symbol, bar) in map.iter() {
                    if last_seen.get(symbol) == Some(&bar.timestamp_ms()) {
                        continue;
                    }
                    last_seen.insert(symbol.clone(), bar.timestamp_ms());
                    println!(
                        "{}  {}  close={:.2}  volume={:.3}  trades={}",
                        bar.timestamp, symbol, bar.close, bar.volume, bar.number_of_trades
                    );
                }
            }
        });

        let result = feed.run().await;
        printer.abort();
        result
    })?;

    Ok(())
}

fn run_status(cfg: &PipelineConfig, store: &BarStore) -> Result<()> {
    println!("Data directory: {}", cfg.data_dir.display());

    match store.meta(&cfg.symbol, &cfg.interval) {
        Some(meta) => {
            println!(
                "Raw:       {} {} — {} bars, {} to {}",
                meta.symbol, meta.interval, meta.bar_count, meta.start, meta.end
            );
        }
        None => println!("Raw:       (none for {} {})", cfg.symbol, cfg.interval),
    }

    if store.has_processed(&cfg.symbol, &cfg.interval) {
        println!("Processed: present");
    } else {
        println!("Processed: (none)");
    }

    let model = pipeline::model_path(cfg);
    if model.exists() {
        match pipeline::load_model(cfg) {
            Ok(artifact) => println!(
                "Model:     trained {} on [{}] (run {})",
                artifact.trained_at,
                artifact.feature_names.join(", "),
                artifact.run_id.get(..12).unwrap_or(&artifact.run_id),
            ),
            Err(_) => println!("Model:     {} (unreadable)", model.display()),
        }
    } else {
        println!("Model:     (none)");
    }

    if let Some(size) = dir_size(&cfg.data_dir) {
        println!("Size:      {}", format_size(size));
    }

    Ok(())
}

fn dir_size(path: &Path) -> Option<u64> {
    let entries = std::fs::read_dir(path).ok()?;
    let mut size = 0u64;
    for entry in entries.flatten() {
        if let Ok(meta) = entry.metadata() {
            size += meta.len();
        }
    }
    Some(size)
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
