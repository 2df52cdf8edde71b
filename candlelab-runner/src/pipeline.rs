//! End-to-end pipeline stages: download, process, train.
//!
//! Each stage reads its input from the bar store and writes its output
//! back, so stages can run independently (`download` today, `train`
//! tomorrow) or chained as one `run`. Model artifacts land next to the
//! parquet files as JSON.

use crate::config::PipelineConfig;
use crate::walk_forward::{train_walk_forward, TrainError, TrainReport};
use candlelab_core::model::GbdtClassifier;
use candlelab_core::{compute_features, label_frame, BarProvider, BarStore, DataError, LabelError};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{info, warn};

/// Errors from any pipeline stage.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Label(#[from] LabelError),

    #[error(transparent)]
    Train(#[from] TrainError),

    #[error("artifact error: {0}")]
    Artifact(String),
}

/// Outcome of the process stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessSummary {
    pub rows: usize,
    pub feature_names: Vec<String>,
    pub label_counts: [usize; 3],
}

/// Trained model plus everything needed to apply it later.
#[derive(Debug, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub symbol: String,
    pub interval: String,
    pub run_id: String,
    pub trained_at: NaiveDateTime,
    pub feature_names: Vec<String>,
    pub model: GbdtClassifier,
}

/// Download candles for the configured range into the raw store.
/// Returns the number of bars stored.
pub fn download(
    cfg: &PipelineConfig,
    provider: &dyn BarProvider,
    store: &BarStore,
) -> Result<usize, PipelineError> {
    let start = cfg.start.and_hms_opt(0, 0, 0).unwrap_or_default();
    let end = cfg
        .end
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_else(|| chrono::Utc::now().naive_utc());

    info!(
        symbol = %cfg.symbol,
        interval = %cfg.interval,
        provider = provider.name(),
        %start,
        %end,
        "downloading candles"
    );

    let fetched = provider.fetch(&cfg.symbol, &cfg.interval, start, end)?;
    let fetched_count = fetched.len();
    let bars: Vec<_> = fetched.into_iter().filter(|b| b.is_sane()).collect();
    if bars.len() < fetched_count {
        warn!(
            dropped = fetched_count - bars.len(),
            "dropped malformed bars from download"
        );
    }

    store.write_raw(&cfg.symbol, &cfg.interval, &bars)?;
    info!(bars = bars.len(), "raw series stored");
    Ok(bars.len())
}

/// Compute features and labels over the stored raw series and persist
/// the processed frame.
pub fn process(cfg: &PipelineConfig, store: &BarStore) -> Result<ProcessSummary, PipelineError> {
    let bars = store.load_raw(&cfg.symbol, &cfg.interval)?;
    info!(symbol = %cfg.symbol, bars = bars.len(), "processing series");

    let mut frame = compute_features(bars, &cfg.features);
    label_frame(&mut frame, &cfg.labeling)?;

    let mut label_counts = [0usize; 3];
    if let Some(target) = frame.target() {
        for &t in target {
            label_counts[(t + 1) as usize] += 1;
        }
    }

    store.write_processed(&cfg.symbol, &cfg.interval, &frame)?;

    let summary = ProcessSummary {
        rows: frame.len(),
        feature_names: frame.feature_names().iter().map(|n| n.to_string()).collect(),
        label_counts,
    };
    info!(
        rows = summary.rows,
        down = label_counts[0],
        flat = label_counts[1],
        up = label_counts[2],
        "processed frame stored"
    );
    Ok(summary)
}

/// Walk-forward train on the stored processed frame; write the model
/// artifact and report next to the parquet files.
pub fn train(cfg: &PipelineConfig, store: &BarStore) -> Result<TrainReport, PipelineError> {
    let frame = store.load_processed(&cfg.symbol, &cfg.interval)?;
    info!(symbol = %cfg.symbol, rows = frame.len(), "training walk-forward");

    let (model, report) = train_walk_forward(&frame, &cfg.train)?;

    let artifact = ModelArtifact {
        symbol: cfg.symbol.clone(),
        interval: cfg.interval.clone(),
        run_id: cfg.run_id()?,
        trained_at: chrono::Utc::now().naive_utc(),
        feature_names: report.feature_names.clone(),
        model,
    };
    write_json_atomic(&model_path(cfg), &artifact)?;
    write_json_atomic(&report_path(cfg), &report)?;

    info!(
        mean_accuracy = report.mean_accuracy,
        rounds = report.blocks.len(),
        "training complete, artifacts written"
    );
    Ok(report)
}

/// Run all three stages in order.
pub fn run(
    cfg: &PipelineConfig,
    provider: &dyn BarProvider,
    store: &BarStore,
) -> Result<TrainReport, PipelineError> {
    download(cfg, provider, store)?;
    process(cfg, store)?;
    train(cfg, store)
}

pub fn model_path(cfg: &PipelineConfig) -> PathBuf {
    cfg.data_dir
        .join(format!("{}_{}_model.json", cfg.symbol, cfg.interval))
}

pub fn report_path(cfg: &PipelineConfig) -> PathBuf {
    cfg.data_dir
        .join(format!("{}_{}_report.json", cfg.symbol, cfg.interval))
}

/// Load a previously written model artifact.
pub fn load_model(cfg: &PipelineConfig) -> Result<ModelArtifact, PipelineError> {
    let path = model_path(cfg);
    let content = fs::read_to_string(&path)
        .map_err(|e| PipelineError::Artifact(format!("read {}: {e}", path.display())))?;
    serde_json::from_str(&content)
        .map_err(|e| PipelineError::Artifact(format!("parse {}: {e}", path.display())))
}

fn write_json_atomic<T: Serialize>(path: &PathBuf, value: &T) -> Result<(), PipelineError> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| PipelineError::Artifact(format!("serialize: {e}")))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).map_err(|e| PipelineError::Artifact(format!("write: {e}")))?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        PipelineError::Artifact(format!("rename: {e}"))
    })
}
