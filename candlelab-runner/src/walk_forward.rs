//! Walk-forward validation trainer.
//!
//! Splits a labeled feature frame into equal time blocks, then runs a
//! sliding train/test schedule: each round fits a fresh classifier on a
//! window of consecutive blocks and scores it on the single block that
//! follows. Time order is never violated: every test row is strictly
//! later than every row the model trained on, and remainder rows past
//! the last block boundary are discarded rather than leaked into any
//! split.
//!
//! Rounds are independent, so they train in parallel on rayon; reports
//! come back in round order regardless. The classifier returned to the
//! caller is the one from the final round, trained on the most recent
//! window.

use crate::config::TrainConfig;
use candlelab_core::model::{Classifier, GbdtClassifier, ModelError};
use candlelab_core::FeatureFrame;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// Number of label classes: {-1, 0, 1} remapped to {0, 1, 2}.
const N_CLASSES: usize = 3;

/// Errors from walk-forward training.
#[derive(Debug, Error)]
pub enum TrainError {
    #[error("insufficient data: {rows} rows, need at least {min_rows} for {denominator} blocks")]
    InsufficientData {
        rows: usize,
        min_rows: usize,
        denominator: usize,
    },

    #[error("frame has no target column — run labeling first")]
    MissingTarget,

    #[error("frame has no feature columns")]
    NoFeatureColumns,

    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Row ranges for one validation round. All bounds are row indices into
/// the frame; `train_start..train_end` trains, `train_end..test_end`
/// tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationBlock {
    pub index: usize,
    pub train_start: usize,
    pub train_end: usize,
    pub test_end: usize,
}

impl ValidationBlock {
    pub fn train_rows(&self) -> usize {
        self.train_end - self.train_start
    }

    pub fn test_rows(&self) -> usize {
        self.test_end - self.train_end
    }
}

/// Per-round outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockReport {
    pub block: ValidationBlock,
    /// Exact-match accuracy on the test block.
    pub accuracy: f64,
    /// Predicted class counts over the test block, indexed by class.
    pub predicted_counts: [usize; N_CLASSES],
}

/// Full walk-forward outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainReport {
    pub rows: usize,
    pub feature_names: Vec<String>,
    pub blocks: Vec<BlockReport>,
    pub mean_accuracy: f64,
}

/// Compute the sliding train/test schedule for a series of `rows` rows.
///
/// `block_size = rows / denominator` (integer division); round `i`
/// trains on `[i*bs, (i+window)*bs)` and tests on
/// `[(i+window)*bs, (i+window+1)*bs)` where `window = denominator -
/// blocks`. Rows at `denominator*bs..` belong to no split.
pub fn create_blocks(
    rows: usize,
    blocks: usize,
    denominator: usize,
) -> Result<Vec<ValidationBlock>, TrainError> {
    debug_assert!(blocks > 0 && denominator > blocks);

    let block_size = rows / denominator;
    if block_size == 0 {
        return Err(TrainError::InsufficientData {
            rows,
            min_rows: denominator,
            denominator,
        });
    }

    let window = denominator - blocks;
    Ok((0..blocks)
        .map(|i| ValidationBlock {
            index: i,
            train_start: i * block_size,
            train_end: (i + window) * block_size,
            test_end: (i + window + 1) * block_size,
        })
        .collect())
}

/// Train a classifier per validation round and score each on its test
/// block. Returns the final round's model and the full report.
pub fn train_walk_forward(
    frame: &FeatureFrame,
    cfg: &TrainConfig,
) -> Result<(GbdtClassifier, TrainReport), TrainError> {
    let target = frame.target().ok_or(TrainError::MissingTarget)?;
    let feature_names: Vec<String> = frame
        .feature_names()
        .iter()
        .map(|n| n.to_string())
        .collect();
    if feature_names.is_empty() {
        return Err(TrainError::NoFeatureColumns);
    }

    let x = frame.feature_matrix();
    // Shift {-1, 0, 1} to class indices {0, 1, 2}.
    let y: Vec<u8> = target.iter().map(|&t| (t + 1) as u8).collect();

    let blocks = create_blocks(frame.len(), cfg.blocks, cfg.block_denominator)?;

    let mut rounds: Vec<(GbdtClassifier, BlockReport)> = blocks
        .par_iter()
        .map(|&block| run_round(block, &x, &y, cfg))
        .collect::<Result<_, TrainError>>()?;

    let mean_accuracy =
        rounds.iter().map(|(_, r)| r.accuracy).sum::<f64>() / rounds.len() as f64;
    for (_, report) in &rounds {
        info!(
            round = report.block.index,
            train_rows = report.block.train_rows(),
            test_rows = report.block.test_rows(),
            accuracy = report.accuracy,
            "walk-forward round complete"
        );
    }

    let reports: Vec<BlockReport> = rounds.iter().map(|(_, r)| r.clone()).collect();
    let (final_model, _) = rounds.pop().ok_or(TrainError::InsufficientData {
        rows: frame.len(),
        min_rows: cfg.block_denominator,
        denominator: cfg.block_denominator,
    })?;

    Ok((
        final_model,
        TrainReport {
            rows: frame.len(),
            feature_names,
            blocks: reports,
            mean_accuracy,
        },
    ))
}

fn run_round(
    block: ValidationBlock,
    x: &[Vec<f64>],
    y: &[u8],
    cfg: &TrainConfig,
) -> Result<(GbdtClassifier, BlockReport), TrainError> {
    let train_x = &x[block.train_start..block.train_end];
    let train_y = &y[block.train_start..block.train_end];
    let test_x = &x[block.train_end..block.test_end];
    let test_y = &y[block.train_end..block.test_end];

    let mut model = GbdtClassifier::new(cfg.model.clone(), N_CLASSES);
    model.fit(train_x, train_y)?;

    let predictions = model.predict(test_x)?;
    let correct = predictions
        .iter()
        .zip(test_y)
        .filter(|(p, t)| p == t)
        .count();
    let accuracy = correct as f64 / test_y.len() as f64;

    let mut predicted_counts = [0usize; N_CLASSES];
    for &p in &predictions {
        predicted_counts[p as usize] += 1;
    }

    Ok((
        model,
        BlockReport {
            block,
            accuracy,
            predicted_counts,
        },
    ))
}
