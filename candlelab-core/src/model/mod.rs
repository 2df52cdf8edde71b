//! Trainable classifier seam.
//!
//! The walk-forward trainer only ever talks to the [`Classifier`] trait:
//! fit on a matrix, predict class indices, optionally expose calibrated
//! probabilities. Any multi-class model with deterministic seeding can
//! slot in without touching the block-splitting logic.

pub mod gbdt;

use thiserror::Error;

pub use gbdt::{GbdtClassifier, GbdtParams};

/// Errors from model training and inference.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model has not been trained")]
    NotTrained,

    #[error("empty training set")]
    EmptyTrainingSet,

    #[error("feature dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("class index {class} out of range (n_classes = {n_classes})")]
    ClassOutOfRange { class: u8, n_classes: usize },
}

/// A trainable multi-class classifier.
///
/// `y` holds class indices in `0..n_classes`. Implementations must be
/// deterministic for a fixed seed and input.
pub trait Classifier: Send {
    /// Fit on a row-major feature matrix and class indices.
    fn fit(&mut self, x: &[Vec<f64>], y: &[u8]) -> Result<(), ModelError>;

    /// Predict a class index per input row.
    fn predict(&self, x: &[Vec<f64>]) -> Result<Vec<u8>, ModelError>;

    /// Per-row class probability distribution (rows sum to 1).
    fn predict_proba(&self, x: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, ModelError>;
}
