//! Dynamic triple-barrier labeler.
//!
//! For each bar: pick a lookahead horizon from the local volume regime,
//! size asymmetric profit/loss barriers from ATR, then scan forward and
//! record which barrier the close touches first.
//!
//! - Fast regime (volume above its trailing mean): short horizon.
//! - Slow regime (volume at or below the mean): long horizon.
//! - Upper barrier touched first → 1, lower first → -1, neither → 0.
//!
//! Labels read *future* closes only; nothing here may ever feed back
//! into a feature column. Bars per-label are independent, so the outer
//! loop runs on rayon while each bar's forward scan stays sequential.
//!
//! Input must be canonical (sorted, unique timestamps) with no NaN in
//! the close/volume/atr columns; see `domain::series`.

use crate::features::FeatureFrame;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Barrier and horizon parameters.
///
/// Defaults encode a 1:2 risk:reward ratio (stop at 1 ATR, target at
/// 2 ATR) and a horizon of 8 bars in fast markets, 16 in slow ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelConfig {
    /// ATR multiple for the upper (take-profit) barrier.
    pub pt_multiplier: f64,
    /// ATR multiple for the lower (stop-loss) barrier.
    pub sl_multiplier: f64,
    /// Lookahead when volume is above its trailing mean.
    pub fast_horizon: usize,
    /// Lookahead when volume is at or below its trailing mean.
    pub slow_horizon: usize,
    /// Trailing window for the volume regime mean.
    pub volume_window: usize,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            pt_multiplier: 2.0,
            sl_multiplier: 1.0,
            fast_horizon: 8,
            slow_horizon: 16,
            volume_window: 20,
        }
    }
}

/// Errors from labeling a frame.
#[derive(Debug, Error)]
pub enum LabelError {
    #[error("missing required column '{0}'")]
    MissingColumn(String),
}

/// Label every bar of a series.
///
/// Returns one label in {-1, 0, 1} per input index, in input order.
/// `closes`, `volumes`, and `atr` must be equal-length parallel slices.
///
/// Boundary policy: a bar whose horizon extends past the series end is
/// 0 (unresolved), not an error. Regime policy: while the trailing
/// volume mean is still undefined (the first `volume_window - 1` bars),
/// the bar is treated as slow regime. Degenerate volatility (ATR zero
/// or NaN) never panics: zero collapses both barriers onto the close,
/// NaN satisfies neither comparison and the label decays to 0.
pub fn label_series(
    closes: &[f64],
    volumes: &[f64],
    atr: &[f64],
    cfg: &LabelConfig,
) -> Vec<i8> {
    assert_eq!(closes.len(), volumes.len());
    assert_eq!(closes.len(), atr.len());

    let n = closes.len();
    let vol_mean = crate::features::rolling::rolling_mean(volumes, cfg.volume_window);

    (0..n)
        .into_par_iter()
        .map(|i| label_one(i, closes, volumes, &vol_mean, atr, cfg, n))
        .collect()
}

/// Resolve the label for a single bar.
fn label_one(
    i: usize,
    closes: &[f64],
    volumes: &[f64],
    vol_mean: &[f64],
    atr: &[f64],
    cfg: &LabelConfig,
    n: usize,
) -> i8 {
    // Undefined regime window (NaN mean) compares false and lands in the
    // slow branch, same as a below-mean volume.
    let horizon = if volumes[i] > vol_mean[i] {
        cfg.fast_horizon
    } else {
        cfg.slow_horizon
    };

    // Hard boundary truncation: not enough future bars to resolve.
    if i + horizon >= n {
        return 0;
    }

    let take_profit = closes[i] + atr[i] * cfg.pt_multiplier;
    let stop_loss = closes[i] - atr[i] * cfg.sl_multiplier;

    // First touch wins; the scan is sequential so ties cannot happen.
    for &future in &closes[i + 1..=i + horizon] {
        if future >= take_profit {
            return 1;
        }
        if future <= stop_loss {
            return -1;
        }
    }

    0
}

/// Append the `target` column to a feature frame.
///
/// Requires the `atr` column; output row count and order match the
/// frame exactly.
pub fn label_frame(frame: &mut FeatureFrame, cfg: &LabelConfig) -> Result<(), LabelError> {
    let atr = frame
        .column("atr")
        .ok_or_else(|| LabelError::MissingColumn("atr".into()))?
        .to_vec();

    let closes: Vec<f64> = frame.bars().iter().map(|b| b.close).collect();
    let volumes: Vec<f64> = frame.bars().iter().map(|b| b.volume).collect();

    let labels = label_series(&closes, &volumes, &atr, cfg);
    frame.set_target(labels);
    Ok(())
}
