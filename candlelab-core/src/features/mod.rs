//! Feature engine — deterministic rolling/EWM transforms over a bar series.
//!
//! Produces a column-oriented [`FeatureFrame`]: the input bars plus named
//! derived series. Columns whose name carries the `feature_` prefix are
//! model inputs; the trainer discovers them by prefix, never by a
//! hardcoded list. Auxiliary columns (`ema_200`, `atr`, `volume_delta`)
//! feed other stages but are not fed to the model.
//!
//! # Look-ahead contamination guard
//! No derived value at bar t may depend on data from bar t+1 or later.
//! Only the labeler is allowed to read forward, and only into `target`.

pub mod rolling;

use crate::domain::Bar;
use rolling::{cum_sum, ema, rolling_mean, true_range};
use serde::{Deserialize, Serialize};

/// Name prefix marking a column as a model input feature.
pub const FEATURE_PREFIX: &str = "feature_";

/// Lookback periods for the derived columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// EMA period for the trend-distance feature.
    pub ema_period: usize,
    /// Rolling window for average gains/losses.
    pub rsi_period: usize,
    /// Rolling window for average true range.
    pub atr_period: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            ema_period: 200,
            rsi_period: 14,
            atr_period: 14,
        }
    }
}

/// Bars plus named derived columns, all the same length.
///
/// After [`compute_features`] the frame contains no NaN in any derived
/// column: warmup rows are dropped wholesale so every surviving row is
/// fully defined.
#[derive(Debug, Clone, Default)]
pub struct FeatureFrame {
    bars: Vec<Bar>,
    columns: Vec<(String, Vec<f64>)>,
    target: Option<Vec<i8>>,
}

impl FeatureFrame {
    pub fn new(bars: Vec<Bar>) -> Self {
        Self {
            bars,
            columns: Vec::new(),
            target: None,
        }
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    /// Append a named column. Length must match the frame.
    pub fn push_column(&mut self, name: impl Into<String>, values: Vec<f64>) {
        assert_eq!(
            values.len(),
            self.bars.len(),
            "column length must match frame length"
        );
        self.columns.push((name.into(), values));
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
    }

    /// All column names in insertion order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Names of model-input columns (`feature_` prefix), insertion order.
    pub fn feature_names(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|(n, _)| n.starts_with(FEATURE_PREFIX))
            .map(|(n, _)| n.as_str())
            .collect()
    }

    /// Row-major matrix of the `feature_` columns, insertion order.
    pub fn feature_matrix(&self) -> Vec<Vec<f64>> {
        let feature_cols: Vec<&[f64]> = self
            .columns
            .iter()
            .filter(|(n, _)| n.starts_with(FEATURE_PREFIX))
            .map(|(_, v)| v.as_slice())
            .collect();

        (0..self.bars.len())
            .map(|i| feature_cols.iter().map(|c| c[i]).collect())
            .collect()
    }

    /// Attach the label column. Length must match the frame.
    pub fn set_target(&mut self, target: Vec<i8>) {
        assert_eq!(
            target.len(),
            self.bars.len(),
            "target length must match frame length"
        );
        self.target = Some(target);
    }

    pub fn target(&self) -> Option<&[i8]> {
        self.target.as_deref()
    }

    /// Drop leading rows where any derived column is still NaN.
    ///
    /// NaN appears only at the head of each column (warmup), so the cut
    /// point is the maximum first-valid index across columns. A frame
    /// shorter than its longest warmup becomes empty.
    pub fn drop_warmup(&mut self) {
        let cut = self
            .columns
            .iter()
            .map(|(_, v)| {
                v.iter()
                    .position(|x| !x.is_nan())
                    .unwrap_or(v.len())
            })
            .max()
            .unwrap_or(0);

        if cut == 0 {
            return;
        }

        self.bars.drain(..cut);
        for (_, values) in &mut self.columns {
            values.drain(..cut);
        }
        if let Some(target) = &mut self.target {
            target.drain(..cut);
        }
    }
}

/// Compute the derived columns for a canonical bar series.
///
/// Columns, in order:
/// - `volume_delta`: taker buy volume minus taker sell volume
/// - `feature_cvd`: cumulative volume delta
/// - `ema_{p}`: SMA-seeded EMA of close
/// - `feature_dist_ema_{p}`: percent distance of close from the EMA
/// - `feature_rsi`: 100 - 100/(1 + avg_gain/(avg_loss + 1e-10)), with
///   plain rolling means of gains and losses
/// - `atr`: rolling mean of true range
///
/// Warmup rows are dropped; the EMA warmup dominates with default
/// periods, so the first `ema_period - 1` rows go.
pub fn compute_features(bars: Vec<Bar>, cfg: &FeatureConfig) -> FeatureFrame {
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let highs: Vec<f64> = bars.iter().map(|b| b.high).collect();
    let lows: Vec<f64> = bars.iter().map(|b| b.low).collect();

    let n = bars.len();

    // Order flow: aggressive buys minus aggressive sells.
    let volume_delta: Vec<f64> = bars
        .iter()
        .map(|b| b.taker_buy_base - (b.volume - b.taker_buy_base))
        .collect();
    let cvd = cum_sum(&volume_delta);

    // Trend context: percent distance from the long EMA.
    let ema_close = ema(&closes, cfg.ema_period);
    let dist_ema: Vec<f64> = closes
        .iter()
        .zip(&ema_close)
        .map(|(c, e)| (c - e) / e * 100.0)
        .collect();

    // Momentum: simplified RSI over rolling mean gains/losses.
    let mut gains = vec![f64::NAN; n];
    let mut losses = vec![f64::NAN; n];
    for i in 1..n {
        let diff = closes[i] - closes[i - 1];
        gains[i] = if diff > 0.0 { diff } else { 0.0 };
        losses[i] = if diff < 0.0 { -diff } else { 0.0 };
    }
    let avg_gain = rolling_mean(&gains, cfg.rsi_period);
    let avg_loss = rolling_mean(&losses, cfg.rsi_period);
    let rsi: Vec<f64> = avg_gain
        .iter()
        .zip(&avg_loss)
        .map(|(g, l)| 100.0 - 100.0 / (1.0 + g / (l + 1e-10)))
        .collect();

    // Volatility: plain rolling mean of true range, sized for barriers.
    let atr = rolling_mean(&true_range(&highs, &lows, &closes), cfg.atr_period);

    let mut frame = FeatureFrame::new(bars);
    frame.push_column("volume_delta", volume_delta);
    frame.push_column("feature_cvd", cvd);
    frame.push_column(format!("ema_{}", cfg.ema_period), ema_close);
    frame.push_column(format!("feature_dist_ema_{}", cfg.ema_period), dist_ema);
    frame.push_column("feature_rsi", rsi);
    frame.push_column("atr", atr);
    frame.drop_warmup();
    frame
}

#[cfg(test)]
pub(crate) fn assert_approx(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "assert_approx failed: actual={actual}, expected={expected}"
    );
}

/// Synthetic bars from close prices: open = prev close, high/low bracket
/// by 1.0, constant volume with a 60/40 buy split.
#[cfg(test)]
pub(crate) fn make_bars(closes: &[f64]) -> Vec<Bar> {
    let base = chrono::NaiveDate::from_ymd_opt(2024, 1, 2)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = if i == 0 { close } else { closes[i - 1] };
            Bar {
                timestamp: base + chrono::Duration::minutes(5 * i as i64),
                open,
                high: open.max(close) + 1.0,
                low: open.min(close) - 1.0,
                close,
                volume: 100.0,
                number_of_trades: 40,
                taker_buy_base: 60.0,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_cfg() -> FeatureConfig {
        FeatureConfig {
            ema_period: 5,
            rsi_period: 3,
            atr_period: 3,
        }
    }

    #[test]
    fn warmup_rows_are_dropped() {
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        let frame = compute_features(make_bars(&closes), &small_cfg());
        // EMA(5) dominates: first valid index 4, so 4 rows dropped.
        assert_eq!(frame.len(), 16);
        assert_eq!(frame.bars()[0].close, 104.0);
    }

    #[test]
    fn no_nan_survives_in_any_column() {
        let closes: Vec<f64> = (0..40)
            .map(|i| 100.0 + (i as f64 * 0.7).sin() * 5.0)
            .collect();
        let frame = compute_features(make_bars(&closes), &small_cfg());
        for name in frame.column_names() {
            let col = frame.column(name).unwrap();
            assert!(
                col.iter().all(|v| !v.is_nan()),
                "NaN survived in column {name}"
            );
        }
    }

    #[test]
    fn feature_columns_discovered_by_prefix() {
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        let frame = compute_features(make_bars(&closes), &small_cfg());
        assert_eq!(
            frame.feature_names(),
            vec!["feature_cvd", "feature_dist_ema_5", "feature_rsi"]
        );
    }

    #[test]
    fn feature_matrix_is_row_major_in_column_order() {
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        let frame = compute_features(make_bars(&closes), &small_cfg());
        let x = frame.feature_matrix();
        assert_eq!(x.len(), frame.len());
        assert_eq!(x[0].len(), 3);
        let cvd = frame.column("feature_cvd").unwrap();
        assert_eq!(x[0][0], cvd[0]);
    }

    #[test]
    fn cvd_keeps_running_total_across_warmup_cut() {
        // delta per bar = 60 - 40 = 20; after dropping 4 warmup rows the
        // first surviving CVD is the running total from the series start.
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        let frame = compute_features(make_bars(&closes), &small_cfg());
        let cvd = frame.column("feature_cvd").unwrap();
        assert_approx(cvd[0], 100.0);
    }

    #[test]
    fn rsi_is_100_on_monotonic_rise() {
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        let frame = compute_features(make_bars(&closes), &small_cfg());
        let rsi = frame.column("feature_rsi").unwrap();
        // avg_loss = 0, epsilon keeps the quotient finite and RSI ~ 100.
        assert!(rsi.iter().all(|&v| v > 99.9));
    }

    #[test]
    fn short_series_yields_empty_frame() {
        let closes = [100.0, 101.0];
        let frame = compute_features(make_bars(&closes), &small_cfg());
        assert!(frame.is_empty());
    }

    #[test]
    fn empty_series_yields_empty_frame() {
        let frame = compute_features(Vec::new(), &FeatureConfig::default());
        assert!(frame.is_empty());
    }
}
