//! Rolling and recursive series primitives.
//!
//! All functions take f64 slices and return a Vec of the same length,
//! with `f64::NAN` in warmup positions. A NaN inside a rolling window
//! makes that window's output NaN.

/// Trailing simple moving average over `window` values ending at each
/// index (inclusive). First `window - 1` outputs are NaN.
pub fn rolling_mean(values: &[f64], window: usize) -> Vec<f64> {
    let n = values.len();
    let mut result = vec![f64::NAN; n];
    if window == 0 || n < window {
        return result;
    }

    for i in (window - 1)..n {
        let slice = &values[i + 1 - window..=i];
        if slice.iter().any(|v| v.is_nan()) {
            continue;
        }
        result[i] = slice.iter().sum::<f64>() / window as f64;
    }

    result
}

/// SMA-seeded exponential moving average with alpha = 2 / (period + 1).
///
/// EMA[period-1] = SMA of the first `period` values, then
/// EMA[t] = alpha * x[t] + (1 - alpha) * EMA[t-1].
/// A NaN input taints every subsequent output.
pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    let mut result = vec![f64::NAN; n];
    if period == 0 || n < period {
        return result;
    }

    let alpha = 2.0 / (period as f64 + 1.0);

    let mut sum = 0.0;
    for &v in values.iter().take(period) {
        if v.is_nan() {
            return result;
        }
        sum += v;
    }
    let seed = sum / period as f64;
    result[period - 1] = seed;

    let mut prev = seed;
    for i in period..n {
        if values[i].is_nan() {
            return result;
        }
        let e = alpha * values[i] + (1.0 - alpha) * prev;
        result[i] = e;
        prev = e;
    }

    result
}

/// Running cumulative sum. Defined from index 0.
pub fn cum_sum(values: &[f64]) -> Vec<f64> {
    let mut total = 0.0;
    values
        .iter()
        .map(|&v| {
            total += v;
            total
        })
        .collect()
}

/// True Range: max(high-low, |high-prev_close|, |low-prev_close|).
/// TR[0] is NaN (no previous close).
pub fn true_range(highs: &[f64], lows: &[f64], closes: &[f64]) -> Vec<f64> {
    let n = highs.len();
    let mut tr = vec![f64::NAN; n];
    for i in 1..n {
        let h = highs[i];
        let l = lows[i];
        let pc = closes[i - 1];
        if h.is_nan() || l.is_nan() || pc.is_nan() {
            continue;
        }
        tr[i] = (h - l).max((h - pc).abs()).max((l - pc).abs());
    }
    tr
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::assert_approx;

    #[test]
    fn rolling_mean_warmup_and_values() {
        let out = rolling_mean(&[1.0, 2.0, 3.0, 4.0], 3);
        assert!(out[0].is_nan());
        assert!(out[1].is_nan());
        assert_approx(out[2], 2.0);
        assert_approx(out[3], 3.0);
    }

    #[test]
    fn rolling_mean_window_larger_than_series() {
        let out = rolling_mean(&[1.0, 2.0], 5);
        assert!(out.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn rolling_mean_nan_in_window() {
        let out = rolling_mean(&[1.0, f64::NAN, 3.0, 4.0, 5.0], 2);
        assert!(out[1].is_nan());
        assert!(out[2].is_nan());
        assert_approx(out[3], 3.5);
    }

    #[test]
    fn ema_seeds_with_sma() {
        let out = ema(&[1.0, 2.0, 3.0, 4.0], 3);
        assert!(out[0].is_nan());
        assert!(out[1].is_nan());
        assert_approx(out[2], 2.0);
        // alpha = 0.5: 0.5*4 + 0.5*2 = 3
        assert_approx(out[3], 3.0);
    }

    #[test]
    fn cum_sum_runs_from_first_value() {
        let out = cum_sum(&[1.0, -2.0, 4.0]);
        assert_approx(out[0], 1.0);
        assert_approx(out[1], -1.0);
        assert_approx(out[2], 3.0);
    }

    #[test]
    fn true_range_uses_previous_close() {
        let highs = [102.0, 115.0];
        let lows = [97.0, 108.0];
        let closes = [100.0, 112.0];
        let tr = true_range(&highs, &lows, &closes);
        assert!(tr[0].is_nan());
        // Gap up: max(7, |115-100|, |108-100|) = 15
        assert_approx(tr[1], 15.0);
    }
}
