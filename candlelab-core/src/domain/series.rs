//! Series canonicalization — sort, dedupe, monotonicity checks.
//!
//! The labeler and trainer assume their input is canonical: sorted
//! ascending by timestamp with no duplicate timestamps. Violating that
//! precondition produces silently wrong labels, so everything that loads
//! or ingests bars runs through `canonicalize` first.

use crate::domain::Bar;

/// Sort bars ascending by timestamp and drop duplicate timestamps,
/// keeping the first occurrence.
///
/// Monthly archive chunks overlap at their edges; keep-first matches the
/// stable-dedupe behavior of the ingest pipeline.
pub fn canonicalize(mut bars: Vec<Bar>) -> Vec<Bar> {
    bars.sort_by_key(|b| b.timestamp);
    bars.dedup_by_key(|b| b.timestamp);
    bars
}

/// Returns true if the series is strictly ascending by timestamp.
pub fn is_canonical(bars: &[Bar]) -> bool {
    bars.windows(2).all(|w| w[0].timestamp < w[1].timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn bar_at(minute: u32, close: f64) -> Bar {
        Bar {
            timestamp: NaiveDate::from_ymd_opt(2024, 1, 2)
                .unwrap()
                .and_hms_opt(0, minute, 0)
                .unwrap(),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 100.0,
            number_of_trades: 50,
            taker_buy_base: 60.0,
        }
    }

    #[test]
    fn canonicalize_sorts_by_timestamp() {
        let bars = canonicalize(vec![bar_at(10, 3.0), bar_at(0, 1.0), bar_at(5, 2.0)]);
        assert!(is_canonical(&bars));
        assert_eq!(bars[0].close, 1.0);
        assert_eq!(bars[2].close, 3.0);
    }

    #[test]
    fn canonicalize_dedupes_keeping_first() {
        let mut dup = bar_at(5, 99.0);
        dup.close = 99.0;
        let bars = canonicalize(vec![bar_at(0, 1.0), bar_at(5, 2.0), dup]);
        assert_eq!(bars.len(), 2);
        // First occurrence in sorted order wins (sort is stable).
        assert_eq!(bars[1].close, 2.0);
    }

    #[test]
    fn is_canonical_rejects_duplicates() {
        let bars = vec![bar_at(0, 1.0), bar_at(0, 2.0)];
        assert!(!is_canonical(&bars));
    }

    #[test]
    fn empty_series_is_canonical() {
        assert!(is_canonical(&[]));
        assert!(canonicalize(Vec::new()).is_empty());
    }
}
