//! Binance spot klines provider.
//!
//! Pages through `/api/v3/klines` in 1000-candle windows, keeping the
//! columns the pipeline uses: open time, OHLC, volume, trade count, and
//! taker buy base volume. Retries transient failures with exponential
//! backoff; a 418/403 means the IP has been banned and aborts the fetch
//! immediately.

use super::provider::{BarProvider, DataError};
use crate::domain::{self, Bar};
use chrono::NaiveDateTime;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_BASE_URL: &str = "https://api.binance.com";
const PAGE_LIMIT: u32 = 1000;

/// Binance klines REST provider.
pub struct BinanceProvider {
    client: reqwest::blocking::Client,
    base_url: String,
    max_retries: u32,
    base_delay: Duration,
}

impl BinanceProvider {
    pub fn new() -> Result<Self, DataError> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Custom base URL, used by tests pointing at a local stub.
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, DataError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .map_err(|e| DataError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        })
    }

    fn klines_url(&self, symbol: &str, interval: &str, start_ms: i64, end_ms: i64) -> String {
        format!(
            "{}/api/v3/klines?symbol={symbol}&interval={interval}\
             &startTime={start_ms}&endTime={end_ms}&limit={PAGE_LIMIT}",
            self.base_url
        )
    }

    /// Fetch one page with retry and backoff.
    fn fetch_page(
        &self,
        symbol: &str,
        interval: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Bar>, DataError> {
        let url = self.klines_url(symbol, interval, start_ms, end_ms);
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.base_delay * 2u32.pow(attempt - 1);
                warn!(symbol, attempt, "retrying klines page after {delay:?}");
                std::thread::sleep(delay);
            }

            match self.client.get(&url).send() {
                Ok(resp) => {
                    let status = resp.status();

                    if status == reqwest::StatusCode::IM_A_TEAPOT
                        || status == reqwest::StatusCode::FORBIDDEN
                    {
                        return Err(DataError::Blocked);
                    }

                    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                        let retry_after = resp
                            .headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse::<u64>().ok())
                            .unwrap_or(60);
                        last_error = Some(DataError::RateLimited {
                            retry_after_secs: retry_after,
                        });
                        continue;
                    }

                    if status == reqwest::StatusCode::BAD_REQUEST {
                        return Err(DataError::SymbolNotFound {
                            symbol: symbol.to_string(),
                        });
                    }

                    if !status.is_success() {
                        last_error = Some(DataError::Other(format!("HTTP {status} for {symbol}")));
                        continue;
                    }

                    let rows: Vec<Vec<Value>> = resp.json().map_err(|e| {
                        DataError::ResponseFormatChanged(format!(
                            "failed to parse klines for {symbol}: {e}"
                        ))
                    })?;

                    return rows.iter().map(|row| parse_kline_row(row)).collect();
                }
                Err(e) => {
                    last_error = Some(DataError::NetworkUnreachable(e.to_string()));
                    if !(e.is_connect() || e.is_timeout()) {
                        break;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| DataError::Other("klines fetch failed".into())))
    }
}

impl BarProvider for BinanceProvider {
    fn name(&self) -> &str {
        "binance"
    }

    fn fetch(
        &self,
        symbol: &str,
        interval: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<Bar>, DataError> {
        let end_ms = end.and_utc().timestamp_millis();
        let mut cursor = start.and_utc().timestamp_millis();
        let mut bars = Vec::new();

        while cursor < end_ms {
            let page = self.fetch_page(symbol, interval, cursor, end_ms)?;
            let Some(last) = page.last() else {
                break;
            };
            debug!(symbol, rows = page.len(), "fetched klines page");

            // Next window opens just after the last bar received.
            cursor = last.timestamp_ms() + 1;
            bars.extend(page);
        }

        if bars.is_empty() {
            return Err(DataError::SymbolNotFound {
                symbol: symbol.to_string(),
            });
        }

        Ok(domain::canonicalize(bars))
    }
}

/// Parse a single klines row.
///
/// Rows are heterogeneous JSON arrays:
/// `[open_time, open, high, low, close, volume, close_time,
///   quote_volume, number_of_trades, taker_buy_base, taker_buy_quote, _]`
/// with prices and volumes as decimal strings.
fn parse_kline_row(row: &[Value]) -> Result<Bar, DataError> {
    if row.len() < 10 {
        return Err(DataError::ResponseFormatChanged(format!(
            "klines row has {} fields, expected at least 10",
            row.len()
        )));
    }

    let open_time = row[0]
        .as_i64()
        .ok_or_else(|| DataError::ResponseFormatChanged("open_time is not an integer".into()))?;
    let timestamp = chrono::DateTime::from_timestamp_millis(open_time)
        .map(|dt| dt.naive_utc())
        .ok_or_else(|| {
            DataError::ResponseFormatChanged(format!("invalid open_time: {open_time}"))
        })?;

    let number_of_trades = row[8]
        .as_u64()
        .ok_or_else(|| DataError::ResponseFormatChanged("trade count is not an integer".into()))?
        as u32;

    Ok(Bar {
        timestamp,
        open: parse_decimal_field(&row[1], "open")?,
        high: parse_decimal_field(&row[2], "high")?,
        low: parse_decimal_field(&row[3], "low")?,
        close: parse_decimal_field(&row[4], "close")?,
        volume: parse_decimal_field(&row[5], "volume")?,
        number_of_trades,
        taker_buy_base: parse_decimal_field(&row[9], "taker_buy_base")?,
    })
}

fn parse_decimal_field(value: &Value, field: &str) -> Result<f64, DataError> {
    value
        .as_str()
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| {
            DataError::ResponseFormatChanged(format!("field '{field}' is not a decimal string"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_row() -> Vec<Value> {
        json!([
            1704153600000_i64,
            "42000.50",
            "42100.00",
            "41900.25",
            "42050.75",
            "123.456",
            1704153899999_i64,
            "5190000.00",
            3456,
            "70.5",
            "2965000.00",
            "0"
        ])
        .as_array()
        .unwrap()
        .clone()
    }

    #[test]
    fn parses_kline_row() {
        let bar = parse_kline_row(&sample_row()).unwrap();
        assert_eq!(bar.timestamp_ms(), 1704153600000);
        assert_eq!(bar.open, 42000.50);
        assert_eq!(bar.close, 42050.75);
        assert_eq!(bar.volume, 123.456);
        assert_eq!(bar.number_of_trades, 3456);
        assert_eq!(bar.taker_buy_base, 70.5);
        assert!(bar.is_sane());
    }

    #[test]
    fn rejects_short_row() {
        let row = json!([1704153600000_i64, "1.0"]).as_array().unwrap().clone();
        assert!(matches!(
            parse_kline_row(&row),
            Err(DataError::ResponseFormatChanged(_))
        ));
    }

    #[test]
    fn rejects_non_decimal_price() {
        let mut row = sample_row();
        row[1] = json!(42000.5); // number instead of decimal string
        assert!(matches!(
            parse_kline_row(&row),
            Err(DataError::ResponseFormatChanged(_))
        ));
    }
}
