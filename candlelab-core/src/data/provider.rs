//! Bar provider trait and structured data errors.
//!
//! The `BarProvider` trait abstracts over candle sources (exchange REST
//! archive, synthetic test data) so the pipeline can swap implementations
//! and tests never touch the network.

use crate::domain::Bar;
use chrono::NaiveDateTime;
use thiserror::Error;

/// Structured error types for data operations.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("provider has blocked requests — back off before retrying")]
    Blocked,

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("parquet I/O error: {0}")]
    ParquetError(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("store error: {0}")]
    StoreError(String),

    #[error("no stored data for symbol '{symbol}' — run `download {symbol}` first")]
    NoStoredData { symbol: String },

    #[error("data error: {0}")]
    Other(String),
}

/// Trait for historical candle providers.
///
/// Implementations return bars for `[start, end)` sorted ascending by
/// timestamp with no duplicates (the fetch path canonicalizes before
/// returning).
pub trait BarProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Fetch candles for a symbol and interval over a time range.
    fn fetch(
        &self,
        symbol: &str,
        interval: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<Bar>, DataError>;
}
