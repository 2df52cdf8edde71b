//! Parquet bar store.
//!
//! Layout: `{dir}/{SYMBOL}_{interval}_raw.parquet` for downloaded bars
//! and `{dir}/{SYMBOL}_{interval}_processed.parquet` for the feature
//! frame with its target column.
//!
//! - Atomic writes (write to .tmp, rename into place)
//! - Metadata sidecar per raw file (bar count, time range, blake3 hash)
//! - Schema validation on load; loads return canonical series

use super::provider::DataError;
use crate::domain::{self, Bar};
use crate::features::FeatureFrame;
use chrono::NaiveDateTime;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const BAR_COLUMNS: [&str; 8] = [
    "timestamp",
    "open",
    "high",
    "low",
    "close",
    "volume",
    "number_of_trades",
    "taker_buy_base",
];

/// Metadata sidecar for a stored raw series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreMeta {
    pub symbol: String,
    pub interval: String,
    pub bar_count: usize,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub data_hash: String,
    pub written_at: NaiveDateTime,
}

/// The parquet-backed bar store.
pub struct BarStore {
    dir: PathBuf,
}

impl BarStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn raw_path(&self, symbol: &str, interval: &str) -> PathBuf {
        self.dir.join(format!("{symbol}_{interval}_raw.parquet"))
    }

    fn processed_path(&self, symbol: &str, interval: &str) -> PathBuf {
        self.dir
            .join(format!("{symbol}_{interval}_processed.parquet"))
    }

    fn meta_path(&self, symbol: &str, interval: &str) -> PathBuf {
        self.dir.join(format!("{symbol}_{interval}_meta.json"))
    }

    /// Write a raw bar series plus its metadata sidecar.
    pub fn write_raw(&self, symbol: &str, interval: &str, bars: &[Bar]) -> Result<(), DataError> {
        if bars.is_empty() {
            return Err(DataError::StoreError("no bars to store".into()));
        }
        fs::create_dir_all(&self.dir)
            .map_err(|e| DataError::StoreError(format!("create dir: {e}")))?;

        let df = bars_to_dataframe(bars)?;
        write_parquet_atomic(&df, &self.raw_path(symbol, interval))?;

        let meta = StoreMeta {
            symbol: symbol.to_string(),
            interval: interval.to_string(),
            bar_count: bars.len(),
            start: bars[0].timestamp,
            end: bars[bars.len() - 1].timestamp,
            data_hash: blake3::hash(
                &serde_json::to_vec(bars)
                    .map_err(|e| DataError::StoreError(format!("hash serialization: {e}")))?,
            )
            .to_hex()
            .to_string(),
            written_at: chrono::Utc::now().naive_utc(),
        };
        let meta_json = serde_json::to_string_pretty(&meta)
            .map_err(|e| DataError::StoreError(format!("meta serialization: {e}")))?;
        fs::write(self.meta_path(symbol, interval), meta_json)
            .map_err(|e| DataError::StoreError(format!("meta write: {e}")))?;

        Ok(())
    }

    /// Load a raw bar series, canonicalized.
    pub fn load_raw(&self, symbol: &str, interval: &str) -> Result<Vec<Bar>, DataError> {
        let path = self.raw_path(symbol, interval);
        if !path.exists() {
            return Err(DataError::NoStoredData {
                symbol: symbol.to_string(),
            });
        }
        let df = read_parquet(&path)?;
        validate_bar_schema(&df)?;
        Ok(domain::canonicalize(dataframe_to_bars(&df)?))
    }

    /// Write a processed frame: bar columns, derived columns, and the
    /// target column when present.
    pub fn write_processed(
        &self,
        symbol: &str,
        interval: &str,
        frame: &FeatureFrame,
    ) -> Result<(), DataError> {
        if frame.is_empty() {
            return Err(DataError::StoreError("no rows to store".into()));
        }
        fs::create_dir_all(&self.dir)
            .map_err(|e| DataError::StoreError(format!("create dir: {e}")))?;

        let mut df = bars_to_dataframe(frame.bars())?;
        for name in frame.column_names() {
            let values = frame
                .column(name)
                .ok_or_else(|| DataError::StoreError(format!("missing column '{name}'")))?;
            df.with_column(Column::new(name.into(), values.to_vec()))
                .map_err(|e| DataError::ParquetError(format!("append column '{name}': {e}")))?;
        }
        if let Some(target) = frame.target() {
            let as_i32: Vec<i32> = target.iter().map(|&t| t as i32).collect();
            df.with_column(Column::new("target".into(), as_i32))
                .map_err(|e| DataError::ParquetError(format!("append target: {e}")))?;
        }

        write_parquet_atomic(&df, &self.processed_path(symbol, interval))
    }

    /// Load a processed frame. Every non-bar f64 column is restored
    /// under its stored name; `target` is restored when present.
    pub fn load_processed(
        &self,
        symbol: &str,
        interval: &str,
    ) -> Result<FeatureFrame, DataError> {
        let path = self.processed_path(symbol, interval);
        if !path.exists() {
            return Err(DataError::NoStoredData {
                symbol: symbol.to_string(),
            });
        }
        let df = read_parquet(&path)?;
        validate_bar_schema(&df)?;

        let mut frame = FeatureFrame::new(dataframe_to_bars(&df)?);
        for column in df.get_columns() {
            let name = column.name().as_str();
            if BAR_COLUMNS.contains(&name) || name == "target" {
                continue;
            }
            let ca = column
                .f64()
                .map_err(|e| DataError::ParquetError(format!("column '{name}' type: {e}")))?;
            let values: Vec<f64> = ca.iter().map(|v| v.unwrap_or(f64::NAN)).collect();
            frame.push_column(name.to_string(), values);
        }

        if let Ok(target_col) = df.column("target") {
            let ca = target_col
                .i32()
                .map_err(|e| DataError::ParquetError(format!("target column type: {e}")))?;
            let target: Result<Vec<i8>, DataError> = ca
                .iter()
                .map(|v| {
                    v.map(|t| t as i8)
                        .ok_or_else(|| DataError::ValidationError("null target".into()))
                })
                .collect();
            frame.set_target(target?);
        }

        Ok(frame)
    }

    /// Metadata for a stored raw series, if any.
    pub fn meta(&self, symbol: &str, interval: &str) -> Option<StoreMeta> {
        let content = fs::read_to_string(self.meta_path(symbol, interval)).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// True when a processed frame exists for the symbol.
    pub fn has_processed(&self, symbol: &str, interval: &str) -> bool {
        self.processed_path(symbol, interval).exists()
    }
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

fn bars_to_dataframe(bars: &[Bar]) -> Result<DataFrame, DataError> {
    let timestamps: Vec<i64> = bars.iter().map(|b| b.timestamp_ms()).collect();
    let opens: Vec<f64> = bars.iter().map(|b| b.open).collect();
    let highs: Vec<f64> = bars.iter().map(|b| b.high).collect();
    let lows: Vec<f64> = bars.iter().map(|b| b.low).collect();
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();
    let trades: Vec<u32> = bars.iter().map(|b| b.number_of_trades).collect();
    let taker_buys: Vec<f64> = bars.iter().map(|b| b.taker_buy_base).collect();

    DataFrame::new(vec![
        Column::new("timestamp".into(), timestamps),
        Column::new("open".into(), opens),
        Column::new("high".into(), highs),
        Column::new("low".into(), lows),
        Column::new("close".into(), closes),
        Column::new("volume".into(), volumes),
        Column::new("number_of_trades".into(), trades),
        Column::new("taker_buy_base".into(), taker_buys),
    ])
    .map_err(|e| DataError::ParquetError(format!("dataframe creation: {e}")))
}

fn dataframe_to_bars(df: &DataFrame) -> Result<Vec<Bar>, DataError> {
    let col = |name: &str| {
        df.column(name)
            .map_err(|e| DataError::ParquetError(format!("column read: {e}")))
    };
    let type_err = |name: &str, e: PolarsError| {
        DataError::ParquetError(format!("column '{name}' type: {e}"))
    };

    let ts_ca = col("timestamp")?.i64().map_err(|e| type_err("timestamp", e))?;
    let open_ca = col("open")?.f64().map_err(|e| type_err("open", e))?;
    let high_ca = col("high")?.f64().map_err(|e| type_err("high", e))?;
    let low_ca = col("low")?.f64().map_err(|e| type_err("low", e))?;
    let close_ca = col("close")?.f64().map_err(|e| type_err("close", e))?;
    let vol_ca = col("volume")?.f64().map_err(|e| type_err("volume", e))?;
    let trades_ca = col("number_of_trades")?
        .u32()
        .map_err(|e| type_err("number_of_trades", e))?;
    let tbb_ca = col("taker_buy_base")?
        .f64()
        .map_err(|e| type_err("taker_buy_base", e))?;

    let n = df.height();
    let mut bars = Vec::with_capacity(n);

    for i in 0..n {
        let ms = ts_ca
            .get(i)
            .ok_or_else(|| DataError::ParquetError(format!("null timestamp at row {i}")))?;
        let timestamp = chrono::DateTime::from_timestamp_millis(ms)
            .map(|dt| dt.naive_utc())
            .ok_or_else(|| DataError::ParquetError(format!("invalid timestamp: {ms}")))?;

        bars.push(Bar {
            timestamp,
            open: open_ca.get(i).unwrap_or(f64::NAN),
            high: high_ca.get(i).unwrap_or(f64::NAN),
            low: low_ca.get(i).unwrap_or(f64::NAN),
            close: close_ca.get(i).unwrap_or(f64::NAN),
            volume: vol_ca.get(i).unwrap_or(f64::NAN),
            number_of_trades: trades_ca.get(i).unwrap_or(0),
            taker_buy_base: tbb_ca.get(i).unwrap_or(f64::NAN),
        });
    }

    Ok(bars)
}

fn validate_bar_schema(df: &DataFrame) -> Result<(), DataError> {
    if df.height() == 0 {
        return Err(DataError::ValidationError("empty parquet file".into()));
    }
    for name in &BAR_COLUMNS {
        if df.column(name).is_err() {
            return Err(DataError::ValidationError(format!(
                "missing column '{name}'"
            )));
        }
    }
    Ok(())
}

fn write_parquet_atomic(df: &DataFrame, path: &Path) -> Result<(), DataError> {
    let tmp_path = path.with_extension("parquet.tmp");
    let file = fs::File::create(&tmp_path)
        .map_err(|e| DataError::ParquetError(format!("create file: {e}")))?;
    ParquetWriter::new(file)
        .finish(&mut df.clone())
        .map_err(|e| DataError::ParquetError(format!("write parquet: {e}")))?;
    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        DataError::ParquetError(format!("atomic rename failed: {e}"))
    })
}

fn read_parquet(path: &Path) -> Result<DataFrame, DataError> {
    let file = fs::File::open(path).map_err(|e| DataError::ParquetError(format!("open: {e}")))?;
    ParquetReader::new(file)
        .finish()
        .map_err(|e| DataError::ParquetError(format!("read: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{compute_features, make_bars, FeatureConfig};
    use crate::labeling::{label_frame, LabelConfig};
    use chrono::NaiveDate;

    fn sample_bars(n: usize) -> Vec<Bar> {
        let base = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        (0..n)
            .map(|i| Bar {
                timestamp: base + chrono::Duration::minutes(5 * i as i64),
                open: 100.0 + i as f64,
                high: 102.0 + i as f64,
                low: 99.0 + i as f64,
                close: 101.0 + i as f64,
                volume: 1000.0 + i as f64,
                number_of_trades: 500 + i as u32,
                taker_buy_base: 600.0,
            })
            .collect()
    }

    #[test]
    fn raw_roundtrip_preserves_bars() {
        let dir = tempfile::tempdir().unwrap();
        let store = BarStore::new(dir.path());
        let bars = sample_bars(10);

        store.write_raw("BTCUSDT", "5m", &bars).unwrap();
        let loaded = store.load_raw("BTCUSDT", "5m").unwrap();
        assert_eq!(loaded, bars);
    }

    #[test]
    fn raw_load_canonicalizes_unsorted_input() {
        let dir = tempfile::tempdir().unwrap();
        let store = BarStore::new(dir.path());
        let mut bars = sample_bars(5);
        bars.swap(0, 3);

        store.write_raw("BTCUSDT", "5m", &bars).unwrap();
        let loaded = store.load_raw("BTCUSDT", "5m").unwrap();
        assert!(domain::is_canonical(&loaded));
        assert_eq!(loaded.len(), 5);
    }

    #[test]
    fn meta_sidecar_written_with_raw() {
        let dir = tempfile::tempdir().unwrap();
        let store = BarStore::new(dir.path());
        let bars = sample_bars(8);

        store.write_raw("ETHUSDT", "5m", &bars).unwrap();
        let meta = store.meta("ETHUSDT", "5m").unwrap();
        assert_eq!(meta.symbol, "ETHUSDT");
        assert_eq!(meta.bar_count, 8);
        assert_eq!(meta.start, bars[0].timestamp);
        assert_eq!(meta.end, bars[7].timestamp);
        assert_eq!(meta.data_hash.len(), 64);
    }

    #[test]
    fn missing_symbol_is_no_stored_data() {
        let dir = tempfile::tempdir().unwrap();
        let store = BarStore::new(dir.path());
        assert!(matches!(
            store.load_raw("NOPE", "5m"),
            Err(DataError::NoStoredData { .. })
        ));
    }

    #[test]
    fn empty_write_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = BarStore::new(dir.path());
        assert!(store.write_raw("BTCUSDT", "5m", &[]).is_err());
    }

    #[test]
    fn processed_roundtrip_preserves_columns_and_target() {
        let dir = tempfile::tempdir().unwrap();
        let store = BarStore::new(dir.path());

        let closes: Vec<f64> = (0..60)
            .map(|i| 100.0 + (i as f64 * 0.3).sin() * 4.0)
            .collect();
        let mut frame = compute_features(
            make_bars(&closes),
            &FeatureConfig {
                ema_period: 5,
                rsi_period: 3,
                atr_period: 3,
            },
        );
        label_frame(&mut frame, &LabelConfig::default()).unwrap();

        store.write_processed("BTCUSDT", "5m", &frame).unwrap();
        let loaded = store.load_processed("BTCUSDT", "5m").unwrap();

        assert_eq!(loaded.len(), frame.len());
        assert_eq!(loaded.column_names(), frame.column_names());
        assert_eq!(loaded.feature_names(), frame.feature_names());
        assert_eq!(loaded.target().unwrap(), frame.target().unwrap());
        for name in frame.column_names() {
            let a = frame.column(name).unwrap();
            let b = loaded.column(name).unwrap();
            assert_eq!(a, b, "column {name} changed across roundtrip");
        }
    }
}
