//! Data acquisition and persistence: candle providers and the parquet
//! bar store.

pub mod binance;
pub mod provider;
pub mod store;

pub use binance::BinanceProvider;
pub use provider::{BarProvider, DataError};
pub use store::{BarStore, StoreMeta};
