//! candlelab-runner — pipeline orchestration on top of `candlelab-core`.
//!
//! - TOML pipeline configuration with content-hashed run ids
//! - Walk-forward validation trainer (block schedule + per-round models)
//! - Download/process/train stages over the parquet store
//! - Live closed-candle feed over the exchange WebSocket

pub mod config;
pub mod live;
pub mod pipeline;
pub mod walk_forward;

pub use config::{ConfigError, PipelineConfig, TrainConfig};
pub use live::{CandleSnapshot, KlineFeed, KlineFeedConfig, KlineFeedStats, LiveFeedError};
pub use pipeline::{
    download, load_model, process, run, train, ModelArtifact, PipelineError, ProcessSummary,
};
pub use walk_forward::{
    create_blocks, train_walk_forward, BlockReport, TrainError, TrainReport, ValidationBlock,
};
