//! Serializable pipeline configuration.
//!
//! One TOML file describes an end-to-end run: which series to download,
//! how to derive features and labels, and how to train. Every field has
//! a default, so a minimal file only needs to override what it cares
//! about. `run_id` hashes the whole config for artifact naming, so two
//! runs with identical configs produce identically-named artifacts.

use candlelab_core::{FeatureConfig, GbdtParams, LabelConfig};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors loading or validating a config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Full pipeline configuration: data selection, feature/label parameters,
/// and training setup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Exchange symbol, e.g. "BTCUSDT".
    pub symbol: String,
    /// Candle interval, e.g. "5m".
    pub interval: String,
    /// Directory for parquet files and model artifacts.
    pub data_dir: PathBuf,
    /// Download range start (inclusive), ISO date string in TOML.
    pub start: NaiveDate,
    /// Download range end (exclusive). Empty means "now".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<NaiveDate>,
    pub features: FeatureConfig,
    pub labeling: LabelConfig,
    pub train: TrainConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            symbol: "BTCUSDT".to_string(),
            interval: "5m".to_string(),
            data_dir: PathBuf::from("data"),
            start: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or_default(),
            end: None,
            features: FeatureConfig::default(),
            labeling: LabelConfig::default(),
            train: TrainConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.symbol.is_empty() {
            return Err(ConfigError::Invalid("symbol must not be empty".into()));
        }
        if self.interval.is_empty() {
            return Err(ConfigError::Invalid("interval must not be empty".into()));
        }
        if let Some(end) = self.end {
            if end <= self.start {
                return Err(ConfigError::Invalid(format!(
                    "end ({end}) must be after start ({})",
                    self.start
                )));
            }
        }
        self.train.validate()?;
        Ok(())
    }

    /// Deterministic content hash of this configuration.
    pub fn run_id(&self) -> Result<String, ConfigError> {
        let json = serde_json::to_string(self)
            .map_err(|e| ConfigError::Invalid(format!("config serialization failed: {e}")))?;
        Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
    }
}

/// Walk-forward training parameters.
///
/// The series is cut into `block_denominator` equal blocks (remainder
/// bars past the last block boundary are never used). Each of the
/// `blocks` validation rounds trains on `block_denominator - blocks`
/// consecutive blocks and tests on the single following block, sliding
/// one block per round. Defaults give the classic anchored-window
/// quarters: 8 blocks, train on 4, test on the 5th, four rounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// Number of validation rounds (and test blocks).
    pub blocks: usize,
    /// Total equal blocks the series is divided into.
    pub block_denominator: usize,
    pub model: GbdtParams,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            blocks: 4,
            block_denominator: 8,
            model: GbdtParams::default(),
        }
    }
}

impl TrainConfig {
    /// Blocks spanned by each training window.
    pub fn train_window(&self) -> usize {
        self.block_denominator - self.blocks
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.blocks == 0 {
            return Err(ConfigError::Invalid("train.blocks must be > 0".into()));
        }
        if self.block_denominator <= self.blocks {
            return Err(ConfigError::Invalid(format!(
                "train.block_denominator ({}) must exceed train.blocks ({})",
                self.block_denominator, self.blocks
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.train.train_window(), 4);
    }

    #[test]
    fn run_id_is_deterministic() {
        let config = PipelineConfig::default();
        assert_eq!(config.run_id().unwrap(), config.run_id().unwrap());
    }

    #[test]
    fn run_id_changes_with_params() {
        let a = PipelineConfig::default();
        let mut b = a.clone();
        b.labeling.pt_multiplier = 3.0;
        assert_ne!(a.run_id().unwrap(), b.run_id().unwrap());
    }

    #[test]
    fn minimal_toml_parses_with_defaults() {
        let config: PipelineConfig = toml::from_str(
            r#"
            symbol = "ETHUSDT"
            start = "2024-03-01"
            "#,
        )
        .unwrap();
        assert_eq!(config.symbol, "ETHUSDT");
        assert_eq!(config.interval, "5m");
        assert_eq!(config.train.blocks, 4);
        assert_eq!(config.features.ema_period, 200);
    }

    #[test]
    fn nested_toml_overrides_apply() {
        let config: PipelineConfig = toml::from_str(
            r#"
            symbol = "BTCUSDT"

            [labeling]
            fast_horizon = 4

            [train]
            block_denominator = 10

            [train.model]
            n_estimators = 50
            "#,
        )
        .unwrap();
        assert_eq!(config.labeling.fast_horizon, 4);
        assert_eq!(config.labeling.slow_horizon, 16);
        assert_eq!(config.train.block_denominator, 10);
        assert_eq!(config.train.model.n_estimators, 50);
    }

    #[test]
    fn rejects_inverted_date_range() {
        let mut config = PipelineConfig::default();
        config.end = Some(config.start);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_degenerate_block_split() {
        let mut config = PipelineConfig::default();
        config.train.block_denominator = 4; // equal to blocks: no train window
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_toml_roundtrip() {
        let config = PipelineConfig::default();
        let text = toml::to_string(&config).unwrap();
        let back: PipelineConfig = toml::from_str(&text).unwrap();
        assert_eq!(config, back);
    }
}
