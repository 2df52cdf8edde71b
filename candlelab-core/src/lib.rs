//! candlelab-core: domain types and pure pipeline stages.
//!
//! Everything in this crate is deterministic and side-effect free apart
//! from the `data` module (network fetch and parquet persistence). The
//! stages compose in order:
//!
//! 1. `data` — download candles, store/load parquet
//! 2. `domain` — canonical bar series
//! 3. `features` — derived columns over a series
//! 4. `labeling` — dynamic triple-barrier targets
//! 5. `model` — trainable multi-class classifier

pub mod data;
pub mod domain;
pub mod features;
pub mod labeling;
pub mod model;

pub use data::{BarProvider, BarStore, BinanceProvider, DataError, StoreMeta};
pub use domain::{canonicalize, is_canonical, Bar};
pub use features::{compute_features, FeatureConfig, FeatureFrame, FEATURE_PREFIX};
pub use labeling::{label_frame, label_series, LabelConfig, LabelError};
pub use model::{Classifier, GbdtClassifier, GbdtParams, ModelError};
