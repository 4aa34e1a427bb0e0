//! Data models for bfres-batch.
//!
//! - [`AssetFile`] / [`ConversionTask`]: an asset discovered in the input directory
//!   and the unit of work a worker executes for it
//! - [`AssetKind`]: the closed set of file kinds the group-key rules recognise
//! - [`BatchConfig`]: settings loaded from `Batch Config.yaml`
//!
//! The asset constants (extension, animation and texture suffixes) live here so the
//! resolver, the planner and the conversion stage agree on them.

pub mod asset;
pub mod config;

pub use asset::{
    ANIMATION_SUFFIX, ASSET_EXTENSION, AssetFile, AssetKind, ConversionTask,
    INTERMEDIATE_EXTENSION, TEXTURE1_SUFFIX, TEXTURE2_SUFFIX,
};
pub use config::{BatchConfig, BatchSettings, FailurePolicy};
