// bfres-batch - batch conversion of BFRES assets through external tools
//
// This is the library crate containing the preparation, planning and worker
// pool logic. The binary crate (main.rs) provides the command line entry point.

pub mod config;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod services;
pub mod state;

// Re-export commonly used types for convenience
pub use config::ConfigManager;
pub use metrics::RunMetrics;
pub use models::{AssetFile, AssetKind, BatchConfig, BatchSettings, ConversionTask, FailurePolicy};
pub use state::{Layout, RunContext, RunEvent};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
