use crate::models::BatchConfig;
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;

/// File name of the batch configuration inside the working root.
pub const CONFIG_FILE_NAME: &str = "Batch Config.yaml";

/// Loads and saves the YAML batch configuration.
///
/// The file lives in the working root next to the `In/`, `Out/` and `Pack/`
/// directories unless an explicit path is given.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_dir: Utf8PathBuf,
    config_path: Utf8PathBuf,
}

impl ConfigManager {
    /// Manage `Batch Config.yaml` inside `config_dir`.
    pub fn new<P: AsRef<Utf8Path>>(config_dir: P) -> Self {
        let config_dir = config_dir.as_ref().to_path_buf();
        Self {
            config_path: config_dir.join(CONFIG_FILE_NAME),
            config_dir,
        }
    }

    /// Manage an explicitly named configuration file.
    pub fn with_path<P: AsRef<Utf8Path>>(config_path: P) -> Self {
        let config_path = config_path.as_ref().to_path_buf();
        let config_dir = config_path
            .parent()
            .map(Utf8Path::to_path_buf)
            .unwrap_or_default();
        Self {
            config_dir,
            config_path,
        }
    }

    /// Load the batch configuration.
    ///
    /// # Returns
    /// The loaded BatchConfig, or defaults if the file doesn't exist
    pub fn load_config(&self) -> Result<BatchConfig> {
        if !self.config_path.exists() {
            tracing::warn!(
                "Batch config file not found at {}, using defaults",
                self.config_path
            );
            return Ok(BatchConfig::default());
        }

        let file_contents = fs::read_to_string(&self.config_path)
            .with_context(|| format!("Failed to read batch config: {}", self.config_path))?;

        let config: BatchConfig = serde_yaml_ng::from_str(&file_contents)
            .with_context(|| format!("Failed to parse batch config: {}", self.config_path))?;

        tracing::info!("Loaded batch config from {}", self.config_path);
        Ok(config)
    }

    /// Save the batch configuration, creating the directory if needed.
    pub fn save_config(&self, config: &BatchConfig) -> Result<()> {
        if !self.config_dir.as_str().is_empty() && !self.config_dir.exists() {
            fs::create_dir_all(&self.config_dir).with_context(|| {
                format!("Failed to create config directory: {}", self.config_dir)
            })?;
        }

        let yaml_string =
            serde_yaml_ng::to_string(config).context("Failed to serialize batch config to YAML")?;

        fs::write(&self.config_path, yaml_string)
            .with_context(|| format!("Failed to write batch config: {}", self.config_path))?;

        tracing::info!("Saved batch config to {}", self.config_path);
        Ok(())
    }

    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }

    pub fn config_path(&self) -> &Utf8Path {
        &self.config_path
    }
}
