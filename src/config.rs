use crate::error::{PipelineError, Result};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub data_root: PathBuf,
    pub onemap: OneMapConfig,
    pub geocode: GeocodeConfig,
    #[serde(default)]
    pub datasets: Vec<DatasetConfig>,
}

/// Credentials are read from the environment at runtime; the config only
/// names which variables to read so secrets never land in the TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct OneMapConfig {
    pub email_env: String,
    pub password_env: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeocodeConfig {
    /// Mandatory delay between geocoding calls, milliseconds.
    pub delay_ms: u64,
    /// Bounded retry count for transient failures.
    pub max_retries: u32,
    /// Log progress every N addresses during a batch.
    pub progress_every: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatasetConfig {
    pub id: String,
    pub url: String,
    /// Maximum artifact age before a re-download is triggered.
    pub threshold_days: u32,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from("propline.toml")
    }

    pub fn load_from(config_path: &str) -> Result<Self> {
        let config_content = fs::read_to_string(config_path).map_err(|e| {
            PipelineError::Config(format!("Failed to read config file '{}': {}", config_path, e))
        })?;

        let config: Config = toml::from_str(&config_content)?;
        Ok(config)
    }
}

impl Default for GeocodeConfig {
    fn default() -> Self {
        Self { delay_ms: 250, max_retries: 3, progress_every: 100 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let toml_src = r#"
            data_root = "data"

            [onemap]
            email_env = "ONEMAP_EMAIL"
            password_env = "ONEMAP_PASSWORD"
            timeout_seconds = 15

            [geocode]
            delay_ms = 250
            max_retries = 3
            progress_every = 100

            [[datasets]]
            id = "hdb_resale"
            url = "https://example.com/hdb_resale.json"
            threshold_days = 30

            [[datasets]]
            id = "private_transactions"
            url = "https://example.com/private.json"
            threshold_days = 90
        "#;
        let config: Config = toml::from_str(toml_src).unwrap();
        assert_eq!(config.datasets.len(), 2);
        assert_eq!(config.datasets[0].threshold_days, 30);
        assert_eq!(config.datasets[1].threshold_days, 90);
        assert_eq!(config.onemap.email_env, "ONEMAP_EMAIL");
    }
}
