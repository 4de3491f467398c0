//! Configuration loading and parsing
//!
//! An optional TOML config file mirrors the command-line flags, useful for
//! captures that are decoded repeatedly with the same options.

use anyhow::{Context, Result};
use dcc_decoder::DecoderConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main application configuration (loaded from a TOML file)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub input: InputConfig,
    #[serde(default)]
    pub decoder: DecoderConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InputConfig {
    /// Path to the CSV edge capture
    pub file: PathBuf,
    /// Capture sample rate in Hz
    pub samplerate: u64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OutputConfig {
    /// Emit JSON lines instead of text
    #[serde(default)]
    pub json: bool,
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_deserialization() {
        let toml_content = r#"
            [input]
            file = "capture.csv"
            samplerate = 1000000

            [decoder]
            service_mode = true
            accessory_offset = -4

            [decoder.search]
            cv_address = 23

            [output]
            json = true
        "#;

        let config: AppConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(config.input.samplerate, 1_000_000);
        assert!(config.decoder.service_mode);
        assert_eq!(config.decoder.accessory_offset, -4);
        assert_eq!(config.decoder.search.cv_address, Some(23));
        assert!(config.output.json);
    }

    #[test]
    fn test_minimal_config() {
        let toml_content = r#"
            [input]
            file = "capture.csv"
            samplerate = 500000
        "#;

        let config: AppConfig = toml::from_str(toml_content).unwrap();
        assert!(!config.decoder.service_mode);
        assert!(config.decoder.search.is_empty());
        assert!(!config.output.json);
    }
}
