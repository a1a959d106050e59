use crate::radio::RadioSettings;
use anyhow::{Context, Error};
use log::warn;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub api_listen: String,
    pub radio: RadioSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_listen: "0.0.0.0:8000".to_string(),
            radio: RadioSettings::default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Config, Error> {
        let config = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Config = ron::from_str(&config)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// Load the config file, falling back to defaults when it does not
    /// exist. A file that exists but fails to parse is an error.
    pub fn load_or_default(path: &Path) -> Result<Config, Error> {
        if path.exists() {
            Config::load(path)
        } else {
            warn!("config {} not found, using defaults", path.display());
            Ok(Config::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"(
    api_listen: "127.0.0.1:9000",
    radio: (
        frequency_hz: 868000000,
        spreading_factor: 9,
        bandwidth_hz: 125000,
        coding_rate: 5,
        sync_word: 0x34,
        tx_power_dbm: 17,
        preamble_symbols: 8,
        spi_bus: 0,
        reset_pin: 25,
        dio0_pin: 24,
    ),
)"#
        )
        .unwrap();
        file.flush().unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.api_listen, "127.0.0.1:9000");
        assert_eq!(config.radio.frequency_hz, 868_000_000);
        assert_eq!(config.radio.spreading_factor, 9);
        assert_eq!(config.radio.tx_power_dbm, 17);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"(api_listen: "127.0.0.1:9000")"#).unwrap();
        file.flush().unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.api_listen, "127.0.0.1:9000");
        assert_eq!(config.radio, RadioSettings::default());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = Config::load_or_default(Path::new("/nonexistent/agsys.ron")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.radio.frequency_hz, 915_000_000);
        assert_eq!(config.radio.sync_word, 0x34);
    }
}
