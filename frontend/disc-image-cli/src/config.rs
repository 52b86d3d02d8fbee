use disc_image::SubchannelSelection;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// READ CD main channel byte selecting sync, header, subheader, user data and EDC/ECC.
pub const DEFAULT_MAIN_CHANNEL: u8 = 0xF8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadConfig {
    #[serde(default = "default_main_channel")]
    pub main_channel: u8,
    #[serde(default)]
    pub subchannel: SubchannelSelection,
    #[serde(default = "default_bytes_per_line")]
    pub bytes_per_line: usize,
}

fn default_main_channel() -> u8 {
    DEFAULT_MAIN_CHANNEL
}

fn default_bytes_per_line() -> usize {
    16
}

impl Default for ReadConfig {
    fn default() -> Self {
        toml::from_str("").unwrap()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyConfig {
    /// Mismatching addresses logged individually before only counting
    #[serde(default = "default_max_reported")]
    pub max_reported: usize,
    #[serde(default = "true_fn")]
    pub check_subchannel: bool,
}

fn default_max_reported() -> usize {
    100
}

fn true_fn() -> bool {
    true
}

impl Default for VerifyConfig {
    fn default() -> Self {
        toml::from_str("").unwrap()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub read: ReadConfig,
    #[serde(default)]
    pub verify: VerifyConfig,
}

impl CliConfig {
    /// Load config from a TOML file, falling back to defaults if the file is missing or invalid.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        let config_str = match fs::read_to_string(path) {
            Ok(config_str) => config_str,
            Err(err) => {
                log::warn!("Unable to read config file '{}': {err}", path.display());
                return Self::default();
            }
        };

        toml::from_str(&config_str).unwrap_or_else(|err| {
            log::error!("Error deserializing config file '{}': {err}", path.display());
            Self::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config: CliConfig = toml::from_str("").unwrap();
        assert_eq!(config.read.main_channel, DEFAULT_MAIN_CHANNEL);
        assert_eq!(config.read.subchannel, SubchannelSelection::None);
        assert_eq!(config.read.bytes_per_line, 16);
        assert_eq!(config.verify.max_reported, 100);
        assert!(config.verify.check_subchannel);
    }

    #[test]
    fn partial_config() {
        let config: CliConfig = toml::from_str(
            "[read]\nsubchannel = \"Pq\"\n\n[verify]\ncheck_subchannel = false\n",
        )
        .unwrap();
        assert_eq!(config.read.subchannel, SubchannelSelection::Pq);
        assert_eq!(config.read.main_channel, DEFAULT_MAIN_CHANNEL);
        assert!(!config.verify.check_subchannel);
    }

    #[test]
    fn missing_file_uses_defaults() {
        assert_eq!(CliConfig::from_file("/nonexistent/disc-image.toml"), CliConfig::default());
    }
}
