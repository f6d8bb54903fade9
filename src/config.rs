//! TOML-backed configuration, one struct per component, each field
//! defaulted the way `retina-core`'s `RuntimeConfig` is: a `#[serde(default
//! = "...")]` function per field rather than one blanket `#[derive(Default)]`,
//! so a partial config file only overrides what it mentions.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

fn default_cache_size() -> usize {
    65536
}

fn default_line_size() -> usize {
    32
}

fn default_active_timeout() -> f64 {
    300.0
}

fn default_inactive_timeout() -> f64 {
    30.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,
    #[serde(default = "default_line_size")]
    pub line_size: usize,
    #[serde(default = "default_active_timeout")]
    pub active_timeout: f64,
    #[serde(default = "default_inactive_timeout")]
    pub inactive_timeout: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            cache_size: default_cache_size(),
            line_size: default_line_size(),
            active_timeout: default_active_timeout(),
            inactive_timeout: default_inactive_timeout(),
        }
    }
}

impl CacheConfig {
    /// Mirrors the shape checks [`crate::cache::FlowCache::new`] performs,
    /// so a malformed config is rejected at startup rather than inside the
    /// cache constructor (`spec.md` §7: configuration errors surface
    /// before ingest begins).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.line_size == 0 {
            return Err(ConfigError::ZeroLineSize);
        }
        if self.cache_size == 0 || self.cache_size % self.line_size != 0 {
            return Err(ConfigError::BadCacheShape {
                cache_size: self.cache_size,
                line_size: self.line_size,
            });
        }
        if !self.active_timeout.is_finite()
            || self.active_timeout < 0.0
            || !self.inactive_timeout.is_finite()
            || self.inactive_timeout < 0.0
        {
            return Err(ConfigError::BadTimeout);
        }
        Ok(())
    }
}

fn default_sampling_probability() -> u32 {
    100
}

fn default_packet_limit() -> u64 {
    0
}

fn default_dissectors() -> Vec<String> {
    vec!["http".to_string()]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_sampling_probability")]
    pub sampling_probability: u32,
    #[serde(default = "default_packet_limit")]
    pub packet_limit: u64,
    #[serde(default = "default_dissectors")]
    pub dissectors: Vec<String>,
    /// Seconds between `StatsDissector` reports; `None` disables it.
    #[serde(default)]
    pub stats_interval: Option<f64>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        IngestConfig {
            sampling_probability: default_sampling_probability(),
            packet_limit: default_packet_limit(),
            dissectors: default_dissectors(),
            stats_interval: None,
        }
    }
}

impl IngestConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sampling_probability < 1 || self.sampling_probability > 100 {
            return Err(ConfigError::BadSamplingProbability(self.sampling_probability));
        }
        Ok(())
    }
}

fn default_output_dir() -> String {
    "./out".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    /// Either a capture-file path or a live interface name; which it is
    /// is decided by `input.live` (`spec.md` §6's `open_file`/
    /// `init_interface` split).
    pub path: String,
    #[serde(default)]
    pub live: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig { dir: default_output_dir() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    pub input: InputConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cache.validate()?;
        self.ingest.validate()?;
        Ok(())
    }
}

/// Reads and parses a TOML config file, then validates it. Mirrors
/// `retina-core::config::load_config`'s read-then-parse error mapping.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        source: e,
    })?;
    let config: Config = toml::from_str(&raw).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        source: e,
    })?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let c = CacheConfig::default();
        assert_eq!(c.cache_size, 65536);
        assert_eq!(c.line_size, 32);
        assert_eq!(c.active_timeout, 300.0);
        assert_eq!(c.inactive_timeout, 30.0);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn rejects_sampling_probability_out_of_range() {
        let mut c = IngestConfig::default();
        c.sampling_probability = 0;
        assert!(matches!(c.validate(), Err(ConfigError::BadSamplingProbability(0))));
        c.sampling_probability = 101;
        assert!(c.validate().is_err());
    }

    #[test]
    fn parses_minimal_toml() {
        let toml = r#"
            [input]
            path = "capture.pcap"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.input.path, "capture.pcap");
        assert_eq!(config.cache.cache_size, 65536);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn load_config_reports_missing_file() {
        let err = load_config("/nonexistent/path/flowcap.toml");
        assert!(matches!(err, Err(ConfigError::Read { .. })));
    }
}
