//! Error types for configuration and packet source failures.
//!
//! Dissector hooks and the exporter sink never propagate errors through
//! these types: a malformed payload simply fails to attach an extension
//! (see [`crate::dissector`]), and sink errors are logged and swallowed by
//! the cache (see [`crate::cache`]).

use thiserror::Error;

/// Raised by [`crate::config::CacheConfig::validate`] and
/// [`crate::config::load_config`].
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cache_size ({cache_size}) must be a positive multiple of line_size ({line_size})")]
    BadCacheShape { cache_size: usize, line_size: usize },

    #[error("line_size must be nonzero")]
    ZeroLineSize,

    #[error("sampling_probability must be in [1, 100], got {0}")]
    BadSamplingProbability(u32),

    #[error("active_timeout and inactive_timeout must be finite and non-negative")]
    BadTimeout,

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// Raised by [`crate::source::PacketSource`] implementations.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("failed to open capture file {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: pcap::Error,
    },

    #[error("capture read failed: {0}")]
    Read(#[from] pcap::Error),
}
