//! Configuration structures for wasm-zstd.
//!
//! This module defines configuration options for the bridge components:
//! - [`CodecConfig`]: Top-level configuration containing all settings
//! - [`EngineConfig`]: Wasmtime engine settings
//! - [`PoolConfig`]: Instance pool retention
//! - [`DecompressConfig`]: Limits for sizing decompression buffers

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Top-level codec configuration.
///
/// Can be built in code or loaded from a TOML file:
///
/// ```toml
/// [engine]
/// optimize = true
///
/// [pool]
/// max_idle = 16
///
/// [decompress]
/// size_limit = 4_000_000
/// ratio_limit = 20
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CodecConfig {
    /// Wasmtime engine configuration.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Instance pool configuration.
    #[serde(default)]
    pub pool: PoolConfig,

    /// Decompression buffer sizing.
    #[serde(default)]
    pub decompress: DecompressConfig,
}

impl CodecConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;

        debug!(path = %path.display(), "Loading codec configuration");
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string cannot be parsed as TOML.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })
    }
}

/// Wasmtime engine configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Enable the pooling instance allocator.
    ///
    /// Off by default: the pooling allocator caps the number of live
    /// instances at `max_instances`, while the instance pool itself grows
    /// with concurrency.
    #[serde(default)]
    pub pooling_allocator: bool,

    /// Maximum concurrent instances.
    ///
    /// Only effective when `pooling_allocator` is enabled.
    #[serde(default = "defaults::max_instances")]
    pub max_instances: u32,

    /// Memory per instance slot in megabytes.
    ///
    /// Only effective when `pooling_allocator` is enabled.
    #[serde(default = "defaults::instance_memory_mb")]
    pub instance_memory_mb: u32,

    /// Optimize generated code for speed.
    #[serde(default = "defaults::optimize")]
    pub optimize: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pooling_allocator: false,
            max_instances: defaults::max_instances(),
            instance_memory_mb: defaults::instance_memory_mb(),
            optimize: defaults::optimize(),
        }
    }
}

/// Instance pool configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PoolConfig {
    /// Maximum number of idle instances kept for reuse.
    ///
    /// Instances returned while this many are already idle are dropped.
    /// `None` keeps every instance.
    #[serde(default)]
    pub max_idle: Option<usize>,
}

/// Decompression buffer sizing.
///
/// A destination buffer allocated for a decompression is never larger than
/// `max(ratio_limit * src_len, size_limit)`, whatever size the frame claims.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DecompressConfig {
    /// Floor of the destination size ceiling, in bytes.
    #[serde(default = "defaults::size_limit")]
    pub size_limit: usize,

    /// Multiple of the input length allowed for the destination.
    #[serde(default = "defaults::ratio_limit")]
    pub ratio_limit: usize,

    /// Inputs shorter than this are not inspected for a frame header.
    #[serde(default = "defaults::frame_header_min")]
    pub frame_header_min: usize,
}

impl Default for DecompressConfig {
    fn default() -> Self {
        Self {
            size_limit: defaults::size_limit(),
            ratio_limit: defaults::ratio_limit(),
            frame_header_min: defaults::frame_header_min(),
        }
    }
}

/// Configuration file errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse configuration file.
    #[error("Failed to parse config file: {message}")]
    Parse { message: String },
}

/// Default value functions for serde.
mod defaults {
    pub const fn max_instances() -> u32 {
        1000
    }

    pub const fn instance_memory_mb() -> u32 {
        256
    }

    pub const fn optimize() -> bool {
        true
    }

    pub const fn size_limit() -> usize {
        1000 * 1000
    }

    pub const fn ratio_limit() -> usize {
        10
    }

    // ZSTD_FRAMEHEADERSIZE_MIN
    pub const fn frame_header_min() -> usize {
        2
    }
}
