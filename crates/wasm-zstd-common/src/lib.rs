//! Common errors and configuration for wasm-zstd.
//!
//! This crate provides shared functionality used across the wasm-zstd workspace:
//! - Error types using `thiserror`, split into fatal bridge errors and
//!   recoverable library errors
//! - Configuration structures for the engine, the instance pool and
//!   decompression limits

pub mod config;
pub mod error;

pub use config::{CodecConfig, ConfigError, DecompressConfig, EngineConfig, PoolConfig};
pub use error::{BridgeError, ERROR_MAX_CODE, ErrorCode, ZstdError};
