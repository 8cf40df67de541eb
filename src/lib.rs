//! Zstandard compression through a sandboxed WebAssembly build of libzstd.
//!
//! All compression runs inside Wasmtime instances of the guest module, so
//! malformed input can at worst fail a call, never corrupt host memory. The
//! free functions in this crate share one lazily created [`Codec`]; create
//! your own `Codec` to control engine, pool and decompression limits.
//!
//! ```no_run
//! let frame = wasm_zstd::compress(Vec::new(), b"Hello World!")?;
//! let data = wasm_zstd::decompress(Vec::new(), &frame)?;
//! assert_eq!(data, b"Hello World!");
//! # Ok::<(), wasm_zstd::ZstdError>(())
//! ```
//!
//! # Errors and panics
//!
//! Library errors (corrupt input, invalid level, undersized destination)
//! are returned as [`ZstdError`]. A guest module that breaks its contract
//! with the host (a trap, a failed allocation, a missing export) is a
//! packaging defect: it is logged and turned into a panic.

use std::sync::LazyLock;

mod abi;
mod codec;
pub mod size_hint;

pub use abi::LibZstd;
pub use codec::{Codec, compress_bound};
pub use wasm_zstd_common::{
    BridgeError, CodecConfig, ConfigError, DecompressConfig, EngineConfig, ErrorCode,
    PoolConfig, ZstdError,
};

/// Level used by [`compress`].
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 5;

/// Lowest level accepted by [`compress_level`].
pub const MIN_COMPRESSION_LEVEL: i32 = -(1 << 17);

/// Highest level accepted by [`compress_level`].
pub const MAX_COMPRESSION_LEVEL: i32 = 22;

static DEFAULT_CODEC: LazyLock<Codec> =
    LazyLock::new(|| Codec::new().unwrap_or_else(|e| codec::fatal(&e)));

/// The codec behind the free functions.
///
/// # Panics
///
/// The first call panics if the embedded module fails to load.
pub fn default_codec() -> &'static Codec {
    &DEFAULT_CODEC
}

/// Compress `src` at [`DEFAULT_COMPRESSION_LEVEL`].
///
/// Pass `Vec::new()` as `dst` to let the call allocate. See
/// [`Codec::compress_level`].
pub fn compress(dst: Vec<u8>, src: &[u8]) -> Result<Vec<u8>, ZstdError> {
    compress_level(dst, src, DEFAULT_COMPRESSION_LEVEL)
}

/// Compress `src` at `level`. See [`Codec::compress_level`].
pub fn compress_level(dst: Vec<u8>, src: &[u8], level: i32) -> Result<Vec<u8>, ZstdError> {
    default_codec().compress_level(dst, src, level)
}

/// Decompress `src`. See [`Codec::decompress`].
pub fn decompress(dst: Vec<u8>, src: &[u8]) -> Result<Vec<u8>, ZstdError> {
    default_codec().decompress(dst, src)
}

/// Decompressed size declared by the frame header of `src`, if any.
pub fn frame_content_size(src: &[u8]) -> Option<u64> {
    default_codec().frame_content_size(src)
}
