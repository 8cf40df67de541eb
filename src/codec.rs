//! Compression codec backed by a pool of libzstd instances.

use tracing::{debug, error, instrument, warn};

use wasm_zstd_common::{BridgeError, CodecConfig, DecompressConfig, ErrorCode, ZstdError};
use wasm_zstd_core::{Arena, GuestModule, InstancePool, WasmEngine};

use crate::abi::LibZstd;
use crate::size_hint;

/// The embedded guest module.
const LIBZSTD_WAT: &str = include_str!("guest/libzstd.wat");

/// Smallest input for which the guest bound stops adding a fixed margin.
const BOUND_LOW_LIMIT: usize = 128 << 10;

/// Zstandard compressor and decompressor running in a WebAssembly sandbox.
///
/// A `Codec` is `Send + Sync`. Concurrent calls each borrow their own
/// instance from the pool.
#[derive(Debug)]
pub struct Codec {
    pool: InstancePool<LibZstd>,
    decompress: DecompressConfig,
}

/// Failure of one guest operation, before it is sorted into the public
/// error tiers.
enum CallError {
    Zstd(ZstdError),
    Bridge(BridgeError),
}

impl From<ZstdError> for CallError {
    fn from(e: ZstdError) -> Self {
        Self::Zstd(e)
    }
}

impl From<BridgeError> for CallError {
    fn from(e: BridgeError) -> Self {
        Self::Bridge(e)
    }
}

impl Codec {
    /// Create a codec for the embedded libzstd build with default settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the module cannot be compiled or instantiated.
    pub fn new() -> Result<Self, BridgeError> {
        Self::with_config(&CodecConfig::default())
    }

    /// Create a codec for the embedded libzstd build.
    ///
    /// # Errors
    ///
    /// Returns an error if the module cannot be compiled or instantiated.
    pub fn with_config(config: &CodecConfig) -> Result<Self, BridgeError> {
        let engine = WasmEngine::new(&config.engine)?;
        let module = GuestModule::from_wat(&engine, LIBZSTD_WAT)?;
        Self::with_guest_module(module, config)
    }

    /// Create a codec for another WebAssembly build of libzstd, such as a
    /// `wasm32-wasi` reactor compiled from the C sources.
    ///
    /// The module must export `memory`, `malloc`, `free`, `ZSTD_compress`,
    /// `ZSTD_compressBound`, `ZSTD_getFrameContentSize` and
    /// `ZSTD_decompress`, and may import WASI preview1.
    ///
    /// # Errors
    ///
    /// Returns an error if the module cannot be compiled or instantiated, or
    /// does not export the libzstd API.
    pub fn with_module(bytes: &[u8], config: &CodecConfig) -> Result<Self, BridgeError> {
        let engine = WasmEngine::new(&config.engine)?;
        let module = GuestModule::from_bytes(&engine, bytes)?;
        Self::with_guest_module(module, config)
    }

    /// Create a codec for an already compiled libzstd module.
    ///
    /// Only the pool and decompression settings of `config` apply; the
    /// engine is the one `module` was compiled with.
    ///
    /// # Errors
    ///
    /// Returns an error if the module cannot be instantiated or does not
    /// export the libzstd API.
    pub fn with_guest_module(
        module: GuestModule,
        config: &CodecConfig,
    ) -> Result<Self, BridgeError> {
        if let Some(name) = LibZstd::EXPORTS
            .iter()
            .find(|name| !module.exports_function(name))
        {
            return Err(BridgeError::missing_export(*name));
        }

        let codec = Self {
            pool: InstancePool::new(module, config.pool.clone()),
            decompress: config.decompress.clone(),
        };
        // Fail on load rather than on the first call, and warm the pool.
        drop(codec.pool.acquire()?);

        debug!(content_hash = %codec.pool.module().content_hash(), "Codec ready");
        Ok(codec)
    }

    /// Compress `src` at the default level. See [`Codec::compress_level`].
    pub fn compress(&self, dst: Vec<u8>, src: &[u8]) -> Result<Vec<u8>, ZstdError> {
        self.compress_level(dst, src, crate::DEFAULT_COMPRESSION_LEVEL)
    }

    /// Compress `src` into a single zstd frame.
    ///
    /// `dst` is reused when its capacity is at least
    /// [`compress_bound`]`(src.len())`, otherwise a new buffer is allocated.
    /// Its previous contents are discarded either way.
    ///
    /// # Errors
    ///
    /// Returns [`ZstdError::CompressFailed`] if the library rejects the call,
    /// for example for a level outside
    /// [`MIN_COMPRESSION_LEVEL`](crate::MIN_COMPRESSION_LEVEL)..=[`MAX_COMPRESSION_LEVEL`](crate::MAX_COMPRESSION_LEVEL).
    ///
    /// # Panics
    ///
    /// Panics if the guest module breaks its contract with the host.
    #[instrument(level = "trace", skip_all, fields(src_len = src.len(), level = level))]
    pub fn compress_level(
        &self,
        mut dst: Vec<u8>,
        src: &[u8],
        level: i32,
    ) -> Result<Vec<u8>, ZstdError> {
        settle(self.try_compress(&mut dst, src, level))?;
        Ok(dst)
    }

    /// Decompress every frame in `src`.
    ///
    /// The destination is sized by the frame's declared content size, capped
    /// at `max(ratio_limit * src.len(), size_limit)`. A `dst` with a larger
    /// capacity than that is used in full, which is how callers decompress
    /// payloads with a higher ratio or without a declared size.
    ///
    /// # Errors
    ///
    /// Returns [`ZstdError::DecompressFailed`] if the input is not a valid
    /// zstd stream or does not fit the destination.
    ///
    /// # Panics
    ///
    /// Panics if the guest module breaks its contract with the host.
    #[instrument(level = "trace", skip_all, fields(src_len = src.len()))]
    pub fn decompress(&self, mut dst: Vec<u8>, src: &[u8]) -> Result<Vec<u8>, ZstdError> {
        settle(self.try_decompress(&mut dst, src))?;
        Ok(dst)
    }

    /// Decompressed size declared by the frame header of `src`, if any.
    ///
    /// # Panics
    ///
    /// Panics if the guest module breaks its contract with the host.
    pub fn frame_content_size(&self, src: &[u8]) -> Option<u64> {
        let declared = settle(self.try_frame_content_size(src)).ok()?;
        u64::try_from(declared).ok()
    }

    /// The pool serving this codec's calls.
    pub fn pool(&self) -> &InstancePool<LibZstd> {
        &self.pool
    }

    fn try_compress(&self, dst: &mut Vec<u8>, src: &[u8], level: i32) -> Result<(), CallError> {
        let fail = |code| ZstdError::CompressFailed { code };
        let bound = compress_bound(src.len());
        let src_len = guest_len(src.len()).ok_or(fail(ErrorCode::SrcSizeWrong))?;
        let dst_len = guest_len(bound).ok_or(fail(ErrorCode::SrcSizeWrong))?;
        let total = dst_len
            .checked_add(src_len)
            .ok_or(fail(ErrorCode::SrcSizeWrong))?;

        dst.clear();
        dst.reserve_exact(bound);

        let mut instance = self.pool.acquire()?;
        let mut arena = Arena::reserve(&mut instance, total)?;
        let dst_ptr = arena.allocate(dst_len)?;
        let src_ptr = arena.write(src)?;

        let compress = arena.instance().abi().compress;
        #[allow(clippy::cast_sign_loss)]
        let word = arena.instance().call(
            compress,
            &[
                u64::from(dst_ptr),
                u64::from(dst_len),
                u64::from(src_ptr),
                u64::from(src_len),
                u64::from(level as u32),
            ],
        )?;
        let written = result_len(word).map_err(fail)?;

        dst.resize(written, 0);
        arena.read(dst_ptr, dst)?;
        arena.release()?;
        Ok(())
    }

    fn try_decompress(&self, dst: &mut Vec<u8>, src: &[u8]) -> Result<(), CallError> {
        let fail = |code| ZstdError::DecompressFailed { code };
        let src_len = guest_len(src.len()).ok_or(fail(ErrorCode::SrcSizeWrong))?;

        let mut instance = self.pool.acquire()?;
        let mut src_arena = Arena::reserve(&mut instance, src_len)?;
        let src_ptr = src_arena.write(src)?;

        let hint = size_hint::decompress_size_hint(
            src_arena.instance(),
            &self.decompress,
            src_ptr,
            src_len,
        )?;
        let capacity = dst.capacity().max(hint);
        let dst_len = guest_len(capacity).ok_or(fail(ErrorCode::DstSizeTooSmall))?;
        dst.clear();
        dst.reserve_exact(capacity);

        let mut dst_arena = Arena::reserve(src_arena.instance(), dst_len)?;
        let dst_ptr = dst_arena.allocate(dst_len)?;

        let decompress = dst_arena.instance().abi().decompress;
        let word = dst_arena.instance().call(
            decompress,
            &[
                u64::from(dst_ptr),
                u64::from(dst_len),
                u64::from(src_ptr),
                u64::from(src_len),
            ],
        )?;
        let written = result_len(word).map_err(fail)?;

        dst.resize(written, 0);
        dst_arena.read(dst_ptr, dst)?;
        dst_arena.release()?;
        src_arena.release()?;
        Ok(())
    }

    fn try_frame_content_size(&self, src: &[u8]) -> Result<i64, CallError> {
        let Some(src_len) = guest_len(src.len()) else {
            return Ok(-2);
        };

        let mut instance = self.pool.acquire()?;
        let mut arena = Arena::reserve(&mut instance, src_len)?;
        let src_ptr = arena.write(src)?;

        let frame_content_size = arena.instance().abi().frame_content_size;
        let word = arena
            .instance()
            .call(frame_content_size, &[u64::from(src_ptr), u64::from(src_len)])?;
        arena.release()?;
        #[allow(clippy::cast_possible_wrap)]
        let declared = word as i64;
        Ok(declared)
    }

    /// `ZSTD_compressBound` as computed by the guest.
    #[cfg(test)]
    fn guest_compress_bound(&self, src_size: u32) -> usize {
        let mut instance = self.pool.acquire().unwrap();
        let compress_bound = instance.abi().compress_bound;
        let word = instance
            .call(compress_bound, &[u64::from(src_size)])
            .unwrap();
        usize::try_from(word).unwrap()
    }
}

/// Worst-case compressed size of `src_size` input bytes.
///
/// Matches `ZSTD_COMPRESSBOUND` in libzstd without calling into the guest.
pub fn compress_bound(src_size: usize) -> usize {
    let margin = if src_size < BOUND_LOW_LIMIT {
        (BOUND_LOW_LIMIT - src_size) >> 11
    } else {
        0
    };
    src_size + (src_size >> 8) + margin
}

/// Length as a guest `size_t`, if it fits.
fn guest_len(len: usize) -> Option<u32> {
    u32::try_from(len).ok()
}

/// Decode a `size_t` result word into a length or an error code.
#[allow(clippy::cast_possible_truncation)]
fn result_len(word: u64) -> Result<usize, ErrorCode> {
    let word = word as u32;
    match ErrorCode::from_result(word) {
        Some(code) => Err(code),
        None => Ok(word as usize),
    }
}

/// Sort a call result into the public error tiers: library errors are
/// returned, bridge errors panic.
fn settle<T>(result: Result<T, CallError>) -> Result<T, ZstdError> {
    match result {
        Ok(value) => Ok(value),
        Err(CallError::Zstd(e)) => {
            warn!(error = %e, "Guest rejected call");
            Err(e)
        }
        Err(CallError::Bridge(e)) => fatal(&e),
    }
}

/// Abort the current call on a broken host/guest contract.
pub(crate) fn fatal(e: &BridgeError) -> ! {
    error!(error = %e, "Fatal bridge error");
    panic!("wasm-zstd: {e}")
}
