//! The libzstd exports the codec calls.

use wasm_zstd_common::BridgeError;
use wasm_zstd_core::{Exports, GuestAbi, GuestFunc, SlotKind};

/// Resolved libzstd exports of one instance.
#[derive(Debug, Clone, Copy)]
pub struct LibZstd {
    /// `size_t ZSTD_compress(void* dst, size_t cap, const void* src, size_t n, int level)`
    pub compress: GuestFunc,
    /// `size_t ZSTD_compressBound(size_t n)`
    pub compress_bound: GuestFunc,
    /// `unsigned long long ZSTD_getFrameContentSize(const void* src, size_t n)`
    pub frame_content_size: GuestFunc,
    /// `size_t ZSTD_decompress(void* dst, size_t cap, const void* src, size_t n)`
    pub decompress: GuestFunc,
}

impl LibZstd {
    /// Names of the exports resolved on every instance, besides the allocator.
    pub const EXPORTS: [&'static str; 4] = [
        "ZSTD_compress",
        "ZSTD_compressBound",
        "ZSTD_getFrameContentSize",
        "ZSTD_decompress",
    ];
}

impl GuestAbi for LibZstd {
    fn resolve(exports: &mut Exports<'_>) -> Result<Self, BridgeError> {
        Ok(Self {
            compress: expect_signature(exports.func("ZSTD_compress")?, 5, SlotKind::I32)?,
            compress_bound: expect_signature(exports.func("ZSTD_compressBound")?, 1, SlotKind::I32)?,
            frame_content_size: expect_signature(
                exports.func("ZSTD_getFrameContentSize")?,
                2,
                SlotKind::I64,
            )?,
            decompress: expect_signature(exports.func("ZSTD_decompress")?, 4, SlotKind::I32)?,
        })
    }
}

fn expect_signature(
    func: GuestFunc,
    arity: usize,
    result: SlotKind,
) -> Result<GuestFunc, BridgeError> {
    if func.arity() != arity || func.result() != Some(result) {
        return Err(BridgeError::signature_mismatch(
            func.name(),
            format!(
                "expected {arity} parameters returning {result:?}, found {} returning {:?}",
                func.arity(),
                func.result()
            ),
        ));
    }
    Ok(func)
}
