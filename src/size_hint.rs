//! Destination sizing for decompression.
//!
//! A frame may declare its decompressed size, but the declaration is
//! attacker-controlled. The hint honors it only up to a ceiling derived from
//! the compressed length, so a few bytes of input can never force a huge
//! allocation.

use wasm_zstd_common::{BridgeError, DecompressConfig};
use wasm_zstd_core::GuestInstance;

use crate::abi::LibZstd;

/// Largest destination the bridge allocates for `src_len` compressed bytes.
pub fn upper_bound(config: &DecompressConfig, src_len: usize) -> usize {
    src_len
        .saturating_mul(config.ratio_limit)
        .max(config.size_limit)
}

/// Apply the ceiling to a declared content size as returned by
/// `ZSTD_getFrameContentSize`.
///
/// Negative values (unknown size, header error) fall back to the ceiling.
/// A declared size of 0 becomes 1 so the destination is never empty.
pub fn clamp_declared(declared: i64, upper: usize) -> usize {
    let hint = match declared {
        d if d < 0 => upper,
        0 => 1,
        d => usize::try_from(d).unwrap_or(usize::MAX),
    };
    hint.min(upper)
}

/// Compute the destination size for decompressing the `src_len` bytes at
/// guest pointer `src_ptr`.
///
/// Inputs shorter than the frame header minimum skip the guest query.
pub(crate) fn decompress_size_hint(
    instance: &mut GuestInstance<LibZstd>,
    config: &DecompressConfig,
    src_ptr: u32,
    src_len: u32,
) -> Result<usize, BridgeError> {
    let upper = upper_bound(config, src_len as usize);
    if (src_len as usize) < config.frame_header_min {
        return Ok(upper);
    }

    let frame_content_size = instance.abi().frame_content_size;
    let word = instance.call(
        frame_content_size,
        &[u64::from(src_ptr), u64::from(src_len)],
    )?;
    #[allow(clippy::cast_possible_wrap)]
    let declared = word as i64;
    Ok(clamp_declared(declared, upper))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upper_bound_default() {
        let config = DecompressConfig::default();
        assert_eq!(upper_bound(&config, 0), 1_000_000);
        assert_eq!(upper_bound(&config, 1000), 1_000_000);
        assert_eq!(upper_bound(&config, 100_000), 1_000_000);
        assert_eq!(upper_bound(&config, 100_001), 1_000_010);
    }

    #[test]
    fn test_upper_bound_saturates() {
        let config = DecompressConfig::default();
        assert_eq!(upper_bound(&config, usize::MAX / 2), usize::MAX);
    }

    #[test]
    fn test_clamp_declared() {
        // Unknown size and header errors
        assert_eq!(clamp_declared(-1, 1_000_000), 1_000_000);
        assert_eq!(clamp_declared(-2, 1_000_000), 1_000_000);

        assert_eq!(clamp_declared(0, 1_000_000), 1);
        assert_eq!(clamp_declared(12, 1_000_000), 12);
        assert_eq!(clamp_declared(1_000_000, 1_000_000), 1_000_000);
    }

    #[test]
    fn test_clamp_declared_ceiling() {
        assert_eq!(clamp_declared(1 << 40, 1_000_000), 1_000_000);
        assert_eq!(clamp_declared(i64::MAX, 2_000), 2_000);
    }

    #[test]
    fn test_custom_limits() {
        let config = DecompressConfig {
            size_limit: 64,
            ratio_limit: 4,
            frame_header_min: 2,
        };
        assert_eq!(upper_bound(&config, 10), 64);
        assert_eq!(upper_bound(&config, 100), 400);
        assert_eq!(clamp_declared(500, upper_bound(&config, 100)), 400);
    }
}
