//! Error types for wasm-zstd.
//!
//! Errors come in two tiers that are never mixed:
//! - [`BridgeError`]: a broken contract between the host and the guest
//!   module. These are not caused by caller input and are escalated to a
//!   panic by the public compression API.
//! - [`ZstdError`]: a failure reported by the guest library itself (corrupt
//!   stream, undersized buffer, invalid level). Callers are expected to
//!   handle these.

use thiserror::Error;

/// Largest error code libzstd reports through a `size_t` result.
///
/// Any result in the top `ERROR_MAX_CODE` values of the 32-bit range is an
/// error code, negated.
pub const ERROR_MAX_CODE: u32 = 120;

/// Bridge-level contract violations.
///
/// Every variant indicates a packaging defect or a bug in the bridge, never
/// bad input to a compression call.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// The guest module could not be compiled.
    #[error("Compilation failed: {reason}")]
    CompilationFailed {
        /// Description of the compilation failure.
        reason: String,
    },

    /// Invalid engine configuration was provided.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error.
        reason: String,
    },

    /// The compiled module could not be instantiated.
    #[error("Instantiation failed: {reason}")]
    InstantiationFailed {
        /// Description of the instantiation failure.
        reason: String,
    },

    /// The guest module does not export a required item.
    #[error("Missing export: {name}")]
    MissingExport {
        /// Name of the missing export.
        name: String,
    },

    /// An export exists but its signature cannot be driven by the call stack.
    #[error("Unsupported signature for export '{name}': {reason}")]
    SignatureMismatch {
        /// Name of the export.
        name: String,
        /// What is wrong with the signature.
        reason: String,
    },

    /// The guest runtime reported a failure while running an export.
    #[error("Guest call '{name}' failed: {message}")]
    InvocationFailed {
        /// Name of the export being called.
        name: String,
        /// Error message from the runtime.
        message: String,
        /// Trap code if the failure was a trap.
        trap: Option<String>,
    },

    /// The guest allocator could not satisfy a reservation.
    #[error("Guest allocation of {requested} bytes failed")]
    GuestOutOfMemory {
        /// Requested size in bytes.
        requested: u32,
    },

    /// A sub-allocation did not fit into its reservation.
    #[error("Reservation exceeded: requested {requested} bytes, {remaining} remaining")]
    ReservationExceeded {
        /// Requested size in bytes.
        requested: u32,
        /// Bytes left in the reservation.
        remaining: u32,
    },

    /// A read or write fell outside guest linear memory.
    #[error("Guest memory access out of bounds: offset={offset}, len={len}")]
    MemoryAccess {
        /// Start offset of the access.
        offset: u32,
        /// Length of the access.
        len: usize,
    },
}

impl BridgeError {
    /// Create a new `CompilationFailed` error.
    pub fn compilation_failed(reason: impl Into<String>) -> Self {
        Self::CompilationFailed {
            reason: reason.into(),
        }
    }

    /// Create a new `InvalidConfig` error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create a new `InstantiationFailed` error.
    pub fn instantiation_failed(reason: impl Into<String>) -> Self {
        Self::InstantiationFailed {
            reason: reason.into(),
        }
    }

    /// Create a new `MissingExport` error.
    pub fn missing_export(name: impl Into<String>) -> Self {
        Self::MissingExport { name: name.into() }
    }

    /// Create a new `SignatureMismatch` error.
    pub fn signature_mismatch(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SignatureMismatch {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Returns `true` if the error was raised while loading the module,
    /// before any call was made.
    pub fn is_load_error(&self) -> bool {
        matches!(
            self,
            Self::CompilationFailed { .. }
                | Self::InvalidConfig { .. }
                | Self::InstantiationFailed { .. }
                | Self::MissingExport { .. }
                | Self::SignatureMismatch { .. }
        )
    }
}

/// Standard libzstd error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Generic,
    PrefixUnknown,
    VersionUnsupported,
    FrameParameterUnsupported,
    FrameParameterWindowTooLarge,
    CorruptionDetected,
    ChecksumWrong,
    DictionaryCorrupted,
    DictionaryWrong,
    ParameterUnsupported,
    ParameterOutOfBound,
    MemoryAllocation,
    DstSizeTooSmall,
    SrcSizeWrong,
    DstBufferNull,
    /// A code this crate does not know by name.
    Other(u32),
}

impl ErrorCode {
    /// Map a raw (positive) libzstd error code.
    pub fn from_raw(code: u32) -> Self {
        match code {
            1 => Self::Generic,
            10 => Self::PrefixUnknown,
            12 => Self::VersionUnsupported,
            14 => Self::FrameParameterUnsupported,
            16 => Self::FrameParameterWindowTooLarge,
            20 => Self::CorruptionDetected,
            22 => Self::ChecksumWrong,
            30 => Self::DictionaryCorrupted,
            32 => Self::DictionaryWrong,
            40 => Self::ParameterUnsupported,
            42 => Self::ParameterOutOfBound,
            64 => Self::MemoryAllocation,
            70 => Self::DstSizeTooSmall,
            72 => Self::SrcSizeWrong,
            74 => Self::DstBufferNull,
            other => Self::Other(other),
        }
    }

    /// Decode a `size_t` result word, returning the error code if the word
    /// encodes one.
    pub fn from_result(word: u32) -> Option<Self> {
        if word > u32::MAX - ERROR_MAX_CODE {
            Some(Self::from_raw(0u32.wrapping_sub(word)))
        } else {
            None
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Generic => "Error (generic)",
            Self::PrefixUnknown => "Unknown frame descriptor",
            Self::VersionUnsupported => "Version not supported",
            Self::FrameParameterUnsupported => "Unsupported frame parameter",
            Self::FrameParameterWindowTooLarge => "Frame requires too much memory for decoding",
            Self::CorruptionDetected => "Data corruption detected",
            Self::ChecksumWrong => "Restored data doesn't match checksum",
            Self::DictionaryCorrupted => "Dictionary is corrupted",
            Self::DictionaryWrong => "Dictionary mismatch",
            Self::ParameterUnsupported => "Unsupported parameter",
            Self::ParameterOutOfBound => "Parameter is out of bound",
            Self::MemoryAllocation => "Allocation error : not enough memory",
            Self::DstSizeTooSmall => "Destination buffer is too small",
            Self::SrcSizeWrong => "Src size is incorrect",
            Self::DstBufferNull => "Operation on NULL destination buffer",
            Self::Other(code) => return write!(f, "Unknown error code {code}"),
        };
        f.write_str(name)
    }
}

/// Failures reported by the guest compression library.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ZstdError {
    /// `ZSTD_compress` returned an error code.
    #[error("zstd: compress failed: {code}")]
    CompressFailed {
        /// Error code reported by the library.
        code: ErrorCode,
    },

    /// `ZSTD_decompress` returned an error code.
    #[error("zstd: decompress failed: {code}")]
    DecompressFailed {
        /// Error code reported by the library.
        code: ErrorCode,
    },
}

impl ZstdError {
    /// Get the library error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::CompressFailed { code } | Self::DecompressFailed { code } => *code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BridgeError::missing_export("ZSTD_compress");
        assert_eq!(err.to_string(), "Missing export: ZSTD_compress");

        let err = BridgeError::ReservationExceeded {
            requested: 16,
            remaining: 4,
        };
        assert_eq!(
            err.to_string(),
            "Reservation exceeded: requested 16 bytes, 4 remaining"
        );
    }

    #[test]
    fn test_is_load_error() {
        assert!(BridgeError::compilation_failed("bad magic").is_load_error());
        assert!(BridgeError::missing_export("malloc").is_load_error());
        assert!(!BridgeError::GuestOutOfMemory { requested: 1 }.is_load_error());
        assert!(
            !BridgeError::MemoryAccess {
                offset: 0,
                len: 1
            }
            .is_load_error()
        );
    }

    #[test]
    fn test_error_code_from_result() {
        assert_eq!(ErrorCode::from_result(0), None);
        assert_eq!(ErrorCode::from_result(1234), None);
        assert_eq!(
            ErrorCode::from_result(0u32.wrapping_sub(70)),
            Some(ErrorCode::DstSizeTooSmall)
        );
        assert_eq!(
            ErrorCode::from_result(u32::MAX),
            Some(ErrorCode::Generic)
        );
        assert_eq!(
            ErrorCode::from_result(0u32.wrapping_sub(99)),
            Some(ErrorCode::Other(99))
        );
        // Just outside the error range.
        assert_eq!(ErrorCode::from_result(u32::MAX - ERROR_MAX_CODE), None);
    }

    #[test]
    fn test_zstd_error_display() {
        let err = ZstdError::DecompressFailed {
            code: ErrorCode::PrefixUnknown,
        };
        assert_eq!(
            err.to_string(),
            "zstd: decompress failed: Unknown frame descriptor"
        );
        assert_eq!(err.code(), ErrorCode::PrefixUnknown);
    }
}
