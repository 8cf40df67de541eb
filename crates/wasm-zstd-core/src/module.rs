//! Guest module compilation.
//!
//! A [`GuestModule`] is compiled once and shared, read-only, by every
//! instance created from it. Compilation also links the WASI preview1
//! imports and pre-resolves them, so creating an instance afterwards only
//! allocates the store and linear memory.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::time::Instant;

use tracing::{debug, info, instrument};
use wasmtime::{InstancePre, Linker, Module};

use wasm_zstd_common::BridgeError;

use crate::WasmEngine;
use crate::store::GuestState;

/// A compiled guest module, ready to be instantiated.
///
/// # Thread Safety
///
/// `GuestModule` is immutable after creation and can be shared across
/// threads; instances created from it are not.
#[derive(Clone)]
pub struct GuestModule {
    engine: WasmEngine,
    module: Module,
    pre: InstancePre<GuestState>,
    content_hash: String,
}

impl GuestModule {
    /// Compile a module from WebAssembly binary bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid module or if the module
    /// imports anything other than WASI preview1.
    #[instrument(skip(engine, bytes), fields(bytes_len = bytes.len()))]
    pub fn from_bytes(engine: &WasmEngine, bytes: &[u8]) -> Result<Self, BridgeError> {
        let start = Instant::now();

        validate_wasm_header(bytes)?;

        let module = Module::from_binary(engine.inner(), bytes).map_err(|e| {
            BridgeError::compilation_failed(format!("Core module compilation failed: {e}"))
        })?;

        let content_hash = compute_hash(bytes);
        info!(
            content_hash = %content_hash,
            duration_ms = start.elapsed().as_millis(),
            "Guest module compiled"
        );

        Self::link(engine, module, content_hash)
    }

    /// Compile a module from WAT (WebAssembly Text Format).
    ///
    /// # Errors
    ///
    /// Returns an error if the text does not parse or compile.
    #[instrument(skip(engine, wat), fields(wat_len = wat.len()))]
    pub fn from_wat(engine: &WasmEngine, wat: &str) -> Result<Self, BridgeError> {
        let start = Instant::now();

        let module = Module::new(engine.inner(), wat).map_err(|e| {
            BridgeError::compilation_failed(format!("WAT compilation failed: {e}"))
        })?;

        let content_hash = compute_hash(wat.as_bytes());
        info!(
            content_hash = %content_hash,
            duration_ms = start.elapsed().as_millis(),
            "WAT module compiled"
        );

        Self::link(engine, module, content_hash)
    }

    fn link(engine: &WasmEngine, module: Module, content_hash: String) -> Result<Self, BridgeError> {
        let mut linker: Linker<GuestState> = Linker::new(engine.inner());
        wasmtime_wasi::preview1::add_to_linker_sync(&mut linker, GuestState::wasi_mut).map_err(
            |e| BridgeError::invalid_config(format!("Failed to link WASI preview1: {e}")),
        )?;

        let pre = linker.instantiate_pre(&module).map_err(|e| {
            BridgeError::instantiation_failed(format!("Unresolved module imports: {e}"))
        })?;

        debug!(
            imports = module.imports().len(),
            exports = module.exports().len(),
            "Guest module linked"
        );

        Ok(Self {
            engine: engine.clone(),
            module,
            pre,
            content_hash,
        })
    }

    /// Get the engine the module was compiled with.
    pub fn engine(&self) -> &WasmEngine {
        &self.engine
    }

    /// Get the inner Wasmtime module.
    pub fn inner(&self) -> &Module {
        &self.module
    }

    pub(crate) fn instance_pre(&self) -> &InstancePre<GuestState> {
        &self.pre
    }

    /// Get the content hash of the module source.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// Check whether the module exports a function with the given name.
    pub fn exports_function(&self, name: &str) -> bool {
        self.module
            .get_export(name)
            .is_some_and(|ty| ty.func().is_some())
    }
}

impl std::fmt::Debug for GuestModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuestModule")
            .field("content_hash", &self.content_hash)
            .finish_non_exhaustive()
    }
}

/// Validate WebAssembly header (magic number).
fn validate_wasm_header(bytes: &[u8]) -> Result<(), BridgeError> {
    if bytes.len() < 8 {
        return Err(BridgeError::compilation_failed(
            "Invalid Wasm: file too small",
        ));
    }

    // Check magic number: \0asm
    if &bytes[0..4] != b"\0asm" {
        return Err(BridgeError::compilation_failed(
            "Invalid Wasm: bad magic number",
        ));
    }

    Ok(())
}

/// Compute a hash of the given bytes.
fn compute_hash(bytes: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasm_zstd_common::EngineConfig;

    // Minimal valid Wasm module (empty module)
    const MINIMAL_WASM: &[u8] = &[
        0x00, 0x61, 0x73, 0x6d, // magic: \0asm
        0x01, 0x00, 0x00, 0x00, // version: 1
    ];

    fn engine() -> WasmEngine {
        WasmEngine::new(&EngineConfig::default()).unwrap()
    }

    #[test]
    fn test_validate_wasm_header() {
        assert!(validate_wasm_header(MINIMAL_WASM).is_ok());
        assert!(validate_wasm_header(&[0x00, 0x61]).is_err());
        assert!(validate_wasm_header(&[0, 0, 0, 0, 1, 0, 0, 0]).is_err());
    }

    #[test]
    fn test_compute_hash() {
        let hash1 = compute_hash(b"hello");
        let hash2 = compute_hash(b"hello");
        let hash3 = compute_hash(b"world");

        assert_eq!(hash1, hash2);
        assert_ne!(hash1, hash3);
        assert_eq!(hash1.len(), 16);
    }

    #[test]
    fn test_module_from_bytes() {
        let module = GuestModule::from_bytes(&engine(), MINIMAL_WASM).unwrap();
        assert!(!module.content_hash().is_empty());
        assert!(!module.exports_function("malloc"));
    }

    #[test]
    fn test_module_from_corrupt_bytes() {
        let mut corrupt = MINIMAL_WASM.to_vec();
        corrupt.extend_from_slice(&[0xff, 0xff, 0xff]);

        let err = GuestModule::from_bytes(&engine(), &corrupt).unwrap_err();
        assert!(matches!(err, BridgeError::CompilationFailed { .. }));
    }

    #[test]
    fn test_module_with_wasi_import() {
        let wat = r#"
            (module
                (import "wasi_snapshot_preview1" "proc_exit" (func (param i32)))
                (func (export "run"))
            )
        "#;
        let module = GuestModule::from_wat(&engine(), wat).unwrap();
        assert!(module.exports_function("run"));
    }

    #[test]
    fn test_module_with_unknown_import() {
        let wat = r#"
            (module
                (import "env" "log" (func (param i32 i32)))
            )
        "#;
        let err = GuestModule::from_wat(&engine(), wat).unwrap_err();
        assert!(matches!(err, BridgeError::InstantiationFailed { .. }));
        assert!(err.is_load_error());
    }

    #[test]
    fn test_module_debug() {
        let module = GuestModule::from_bytes(&engine(), MINIMAL_WASM).unwrap();

        let debug_str = format!("{module:?}");
        assert!(debug_str.contains("GuestModule"));
        assert!(debug_str.contains("content_hash"));
    }
}
