//! Per-instance store state.
//!
//! Each guest instance owns one [`Store`]. Its data is the WASI preview1
//! context that satisfies the system imports of C libraries built with
//! wasi-sdk. The context is built without preopens, environment or stdio,
//! so the guest can reach nothing outside its own linear memory.

use wasmtime::Store;
use wasmtime_wasi::WasiCtxBuilder;
use wasmtime_wasi::preview1::WasiP1Ctx;

use crate::WasmEngine;

/// Store data for a guest instance.
pub struct GuestState {
    wasi: WasiP1Ctx,
}

impl GuestState {
    /// Create a sandboxed guest state.
    pub fn new() -> Self {
        Self {
            wasi: WasiCtxBuilder::new().build_p1(),
        }
    }

    /// Get the WASI context.
    pub fn wasi_mut(&mut self) -> &mut WasiP1Ctx {
        &mut self.wasi
    }
}

impl Default for GuestState {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a new store for one guest instance.
pub fn create_store(engine: &WasmEngine) -> Store<GuestState> {
    Store::new(engine.inner(), GuestState::new())
}
