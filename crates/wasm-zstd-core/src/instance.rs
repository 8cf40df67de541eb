//! Guest instances.
//!
//! A [`GuestInstance`] is one isolated execution context created from a
//! [`GuestModule`]: its own store, linear memory, call stack and resolved
//! exports. Every instance resolves the C allocator (`malloc`/`free`) plus a
//! library-specific set of exports described by a [`GuestAbi`].
//!
//! All pointers handled here are offsets into this instance's linear memory
//! and mean nothing to any other instance.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tracing::debug;
use wasmtime::{Instance, Memory, Store};

use wasm_zstd_common::BridgeError;

use crate::GuestModule;
use crate::call_stack::{CallStack, GuestFunc};
use crate::store::{GuestState, create_store};

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

/// Library-specific exports resolved on every new instance.
pub trait GuestAbi: Sized + Send + 'static {
    /// Resolve the exports this ABI needs.
    ///
    /// # Errors
    ///
    /// Returns an error if an export is missing or has an unsupported
    /// signature.
    fn resolve(exports: &mut Exports<'_>) -> Result<Self, BridgeError>;
}

/// The allocator alone, for guests that need no further exports.
impl GuestAbi for () {
    fn resolve(_exports: &mut Exports<'_>) -> Result<Self, BridgeError> {
        Ok(())
    }
}

/// Export lookup on a freshly created instance.
pub struct Exports<'a> {
    store: &'a mut Store<GuestState>,
    instance: Instance,
}

impl Exports<'_> {
    /// Look up an exported function by name.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::MissingExport`] if there is no function with
    /// this name, or [`BridgeError::SignatureMismatch`] if its signature is
    /// not callable through a [`CallStack`].
    pub fn func(&mut self, name: &'static str) -> Result<GuestFunc, BridgeError> {
        let func = self
            .instance
            .get_func(&mut *self.store, name)
            .ok_or_else(|| BridgeError::missing_export(name))?;
        GuestFunc::new(name, func, self.store)
    }

    /// Look up an exported function that may be absent.
    pub fn optional_func(
        &mut self,
        name: &'static str,
    ) -> Result<Option<GuestFunc>, BridgeError> {
        match self.instance.get_func(&mut *self.store, name) {
            Some(func) => GuestFunc::new(name, func, self.store).map(Some),
            None => Ok(None),
        }
    }
}

/// One instantiated guest module.
///
/// Not `Sync`: an instance serves one call at a time. Share instances
/// through an [`InstancePool`](crate::InstancePool).
pub struct GuestInstance<A> {
    id: u64,
    store: Store<GuestState>,
    memory: Memory,
    malloc: GuestFunc,
    free: GuestFunc,
    stack: CallStack,
    abi: A,
}

impl<A: GuestAbi> GuestInstance<A> {
    /// Instantiate `module` with a fresh store and linear memory.
    ///
    /// WASI reactor modules have their `_initialize` export run once here.
    ///
    /// # Errors
    ///
    /// Returns an error if instantiation fails or a required export
    /// (`memory`, `malloc`, `free`, or one of the ABI's) is missing.
    pub fn new(module: &GuestModule) -> Result<Self, BridgeError> {
        let start = Instant::now();
        let id = NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed);

        let mut store = create_store(module.engine());
        let instance = module
            .instance_pre()
            .instantiate(&mut store)
            .map_err(|e| BridgeError::instantiation_failed(format!("{e}")))?;

        let memory = instance
            .get_memory(&mut store, "memory")
            .ok_or_else(|| BridgeError::missing_export("memory"))?;

        let mut stack = CallStack::new();
        let mut exports = Exports {
            store: &mut store,
            instance,
        };
        let initialize = exports.optional_func("_initialize")?;
        let malloc = exports.func("malloc")?;
        let free = exports.func("free")?;
        let abi = A::resolve(&mut exports)?;

        if let Some(initialize) = initialize {
            stack.call(&mut store, initialize, &[])?;
        }

        debug!(
            instance_id = id,
            duration_us = start.elapsed().as_micros(),
            "Guest instance created"
        );

        Ok(Self {
            id,
            store,
            memory,
            malloc,
            free,
            stack,
            abi,
        })
    }
}

impl<A> GuestInstance<A> {
    /// Process-unique identifier of this instance, for tracing.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Library-specific exports.
    pub fn abi(&self) -> &A {
        &self.abi
    }

    /// Call an export with positional integer arguments.
    ///
    /// Returns the result slot; see [`CallStack::call`].
    ///
    /// # Errors
    ///
    /// Returns an error if the guest runtime fails the call.
    pub fn call(&mut self, func: GuestFunc, args: &[u64]) -> Result<u64, BridgeError> {
        self.stack.call(&mut self.store, func, args)
    }

    /// Call stack of this instance.
    pub fn stack(&self) -> &CallStack {
        &self.stack
    }

    /// Current size of linear memory in bytes.
    pub fn memory_size(&self) -> usize {
        self.memory.data_size(&self.store)
    }

    /// Copy guest memory at `offset` into `dst`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::MemoryAccess`] if the range is out of bounds.
    pub fn read(&self, offset: u32, dst: &mut [u8]) -> Result<(), BridgeError> {
        self.memory
            .read(&self.store, offset as usize, dst)
            .map_err(|_| BridgeError::MemoryAccess {
                offset,
                len: dst.len(),
            })
    }

    /// Copy `src` into guest memory at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::MemoryAccess`] if the range is out of bounds.
    pub fn write(&mut self, offset: u32, src: &[u8]) -> Result<(), BridgeError> {
        self.memory
            .write(&mut self.store, offset as usize, src)
            .map_err(|_| BridgeError::MemoryAccess {
                offset,
                len: src.len(),
            })
    }

    /// Allocate `size` bytes with the guest's `malloc`.
    ///
    /// Returns the guest pointer, which is 0 if the guest is out of memory.
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn malloc(&mut self, size: u32) -> Result<u32, BridgeError> {
        let ptr = self.stack.call(&mut self.store, self.malloc, &[u64::from(size)])?;
        Ok(ptr as u32)
    }

    /// Release a pointer returned by [`GuestInstance::malloc`].
    pub(crate) fn free(&mut self, ptr: u32) -> Result<(), BridgeError> {
        self.stack
            .call(&mut self.store, self.free, &[u64::from(ptr)])
            .map(|_| ())
    }
}

impl<A> std::fmt::Debug for GuestInstance<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuestInstance")
            .field("id", &self.id)
            .field("memory_size", &self.memory_size())
            .finish_non_exhaustive()
    }
}
