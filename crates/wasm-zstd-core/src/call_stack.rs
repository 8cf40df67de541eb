//! Positional calling convention for guest exports.
//!
//! C libraries compiled to WebAssembly only exchange integers with the host:
//! pointers and sizes are `i32`, 64-bit results are `i64`. A [`CallStack`]
//! is a fixed array of integer slots reused for every call on one instance.
//! Arguments are written to slots `0..arity` before the call, and the
//! result (if any) is written back to slot 0.
//!
//! A call stack belongs to exactly one instance and is not re-entrant: the
//! guest cannot call back into the host, so there is never more than one
//! call in flight per stack.

use tracing::error;
use wasmtime::{Func, Store, Trap, Val, ValType};

use wasm_zstd_common::BridgeError;

use crate::store::GuestState;

/// Number of slots in a call stack, the largest arity of any supported export.
pub const CALL_STACK_SLOTS: usize = 5;

/// Integer width of a parameter or result slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    I32,
    I64,
}

impl SlotKind {
    fn from_val_type(ty: &ValType) -> Option<Self> {
        match ty {
            ValType::I32 => Some(Self::I32),
            ValType::I64 => Some(Self::I64),
            _ => None,
        }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    fn to_val(self, slot: u64) -> Val {
        match self {
            Self::I32 => Val::I32(slot as u32 as i32),
            Self::I64 => Val::I64(slot as i64),
        }
    }

    /// `i32` results are zero-extended, matching how `size_t` and pointers
    /// are read on the host.
    #[allow(clippy::cast_sign_loss)]
    fn extract(self, val: &Val) -> Option<u64> {
        match (self, val) {
            (Self::I32, Val::I32(v)) => Some(u64::from(*v as u32)),
            (Self::I64, Val::I64(v)) => Some(*v as u64),
            _ => None,
        }
    }
}

/// A resolved guest export with a signature the call stack can drive.
#[derive(Debug, Clone, Copy)]
pub struct GuestFunc {
    name: &'static str,
    func: Func,
    params: [SlotKind; CALL_STACK_SLOTS],
    arity: usize,
    result: Option<SlotKind>,
}

impl GuestFunc {
    /// Check the signature of `func` and wrap it.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::SignatureMismatch`] if the function takes more
    /// than [`CALL_STACK_SLOTS`] arguments, returns more than one value, or
    /// uses anything other than `i32`/`i64`.
    pub fn new(
        name: &'static str,
        func: Func,
        store: &Store<GuestState>,
    ) -> Result<Self, BridgeError> {
        let ty = func.ty(store);

        let mut params = [SlotKind::I32; CALL_STACK_SLOTS];
        let mut arity = 0;
        for param in ty.params() {
            if arity == CALL_STACK_SLOTS {
                return Err(BridgeError::signature_mismatch(
                    name,
                    format!("more than {CALL_STACK_SLOTS} parameters"),
                ));
            }
            params[arity] = SlotKind::from_val_type(&param).ok_or_else(|| {
                BridgeError::signature_mismatch(name, format!("unsupported parameter type {param:?}"))
            })?;
            arity += 1;
        }

        let mut results = ty.results();
        let result = match results.next() {
            None => None,
            Some(result) => Some(SlotKind::from_val_type(&result).ok_or_else(|| {
                BridgeError::signature_mismatch(name, format!("unsupported result type {result:?}"))
            })?),
        };
        if results.next().is_some() {
            return Err(BridgeError::signature_mismatch(name, "multiple results"));
        }

        Ok(Self {
            name,
            func,
            params,
            arity,
            result,
        })
    }

    /// Export name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Number of arguments the export takes.
    pub fn arity(&self) -> usize {
        self.arity
    }

    /// Kind of the result slot, if the export returns a value.
    pub fn result(&self) -> Option<SlotKind> {
        self.result
    }
}

/// Reusable argument/result slots for one instance.
#[derive(Debug, Default)]
pub struct CallStack {
    slots: [u64; CALL_STACK_SLOTS],
}

impl CallStack {
    /// Create an empty call stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current slot values.
    pub fn slots(&self) -> &[u64; CALL_STACK_SLOTS] {
        &self.slots
    }

    /// Mutable slot values, for filling arguments before [`CallStack::invoke`].
    pub fn slots_mut(&mut self) -> &mut [u64; CALL_STACK_SLOTS] {
        &mut self.slots
    }

    /// Copy `args` into the leading slots and invoke `func`.
    ///
    /// Returns slot 0 after the call (0 for exports without a result).
    ///
    /// # Errors
    ///
    /// Returns a [`BridgeError`] if the argument count does not match the
    /// export's arity or the guest runtime fails the call.
    pub fn call(
        &mut self,
        store: &mut Store<GuestState>,
        func: GuestFunc,
        args: &[u64],
    ) -> Result<u64, BridgeError> {
        if args.len() != func.arity {
            return Err(BridgeError::signature_mismatch(
                func.name,
                format!("called with {} arguments, expects {}", args.len(), func.arity),
            ));
        }
        self.slots[..args.len()].copy_from_slice(args);
        self.invoke(store, func)?;
        Ok(self.slots[0])
    }

    /// Invoke `func` with the arguments already in slots `0..arity`.
    ///
    /// On success slot 0 holds the result.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvocationFailed`] if the call traps or the
    /// runtime rejects it.
    pub fn invoke(
        &mut self,
        store: &mut Store<GuestState>,
        func: GuestFunc,
    ) -> Result<(), BridgeError> {
        let params: [Val; CALL_STACK_SLOTS] =
            std::array::from_fn(|i| func.params[i].to_val(self.slots[i]));
        let mut results = [Val::I32(0)];
        let result_count = usize::from(func.result.is_some());

        func.func
            .call(
                &mut *store,
                &params[..func.arity],
                &mut results[..result_count],
            )
            .map_err(|e| {
                let trap = e.downcast_ref::<Trap>().map(|trap| format!("{trap:?}"));
                error!(export = func.name, trap = ?trap, "Guest call failed");
                BridgeError::InvocationFailed {
                    name: func.name.to_string(),
                    message: e.to_string(),
                    trap,
                }
            })?;

        if let Some(kind) = func.result {
            self.slots[0] = kind.extract(&results[0]).ok_or_else(|| {
                BridgeError::signature_mismatch(func.name, "result type changed during call")
            })?;
        }

        Ok(())
    }
}
