//! Wasmtime bridge for calling into C libraries compiled to WebAssembly.
//!
//! This crate provides the pieces needed to drive a sandboxed C library
//! from the host without sharing an address space:
//! - [`WasmEngine`]: Configured Wasmtime engine
//! - [`GuestModule`]: The compiled module, shared by all instances
//! - [`GuestInstance`]: One instance with its own linear memory and exports
//! - [`CallStack`]: Positional integer calling convention for exports
//! - [`Arena`]: Bump allocation of guest memory for one operation
//! - [`InstancePool`]: Reuse of instances across calls and threads
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │              WasmEngine + GuestModule                   │
//! │  (Compiled once, shared read-only)                      │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                    InstancePool                         │
//! │  (Lends one instance per in-flight call)                │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │        GuestInstance (store + memory + call stack)      │
//! │  - Arena reservations via guest malloc/free             │
//! │  - Exports invoked through the CallStack                │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod arena;
pub mod call_stack;
pub mod engine;
pub mod instance;
pub mod module;
pub mod pool;
pub mod store;

pub use arena::Arena;
pub use call_stack::{CALL_STACK_SLOTS, CallStack, GuestFunc, SlotKind};
pub use engine::WasmEngine;
pub use instance::{Exports, GuestAbi, GuestInstance};
pub use module::GuestModule;
pub use pool::{InstancePool, PooledInstance};
pub use store::GuestState;
