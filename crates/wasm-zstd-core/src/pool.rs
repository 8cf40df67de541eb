//! Pool of reusable guest instances.
//!
//! Instantiating a module costs far more than a small compression call, so
//! instances are kept after use and lent out again. A lent instance is
//! exclusively owned by its [`PooledInstance`] guard, which is what keeps
//! two concurrent calls from ever sharing a linear memory or call stack.
//!
//! The pool grows on demand and has no upper bound. Idle instances beyond
//! [`PoolConfig::max_idle`] are dropped on return, and [`InstancePool::trim`]
//! drops idle instances explicitly.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::{debug, warn};

use wasm_zstd_common::{BridgeError, PoolConfig};

use crate::instance::{GuestAbi, GuestInstance};
use crate::GuestModule;

/// A thread-safe pool of instances of one module.
pub struct InstancePool<A> {
    module: GuestModule,
    config: PoolConfig,
    idle: Mutex<Vec<GuestInstance<A>>>,
    created: AtomicUsize,
}

impl<A: GuestAbi> InstancePool<A> {
    /// Create an empty pool. No instance is created until the first
    /// [`InstancePool::acquire`].
    pub fn new(module: GuestModule, config: PoolConfig) -> Self {
        Self {
            module,
            config,
            idle: Mutex::new(Vec::new()),
            created: AtomicUsize::new(0),
        }
    }

    /// Lend an idle instance, creating one if none is idle.
    ///
    /// # Errors
    ///
    /// Returns an error if a new instance cannot be created.
    pub fn acquire(&self) -> Result<PooledInstance<'_, A>, BridgeError> {
        // Pop under the lock, instantiate outside it.
        let reused = self.idle.lock().pop();
        let instance = match reused {
            Some(instance) => instance,
            None => {
                let instance = GuestInstance::new(&self.module)?;
                let created = self.created.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(
                    instance_id = instance.id(),
                    created, "Instance pool grew"
                );
                instance
            }
        };

        Ok(PooledInstance {
            pool: self,
            instance: Some(instance),
        })
    }
}

impl<A> InstancePool<A> {
    /// Return an instance for reuse.
    ///
    /// The caller must have released every reservation made on it.
    pub fn release(&self, instance: GuestInstance<A>) {
        let mut idle = self.idle.lock();
        if self.config.max_idle.is_some_and(|max| idle.len() >= max) {
            drop(idle);
            debug!(instance_id = instance.id(), "Idle limit reached, dropping instance");
            return;
        }
        idle.push(instance);
    }

    /// Drop idle instances until at most `keep` remain.
    pub fn trim(&self, keep: usize) {
        let dropped: Vec<_> = {
            let mut idle = self.idle.lock();
            let at = keep.min(idle.len());
            idle.drain(at..).collect()
        };
        if !dropped.is_empty() {
            debug!(dropped = dropped.len(), keep, "Instance pool trimmed");
        }
    }

    /// Number of instances currently idle.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    /// Number of instances created over the pool's lifetime.
    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    /// The module instances are created from.
    pub fn module(&self) -> &GuestModule {
        &self.module
    }
}

impl<A> std::fmt::Debug for InstancePool<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstancePool")
            .field("idle", &self.idle_count())
            .field("created", &self.created_count())
            .field("max_idle", &self.config.max_idle)
            .finish_non_exhaustive()
    }
}

/// An instance on loan from an [`InstancePool`].
///
/// Returned to the pool on drop. If the thread is panicking the instance
/// may hold live reservations or a half-finished call, so it is dropped
/// instead.
pub struct PooledInstance<'p, A> {
    pool: &'p InstancePool<A>,
    instance: Option<GuestInstance<A>>,
}

impl<A> Deref for PooledInstance<'_, A> {
    type Target = GuestInstance<A>;

    fn deref(&self) -> &Self::Target {
        self.instance.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl<A> DerefMut for PooledInstance<'_, A> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.instance.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl<A> Drop for PooledInstance<'_, A> {
    fn drop(&mut self) {
        let Some(instance) = self.instance.take() else {
            return;
        };
        if std::thread::panicking() {
            warn!(
                instance_id = instance.id(),
                "Discarding instance after panic"
            );
            return;
        }
        self.pool.release(instance);
    }
}
