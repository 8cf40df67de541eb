//! Bump allocation inside guest linear memory.
//!
//! An [`Arena`] reserves one contiguous block with the guest's `malloc` and
//! hands out consecutive, non-overlapping sub-ranges of it. The whole block
//! is returned with a single `free` call when the arena is released or
//! dropped, so every exit path of an operation (including unwinding)
//! releases its guest memory.
//!
//! Arenas borrow their instance mutably. A second arena on the same
//! instance is reserved through [`Arena::instance`], which makes the borrow
//! checker enforce last-reserved, first-freed ordering.

use tracing::error;

use wasm_zstd_common::BridgeError;

use crate::GuestInstance;

/// One reservation of guest memory.
pub struct Arena<'i, A> {
    instance: &'i mut GuestInstance<A>,
    base: u32,
    size: u32,
    cursor: u32,
    released: bool,
}

impl<'i, A> Arena<'i, A> {
    /// Reserve `size` bytes of guest memory.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::GuestOutOfMemory`] if the guest allocator
    /// returns a null pointer, or an invocation error if it traps.
    pub fn reserve(instance: &'i mut GuestInstance<A>, size: u32) -> Result<Self, BridgeError> {
        let base = instance.malloc(size)?;
        if base == 0 && size > 0 {
            return Err(BridgeError::GuestOutOfMemory { requested: size });
        }

        Ok(Self {
            instance,
            base,
            size,
            cursor: 0,
            released: false,
        })
    }

    /// Take the next `size` bytes of the reservation, returning their guest
    /// pointer.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::ReservationExceeded`] if fewer than `size`
    /// bytes remain.
    pub fn allocate(&mut self, size: u32) -> Result<u32, BridgeError> {
        let remaining = self.remaining();
        if size > remaining {
            return Err(BridgeError::ReservationExceeded {
                requested: size,
                remaining,
            });
        }

        let ptr = self.base + self.cursor;
        self.cursor += size;
        Ok(ptr)
    }

    /// Allocate `bytes.len()` bytes and copy `bytes` into them.
    ///
    /// # Errors
    ///
    /// Returns an error if the reservation is too small or the write falls
    /// outside linear memory.
    pub fn write(&mut self, bytes: &[u8]) -> Result<u32, BridgeError> {
        let len = u32::try_from(bytes.len()).map_err(|_| BridgeError::ReservationExceeded {
            requested: u32::MAX,
            remaining: self.remaining(),
        })?;
        let ptr = self.allocate(len)?;
        self.instance.write(ptr, bytes)?;
        Ok(ptr)
    }

    /// Copy guest memory at `ptr` into `dst`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::MemoryAccess`] if the range is out of bounds.
    pub fn read(&self, ptr: u32, dst: &mut [u8]) -> Result<(), BridgeError> {
        self.instance.read(ptr, dst)
    }

    /// The instance this arena lives in.
    pub fn instance(&mut self) -> &mut GuestInstance<A> {
        &mut *self.instance
    }

    /// Guest pointer to the start of the reservation.
    pub fn base(&self) -> u32 {
        self.base
    }

    /// Size of the reservation in bytes.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Bytes not yet handed out.
    pub fn remaining(&self) -> u32 {
        self.size - self.cursor
    }

    /// Free the reservation now, reporting failure.
    ///
    /// # Errors
    ///
    /// Returns an error if the guest's `free` traps.
    pub fn release(mut self) -> Result<(), BridgeError> {
        self.released = true;
        self.instance.free(self.base)
    }
}

impl<A> Drop for Arena<'_, A> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        if let Err(e) = self.instance.free(self.base) {
            error!(
                instance_id = self.instance.id(),
                base = self.base,
                error = %e,
                "Failed to free guest reservation"
            );
            // The instance is already being discarded by the unwinding caller.
            if !std::thread::panicking() {
                panic!("failed to free guest reservation: {e}");
            }
        }
    }
}

impl<A> std::fmt::Debug for Arena<'_, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("base", &self.base)
            .field("size", &self.size)
            .field("cursor", &self.cursor)
            .finish_non_exhaustive()
    }
}
