//! Interrupt Control
//!
//! Critical sections and real-mode interrupt vector hooking.
//!
//! Vector installation/removal and the handler far pointer are the only
//! multi-word writes an interrupt may observe half-done, so they always run
//! inside [`critical`].

use super::memory::{DosMemory, FarPtr};

/// Run `f` with maskable interrupts disabled, restoring the previous state.
#[inline]
pub fn critical<R>(f: impl FnOnce() -> R) -> R {
    #[cfg(all(target_arch = "x86_64", not(test)))]
    {
        x86_64::instructions::interrupts::without_interrupts(f)
    }
    #[cfg(not(all(target_arch = "x86_64", not(test))))]
    {
        f()
    }
}

/// Errors from unhooking a vector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorError {
    /// Another program hooked the vector after us; it cannot be restored
    Rehooked { vector: u8, current: FarPtr },
}

/// The real-mode interrupt vector table
pub trait InterruptVectors {
    fn get_vector(&self, vector: u8) -> FarPtr;
    fn set_vector(&mut self, vector: u8, handler: FarPtr);
}

/// The vector table at 0000:0000 of a [`DosMemory`]
pub struct VectorTable<'a, M: DosMemory + ?Sized> {
    mem: &'a mut M,
}

impl<'a, M: DosMemory + ?Sized> VectorTable<'a, M> {
    pub fn new(mem: &'a mut M) -> Self {
        Self { mem }
    }
}

impl<M: DosMemory + ?Sized> InterruptVectors for VectorTable<'_, M> {
    fn get_vector(&self, vector: u8) -> FarPtr {
        self.mem.read_far_ptr(FarPtr::new(0, vector as u16 * 4))
    }

    fn set_vector(&mut self, vector: u8, handler: FarPtr) {
        self.mem.write_far_ptr(FarPtr::new(0, vector as u16 * 4), handler);
    }
}

/// Point `vector` at `handler`, returning the previous handler to chain to
pub fn hook_vector<V: InterruptVectors + ?Sized>(ivt: &mut V, vector: u8, handler: FarPtr) -> FarPtr {
    critical(|| {
        let previous = ivt.get_vector(vector);
        ivt.set_vector(vector, handler);
        previous
    })
}

/// Restore `previous` if `vector` still points at `ours`
pub fn unhook_vector<V: InterruptVectors + ?Sized>(
    ivt: &mut V,
    vector: u8,
    ours: FarPtr,
    previous: FarPtr,
) -> Result<(), VectorError> {
    critical(|| {
        let current = ivt.get_vector(vector);
        if current != ours {
            return Err(VectorError::Rehooked { vector, current });
        }
        ivt.set_vector(vector, previous);
        Ok(())
    })
}
