//! Register flushing and stack pointer snapshots.
//!
//! A conservative stack scanner only sees values that are in memory. Before a
//! thread publishes its stack pointer, the callee-saved registers have to be
//! spilled into the live part of its stack, otherwise a reference that only
//! lives in a register would be missed.
//!
//! Inside a signal handler the kernel has already saved the interrupted
//! register file in the signal frame, which lies above the handler frame. The
//! flush here covers the handler's own frames.

use crate::util::os::wrap_pthread_call;
use crate::util::Address;

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        const SAVED_REGISTERS: usize = 6;

        #[inline(always)]
        fn spill_callee_saved(saved: &mut [usize; SAVED_REGISTERS]) {
            unsafe {
                core::arch::asm!(
                    "mov [{0}], rbx",
                    "mov [{0} + 8], rbp",
                    "mov [{0} + 16], r12",
                    "mov [{0} + 24], r13",
                    "mov [{0} + 32], r14",
                    "mov [{0} + 40], r15",
                    in(reg) saved.as_mut_ptr(),
                    options(nostack, preserves_flags),
                );
            }
        }
    } else if #[cfg(target_arch = "aarch64")] {
        const SAVED_REGISTERS: usize = 12;

        #[inline(always)]
        fn spill_callee_saved(saved: &mut [usize; SAVED_REGISTERS]) {
            unsafe {
                core::arch::asm!(
                    "stp x19, x20, [{0}]",
                    "stp x21, x22, [{0}, #16]",
                    "stp x23, x24, [{0}, #32]",
                    "stp x25, x26, [{0}, #48]",
                    "stp x27, x28, [{0}, #64]",
                    "stp x29, x30, [{0}, #80]",
                    in(reg) saved.as_mut_ptr(),
                    options(nostack, preserves_flags),
                );
            }
        }
    } else {
        const SAVED_REGISTERS: usize = 1;

        // No inline assembly for this target. The black_box below still forces the
        // frame to be materialized, which is the best we can do portably.
        #[inline(always)]
        fn spill_callee_saved(_saved: &mut [usize; SAVED_REGISTERS]) {}
    }
}

/// Spill the callee-saved registers into the caller's frame and return a stack
/// pointer at or below them.
///
/// This is always inlined, so the spilled registers stay in the caller's frame until
/// the caller returns. Everything from the returned address up to the stack base is
/// what a conservative scanner has to look at.
#[inline(always)]
pub fn flush_to_stack() -> Address {
    let mut saved = [0usize; SAVED_REGISTERS];
    spill_callee_saved(&mut saved);
    std::hint::black_box(&mut saved);
    Address::from_ref(&saved)
}

/// Spill the callee-saved registers, then run `f` with the resulting stack pointer.
/// The spilled registers stay live for the whole call to `f`.
#[inline(never)]
pub fn with_callee_saves_pushed<R, F: FnOnce(Address) -> R>(f: F) -> R {
    let mut saved = [0usize; SAVED_REGISTERS];
    spill_callee_saved(&mut saved);
    std::hint::black_box(&mut saved);
    let result = f(Address::from_ref(&saved));
    // Keep the spill area alive until `f` returned.
    std::hint::black_box(&saved);
    result
}

/// An approximation of the current stack pointer, without flushing registers.
#[inline(always)]
pub fn approximate_sp() -> Address {
    let marker = 0u8;
    Address::from_ref(std::hint::black_box(&marker))
}

/// The `[low, high)` bounds of the calling thread's stack. The stack grows down, so
/// `high` is the stack base.
pub fn current_stack_bounds() -> std::io::Result<(Address, Address)> {
    unsafe {
        let mut attr: libc::pthread_attr_t = std::mem::zeroed();
        let attr_ptr: *mut libc::pthread_attr_t = &mut attr;
        wrap_pthread_call(&|| libc::pthread_getattr_np(libc::pthread_self(), attr_ptr))?;
        let mut stack_addr: *mut libc::c_void = std::ptr::null_mut();
        let mut stack_size: libc::size_t = 0;
        let addr_ptr: *mut *mut libc::c_void = &mut stack_addr;
        let size_ptr: *mut libc::size_t = &mut stack_size;
        let result =
            wrap_pthread_call(&|| libc::pthread_attr_getstack(attr_ptr, addr_ptr, size_ptr));
        libc::pthread_attr_destroy(attr_ptr);
        result?;
        let low = Address::from_mut_ptr(stack_addr);
        Ok((low, low + stack_size))
    }
}
