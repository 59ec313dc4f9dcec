//! The allocator seam.
//!
//! Every allocation made by this crate is a single block obtained from the
//! current [`RawAllocator`], and every release hands that block back to it.
//! The default binding is the platform `malloc`/`free` pair.
//!
//! The binding is process-wide. It is meant to be chosen once, before the
//! first allocation, and left alone afterwards: a block must always be
//! returned to the allocator that produced it.

use smartalloc_log::{debug, info};
use std::fmt;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

/// A pair of raw allocation functions.
///
/// `allocate` returns a block of at least the requested size aligned to at
/// least a machine word, or null on failure. It must never unwind.
/// `deallocate` receives exactly the pointers `allocate` produced.
#[derive(Clone, Copy)]
pub struct RawAllocator {
    /// Returns a word-aligned block of `size` bytes, or null.
    pub allocate: unsafe fn(size: usize) -> *mut u8,
    /// Frees a block previously returned by `allocate`.
    pub deallocate: unsafe fn(block: *mut u8),
}

impl fmt::Debug for RawAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawAllocator")
            .field("allocate", &(self.allocate as *const ()))
            .field("deallocate", &(self.deallocate as *const ()))
            .finish()
    }
}

unsafe fn system_allocate(size: usize) -> *mut u8 {
    // SAFETY: malloc has no preconditions; it returns null on failure and
    // otherwise a block aligned for any fundamental type.
    unsafe { libc::malloc(size).cast() }
}

unsafe fn system_deallocate(block: *mut u8) {
    // SAFETY: the caller passes a pointer obtained from `system_allocate`.
    unsafe { libc::free(block.cast()) }
}

/// The platform allocator.
pub static SYSTEM: RawAllocator = RawAllocator {
    allocate: system_allocate,
    deallocate: system_deallocate,
};

static CURRENT: AtomicPtr<RawAllocator> =
    AtomicPtr::new(&SYSTEM as *const RawAllocator as *mut RawAllocator);

/// Returns the allocator used by subsequent allocations and releases.
#[inline]
#[must_use]
pub fn allocator() -> &'static RawAllocator {
    // SAFETY: CURRENT only ever holds addresses of `&'static RawAllocator`.
    unsafe { &*CURRENT.load(Ordering::Acquire) }
}

/// Installs `raw` as the process-wide allocator.
///
/// # Safety
///
/// No allocation produced by the previous allocator may be released after
/// this call unless both allocators free each other's blocks correctly.
/// Call this before the first allocation, or while no allocations are live.
pub unsafe fn set_allocator(raw: &'static RawAllocator) {
    CURRENT.store(ptr::from_ref(raw).cast_mut(), Ordering::Release);
    info!("allocator seam set to {raw:?}");
}

/// Restores the platform allocator.
///
/// # Safety
///
/// Same contract as [`set_allocator`].
pub unsafe fn reset_allocator() {
    CURRENT.store(ptr::from_ref(&SYSTEM).cast_mut(), Ordering::Release);
    debug!("allocator seam reset to system");
}

/// Requests `size` bytes from the current allocator. Null on failure.
#[inline]
pub(crate) fn allocate_block(size: usize) -> *mut u8 {
    // SAFETY: every `RawAllocator::allocate` accepts any size and reports
    // failure through null.
    unsafe { (allocator().allocate)(size) }
}

/// Returns a block to the current allocator.
///
/// # Safety
///
/// `block` must come from [`allocate_block`] under the same allocator and
/// must not be used afterwards.
#[inline]
pub(crate) unsafe fn deallocate_block(block: *mut u8) {
    // SAFETY: forwarded caller contract.
    unsafe { (allocator().deallocate)(block) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_system() {
        assert!(std::ptr::eq(allocator(), &SYSTEM));
    }

    #[test]
    fn test_system_block_is_word_aligned() {
        let block = allocate_block(24);
        assert!(!block.is_null());
        assert_eq!(block as usize % std::mem::size_of::<usize>(), 0);

        // SAFETY: block was just allocated by the system allocator.
        unsafe {
            block.write_bytes(0x5A, 24);
            deallocate_block(block);
        }
    }

    #[test]
    fn test_debug_format() {
        let text = format!("{SYSTEM:?}");
        assert!(text.starts_with("RawAllocator"));
    }
}
