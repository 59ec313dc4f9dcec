//! Scope-bound release of raw payload addresses.
//!
//! [`ScopedPtr`] owns one reference to a raw allocation and releases it when
//! it goes out of scope, whether the scope ends normally, through an early
//! return, or by unwinding.

use crate::Result;
use crate::refcount::release;
use crate::smalloc::{AllocRequest, allocate};
use std::fmt;
use std::ptr::NonNull;

/// Owner of one reference to a raw allocation.
///
/// ```
/// use smartalloc::{AllocRequest, Ownership, ScopedPtr};
///
/// let scoped = ScopedPtr::allocate(&AllocRequest::scalar(Ownership::Unique, 32)).unwrap();
/// assert!(scoped.get().is_some());
/// // released here
/// ```
pub struct ScopedPtr {
    payload: Option<NonNull<u8>>,
}

impl ScopedPtr {
    /// Takes ownership of one reference to `payload`. Null yields an empty
    /// guard.
    ///
    /// # Safety
    ///
    /// `payload` must be null or a live address returned by the allocation
    /// engine, and the caller must give up the reference it holds.
    #[must_use]
    pub unsafe fn new(payload: *mut u8) -> Self {
        ScopedPtr {
            payload: NonNull::new(payload),
        }
    }

    /// Allocates according to `request` and guards the result.
    ///
    /// # Errors
    ///
    /// Propagates allocation failures.
    pub fn allocate(request: &AllocRequest<'_>) -> Result<Self> {
        Ok(ScopedPtr {
            payload: Some(allocate(request)?),
        })
    }

    /// The guarded address, if any.
    #[must_use]
    pub fn get(&self) -> Option<NonNull<u8>> {
        self.payload
    }

    /// Disarms the guard and returns the address; the caller now owns the
    /// reference.
    #[must_use = "the returned reference must be released"]
    pub fn take(&mut self) -> Option<NonNull<u8>> {
        self.payload.take()
    }

    /// Releases the current reference now and leaves the guard empty.
    pub fn release(&mut self) {
        if let Some(payload) = self.payload.take() {
            // SAFETY: the guard owned exactly this reference.
            unsafe { release(payload.as_ptr()) };
        }
    }

    /// Releases the current reference and guards `payload` instead.
    ///
    /// # Safety
    ///
    /// Same contract as [`ScopedPtr::new`].
    pub unsafe fn reset(&mut self, payload: *mut u8) {
        self.release();
        self.payload = NonNull::new(payload);
    }
}

impl Drop for ScopedPtr {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for ScopedPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ScopedPtr").field(&self.payload).finish()
    }
}
