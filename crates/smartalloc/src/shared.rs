//! Reference-counted smart pointer.

use crate::Result;
use crate::header::{Ownership, WORD};
use crate::meta::user_metadata;
use crate::refcount::{ref_count, release, share};
use crate::typed::new_scalar;
use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::ops::Deref;
use std::ptr::NonNull;

/// A value in a shared-kind allocation.
///
/// Cloning shares the allocation (atomic increment); dropping releases one
/// reference and destroys the value with the last one.
///
/// # Thread Safety
///
/// `Shared<T>` is `Send + Sync` when `T` is, since every holder can reach
/// the value through `&T` and the last holder on any thread drops it.
///
/// ```
/// use smartalloc::Shared;
///
/// let a = Shared::new(vec![1, 2, 3]).unwrap();
/// let b = a.clone();
/// assert_eq!(a.ref_count(), 2);
/// assert!(Shared::ptr_eq(&a, &b));
/// ```
pub struct Shared<T> {
    ptr: NonNull<T>,
    _owns: PhantomData<T>,
}

impl<T> Shared<T> {
    /// Moves `value` into a new shared allocation with a count of one.
    ///
    /// # Errors
    ///
    /// Fails on allocation failure or when `T` is zero-sized or over-aligned.
    pub fn new(value: T) -> Result<Self> {
        Self::with_metadata(value, &[])
    }

    /// Moves `value` into a new shared allocation carrying `metadata`.
    ///
    /// # Errors
    ///
    /// Same as [`Shared::new`].
    pub fn with_metadata(value: T, metadata: &[u8]) -> Result<Self> {
        Ok(Shared {
            ptr: new_scalar(Ownership::Shared, value, metadata)?,
            _owns: PhantomData,
        })
    }

    /// Current number of holders. May be stale under concurrent use.
    #[must_use]
    pub fn ref_count(&self) -> usize {
        // SAFETY: self.ptr is a live shared allocation.
        unsafe { ref_count(self.ptr.cast()) }.unwrap_or_default()
    }

    /// Whether both pointers refer to the same allocation.
    #[must_use]
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.ptr == other.ptr
    }

    /// Address of the attached metadata, if any was supplied.
    #[must_use]
    pub fn metadata_ptr(&self) -> Option<NonNull<u8>> {
        // SAFETY: self.ptr is a live payload address.
        unsafe { user_metadata(self.ptr.cast()) }
    }

    /// Raw pointer to the value.
    #[must_use]
    pub fn as_ptr(&self) -> *const T {
        self.ptr.as_ptr()
    }

    /// Gives up this reference without releasing it.
    #[must_use = "the returned reference must be released"]
    pub fn into_raw(self) -> NonNull<T> {
        let ptr = self.ptr;
        mem::forget(self);
        ptr
    }

    /// Retakes one reference produced by [`Shared::into_raw`] or by the raw
    /// `share` function.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live shared allocation holding a `T`, and the caller
    /// must own the reference being transferred.
    pub unsafe fn from_raw(ptr: NonNull<T>) -> Self {
        debug_assert_eq!(ptr.as_ptr() as usize % WORD, 0);
        Shared {
            ptr,
            _owns: PhantomData,
        }
    }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        // SAFETY: self holds a reference, so the allocation is live.
        unsafe { share(self.ptr.cast()) };
        Shared {
            ptr: self.ptr,
            _owns: PhantomData,
        }
    }
}

impl<T> Deref for Shared<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the value lives until the last reference is released.
        unsafe { self.ptr.as_ref() }
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        // SAFETY: self owns exactly one reference.
        unsafe { release(self.ptr.as_ptr().cast()) }
    }
}

impl<T> PartialEq for Shared<T> {
    fn eq(&self, other: &Self) -> bool {
        Shared::ptr_eq(self, other)
    }
}

impl<T> Eq for Shared<T> {}

impl<T: fmt::Debug> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("value", &**self)
            .field("ref_count", &self.ref_count())
            .finish()
    }
}

// SAFETY: holders on different threads only reach the value through &T and
// the final drop may happen on any thread.
unsafe impl<T: Send + Sync> Send for Shared<T> {}

// SAFETY: see above.
unsafe impl<T: Send + Sync> Sync for Shared<T> {}
