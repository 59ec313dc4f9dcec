//! Single-owner smart pointer.

use crate::Result;
use crate::header::{Ownership, WORD};
use crate::meta::user_metadata;
use crate::refcount::{discard, promote_to_shared, release};
use crate::shared::Shared;
use crate::typed::new_scalar;
use smartalloc_log::warn;
use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

/// A value in a unique-kind allocation.
///
/// Dropping a `Unique` runs the value's destructor and frees the block.
/// Types aligned to more than a machine word and zero-sized types are
/// rejected at construction.
///
/// ```
/// use smartalloc::Unique;
///
/// let mut name = Unique::new(String::from("header")).unwrap();
/// name.push_str("-v2");
/// assert_eq!(*name, "header-v2");
/// ```
pub struct Unique<T> {
    ptr: NonNull<T>,
    _owns: PhantomData<T>,
}

impl<T> Unique<T> {
    /// Moves `value` into a new unique allocation.
    ///
    /// # Errors
    ///
    /// Fails on allocation failure or when `T` is zero-sized or over-aligned.
    pub fn new(value: T) -> Result<Self> {
        Self::with_metadata(value, &[])
    }

    /// Moves `value` into a new unique allocation carrying `metadata`.
    ///
    /// # Errors
    ///
    /// Same as [`Unique::new`].
    pub fn with_metadata(value: T, metadata: &[u8]) -> Result<Self> {
        Ok(Unique {
            ptr: new_scalar(Ownership::Unique, value, metadata)?,
            _owns: PhantomData,
        })
    }

    /// Address of the attached metadata, if any was supplied.
    #[must_use]
    pub fn metadata_ptr(&self) -> Option<NonNull<u8>> {
        // SAFETY: self.ptr is a live payload address.
        unsafe { user_metadata(self.ptr.cast()) }
    }

    /// Moves the value into a new shared allocation with the same metadata.
    ///
    /// The old block is freed without dropping the value, which now lives in
    /// the returned `Shared`.
    ///
    /// # Errors
    ///
    /// Gives `self` back unchanged if the new allocation fails.
    pub fn into_shared(self) -> std::result::Result<Shared<T>, Self> {
        let payload = self.ptr.cast::<u8>();

        // SAFETY: payload is a live unique allocation of size_of::<T>() bytes.
        match unsafe { promote_to_shared(payload, mem::size_of::<T>()) } {
            Ok(promoted) => {
                mem::forget(self);
                // SAFETY: the value was copied out bitwise; the old block
                // must be freed without running its drop glue.
                unsafe {
                    discard(payload);
                    Ok(Shared::from_raw(promoted.cast()))
                }
            }
            Err(err) => {
                warn!("promotion to shared failed: {err}");
                Err(self)
            }
        }
    }

    /// Raw pointer to the value.
    #[must_use]
    pub fn as_ptr(&self) -> *mut T {
        self.ptr.as_ptr()
    }

    /// Gives up ownership and returns the payload address.
    #[must_use = "the returned pointer must be released"]
    pub fn into_raw(self) -> NonNull<T> {
        let ptr = self.ptr;
        mem::forget(self);
        ptr
    }

    /// Retakes ownership of an address produced by [`Unique::into_raw`].
    ///
    /// # Safety
    ///
    /// `ptr` must come from `Unique::<T>::into_raw` and must not be owned by
    /// anything else.
    pub unsafe fn from_raw(ptr: NonNull<T>) -> Self {
        debug_assert_eq!(ptr.as_ptr() as usize % WORD, 0);
        Unique {
            ptr,
            _owns: PhantomData,
        }
    }
}

impl<T> Deref for Unique<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the payload holds an initialized T for as long as self lives.
        unsafe { self.ptr.as_ref() }
    }
}

impl<T> DerefMut for Unique<T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: unique ownership gives exclusive access.
        unsafe { self.ptr.as_mut() }
    }
}

impl<T> Drop for Unique<T> {
    fn drop(&mut self) {
        // SAFETY: self owns the only reference.
        unsafe { release(self.ptr.as_ptr().cast()) }
    }
}

impl<T: fmt::Debug> fmt::Debug for Unique<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Unique").field(&**self).finish()
    }
}

// SAFETY: Unique<T> owns its T exactly like Box<T>.
unsafe impl<T: Send> Send for Unique<T> {}

// SAFETY: shared access to Unique<T> only hands out &T.
unsafe impl<T: Sync> Sync for Unique<T> {}
