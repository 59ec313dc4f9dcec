//! Array smart pointers.
//!
//! Both types store their elements in an array-kind allocation, so the
//! element count and size live in the block's array descriptor and the drop
//! glue runs once per element on release.

use crate::Result;
use crate::header::Ownership;
use crate::meta::{array_length, element_size, user_metadata};
use crate::refcount::{discard, promote_to_shared, ref_count, release, share};
use crate::typed::new_array;
use smartalloc_log::warn;
use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

fn collect<T>(len: usize, f: impl FnMut(usize) -> T) -> Vec<T> {
    (0..len).map(f).collect()
}

/// A slice in a unique-kind array allocation.
///
/// ```
/// use smartalloc::UniqueArray;
///
/// let mut squares = UniqueArray::from_fn(4, |i| i * i).unwrap();
/// squares[0] = 100;
/// assert_eq!(&*squares, &[100, 1, 4, 9]);
/// ```
pub struct UniqueArray<T> {
    ptr: NonNull<T>,
    _owns: PhantomData<[T]>,
}

impl<T> UniqueArray<T> {
    /// Moves the elements of `values` into a new allocation.
    ///
    /// # Errors
    ///
    /// Fails on allocation failure, on an empty `values`, or when `T` is
    /// zero-sized or over-aligned.
    pub fn from_vec(values: Vec<T>) -> Result<Self> {
        Self::with_metadata(values, &[])
    }

    /// Builds `len` elements with `f`.
    ///
    /// # Errors
    ///
    /// Same as [`UniqueArray::from_vec`].
    pub fn from_fn(len: usize, f: impl FnMut(usize) -> T) -> Result<Self> {
        Self::from_vec(collect(len, f))
    }

    /// Like [`UniqueArray::from_vec`], attaching `metadata` after the array
    /// descriptor.
    ///
    /// # Errors
    ///
    /// Same as [`UniqueArray::from_vec`].
    pub fn with_metadata(values: Vec<T>, metadata: &[u8]) -> Result<Self> {
        Ok(UniqueArray {
            ptr: new_array(Ownership::Unique, values, metadata)?,
            _owns: PhantomData,
        })
    }

    /// Number of elements, read from the array descriptor.
    #[must_use]
    pub fn len(&self) -> usize {
        // SAFETY: self.ptr is a live array allocation.
        unsafe { array_length(self.ptr.cast()) }
    }

    /// Always `false`: empty arrays cannot be allocated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element size recorded in the array descriptor.
    #[must_use]
    pub fn element_size(&self) -> usize {
        // SAFETY: self.ptr is a live array allocation.
        unsafe { element_size(self.ptr.cast()) }
    }

    /// Address of the caller metadata, if any was supplied.
    #[must_use]
    pub fn metadata_ptr(&self) -> Option<NonNull<u8>> {
        // SAFETY: self.ptr is a live payload address.
        unsafe { user_metadata(self.ptr.cast()) }
    }

    /// Moves the elements into a new shared array allocation.
    ///
    /// # Errors
    ///
    /// Gives `self` back unchanged if the new allocation fails.
    pub fn into_shared(self) -> std::result::Result<SharedArray<T>, Self> {
        let payload = self.ptr.cast::<u8>();

        // SAFETY: payload is a live unique array; its size comes from the
        // descriptor.
        match unsafe { promote_to_shared(payload, 0) } {
            Ok(promoted) => {
                mem::forget(self);
                // SAFETY: elements were moved bitwise into `promoted`.
                unsafe { discard(payload) };
                Ok(SharedArray {
                    ptr: promoted.cast(),
                    _owns: PhantomData,
                })
            }
            Err(err) => {
                warn!("array promotion to shared failed: {err}");
                Err(self)
            }
        }
    }
}

impl<T> Deref for UniqueArray<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        // SAFETY: the payload holds len() initialized elements.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len()) }
    }
}

impl<T> DerefMut for UniqueArray<T> {
    fn deref_mut(&mut self) -> &mut [T] {
        // SAFETY: unique ownership gives exclusive access to len() elements.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len()) }
    }
}

impl<T> Drop for UniqueArray<T> {
    fn drop(&mut self) {
        // SAFETY: self owns the only reference.
        unsafe { release(self.ptr.as_ptr().cast()) }
    }
}

impl<T: fmt::Debug> fmt::Debug for UniqueArray<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("UniqueArray").field(&&**self).finish()
    }
}

// SAFETY: UniqueArray<T> owns its elements like Box<[T]>.
unsafe impl<T: Send> Send for UniqueArray<T> {}

// SAFETY: shared access only hands out &[T].
unsafe impl<T: Sync> Sync for UniqueArray<T> {}

/// A slice in a shared-kind array allocation.
///
/// ```
/// use smartalloc::SharedArray;
///
/// let names = SharedArray::from_vec(vec!["a".to_string(), "b".to_string()]).unwrap();
/// let other = names.clone();
/// assert_eq!(other.len(), 2);
/// assert_eq!(names.ref_count(), 2);
/// ```
pub struct SharedArray<T> {
    ptr: NonNull<T>,
    _owns: PhantomData<[T]>,
}

impl<T> SharedArray<T> {
    /// Moves the elements of `values` into a new allocation.
    ///
    /// # Errors
    ///
    /// Fails on allocation failure, on an empty `values`, or when `T` is
    /// zero-sized or over-aligned.
    pub fn from_vec(values: Vec<T>) -> Result<Self> {
        Self::with_metadata(values, &[])
    }

    /// Builds `len` elements with `f`.
    ///
    /// # Errors
    ///
    /// Same as [`SharedArray::from_vec`].
    pub fn from_fn(len: usize, f: impl FnMut(usize) -> T) -> Result<Self> {
        Self::from_vec(collect(len, f))
    }

    /// Like [`SharedArray::from_vec`], attaching `metadata` after the array
    /// descriptor.
    ///
    /// # Errors
    ///
    /// Same as [`SharedArray::from_vec`].
    pub fn with_metadata(values: Vec<T>, metadata: &[u8]) -> Result<Self> {
        Ok(SharedArray {
            ptr: new_array(Ownership::Shared, values, metadata)?,
            _owns: PhantomData,
        })
    }

    /// Number of elements, read from the array descriptor.
    #[must_use]
    pub fn len(&self) -> usize {
        // SAFETY: self.ptr is a live array allocation.
        unsafe { array_length(self.ptr.cast()) }
    }

    /// Always `false`: empty arrays cannot be allocated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element size recorded in the array descriptor.
    #[must_use]
    pub fn element_size(&self) -> usize {
        // SAFETY: self.ptr is a live array allocation.
        unsafe { element_size(self.ptr.cast()) }
    }

    /// Address of the caller metadata, if any was supplied.
    #[must_use]
    pub fn metadata_ptr(&self) -> Option<NonNull<u8>> {
        // SAFETY: self.ptr is a live payload address.
        unsafe { user_metadata(self.ptr.cast()) }
    }

    /// Current number of holders. May be stale under concurrent use.
    #[must_use]
    pub fn ref_count(&self) -> usize {
        // SAFETY: self.ptr is a live shared allocation.
        unsafe { ref_count(self.ptr.cast()) }.unwrap_or_default()
    }

    /// Whether both arrays refer to the same allocation.
    #[must_use]
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.ptr == other.ptr
    }
}

impl<T> Clone for SharedArray<T> {
    fn clone(&self) -> Self {
        // SAFETY: self holds a reference, so the allocation is live.
        unsafe { share(self.ptr.cast()) };
        SharedArray {
            ptr: self.ptr,
            _owns: PhantomData,
        }
    }
}

impl<T> Deref for SharedArray<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        // SAFETY: the elements live until the last reference is released.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len()) }
    }
}

impl<T> Drop for SharedArray<T> {
    fn drop(&mut self) {
        // SAFETY: self owns exactly one reference.
        unsafe { release(self.ptr.as_ptr().cast()) }
    }
}

impl<T: fmt::Debug> fmt::Debug for SharedArray<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedArray")
            .field("elements", &&**self)
            .field("ref_count", &self.ref_count())
            .finish()
    }
}

// SAFETY: same reasoning as Shared<T>.
unsafe impl<T: Send + Sync> Send for SharedArray<T> {}

// SAFETY: same reasoning as Shared<T>.
unsafe impl<T: Send + Sync> Sync for SharedArray<T> {}
