//! Reference lifecycle: share, release, promotion.
//!
//! # Thread Safety
//!
//! The reference count of a shared allocation is the only state mutated
//! after creation. It is updated with atomic read-modify-write operations
//! (`AcqRel` on success), so concurrent `share`/`release` calls on the same
//! allocation never lose updates and the thread that drops the count to zero
//! observes every write made by the other holders.
//!
//! Destructors run without any lock held.

use crate::allocator::deallocate_block;
use crate::header::{
    HeaderRef, Kind, Ownership, SharedHeader, attached_metadata, metadata_len, resolve_header,
};
use crate::meta::{ArrayMeta, array_meta};
use crate::smalloc::allocate_parts;
use crate::{Destructor, Result};
use smartalloc_log::{error, trace};
use std::ptr::{self, NonNull};
use std::sync::atomic::Ordering;

#[cold]
#[inline(never)]
fn abort_on_violation(what: &str, payload: NonNull<u8>) -> ! {
    error!("{what} on {:p}; aborting", payload.as_ptr());

    #[cfg(feature = "abort_backtrace")]
    error!("{:?}", backtrace::Backtrace::new());

    std::process::abort()
}

impl SharedHeader {
    /// Increments the count, returning the new value. `None` on overflow.
    #[inline]
    fn increment(&self) -> Option<usize> {
        self.ref_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| count.checked_add(1))
            .ok()
            .map(|old| old + 1)
    }

    /// Decrements the count, returning the new value. `None` if it was
    /// already zero.
    #[inline]
    fn decrement(&self) -> Option<usize> {
        self.ref_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| count.checked_sub(1))
            .ok()
            .map(|old| old - 1)
    }
}

/// Adds a holder to a shared allocation and returns the same address.
///
/// Aborts the process if the count would overflow.
///
/// # Safety
///
/// `payload` must be a live shared allocation returned by the allocation
/// engine. Passing a unique allocation panics.
pub unsafe fn share(payload: NonNull<u8>) -> NonNull<u8> {
    // SAFETY: forwarded caller contract.
    let header = unsafe { resolve_header(payload) };
    let HeaderRef::Shared(shared) = header else {
        panic!("share called on a unique allocation");
    };

    // SAFETY: the header is live for as long as the caller holds a reference.
    match unsafe { shared.as_ref() }.increment() {
        Some(count) => {
            trace!("shared {:p}, count now {count}", payload.as_ptr());
            payload
        }
        None => abort_on_violation("reference count overflow", payload),
    }
}

/// Drops one holder of the allocation at `payload`.
///
/// A null `payload` is ignored. Unique allocations are always destroyed;
/// shared ones only when the count reaches zero. Destruction runs the
/// destructor (once per element for arrays, each call receiving that
/// element's address and the attached metadata address), then hands the
/// block back to the allocator seam. A destructor that panics does not stop
/// the remaining elements from being destructed or the block from being
/// freed.
///
/// # Safety
///
/// `payload` must be null or a live address returned by the allocation
/// engine, and the caller must own the reference it gives up.
pub unsafe fn release(payload: *mut u8) {
    let Some(payload) = NonNull::new(payload) else {
        return;
    };

    // SAFETY: forwarded caller contract.
    let header = unsafe { resolve_header(payload) };

    if let HeaderRef::Shared(shared) = header {
        // SAFETY: the caller still holds one reference.
        match unsafe { shared.as_ref() }.decrement() {
            Some(0) => {}
            Some(count) => {
                trace!("released {:p}, count now {count}", payload.as_ptr());
                return;
            }
            None => abort_on_violation("release of an allocation with a zero count", payload),
        }
    }

    // SAFETY: no other holder remains.
    unsafe { destroy(payload, header) }
}

/// Destructor calls still owed to a dying allocation, plus its block.
///
/// Dropping it finishes the remaining calls and frees the block, so a
/// destructor that panics midway through an array does not leak the rest.
struct Teardown {
    destructor: Option<Destructor>,
    payload: NonNull<u8>,
    metadata: Option<NonNull<u8>>,
    element_size: usize,
    next: usize,
    count: usize,
    block: *mut u8,
}

impl Teardown {
    /// Runs the outstanding destructor calls in element order.
    ///
    /// # Safety
    ///
    /// The block must still be live.
    unsafe fn run(&mut self) {
        let Some(destructor) = self.destructor else {
            return;
        };
        while self.next < self.count {
            let index = self.next;
            self.next += 1;
            // SAFETY: index < count, so the element lies inside the payload.
            unsafe { destructor(self.payload.add(index * self.element_size), self.metadata) };
        }
    }
}

impl Drop for Teardown {
    fn drop(&mut self) {
        // SAFETY: the block is freed exactly once, here, after the last
        // destructor call.
        unsafe {
            self.run();
            deallocate_block(self.block);
        }
    }
}

/// Runs the destructor and frees the block.
///
/// # Safety
///
/// No other reference to the allocation may exist.
unsafe fn destroy(payload: NonNull<u8>, header: HeaderRef) {
    // SAFETY: the block stays live until the teardown is dropped.
    let mut teardown = unsafe {
        let (element_size, count) = match array_meta(payload) {
            Some(ArrayMeta {
                element_count,
                element_size,
            }) => (element_size, element_count),
            None => (0, 1),
        };
        trace!("destroying {:?} at {:p}", header.kind(), payload.as_ptr());
        Teardown {
            destructor: header.destructor(),
            payload,
            metadata: attached_metadata(payload),
            element_size,
            next: 0,
            count,
            block: header.block(),
        }
    };

    // SAFETY: see above.
    unsafe { teardown.run() };
}

/// Frees the block at `payload` without running its destructor.
///
/// The reference count is ignored; this ends the allocation for every
/// holder. Used to retire the source of a [`promote_to_shared`] whose
/// contents were moved.
///
/// # Safety
///
/// `payload` must be a live address returned by the allocation engine with
/// no other holder. Its contents are leaked, not dropped.
pub unsafe fn discard(payload: NonNull<u8>) {
    // SAFETY: forwarded caller contract.
    unsafe {
        let header = resolve_header(payload);
        trace!("discarding {:?} at {:p}", header.kind(), payload.as_ptr());
        deallocate_block(header.block());
    }
}

/// Copies a unique allocation into a new shared one.
///
/// The new allocation has the same destructor and the same attached
/// metadata (array descriptor included). For arrays the whole array is
/// copied and `payload_size` is ignored; for scalars `payload_size` bytes are
/// copied.
///
/// The source is **not** released. It keeps its destructor, so releasing both
/// runs the destructor on both copies; callers that move the contents should
/// end the source with [`discard`].
///
/// # Errors
///
/// Propagates allocation failures; the source is untouched.
///
/// # Safety
///
/// `payload` must be a live unique allocation returned by the allocation
/// engine, and for scalars `payload_size` must not exceed its payload.
/// Debug builds panic on a shared allocation.
pub unsafe fn promote_to_shared(payload: NonNull<u8>, payload_size: usize) -> Result<NonNull<u8>> {
    // SAFETY: forwarded caller contract.
    unsafe {
        let header = resolve_header(payload);
        let kind = header.kind();
        debug_assert!(kind.is_unique(), "promote_to_shared called on a shared allocation");

        let size = match array_meta(payload) {
            Some(meta) => meta.element_count * meta.element_size,
            None => payload_size,
        };
        let metadata = match attached_metadata(payload) {
            Some(meta) => std::slice::from_raw_parts(meta.as_ptr(), metadata_len(payload)),
            None => &[],
        };

        let promoted = allocate_parts(
            Kind::new(Ownership::Shared, kind.is_array()),
            size,
            header.destructor(),
            &[metadata],
        )?;
        ptr::copy_nonoverlapping(payload.as_ptr(), promoted.as_ptr(), size);

        trace!("promoted {:p} to shared {:p}", payload.as_ptr(), promoted.as_ptr());
        Ok(promoted)
    }
}

/// Current reference count of a shared allocation; `None` for unique ones.
///
/// The value may be stale as soon as it is read if other threads hold
/// references.
///
/// # Safety
///
/// `payload` must be a live address returned by the allocation engine.
pub unsafe fn ref_count(payload: NonNull<u8>) -> Option<usize> {
    // SAFETY: forwarded caller contract.
    match unsafe { resolve_header(payload) } {
        HeaderRef::Shared(shared) => {
            // SAFETY: the header is live.
            Some(unsafe { shared.as_ref() }.ref_count.load(Ordering::Acquire))
        }
        HeaderRef::Unique(_) => None,
    }
}

/// Kind recorded for the allocation at `payload`.
///
/// # Safety
///
/// `payload` must be a live address returned by the allocation engine.
pub unsafe fn kind(payload: NonNull<u8>) -> Kind {
    // SAFETY: forwarded caller contract.
    unsafe { resolve_header(payload).kind() }
}
