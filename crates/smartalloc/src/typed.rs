//! Glue between Rust values and the raw allocation engine.

use crate::header::{Ownership, WORD};
use crate::smalloc::{AllocRequest, allocate};
use crate::{Destructor, Error, Result};
use std::mem::{self, ManuallyDrop};
use std::ptr::{self, NonNull};

/// Destructor that runs the drop glue of one `T`.
unsafe fn drop_element<T>(element: NonNull<u8>, _metadata: Option<NonNull<u8>>) {
    // SAFETY: the typed layer only registers this for payloads holding
    // initialized `T`s, and the engine calls it once per element.
    unsafe { ptr::drop_in_place(element.cast::<T>().as_ptr()) }
}

/// The destructor to register for `T`, if it has drop glue.
pub(crate) fn destructor_for<T>() -> Option<Destructor> {
    mem::needs_drop::<T>().then_some(drop_element::<T> as Destructor)
}

/// Rejects types the block layout cannot hold.
pub(crate) const fn check_layout<T>() -> Result<()> {
    if mem::align_of::<T>() > WORD {
        return Err(Error::InvalidAlignment {
            alignment: mem::align_of::<T>(),
        });
    }
    if mem::size_of::<T>() == 0 {
        return Err(Error::ZeroSize);
    }
    Ok(())
}

/// Allocates a scalar and moves `value` into it.
pub(crate) fn new_scalar<T>(ownership: Ownership, value: T, metadata: &[u8]) -> Result<NonNull<T>> {
    check_layout::<T>()?;

    let mut request = AllocRequest::scalar(ownership, mem::size_of::<T>()).with_metadata(metadata);
    request.destructor = destructor_for::<T>();

    let payload = allocate(&request)?.cast::<T>();
    // SAFETY: payload is word aligned (and T needs no more) with room for one T.
    unsafe { payload.as_ptr().write(value) };
    Ok(payload)
}

/// Allocates an array and moves the elements of `values` into it.
pub(crate) fn new_array<T>(
    ownership: Ownership,
    values: Vec<T>,
    metadata: &[u8],
) -> Result<NonNull<T>> {
    check_layout::<T>()?;
    // A zero count would describe a scalar.
    if values.is_empty() {
        return Err(Error::ZeroSize);
    }

    let mut values = ManuallyDrop::new(values);
    let mut request = AllocRequest::array(ownership, mem::size_of::<T>(), values.len())
        .with_metadata(metadata);
    request.destructor = destructor_for::<T>();

    let payload = match allocate(&request) {
        Ok(payload) => payload.cast::<T>(),
        Err(err) => {
            // SAFETY: the Vec was never touched.
            unsafe { ManuallyDrop::drop(&mut values) };
            return Err(err);
        }
    };

    // SAFETY: the payload has room for `len` elements and does not overlap
    // the Vec's buffer. Setting the length to zero afterwards hands the
    // elements over without dropping them twice.
    unsafe {
        ptr::copy_nonoverlapping(values.as_ptr(), payload.as_ptr(), values.len());
        values.set_len(0);
        ManuallyDrop::drop(&mut values);
    }
    Ok(payload)
}
