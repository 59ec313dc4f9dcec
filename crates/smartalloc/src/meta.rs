//! Array descriptor and read-only accessors.
//!
//! Array allocations store an [`ArrayMeta`] as the first bytes of their
//! attached metadata; caller metadata follows it. The accessors here never
//! fail on a live address: they return `0` or `None` when the information is
//! not there.

use crate::header::{attached_metadata, metadata_len, resolve_header};
use std::mem::size_of;
use std::ptr::NonNull;

/// Element count and element size of an array allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct ArrayMeta {
    /// Number of elements.
    pub element_count: usize,
    /// Size of one element in bytes.
    pub element_size: usize,
}

impl ArrayMeta {
    /// The descriptor as raw bytes, as stored in the block.
    pub(crate) fn as_bytes(&self) -> &[u8] {
        // SAFETY: ArrayMeta is two usizes with no padding, so every byte is
        // initialized.
        unsafe {
            std::slice::from_raw_parts(std::ptr::from_ref(self).cast::<u8>(), size_of::<Self>())
        }
    }
}

/// The array descriptor, if the allocation was created as an array.
///
/// # Safety
///
/// `payload` must be a live address returned by the allocation engine.
pub unsafe fn array_meta(payload: NonNull<u8>) -> Option<ArrayMeta> {
    // SAFETY: forwarded caller contract.
    unsafe {
        if !resolve_header(payload).kind().is_array() {
            return None;
        }
        let meta = attached_metadata(payload)?;
        Some(meta.cast::<ArrayMeta>().as_ptr().read())
    }
}

/// Number of elements of an array allocation; `0` for scalars.
///
/// # Safety
///
/// `payload` must be a live address returned by the allocation engine.
pub unsafe fn array_length(payload: NonNull<u8>) -> usize {
    // SAFETY: forwarded caller contract.
    unsafe { array_meta(payload) }.map_or(0, |meta| meta.element_count)
}

/// Element size of an array allocation; `0` for scalars.
///
/// # Safety
///
/// `payload` must be a live address returned by the allocation engine.
pub unsafe fn element_size(payload: NonNull<u8>) -> usize {
    // SAFETY: forwarded caller contract.
    unsafe { array_meta(payload) }.map_or(0, |meta| meta.element_size)
}

/// The caller-supplied metadata.
///
/// For arrays this is the region after the descriptor, `None` if the caller
/// attached nothing. For scalars it is the whole attached metadata region.
///
/// # Safety
///
/// `payload` must be a live address returned by the allocation engine.
pub unsafe fn user_metadata(payload: NonNull<u8>) -> Option<NonNull<u8>> {
    // SAFETY: forwarded caller contract.
    unsafe {
        let meta = attached_metadata(payload)?;
        if !resolve_header(payload).kind().is_array() {
            return Some(meta);
        }
        if metadata_len(payload) == size_of::<ArrayMeta>() {
            return None;
        }
        NonNull::new(meta.as_ptr().add(size_of::<ArrayMeta>()))
    }
}
