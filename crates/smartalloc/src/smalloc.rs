//! The allocation engine.
//!
//! [`allocate`] makes exactly one request to the allocator seam per
//! allocation, writes the header, copies the attached metadata and the
//! back-offset word, and returns the payload address. The payload itself is
//! left uninitialized.

use crate::allocator::allocate_block;
use crate::header::{Header, Kind, Ownership, SharedHeader, WORD, align_word, header_size};
use crate::meta::ArrayMeta;
use crate::{Destructor, Error, Result};
use smartalloc_log::{trace, warn};
use std::mem::size_of;
use std::ptr::{self, NonNull};
use std::sync::atomic::AtomicUsize;

/// Parameters of a single allocation.
///
/// An `element_count` of zero describes a scalar of `element_size` bytes;
/// anything else describes an array and gets an [`ArrayMeta`] descriptor
/// placed in front of the caller's metadata.
///
/// ```
/// use smartalloc::{AllocRequest, Ownership, allocate, release};
///
/// let request = AllocRequest::array(Ownership::Shared, 4, 16).with_metadata(b"tag");
/// let payload = allocate(&request).unwrap();
/// unsafe {
///     assert_eq!(smartalloc::array_length(payload), 16);
///     release(payload.as_ptr());
/// }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct AllocRequest<'a> {
    /// Unique or shared ownership.
    pub ownership: Ownership,
    /// Size of one element, or of the whole scalar.
    pub element_size: usize,
    /// Number of elements; zero for scalars.
    pub element_count: usize,
    /// Invoked once per element on final release.
    pub destructor: Option<Destructor>,
    /// Bytes copied into the attached metadata region.
    pub metadata: &'a [u8],
}

impl<'a> AllocRequest<'a> {
    /// A scalar payload of `size` bytes.
    #[must_use]
    pub const fn scalar(ownership: Ownership, size: usize) -> Self {
        AllocRequest {
            ownership,
            element_size: size,
            element_count: 0,
            destructor: None,
            metadata: &[],
        }
    }

    /// An array of `count` elements of `element_size` bytes each.
    ///
    /// A `count` of zero yields a plain scalar of `element_size` bytes with
    /// no array descriptor, the same request as [`AllocRequest::scalar`].
    #[must_use]
    pub const fn array(ownership: Ownership, element_size: usize, count: usize) -> Self {
        AllocRequest {
            ownership,
            element_size,
            element_count: count,
            destructor: None,
            metadata: &[],
        }
    }

    /// Registers a destructor.
    #[must_use]
    pub const fn with_destructor(mut self, destructor: Destructor) -> Self {
        self.destructor = Some(destructor);
        self
    }

    /// Attaches metadata bytes.
    #[must_use]
    pub const fn with_metadata(mut self, metadata: &'a [u8]) -> Self {
        self.metadata = metadata;
        self
    }

    /// `true` when this request describes an array.
    #[must_use]
    pub const fn is_array(&self) -> bool {
        self.element_count != 0
    }

    /// The kind the resulting allocation will carry.
    #[must_use]
    pub const fn kind(&self) -> Kind {
        Kind::new(self.ownership, self.is_array())
    }

    /// Total payload size in bytes, `None` on overflow.
    #[must_use]
    pub const fn payload_size(&self) -> Option<usize> {
        if self.is_array() {
            self.element_size.checked_mul(self.element_count)
        } else {
            Some(self.element_size)
        }
    }
}

/// Creates an allocation described by `request`.
///
/// # Errors
///
/// - [`Error::ZeroSize`] if the payload would be empty, for every kind.
/// - [`Error::SizeOverflow`] if the block size does not fit in `usize`.
/// - [`Error::OutOfMemory`] if the allocator seam returns null.
///
/// No state is left behind on error.
pub fn allocate(request: &AllocRequest<'_>) -> Result<NonNull<u8>> {
    let payload_size = request.payload_size().ok_or(Error::SizeOverflow)?;

    if request.is_array() {
        let descriptor = ArrayMeta {
            element_count: request.element_count,
            element_size: request.element_size,
        };
        allocate_parts(
            request.kind(),
            payload_size,
            request.destructor,
            &[descriptor.as_bytes(), request.metadata],
        )
    } else {
        allocate_parts(
            request.kind(),
            payload_size,
            request.destructor,
            &[request.metadata],
        )
    }
}

/// Core of [`allocate`]: the metadata region is the concatenation of
/// `metadata`, padded with zeroes to a word boundary.
pub(crate) fn allocate_parts(
    kind: Kind,
    payload_size: usize,
    destructor: Option<Destructor>,
    metadata: &[&[u8]],
) -> Result<NonNull<u8>> {
    if payload_size == 0 {
        return Err(Error::ZeroSize);
    }

    let head = header_size(kind);
    let raw_meta = metadata
        .iter()
        .try_fold(0usize, |acc, part| acc.checked_add(part.len()))
        .ok_or(Error::SizeOverflow)?;
    let meta_size = align_word(raw_meta).ok_or(Error::SizeOverflow)?;
    let body_size = align_word(payload_size).ok_or(Error::SizeOverflow)?;

    let offset = head.checked_add(meta_size).ok_or(Error::SizeOverflow)?;
    let total = offset
        .checked_add(WORD)
        .and_then(|size| size.checked_add(body_size))
        .ok_or(Error::SizeOverflow)?;

    let Some(block) = NonNull::new(allocate_block(total)) else {
        warn!("allocator seam failed to provide {total} bytes");
        return Err(Error::OutOfMemory { size: total });
    };
    debug_assert_eq!(block.as_ptr() as usize % WORD, 0, "allocator returned a misaligned block");

    // SAFETY: `block` is a fresh, word-aligned region of `total` bytes. Every
    // write below stays within [block, block + total): the metadata fills
    // [head, head + meta_size), the back-offset word fills
    // [offset, offset + WORD) and the payload starts at offset + WORD.
    unsafe {
        let mut cursor = block.as_ptr().add(head);
        for part in metadata {
            ptr::copy_nonoverlapping(part.as_ptr(), cursor, part.len());
            cursor = cursor.add(part.len());
        }
        cursor.write_bytes(0, meta_size - raw_meta);

        let back_offset = block.as_ptr().add(offset).cast::<usize>();
        back_offset.write(offset);
        let payload = back_offset.add(1).cast::<u8>();

        let header = Header {
            kind,
            destructor,
            #[cfg(debug_assertions)]
            payload,
        };
        if kind.is_shared() {
            block.cast::<SharedHeader>().as_ptr().write(SharedHeader {
                base: header,
                ref_count: AtomicUsize::new(1),
            });
        } else {
            block.cast::<Header>().as_ptr().write(header);
        }

        trace!(
            "allocated {kind:?}: {payload_size} payload bytes, {raw_meta} metadata bytes, {total} total at {payload:p}"
        );
        Ok(NonNull::new_unchecked(payload))
    }
}

// The descriptor is copied in as raw bytes.
const _: () = assert!(size_of::<ArrayMeta>() % WORD == 0);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{attached_metadata, back_offset, metadata_len, resolve_header};
    use crate::refcount::release;

    #[test]
    fn test_zero_size_fails_for_every_kind() {
        for ownership in [Ownership::Unique, Ownership::Shared] {
            assert_eq!(allocate(&AllocRequest::scalar(ownership, 0)), Err(Error::ZeroSize));
            assert_eq!(allocate(&AllocRequest::array(ownership, 0, 8)), Err(Error::ZeroSize));
        }
    }

    #[test]
    fn test_zero_count_array_is_scalar() {
        let request = AllocRequest::array(Ownership::Unique, 8, 0);
        assert!(!request.is_array());
        assert_eq!(request.kind(), Kind::UNIQUE);
        assert_eq!(request.payload_size(), Some(8));

        let payload = allocate(&request).unwrap();
        // SAFETY: payload is live until the release below.
        unsafe {
            assert_eq!(resolve_header(payload).kind(), Kind::UNIQUE);
            assert_eq!(back_offset(payload), header_size(Kind::UNIQUE));
            assert_eq!(crate::array_length(payload), 0);
            assert_eq!(crate::array_meta(payload), None);
            release(payload.as_ptr());
        }
    }

    #[test]
    fn test_array_size_overflow() {
        let request = AllocRequest::array(Ownership::Unique, usize::MAX / 2, 3);
        assert_eq!(allocate(&request), Err(Error::SizeOverflow));

        let request = AllocRequest::scalar(Ownership::Shared, usize::MAX - 2);
        assert_eq!(allocate(&request), Err(Error::SizeOverflow));
    }

    #[test]
    fn test_payload_is_word_aligned_and_writable() {
        for size in [1, 3, 8, 13, 64, 1000] {
            let payload = allocate(&AllocRequest::scalar(Ownership::Unique, size)).unwrap();
            assert_eq!(payload.as_ptr() as usize % WORD, 0);
            // SAFETY: payload has `size` writable bytes.
            unsafe {
                payload.as_ptr().write_bytes(0xCD, size);
                release(payload.as_ptr());
            }
        }
    }

    #[test]
    fn test_back_offset_matches_header_size() {
        let unique = allocate(&AllocRequest::scalar(Ownership::Unique, 4)).unwrap();
        let shared = allocate(&AllocRequest::scalar(Ownership::Shared, 4)).unwrap();

        // SAFETY: both addresses are live.
        unsafe {
            assert_eq!(back_offset(unique), header_size(Kind::UNIQUE));
            assert_eq!(back_offset(shared), header_size(Kind::SHARED));
            assert!(matches!(resolve_header(unique), crate::header::HeaderRef::Unique(_)));
            assert!(matches!(resolve_header(shared), crate::header::HeaderRef::Shared(_)));
            assert_eq!(attached_metadata(unique), None);
            assert_eq!(attached_metadata(shared), None);
            release(unique.as_ptr());
            release(shared.as_ptr());
        }
    }

    #[test]
    fn test_metadata_region_is_padded() {
        let request = AllocRequest::scalar(Ownership::Unique, 8).with_metadata(&[1, 2, 3]);
        let payload = allocate(&request).unwrap();

        // SAFETY: payload is live; the metadata region is metadata_len bytes.
        unsafe {
            let len = metadata_len(payload);
            assert_eq!(len, WORD);
            let meta = attached_metadata(payload).unwrap();
            let bytes = std::slice::from_raw_parts(meta.as_ptr(), len);
            assert_eq!(&bytes[..3], &[1, 2, 3]);
            assert!(bytes[3..].iter().all(|&b| b == 0));
            release(payload.as_ptr());
        }
    }

    #[test]
    fn test_array_descriptor_precedes_user_metadata() {
        let request = AllocRequest::array(Ownership::Unique, 2, 5).with_metadata(&[9; 10]);
        let payload = allocate(&request).unwrap();

        // SAFETY: payload is live.
        unsafe {
            assert_eq!(
                metadata_len(payload),
                size_of::<ArrayMeta>() + align_word(10).unwrap()
            );
            let header = resolve_header(payload);
            assert_eq!(header.kind(), Kind::UNIQUE.array());
            release(payload.as_ptr());
        }
    }

    #[cfg(debug_assertions)]
    #[test]
    fn test_debug_back_pointer_round_trip() {
        for ownership in [Ownership::Unique, Ownership::Shared] {
            let payload = allocate(&AllocRequest::scalar(ownership, 24)).unwrap();
            // SAFETY: payload is live.
            unsafe {
                let header = resolve_header(payload);
                assert_eq!(header.prefix().as_ref().payload, payload.as_ptr());
                release(payload.as_ptr());
            }
        }
    }
}
