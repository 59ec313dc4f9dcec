//! Header layout and address translation.
//!
//! An allocation is one block laid out as
//!
//! ```text
//! +-----------------+----------------------+-------------+---------------+
//! | Header or       | attached metadata    | back-offset | payload       |
//! | SharedHeader    | (word aligned)       | (usize)     | (word aligned)|
//! +-----------------+----------------------+-------------+---------------+
//! ^ block start                                          ^ payload address
//! ```
//!
//! The back-offset word holds `header_size + metadata_size`, so the header is
//! found from the payload with a single subtraction whatever its size. Both
//! header variants start with the same [`Header`] prefix, which lets
//! [`resolve_header`] read `kind` before it knows which variant it is looking
//! at.

use crate::Destructor;
use std::mem::size_of;
use std::ptr::NonNull;
use std::sync::atomic::AtomicUsize;

/// Size of a machine word. Every region of a block starts on this boundary.
pub const WORD: usize = size_of::<usize>();

/// Rounds `size` up to a multiple of [`WORD`]; `None` on overflow.
#[inline]
#[must_use]
pub const fn align_word(size: usize) -> Option<usize> {
    match size.checked_add(WORD - 1) {
        Some(padded) => Some(padded & !(WORD - 1)),
        None => None,
    }
}

/// Whether an allocation may have one holder or many.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Ownership {
    /// Exactly one holder; release always destroys.
    Unique = 0,
    /// Reference counted; the last release destroys.
    Shared = 1,
}

/// Ownership of an allocation plus whether it holds an array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(C)]
pub struct Kind {
    ownership: Ownership,
    array: bool,
}

impl Kind {
    /// A unique scalar allocation.
    pub const UNIQUE: Kind = Kind::new(Ownership::Unique, false);
    /// A shared scalar allocation.
    pub const SHARED: Kind = Kind::new(Ownership::Shared, false);

    /// Builds a kind from its two components.
    #[must_use]
    pub const fn new(ownership: Ownership, array: bool) -> Self {
        Kind { ownership, array }
    }

    /// Returns the same ownership with the array flag set.
    #[must_use]
    pub const fn array(self) -> Self {
        Kind::new(self.ownership, true)
    }

    /// The ownership component.
    #[must_use]
    pub const fn ownership(self) -> Ownership {
        self.ownership
    }

    /// `true` for reference counted allocations.
    #[must_use]
    pub const fn is_shared(self) -> bool {
        matches!(self.ownership, Ownership::Shared)
    }

    /// `true` for single-holder allocations.
    #[must_use]
    pub const fn is_unique(self) -> bool {
        matches!(self.ownership, Ownership::Unique)
    }

    /// `true` when the allocation carries an array descriptor.
    #[must_use]
    pub const fn is_array(self) -> bool {
        self.array
    }
}

/// Bookkeeping placed at the start of every block.
///
/// This is the full header of unique allocations and the prefix of
/// [`SharedHeader`].
#[repr(C)]
pub(crate) struct Header {
    pub(crate) kind: Kind,
    pub(crate) destructor: Option<Destructor>,
    /// Payload address recorded at creation; checked on every translation.
    #[cfg(debug_assertions)]
    pub(crate) payload: *mut u8,
}

/// Header of shared allocations: the common prefix plus a reference count.
#[repr(C)]
pub(crate) struct SharedHeader {
    pub(crate) base: Header,
    pub(crate) ref_count: AtomicUsize,
}

const _: () = assert!(size_of::<Header>() % WORD == 0);
const _: () = assert!(size_of::<SharedHeader>() % WORD == 0);
const _: () = assert!(size_of::<SharedHeader>() > size_of::<Header>());

/// Size of the header written for `kind`.
#[inline]
#[must_use]
pub const fn header_size(kind: Kind) -> usize {
    if kind.is_shared() {
        size_of::<SharedHeader>()
    } else {
        size_of::<Header>()
    }
}

/// A translated header, typed by the variant its `kind` announces.
#[derive(Debug, Clone, Copy)]
pub(crate) enum HeaderRef {
    Unique(NonNull<Header>),
    Shared(NonNull<SharedHeader>),
}

impl HeaderRef {
    /// The common prefix, whichever variant this is.
    #[inline]
    pub(crate) fn prefix(self) -> NonNull<Header> {
        match self {
            HeaderRef::Unique(header) => header,
            HeaderRef::Shared(shared) => shared.cast(),
        }
    }

    /// Start of the block, as handed out by the allocator seam.
    #[inline]
    pub(crate) fn block(self) -> *mut u8 {
        self.prefix().as_ptr().cast()
    }

    /// Kind recorded in the header.
    ///
    /// # Safety
    ///
    /// The block must still be live.
    #[inline]
    pub(crate) unsafe fn kind(self) -> Kind {
        // SAFETY: caller guarantees the header is live and initialized.
        unsafe { self.prefix().as_ref().kind }
    }

    /// Destructor recorded in the header.
    ///
    /// # Safety
    ///
    /// The block must still be live.
    #[inline]
    pub(crate) unsafe fn destructor(self) -> Option<Destructor> {
        // SAFETY: caller guarantees the header is live and initialized.
        unsafe { self.prefix().as_ref().destructor }
    }
}

/// Reads the back-offset word stored right before `payload`.
///
/// # Safety
///
/// `payload` must be a live address returned by the allocation engine.
#[inline]
pub(crate) unsafe fn back_offset(payload: NonNull<u8>) -> usize {
    // SAFETY: the engine writes an aligned usize directly before every
    // payload it returns.
    unsafe { payload.cast::<usize>().as_ptr().sub(1).read() }
}

/// Locates the header of the allocation at `payload`.
///
/// Debug builds assert that `payload` is word aligned and that the header's
/// recorded back-pointer matches it.
///
/// # Safety
///
/// `payload` must have been returned by the allocation engine and not yet
/// released. Anything else is undefined behaviour.
#[inline]
pub(crate) unsafe fn resolve_header(payload: NonNull<u8>) -> HeaderRef {
    debug_assert_eq!(
        payload.as_ptr() as usize % WORD,
        0,
        "payload address is not word aligned"
    );

    // SAFETY: caller contract; the back-offset points inside the same block.
    let header = unsafe {
        let offset = back_offset(payload);
        payload.as_ptr().sub(offset + WORD).cast::<Header>()
    };

    // SAFETY: block start is never null and holds an initialized Header prefix.
    let header = unsafe { NonNull::new_unchecked(header) };

    #[cfg(debug_assertions)]
    {
        // SAFETY: see above.
        let recorded = unsafe { header.as_ref().payload };
        assert_eq!(
            recorded,
            payload.as_ptr(),
            "header back-pointer mismatch: address was not produced by smartalloc or is corrupted"
        );
    }

    // SAFETY: the prefix is initialized for both variants.
    if unsafe { header.as_ref().kind.is_shared() } {
        HeaderRef::Shared(header.cast())
    } else {
        HeaderRef::Unique(header)
    }
}

/// Size of the attached metadata region, padding included.
///
/// # Safety
///
/// Same contract as [`resolve_header`].
pub unsafe fn metadata_len(payload: NonNull<u8>) -> usize {
    // SAFETY: forwarded caller contract.
    unsafe {
        let header = resolve_header(payload);
        back_offset(payload) - header_size(header.kind())
    }
}

/// Address of the attached metadata, or `None` if none was stored.
///
/// For array allocations this is the array descriptor.
///
/// # Safety
///
/// Same contract as [`resolve_header`].
pub unsafe fn attached_metadata(payload: NonNull<u8>) -> Option<NonNull<u8>> {
    // SAFETY: forwarded caller contract.
    let header = unsafe { resolve_header(payload) };
    // SAFETY: header is live.
    let head = header_size(unsafe { header.kind() });

    // SAFETY: forwarded caller contract.
    if unsafe { back_offset(payload) } == head {
        return None;
    }

    // SAFETY: the metadata region starts right after the header, inside the block.
    NonNull::new(unsafe { header.block().add(head) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_word() {
        assert_eq!(align_word(0), Some(0));
        assert_eq!(align_word(1), Some(WORD));
        assert_eq!(align_word(WORD), Some(WORD));
        assert_eq!(align_word(WORD + 1), Some(2 * WORD));
        assert_eq!(align_word(usize::MAX), None);
    }

    #[test]
    fn test_shared_header_is_larger() {
        assert!(header_size(Kind::SHARED) > header_size(Kind::UNIQUE));
        assert_eq!(
            header_size(Kind::SHARED) - header_size(Kind::UNIQUE),
            size_of::<AtomicUsize>()
        );
        assert_eq!(header_size(Kind::SHARED.array()), header_size(Kind::SHARED));
    }

    #[test]
    fn test_kind_flags() {
        let kind = Kind::UNIQUE.array();
        assert!(kind.is_unique());
        assert!(kind.is_array());
        assert!(!kind.is_shared());
        assert_eq!(kind.ownership(), Ownership::Unique);

        assert!(Kind::SHARED.is_shared());
        assert!(!Kind::SHARED.is_array());
        assert_eq!(Kind::new(Ownership::Shared, true), Kind::SHARED.array());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "back-pointer mismatch")]
    fn test_interior_address_rejected() {
        use crate::smalloc::{AllocRequest, allocate};

        let payload = allocate(&AllocRequest::scalar(Ownership::Unique, 32)).unwrap();
        // SAFETY: the first word of the payload is zeroed, so the back-offset
        // read at payload + WORD places a fake header at the payload start,
        // inside the block. Its recorded back-pointer is null.
        unsafe {
            payload.as_ptr().write_bytes(0, 32);
            resolve_header(payload.add(WORD));
        }
    }

    #[test]
    fn test_common_prefix_layout() {
        let shared = std::mem::MaybeUninit::<SharedHeader>::uninit();
        let base = shared.as_ptr();
        // SAFETY: only computes field addresses, no reads.
        let (prefix, kind) = unsafe {
            (
                std::ptr::addr_of!((*base).base) as usize,
                std::ptr::addr_of!((*base).base.kind) as usize,
            )
        };
        assert_eq!(prefix, base as usize);
        assert_eq!(kind, base as usize);
    }
}
