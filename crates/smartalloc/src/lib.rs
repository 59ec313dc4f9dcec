//! `smartalloc`: unique and shared ownership on top of a raw allocator.
//!
//! Every allocation is a single block from the [allocator seam](mod@allocator)
//! with a small header hidden in front of the address handed to the caller.
//! The header records:
//!
//! - **Ownership**: unique (one holder) or shared (atomic reference count)
//! - **Destructor**: an optional function run once per element at release
//! - **Attached metadata**: arbitrary bytes copied in at creation
//! - **Array descriptor**: element count and size for array allocations
//!
//! # Layers
//!
//! - **Raw API**: [`allocate`], [`share`], [`release`],
//!   [`promote_to_shared`] and the accessors work on plain payload
//!   addresses and are `unsafe` where a foreign address would be undefined
//!   behaviour.
//! - **Typed API**: [`Unique`], [`Shared`], [`UniqueArray`], [`SharedArray`]
//!   and [`ScopedPtr`] tie releases to Rust ownership.
//!
//! # Example
//!
//! ```rust
//! use smartalloc::{AllocRequest, Ownership, Shared, allocate, release, share};
//!
//! // Typed
//! let config = Shared::with_metadata(String::from("v1"), b"rev").unwrap();
//! let reader = config.clone();
//! assert_eq!(reader.ref_count(), 2);
//!
//! // Raw
//! let payload = allocate(&AllocRequest::scalar(Ownership::Shared, 64)).unwrap();
//! unsafe {
//!     share(payload);
//!     release(payload.as_ptr());
//!     release(payload.as_ptr());
//! }
//! ```

pub mod allocator;
pub mod array;
pub mod error;
pub mod header;
pub mod meta;
pub mod refcount;
pub mod scoped;
pub mod shared;
pub mod smalloc;
mod typed;
pub mod unique;

use std::ptr::NonNull;

/// Cleanup hook stored in an allocation's header.
///
/// Called at final release with the address of one element (the payload
/// itself for scalars) and the attached metadata address, if any. For arrays
/// the metadata address points at the array descriptor.
pub type Destructor = unsafe fn(element: NonNull<u8>, metadata: Option<NonNull<u8>>);

pub use allocator::{RawAllocator, SYSTEM, allocator, reset_allocator, set_allocator};
pub use array::{SharedArray, UniqueArray};
pub use error::{Error, Result};
pub use header::{Kind, Ownership, WORD, align_word, attached_metadata, header_size, metadata_len};
pub use meta::{ArrayMeta, array_length, array_meta, element_size, user_metadata};
pub use refcount::{discard, kind, promote_to_shared, ref_count, release, share};
pub use scoped::ScopedPtr;
pub use shared::Shared;
pub use smalloc::{AllocRequest, allocate};
pub use unique::Unique;
