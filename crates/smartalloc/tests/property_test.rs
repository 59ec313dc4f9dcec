// Property-based tests for the allocation engine.
//
// Random sizes, kinds and metadata: the payload must stay word aligned, the
// header must resolve back to the requested kind, and N shares followed by
// N + 1 releases must run the destructor exactly once.

mod common;

use common::{DESTRUCTOR_COUNT, counting_destructor, serial};
use proptest::prelude::*;
use smartalloc::{
    AllocRequest, Error, Kind, Ownership, UniqueArray, WORD, allocate, array_meta, attached_metadata,
    kind, metadata_len, ref_count, release, share, user_metadata,
};
use std::sync::atomic::Ordering;

fn ownership() -> impl Strategy<Value = Ownership> {
    prop_oneof![Just(Ownership::Unique), Just(Ownership::Shared)]
}

// ============================================================================
// Layout Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn scalar_header_resolves(
        ownership in ownership(),
        size in 1usize..4096,
        metadata in prop::collection::vec(any::<u8>(), 0..64),
    ) {
        let payload = allocate(&AllocRequest::scalar(ownership, size).with_metadata(&metadata))
            .expect("non-zero size should allocate");

        prop_assert_eq!(payload.as_ptr() as usize % WORD, 0);
        // SAFETY: payload is live until the release below.
        unsafe {
            prop_assert_eq!(kind(payload), Kind::new(ownership, false));
            prop_assert_eq!(ref_count(payload).is_some(), ownership == Ownership::Shared);
            prop_assert_eq!(metadata_len(payload) % WORD, 0);
            prop_assert!(metadata_len(payload) >= metadata.len());
            match user_metadata(payload) {
                Some(meta) => {
                    let stored = std::slice::from_raw_parts(meta.as_ptr(), metadata.len());
                    prop_assert_eq!(stored, metadata.as_slice());
                }
                None => prop_assert!(metadata.is_empty()),
            }
            release(payload.as_ptr());
        }
    }

    #[test]
    fn array_descriptor_matches_request(
        ownership in ownership(),
        element_size in 1usize..128,
        count in 1usize..64,
        metadata in prop::collection::vec(any::<u8>(), 0..16),
    ) {
        let request = AllocRequest::array(ownership, element_size, count).with_metadata(&metadata);
        let payload = allocate(&request).expect("non-zero array should allocate");

        // SAFETY: payload is live until the release below.
        unsafe {
            prop_assert_eq!(kind(payload), Kind::new(ownership, true));
            let descriptor = array_meta(payload).expect("array kind has a descriptor");
            prop_assert_eq!(descriptor.element_count, count);
            prop_assert_eq!(descriptor.element_size, element_size);
            prop_assert!(attached_metadata(payload).is_some());
            prop_assert_eq!(user_metadata(payload).is_some(), !metadata.is_empty());
            release(payload.as_ptr());
        }
    }

    #[test]
    fn zero_size_always_fails(
        ownership in ownership(),
        count in 0usize..8,
        metadata in prop::collection::vec(any::<u8>(), 0..32),
    ) {
        let scalar = AllocRequest::scalar(ownership, 0).with_metadata(&metadata);
        prop_assert_eq!(allocate(&scalar), Err(Error::ZeroSize));

        let array = AllocRequest::array(ownership, 0, count).with_metadata(&metadata);
        prop_assert_eq!(allocate(&array), Err(Error::ZeroSize));
    }

    #[test]
    fn zero_count_array_allocates_scalar(ownership in ownership(), element_size in 1usize..256) {
        let payload = allocate(&AllocRequest::array(ownership, element_size, 0))
            .expect("zero count with a non-zero element size is a scalar");

        // SAFETY: payload is live until the release below.
        unsafe {
            prop_assert_eq!(kind(payload), Kind::new(ownership, false));
            prop_assert_eq!(array_meta(payload), None);
            prop_assert_eq!(metadata_len(payload), 0);
            release(payload.as_ptr());
        }
    }

    #[test]
    fn oversized_request_overflows(ownership in ownership(), slack in 0usize..WORD) {
        let size = usize::MAX - slack;
        prop_assert_eq!(
            allocate(&AllocRequest::scalar(ownership, size)),
            Err(Error::SizeOverflow)
        );
    }
}

// ============================================================================
// Refcount Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn destructor_runs_once_after_last_release(shares in 0usize..200) {
        let _serial = serial();
        let payload = allocate(
            &AllocRequest::scalar(Ownership::Shared, 16).with_destructor(counting_destructor),
        )
        .expect("allocation should succeed");

        // SAFETY: each release gives up one of the shares + 1 references.
        unsafe {
            for _ in 0..shares {
                share(payload);
            }
            prop_assert_eq!(ref_count(payload), Some(shares + 1));
            for _ in 0..shares {
                release(payload.as_ptr());
            }
            prop_assert_eq!(DESTRUCTOR_COUNT.load(Ordering::SeqCst), 0);
            release(payload.as_ptr());
        }
        prop_assert_eq!(DESTRUCTOR_COUNT.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn typed_array_holds_values(values in prop::collection::vec(any::<u64>(), 1..256)) {
        let array = UniqueArray::from_vec(values.clone()).expect("non-empty vec should allocate");
        prop_assert_eq!(array.len(), values.len());
        prop_assert_eq!(&*array, values.as_slice());
    }
}
