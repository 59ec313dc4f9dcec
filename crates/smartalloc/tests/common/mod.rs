// Common test utilities for integration tests
//
// Destructors that record how often and where they ran, plus helpers for
// reading payload and metadata bytes.

#![allow(dead_code)]

use std::ptr::NonNull;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::sync::atomic::{AtomicUsize, Ordering};

/// One destructor invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Call {
    pub element: usize,
    pub metadata: Option<usize>,
}

/// Destructor calls recorded by [`recording_destructor`], per test binary.
pub static CALLS: Mutex<Vec<Call>> = Mutex::new(Vec::new());

/// Destructor calls counted by [`counting_destructor`].
pub static DESTRUCTOR_COUNT: AtomicUsize = AtomicUsize::new(0);

/// Destructor that records its arguments in [`CALLS`].
///
/// # Safety
///
/// Never dereferences its arguments.
pub unsafe fn recording_destructor(element: NonNull<u8>, metadata: Option<NonNull<u8>>) {
    CALLS.lock().unwrap_or_else(PoisonError::into_inner).push(Call {
        element: element.as_ptr() as usize,
        metadata: metadata.map(|m| m.as_ptr() as usize),
    });
}

/// Destructor that only bumps [`DESTRUCTOR_COUNT`].
///
/// # Safety
///
/// Never dereferences its arguments.
pub unsafe fn counting_destructor(_element: NonNull<u8>, _metadata: Option<NonNull<u8>>) {
    DESTRUCTOR_COUNT.fetch_add(1, Ordering::SeqCst);
}

/// Serializes tests that inspect [`CALLS`] or [`DESTRUCTOR_COUNT`].
static SERIAL: Mutex<()> = Mutex::new(());

/// Takes the serial lock and clears all recorded calls.
pub fn serial() -> MutexGuard<'static, ()> {
    let guard = SERIAL.lock().unwrap_or_else(PoisonError::into_inner);
    CALLS.lock().unwrap_or_else(PoisonError::into_inner).clear();
    DESTRUCTOR_COUNT.store(0, Ordering::SeqCst);
    guard
}

/// Recorded calls whose element lies in `start..end`.
pub fn calls_within(start: usize, end: usize) -> Vec<Call> {
    CALLS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .iter()
        .copied()
        .filter(|call| (start..end).contains(&call.element))
        .collect()
}

/// Reads `len` bytes starting at `ptr`.
///
/// # Safety
///
/// `ptr` must be valid for `len` initialized bytes.
pub unsafe fn bytes(ptr: NonNull<u8>, len: usize) -> Vec<u8> {
    unsafe { std::slice::from_raw_parts(ptr.as_ptr(), len) }.to_vec()
}
