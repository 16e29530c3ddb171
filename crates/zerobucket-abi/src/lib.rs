// Every export takes raw pointers or sizes from C callers; the contracts are
// those of the matching C library functions.
#![allow(clippy::missing_safety_doc)]
//! # zerobucket-abi
//!
//! `extern "C"` entry points for the zerobucket allocator.
//!
//! Symbols are prefixed (`zerobucket_malloc`, ...) so the library can be
//! linked next to the platform allocator. Failures return null and set
//! `errno` like their C counterparts. There is no `realloc`: blocks are
//! never resized.
//!
//! ```text
//! C caller -> zerobucket_* (this crate) -> zerobucket-core thread arena -> mmap
//! ```

use std::alloc::Layout;
use std::ffi::{c_int, c_void};

use zerobucket_core::{AllocError, allocate_layout, thread};

#[cfg(any(target_os = "linux", target_os = "android"))]
#[inline]
unsafe fn set_abi_errno(val: c_int) {
    // SAFETY: the per-thread errno slot is always valid for writes.
    unsafe { *libc::__errno_location() = val };
}

#[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
#[inline]
unsafe fn set_abi_errno(val: c_int) {
    // SAFETY: the per-thread errno slot is always valid for writes.
    unsafe { *libc::__error() = val };
}

#[inline]
fn fail(err: AllocError) -> *mut c_void {
    // SAFETY: writes only the calling thread's errno.
    unsafe { set_abi_errno(err.errno()) };
    std::ptr::null_mut()
}

/// `malloc` -- `size` zero-filled bytes, 16-byte aligned.
///
/// A zero-byte request returns a unique, freeable pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn zerobucket_malloc(size: usize) -> *mut c_void {
    match thread::allocate(size) {
        Ok(ptr) => ptr.as_ptr().cast(),
        Err(err) => fail(err),
    }
}

/// `calloc` -- `nmemb * size` zero-filled bytes.
///
/// Memory is zero on arrival, so no clearing pass is needed. Overflow of the
/// product fails with `ENOMEM`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn zerobucket_calloc(nmemb: usize, size: usize) -> *mut c_void {
    let Some(total) = nmemb.checked_mul(size) else {
        return fail(AllocError::SizeOverflow { requested: usize::MAX });
    };
    // SAFETY: plain allocation entry point.
    unsafe { zerobucket_malloc(total) }
}

/// `aligned_alloc` -- `size` bytes aligned to `alignment`.
///
/// `alignment` must be a power of two (`EINVAL` otherwise). Alignments above
/// 16 are honored up to one page for requests of at most one page.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn zerobucket_aligned_alloc(alignment: usize, size: usize) -> *mut c_void {
    if !alignment.is_power_of_two() {
        return fail(AllocError::UnsupportedAlignment {
            align: alignment,
            size,
        });
    }
    let Ok(layout) = Layout::from_size_align(size, alignment) else {
        return fail(AllocError::SizeOverflow { requested: size });
    };
    match allocate_layout(layout) {
        Ok(ptr) => ptr.as_ptr().cast(),
        Err(err) => fail(err),
    }
}

/// `free` -- release memory from any `zerobucket_*` allocation function.
///
/// Null is ignored. May be called from any thread.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn zerobucket_free(ptr: *mut c_void) {
    // SAFETY: caller passes null or a live pointer from this library.
    unsafe { thread::free(ptr.cast()) };
}

/// Page size used to classify and map allocations.
#[unsafe(no_mangle)]
pub extern "C" fn zerobucket_page_size() -> usize {
    thread::page_size()
}
