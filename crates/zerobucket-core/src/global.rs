//! `GlobalAlloc` front end.
//!
//! ```ignore
//! #[global_allocator]
//! static ALLOC: zerobucket_core::ZeroBucket = zerobucket_core::ZeroBucket;
//! ```
//!
//! Layouts aligned above 16 bytes are only served when both size and
//! alignment fit in one page. Any other over-aligned layout gets null, which
//! aborts the process through `handle_alloc_error` when `ZeroBucket` is the
//! global allocator.

use std::alloc::{GlobalAlloc, Layout};
use std::ptr::NonNull;

use crate::error::AllocError;
use crate::size_class::GRANULARITY;
use crate::thread;

/// Zero-filling bucket allocator usable as `#[global_allocator]`.
///
/// An over-aligned layout larger than a page (say a `Vec` of 64-byte aligned
/// structs spanning two pages) is refused, and std aborts on the null return.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZeroBucket;

/// Serve `layout` from the calling thread's arena.
///
/// Alignments up to [`GRANULARITY`] use every size class. Larger alignments
/// up to the page size are served by a dedicated page when the size fits in
/// one; anything else is refused.
pub fn allocate_layout(layout: Layout) -> Result<NonNull<u8>, AllocError> {
    let (size, align) = (layout.size(), layout.align());
    if align <= GRANULARITY {
        return thread::allocate(size);
    }
    let page = thread::page_size();
    if align <= page && size <= page {
        return thread::allocate_page();
    }
    Err(AllocError::UnsupportedAlignment { align, size })
}

// SAFETY: every returned block is exclusively owned, at least `layout.size()`
// bytes long and aligned to `layout.align()`; release goes through the
// pointer classification that matches the allocation path.
unsafe impl GlobalAlloc for ZeroBucket {
    #[inline]
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        allocate_layout(layout).map_or(std::ptr::null_mut(), NonNull::as_ptr)
    }

    #[inline]
    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        // Fresh memory is always zero.
        // SAFETY: same contract as `alloc`.
        unsafe { self.alloc(layout) }
    }

    #[inline]
    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        // SAFETY: `ptr` came from `alloc` on this allocator.
        unsafe { thread::free(ptr) };
    }
}
