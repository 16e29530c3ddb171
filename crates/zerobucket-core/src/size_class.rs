//! Size-class routing.
//!
//! Allocation requests are routed by their rounded size against the page
//! size. Release requests recover the same class from the pointer alone:
//! the byte offset of an address within its page is distinct for every class.
//!
//! | class        | offset within page                  |
//! |--------------|-------------------------------------|
//! | `SinglePage` | `0`                                 |
//! | `MultiPage`  | `LARGE_HEADER_SIZE`                 |
//! | `Bucket`     | `> LARGE_HEADER_SIZE`               |

use crate::bucket::BUCKET_HEADER_SIZE;

/// Alignment of every returned address and rounding unit of every request.
///
/// 16 bytes satisfies aligned SSE loads/stores (`movdqa`) on the caller side.
pub const GRANULARITY: usize = 16;

/// Bytes reserved in front of a multi-page block.
///
/// The page count is stored in the first machine word; the slot is a full
/// granule so the caller's pointer stays 16-byte aligned.
pub const LARGE_HEADER_SIZE: usize = GRANULARITY;

/// Allocation class, decided purely by arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SizeClass {
    /// Carved from the calling thread's current bucket page.
    Bucket,
    /// Backed by exactly one dedicated page, no header.
    SinglePage,
    /// Backed by a contiguous page run with a page-count header.
    MultiPage,
}

impl SizeClass {
    /// Stable lowercase label used in reports.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bucket => "bucket",
            Self::SinglePage => "single_page",
            Self::MultiPage => "multi_page",
        }
    }
}

/// Round `size` up to the next multiple of [`GRANULARITY`].
///
/// Returns `None` if rounding overflows `usize`.
#[inline]
#[must_use]
pub const fn align_up(size: usize) -> Option<usize> {
    match size.checked_add(GRANULARITY - 1) {
        Some(padded) => Some(padded & !(GRANULARITY - 1)),
        None => None,
    }
}

/// Largest rounded request a bucket page can hold beside its header.
#[inline]
#[must_use]
pub const fn bucket_capacity(page_size: usize) -> usize {
    page_size - BUCKET_HEADER_SIZE
}

/// Route an already rounded request size.
#[inline]
#[must_use]
pub const fn route(rounded: usize, page_size: usize) -> SizeClass {
    if rounded <= bucket_capacity(page_size) {
        SizeClass::Bucket
    } else if rounded <= page_size {
        SizeClass::SinglePage
    } else {
        SizeClass::MultiPage
    }
}

/// Number of pages needed for a multi-page block of `rounded` bytes,
/// including its page-count header.
#[inline]
#[must_use]
pub const fn pages_for(rounded: usize, page_size: usize) -> Option<usize> {
    match rounded.checked_add(LARGE_HEADER_SIZE) {
        Some(total) => Some(total.div_ceil(page_size)),
        None => None,
    }
}

/// Offset of `addr` within its page. `page_size` must be a power of two.
#[inline]
#[must_use]
pub const fn page_offset(addr: usize, page_size: usize) -> usize {
    addr & (page_size - 1)
}

/// Recover the class of a pointer previously returned by the allocator.
///
/// Offsets in `1..LARGE_HEADER_SIZE` are never produced and yield `None`.
#[inline]
#[must_use]
pub const fn classify(addr: usize, page_size: usize) -> Option<SizeClass> {
    let offset = page_offset(addr, page_size);
    if offset == 0 {
        Some(SizeClass::SinglePage)
    } else if offset == LARGE_HEADER_SIZE {
        Some(SizeClass::MultiPage)
    } else if offset > LARGE_HEADER_SIZE {
        Some(SizeClass::Bucket)
    } else {
        None
    }
}
