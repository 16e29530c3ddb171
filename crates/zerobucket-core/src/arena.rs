//! Allocation engine: one arena per thread, release from anywhere.
//!
//! An [`Arena`] owns no memory. It routes requests to one of three paths
//! and remembers the bucket it is currently carving from. Bucket pages are
//! mapped in runs; each closed bucket hands the next page of its run to its
//! successor, so one mapping call serves a whole run of buckets.
//!
//! [`release`] needs nothing but the page source and the pointer: the
//! pointer's offset within its page identifies its class.

use std::ptr::NonNull;

use crate::bucket::{self, BucketHeader, BucketView, Carve};
use crate::config;
use crate::error::AllocError;
use crate::events;
use crate::size_class::{
    LARGE_HEADER_SIZE, SizeClass, align_up, classify, page_offset, pages_for, route,
};
use crate::vm::{self, PageSource, SystemPages};

/// Per-arena counters. Only the owning thread updates them.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ArenaStats {
    /// Preallocation runs mapped.
    pub runs_mapped: u64,
    /// Bucket pages opened, from fresh runs or claimed from a predecessor.
    pub buckets_opened: u64,
    /// Bucket pages taken from an already-mapped run.
    pub prealloc_claims: u64,
    /// Objects carved from buckets.
    pub bucket_objects: u64,
    /// Dedicated single-page allocations.
    pub single_pages: u64,
    /// Multi-page blocks.
    pub multi_page_blocks: u64,
}

/// Result of closing an arena's current bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseOutcome {
    /// The bucket had no live objects and was unmapped immediately.
    pub disposed: bool,
    /// Unclaimed preallocated pages returned to the system.
    pub released_pages: usize,
}

/// What [`release`] did with a pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Released {
    /// Object carved from a bucket; `disposed` if this was the last one of a
    /// closed bucket.
    BucketObject { disposed: bool },
    /// Dedicated page unmapped.
    SinglePage,
    /// Multi-page block of `pages` pages unmapped.
    MultiPage { pages: usize },
    /// Offset no allocation path produces; nothing was touched.
    Unrecognized,
}

impl Released {
    /// Class of the released pointer, if it had one.
    #[must_use]
    pub const fn class(&self) -> Option<SizeClass> {
        match self {
            Self::BucketObject { .. } => Some(SizeClass::Bucket),
            Self::SinglePage => Some(SizeClass::SinglePage),
            Self::MultiPage { .. } => Some(SizeClass::MultiPage),
            Self::Unrecognized => None,
        }
    }
}

/// Thread-scoped allocation front end over a [`PageSource`].
///
/// Dropping an arena closes its current bucket: the unclaimed tail of the
/// bucket's run is unmapped, and the bucket page itself is unmapped now if
/// empty or by whichever thread releases its last object.
pub struct Arena<S: PageSource = SystemPages> {
    source: S,
    page_size: usize,
    prealloc: Option<usize>,
    current: Option<NonNull<BucketHeader>>,
    stats: ArenaStats,
}

impl<S: PageSource> Arena<S> {
    /// Arena whose run length follows [`config::prealloc_pages`].
    pub fn new(source: S) -> Self {
        Self {
            source,
            page_size: vm::page_size(),
            prealloc: None,
            current: None,
            stats: ArenaStats::default(),
        }
    }

    /// Arena with a fixed run length (clamped like the environment value).
    pub fn with_prealloc(source: S, pages: usize) -> Self {
        let mut arena = Self::new(source);
        arena.prealloc = Some(config::clamp_prealloc(pages));
        arena
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn stats(&self) -> ArenaStats {
        self.stats
    }

    /// Pages per preallocation run used for the next refill.
    pub fn prealloc_pages(&self) -> usize {
        self.prealloc.unwrap_or_else(config::prealloc_pages)
    }

    /// Header fields of the bucket currently being carved, if any.
    pub fn current_bucket(&self) -> Option<BucketView> {
        // SAFETY: the current bucket is open, so nobody can dispose it.
        self.current.map(|header| unsafe { header.as_ref() }.inspect())
    }

    /// Allocate `size` zero-filled bytes, 16-byte aligned.
    ///
    /// A zero-byte request is served as a one-byte request.
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>, AllocError> {
        let rounded = align_up(size.max(1)).ok_or(AllocError::SizeOverflow { requested: size })?;
        match route(rounded, self.page_size) {
            SizeClass::Bucket => self.allocate_small(rounded),
            SizeClass::SinglePage => self.allocate_page(),
            SizeClass::MultiPage => {
                let ptr = map_large(&self.source, self.page_size, rounded, size)?;
                self.stats.multi_page_blocks += 1;
                Ok(ptr)
            }
        }
    }

    /// Map one dedicated page. The pointer is page aligned.
    pub fn allocate_page(&mut self) -> Result<NonNull<u8>, AllocError> {
        let ptr = map_page(&self.source, self.page_size)?;
        self.stats.single_pages += 1;
        Ok(ptr)
    }

    fn allocate_small(&mut self, rounded: usize) -> Result<NonNull<u8>, AllocError> {
        let page = self.page_size;
        let mut successor = None;

        if let Some(header) = self.current {
            // SAFETY: the current bucket stays mapped while it is open.
            match unsafe { header.as_ref() }.try_carve(rounded, page) {
                Carve::Carved(ptr) => {
                    self.stats.bucket_objects += 1;
                    return Ok(ptr);
                }
                Carve::Full(closed) => {
                    self.current = None;
                    if closed.prealloc_remaining > 0 {
                        // SAFETY: the next page belongs to the same mapped run.
                        let next = unsafe { header.cast::<u8>().add(page) };
                        successor = Some((next, closed.prealloc_remaining - 1));
                    }
                    if closed.dispose {
                        // SAFETY: we observed closed && live == 0 under the lock.
                        unsafe { dispose_bucket(header, &self.source, page) };
                    }
                }
            }
        }

        let (page_ptr, remaining) = match successor {
            Some(next) => {
                self.stats.prealloc_claims += 1;
                next
            }
            None => self.map_run()?,
        };

        // SAFETY: the page is mapped, zeroed and unclaimed; rounded fits beside the header.
        let (header, object) = unsafe { BucketHeader::open(page_ptr, page, remaining, rounded) };
        self.current = Some(header);
        self.stats.buckets_opened += 1;
        self.stats.bucket_objects += 1;
        Ok(object)
    }

    fn map_run(&mut self) -> Result<(NonNull<u8>, u32), AllocError> {
        let pages = self.prealloc_pages();
        let len = pages * self.page_size;
        let base = self
            .source
            .map(len)
            .map_err(|errno| out_of_memory(len, errno))?;
        self.stats.runs_mapped += 1;
        events::run_mapped(base.as_ptr() as usize, pages);
        Ok((base, (pages - 1) as u32))
    }

    /// Close the current bucket and give back the rest of its run.
    ///
    /// Returns `None` if no bucket was open.
    pub fn close_current(&mut self) -> Option<CloseOutcome> {
        let header = self.current.take()?;
        let page = self.page_size;
        // SAFETY: the bucket is open until this call, so still mapped.
        let closed = unsafe { header.as_ref() }.close();

        let released_pages = closed.prealloc_remaining as usize;
        if released_pages > 0 {
            // SAFETY: the tail pages follow the header in its run and were never claimed.
            unsafe {
                let tail = header.cast::<u8>().add(page);
                unmap_logged(&self.source, tail, released_pages * page);
            }
        }
        if closed.dispose {
            // SAFETY: we observed closed && live == 0 under the lock.
            unsafe { dispose_bucket(header, &self.source, page) };
        }

        events::thread_bucket_closed(closed.dispose, released_pages);
        Some(CloseOutcome {
            disposed: closed.dispose,
            released_pages,
        })
    }
}

impl<S: PageSource> Drop for Arena<S> {
    fn drop(&mut self) {
        self.close_current();
    }
}

/// Release a pointer returned by any arena over `source`.
///
/// # Safety
///
/// `ptr` must come from an allocation on an arena (or the page helpers)
/// backed by `source` with the same `page_size`, and must not be released
/// twice or used afterwards.
pub unsafe fn release<S: PageSource + ?Sized>(
    source: &S,
    page_size: usize,
    ptr: NonNull<u8>,
) -> Released {
    let addr = ptr.as_ptr() as usize;
    match classify(addr, page_size) {
        Some(SizeClass::Bucket) => {
            // SAFETY: bucket objects live in the page that starts with their header.
            let header = unsafe { ptr.sub(page_offset(addr, page_size)) }.cast::<BucketHeader>();
            // SAFETY: a live object keeps its bucket mapped.
            let disposed = unsafe { header.as_ref() }.release_object();
            if disposed {
                // SAFETY: release_object observed closed && live == 0 under the lock.
                unsafe { dispose_bucket(header, source, page_size) };
            }
            Released::BucketObject { disposed }
        }
        Some(SizeClass::SinglePage) => {
            // SAFETY: the page was mapped on its own for this allocation.
            unsafe { unmap_logged(source, ptr, page_size) };
            Released::SinglePage
        }
        Some(SizeClass::MultiPage) => {
            // SAFETY: the count header sits LARGE_HEADER_SIZE bytes before the block.
            let (base, pages) = unsafe {
                let base = ptr.sub(LARGE_HEADER_SIZE);
                (base, base.cast::<usize>().read())
            };
            // SAFETY: base..base+pages*page_size is the mapping made for this block.
            unsafe { unmap_logged(source, base, pages * page_size) };
            Released::MultiPage { pages }
        }
        None => {
            events::unrecognized_release(addr);
            Released::Unrecognized
        }
    }
}

/// Map one page for a dedicated allocation.
pub(crate) fn map_page<S: PageSource + ?Sized>(
    source: &S,
    page_size: usize,
) -> Result<NonNull<u8>, AllocError> {
    source
        .map(page_size)
        .map_err(|errno| out_of_memory(page_size, errno))
}

/// Map a multi-page block for `rounded` bytes and stamp its page count.
pub(crate) fn map_large<S: PageSource + ?Sized>(
    source: &S,
    page_size: usize,
    rounded: usize,
    requested: usize,
) -> Result<NonNull<u8>, AllocError> {
    let overflow = AllocError::SizeOverflow { requested };
    let pages = pages_for(rounded, page_size).ok_or(overflow)?;
    let len = pages.checked_mul(page_size).ok_or(overflow)?;
    if len > isize::MAX as usize {
        return Err(overflow);
    }
    let base = source.map(len).map_err(|errno| out_of_memory(len, errno))?;
    // SAFETY: the mapping spans at least one page, far more than the header.
    unsafe {
        base.cast::<usize>().write(pages);
        Ok(base.add(LARGE_HEADER_SIZE))
    }
}

fn out_of_memory(bytes: usize, errno: i32) -> AllocError {
    events::out_of_memory(bytes, errno);
    AllocError::OutOfMemory { bytes, errno }
}

/// # Safety
///
/// Same contract as [`PageSource::unmap`].
unsafe fn unmap_logged<S: PageSource + ?Sized>(source: &S, ptr: NonNull<u8>, len: usize) {
    // SAFETY: forwarded caller contract.
    if let Err(errno) = unsafe { source.unmap(ptr, len) } {
        events::unmap_failed(ptr.as_ptr() as usize, len, errno);
    }
}

/// # Safety
///
/// Same contract as [`bucket::dispose`].
unsafe fn dispose_bucket<S: PageSource + ?Sized>(
    header: NonNull<BucketHeader>,
    source: &S,
    page_size: usize,
) {
    // SAFETY: forwarded caller contract.
    if let Err(errno) = unsafe { bucket::dispose(header, source, page_size) } {
        events::unmap_failed(header.as_ptr() as usize, page_size, errno);
    }
}
