//! Per-thread arena singleton over the system page source.
//!
//! The arena is created by the first allocation on a thread and closed by
//! the thread-local destructor when the thread exits. Requests that cannot
//! reach the arena (a reentrant call while it is borrowed, or a call after
//! its destructor ran) are served by dedicated mappings instead, which
//! [`free`] classifies like any other pointer.

use std::cell::RefCell;
use std::ptr::NonNull;

use crate::arena::{self, Arena, ArenaStats, CloseOutcome, Released};
use crate::bucket::BucketView;
use crate::error::AllocError;
use crate::size_class::{SizeClass, align_up, route};
use crate::vm::{self, SystemPages};

thread_local! {
    static ARENA: RefCell<Option<Arena<SystemPages>>> = const { RefCell::new(None) };
}

fn with_arena<R>(f: impl FnOnce(&mut Arena<SystemPages>) -> R) -> Option<R> {
    ARENA
        .try_with(|cell| {
            let mut slot = cell.try_borrow_mut().ok()?;
            let arena = slot.get_or_insert_with(|| Arena::new(SystemPages));
            Some(f(arena))
        })
        .ok()
        .flatten()
}

fn peek_arena<R>(f: impl FnOnce(&Arena<SystemPages>) -> R) -> Option<R> {
    ARENA
        .try_with(|cell| cell.try_borrow().ok()?.as_ref().map(f))
        .ok()
        .flatten()
}

/// Allocate `size` zero-filled, 16-byte aligned bytes on the calling thread.
pub fn allocate(size: usize) -> Result<NonNull<u8>, AllocError> {
    with_arena(|arena| arena.allocate(size)).unwrap_or_else(|| allocate_detached(size))
}

/// Allocate one dedicated, page-aligned, zero-filled page.
pub fn allocate_page() -> Result<NonNull<u8>, AllocError> {
    with_arena(Arena::allocate_page)
        .unwrap_or_else(|| arena::map_page(&SystemPages, vm::page_size()))
}

// Never touches the arena: buckets become dedicated pages.
fn allocate_detached(size: usize) -> Result<NonNull<u8>, AllocError> {
    let page = vm::page_size();
    let rounded = align_up(size.max(1)).ok_or(AllocError::SizeOverflow { requested: size })?;
    match route(rounded, page) {
        SizeClass::Bucket | SizeClass::SinglePage => arena::map_page(&SystemPages, page),
        SizeClass::MultiPage => arena::map_large(&SystemPages, page, rounded, size),
    }
}

/// Release memory returned by [`allocate`] or [`allocate_page`], from any thread.
///
/// A null pointer is ignored.
///
/// # Safety
///
/// `ptr` must be null or a live pointer from this module's allocation
/// functions; it must not be released twice or used afterwards.
pub unsafe fn free(ptr: *mut u8) -> Option<Released> {
    let ptr = NonNull::new(ptr)?;
    // SAFETY: forwarded caller contract; every thread shares the system source.
    Some(unsafe { arena::release(&SystemPages, vm::page_size(), ptr) })
}

/// Virtual-memory page size used by every thread.
#[must_use]
pub fn page_size() -> usize {
    vm::page_size()
}

/// Counters of the calling thread's arena, if it has one.
#[must_use]
pub fn thread_stats() -> Option<ArenaStats> {
    peek_arena(Arena::stats)
}

/// Header fields of the calling thread's open bucket, if any.
#[must_use]
pub fn current_bucket() -> Option<BucketView> {
    peek_arena(Arena::current_bucket).flatten()
}

/// Close the calling thread's bucket now instead of at thread exit.
///
/// The next small allocation on this thread maps a fresh run.
pub fn close_thread_bucket() -> Option<CloseOutcome> {
    ARENA
        .try_with(|cell| cell.try_borrow_mut().ok()?.as_mut()?.close_current())
        .ok()
        .flatten()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::BUCKET_HEADER_SIZE;
    use crate::size_class::{GRANULARITY, classify};

    #[test]
    fn first_allocation_creates_the_arena() {
        std::thread::spawn(|| {
            assert_eq!(thread_stats(), None);
            let ptr = allocate(24).expect("alloc");
            let stats = thread_stats().expect("arena");
            assert_eq!(stats.buckets_opened, 1);
            assert_eq!(stats.bucket_objects, 1);
            assert_eq!(current_bucket().expect("bucket").live_objects, 1);
            // SAFETY: live allocation from this thread.
            let released = unsafe { free(ptr.as_ptr()) };
            assert_eq!(released, Some(Released::BucketObject { disposed: false }));
        })
        .join()
        .unwrap();
    }

    #[test]
    fn free_of_null_is_noop() {
        // SAFETY: null is always accepted.
        assert_eq!(unsafe { free(std::ptr::null_mut()) }, None);
    }

    #[test]
    fn detached_path_uses_dedicated_pages() {
        let page = page_size();
        let small = allocate_detached(1).expect("alloc");
        assert_eq!(classify(small.as_ptr() as usize, page), Some(SizeClass::SinglePage));
        let large = allocate_detached(2 * page).expect("alloc");
        assert_eq!(classify(large.as_ptr() as usize, page), Some(SizeClass::MultiPage));
        // SAFETY: live allocations.
        unsafe {
            assert_eq!(free(small.as_ptr()), Some(Released::SinglePage));
            assert_eq!(free(large.as_ptr()), Some(Released::MultiPage { pages: 3 }));
        }
    }

    #[test]
    fn reentrant_allocation_falls_back_to_a_page() {
        std::thread::spawn(|| {
            let page = page_size();
            let (outer, inner) = with_arena(|arena| {
                let outer = arena.allocate(GRANULARITY).expect("alloc");
                // The arena is borrowed: this call must not reach it.
                let inner = allocate(GRANULARITY).expect("alloc");
                (outer, inner)
            })
            .expect("arena");
            assert_eq!(outer.as_ptr() as usize % page, BUCKET_HEADER_SIZE);
            assert_eq!(inner.as_ptr() as usize % page, 0);
            assert_eq!(thread_stats().expect("arena").bucket_objects, 1);
            // SAFETY: live allocations.
            unsafe {
                free(inner.as_ptr());
                free(outer.as_ptr());
            }
        })
        .join()
        .unwrap();
    }

    #[test]
    fn explicit_close_starts_a_new_run() {
        std::thread::spawn(|| {
            let a = allocate(16).expect("alloc");
            let outcome = close_thread_bucket().expect("bucket open");
            assert!(!outcome.disposed);
            assert_eq!(current_bucket(), None);
            assert_eq!(close_thread_bucket(), None);

            let b = allocate(16).expect("alloc");
            assert_eq!(thread_stats().expect("arena").runs_mapped, 2);
            // SAFETY: live allocations.
            unsafe {
                assert_eq!(
                    free(a.as_ptr()),
                    Some(Released::BucketObject { disposed: true })
                );
                free(b.as_ptr());
            }
        })
        .join()
        .unwrap();
    }

    #[test]
    fn thread_exit_closes_bucket_for_remote_release() {
        let addr = std::thread::spawn(|| {
            let ptr = allocate(32).expect("alloc");
            assert!(current_bucket().expect("bucket").open);
            ptr.as_ptr() as usize
        })
        .join()
        .unwrap();

        assert_eq!(addr % GRANULARITY, 0);
        // SAFETY: live allocation whose owning thread has exited.
        let released = unsafe { free(addr as *mut u8) };
        assert_eq!(released, Some(Released::BucketObject { disposed: true }));
    }

    #[test]
    fn page_allocation_is_page_aligned() {
        let page = page_size();
        let ptr = allocate_page().expect("alloc");
        assert_eq!(ptr.as_ptr() as usize % page, 0);
        // SAFETY: live allocation.
        assert_eq!(unsafe { free(ptr.as_ptr()) }, Some(Released::SinglePage));
    }
}
