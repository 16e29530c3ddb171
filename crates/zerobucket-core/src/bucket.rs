//! Bucket header living at the start of a bucket page.
//!
//! Small objects are carved sequentially from a page after its header.
//! The header is placed in the mapped memory right after the page is
//! claimed and dropped right before the page is unmapped. All fields sit
//! behind the header's own futex mutex: the owning thread carves, any
//! thread may release.
//!
//! Lifecycle:
//! ```text
//! open --(request does not fit)--> closed --(live == 0)--> disposed
//!   \----(owning thread exits)----/
//! ```
//! Disposal happens exactly once, on whichever side observes
//! `closed && live == 0` under the lock.

use std::mem::size_of;
use std::ptr::NonNull;

use crate::futex::FutexMutex;
use crate::size_class::align_up;
use crate::stats::global_counters;
use crate::vm::PageSource;

/// Header footprint inside the page, rounded to the allocation granule.
pub const BUCKET_HEADER_SIZE: usize = match align_up(size_of::<BucketHeader>()) {
    Some(size) => size,
    None => panic!("bucket header size overflow"),
};

// Release classification needs the bucket range strictly above the
// multi-page header offset.
const _: () = assert!(BUCKET_HEADER_SIZE > crate::size_class::LARGE_HEADER_SIZE);

struct BucketState {
    /// Already-mapped pages following this one that no bucket has claimed.
    prealloc_remaining: u32,
    /// Offset of the next free byte, counted from the page start.
    bytes_consumed: u32,
    /// Carved objects not yet released.
    live_objects: u32,
    open: bool,
}

/// Control block at the start of every bucket page.
pub struct BucketHeader {
    state: FutexMutex<BucketState>,
}

/// Outcome of [`BucketHeader::try_carve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Carve {
    /// The request fit; here is the object.
    Carved(NonNull<u8>),
    /// The request did not fit and the bucket is now closed.
    Full(Closed),
}

/// What the closing thread must do after a bucket closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Closed {
    /// No live objects remain: the closer disposes the page.
    pub dispose: bool,
    /// Unclaimed pages that follow this bucket in its run.
    pub prealloc_remaining: u32,
}

impl BucketHeader {
    /// Place a header at the start of `page` and carve the first object.
    ///
    /// Returns the header and the first object, which starts right after
    /// the header.
    ///
    /// # Safety
    ///
    /// `page` must be a freshly mapped (zeroed) page of `page_size` bytes that
    /// nothing else references, and `first` must satisfy
    /// `first <= page_size - BUCKET_HEADER_SIZE`.
    pub unsafe fn open(
        page: NonNull<u8>,
        page_size: usize,
        prealloc_remaining: u32,
        first: usize,
    ) -> (NonNull<BucketHeader>, NonNull<u8>) {
        debug_assert!(first <= page_size - BUCKET_HEADER_SIZE);
        let header = page.cast::<BucketHeader>();
        // SAFETY: the page is ours, writable and aligned far beyond the header's needs.
        unsafe {
            header.write(BucketHeader {
                state: FutexMutex::new(BucketState {
                    prealloc_remaining,
                    bytes_consumed: (BUCKET_HEADER_SIZE + first) as u32,
                    live_objects: 1,
                    open: true,
                }),
            });
        }
        // SAFETY: BUCKET_HEADER_SIZE < page_size, so the object stays inside the page.
        let object = unsafe { page.add(BUCKET_HEADER_SIZE) };
        (header, object)
    }

    #[inline]
    fn base(&self) -> *mut u8 {
        (self as *const BucketHeader).cast_mut().cast::<u8>()
    }

    /// Carve `size` bytes (already rounded) or close the bucket.
    ///
    /// Only the owning thread calls this, and only while the bucket is open.
    pub fn try_carve(&self, size: usize, page_size: usize) -> Carve {
        let mut state = self.state.lock();
        debug_assert!(state.open, "carving from a closed bucket");

        let consumed = state.bytes_consumed as usize;
        if size <= page_size - consumed {
            state.bytes_consumed = (consumed + size) as u32;
            state.live_objects += 1;
            // SAFETY: consumed + size <= page_size keeps the object inside this page.
            let object = unsafe { NonNull::new_unchecked(self.base().add(consumed)) };
            return Carve::Carved(object);
        }

        Carve::Full(close_locked(&mut state))
    }

    /// Close the bucket without carving (owning thread going away).
    pub fn close(&self) -> Closed {
        let mut state = self.state.lock();
        debug_assert!(state.open, "bucket closed twice");
        close_locked(&mut state)
    }

    /// Account for one released object. Returns true if the caller must
    /// dispose the page.
    pub fn release_object(&self) -> bool {
        let mut state = self.state.lock();
        debug_assert!(state.live_objects > 0, "release without a live object");
        state.live_objects = state.live_objects.saturating_sub(1);
        state.live_objects == 0 && !state.open
    }

    /// Snapshot of the header fields (for tests and diagnostics).
    #[must_use]
    pub fn inspect(&self) -> BucketView {
        let state = self.state.lock();
        BucketView {
            prealloc_remaining: state.prealloc_remaining,
            bytes_consumed: state.bytes_consumed,
            live_objects: state.live_objects,
            open: state.open,
        }
    }
}

fn close_locked(state: &mut BucketState) -> Closed {
    state.open = false;
    let closed = Closed {
        dispose: state.live_objects == 0,
        prealloc_remaining: state.prealloc_remaining,
    };
    // The closer takes the unclaimed tail with it.
    state.prealloc_remaining = 0;
    closed
}

/// Copy of a bucket header's fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketView {
    pub prealloc_remaining: u32,
    pub bytes_consumed: u32,
    pub live_objects: u32,
    pub open: bool,
}

/// Drop the header in place and unmap its page.
///
/// # Safety
///
/// The bucket must be closed with no live objects, the caller must be the
/// single thread that observed that condition, and no reference to the
/// header may outlive this call.
pub unsafe fn dispose<S: PageSource + ?Sized>(
    header: NonNull<BucketHeader>,
    source: &S,
    page_size: usize,
) -> Result<(), i32> {
    // SAFETY: caller holds the only path to the header.
    unsafe { header.drop_in_place() };
    global_counters().record_bucket_disposed();
    // SAFETY: the header page was produced by `source` and is no longer referenced.
    unsafe { source.unmap(header.cast::<u8>(), page_size) }
}
