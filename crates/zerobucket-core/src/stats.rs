//! Process-wide virtual-memory counters.
//!
//! Updated with relaxed atomics from the system page source and the
//! disposal paths; readers get a point-in-time [`VmSnapshot`].

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for mapping traffic and disposal events.
pub struct VmCounters {
    /// Successful mapping calls.
    pub maps: AtomicU64,
    /// Successful unmapping calls.
    pub unmaps: AtomicU64,
    /// Pages handed out by mapping calls.
    pub pages_mapped: AtomicU64,
    /// Pages returned by unmapping calls.
    pub pages_unmapped: AtomicU64,
    /// Unmapping calls that failed and were ignored.
    pub unmap_failures: AtomicU64,
    /// Allocation requests refused for lack of memory.
    pub oom_events: AtomicU64,
    /// Bucket pages disposed after closing with no live objects.
    pub buckets_disposed: AtomicU64,
}

/// Point-in-time copy of [`VmCounters`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct VmSnapshot {
    pub maps: u64,
    pub unmaps: u64,
    pub pages_mapped: u64,
    pub pages_unmapped: u64,
    pub unmap_failures: u64,
    pub oom_events: u64,
    pub buckets_disposed: u64,
}

impl VmSnapshot {
    /// Pages currently mapped according to the counters.
    #[must_use]
    pub const fn pages_resident(&self) -> u64 {
        self.pages_mapped.saturating_sub(self.pages_unmapped)
    }

    /// Field-wise difference `self - earlier`, saturating at zero.
    #[must_use]
    pub const fn since(&self, earlier: &Self) -> Self {
        Self {
            maps: self.maps.saturating_sub(earlier.maps),
            unmaps: self.unmaps.saturating_sub(earlier.unmaps),
            pages_mapped: self.pages_mapped.saturating_sub(earlier.pages_mapped),
            pages_unmapped: self.pages_unmapped.saturating_sub(earlier.pages_unmapped),
            unmap_failures: self.unmap_failures.saturating_sub(earlier.unmap_failures),
            oom_events: self.oom_events.saturating_sub(earlier.oom_events),
            buckets_disposed: self.buckets_disposed.saturating_sub(earlier.buckets_disposed),
        }
    }
}

impl VmCounters {
    /// Create zeroed counters.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            maps: AtomicU64::new(0),
            unmaps: AtomicU64::new(0),
            pages_mapped: AtomicU64::new(0),
            pages_unmapped: AtomicU64::new(0),
            unmap_failures: AtomicU64::new(0),
            oom_events: AtomicU64::new(0),
            buckets_disposed: AtomicU64::new(0),
        }
    }

    pub(crate) fn record_map(&self, pages: usize) {
        self.maps.fetch_add(1, Ordering::Relaxed);
        self.pages_mapped.fetch_add(pages as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_unmap(&self, pages: usize) {
        self.unmaps.fetch_add(1, Ordering::Relaxed);
        self.pages_unmapped.fetch_add(pages as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_unmap_failure(&self) {
        self.unmap_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_oom(&self) {
        self.oom_events.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_bucket_disposed(&self) {
        self.buckets_disposed.fetch_add(1, Ordering::Relaxed);
    }

    /// Read every counter.
    #[must_use]
    pub fn snapshot(&self) -> VmSnapshot {
        VmSnapshot {
            maps: self.maps.load(Ordering::Relaxed),
            unmaps: self.unmaps.load(Ordering::Relaxed),
            pages_mapped: self.pages_mapped.load(Ordering::Relaxed),
            pages_unmapped: self.pages_unmapped.load(Ordering::Relaxed),
            unmap_failures: self.unmap_failures.load(Ordering::Relaxed),
            oom_events: self.oom_events.load(Ordering::Relaxed),
            buckets_disposed: self.buckets_disposed.load(Ordering::Relaxed),
        }
    }
}

impl Default for VmCounters {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL_COUNTERS: VmCounters = VmCounters::new();

/// Access the process-wide counters.
#[must_use]
pub fn global_counters() -> &'static VmCounters {
    &GLOBAL_COUNTERS
}
