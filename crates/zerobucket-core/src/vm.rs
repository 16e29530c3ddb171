//! Virtual-memory page source.
//!
//! [`PageSource`] is the seam between the allocator and the operating
//! system: anonymous, private, zero-filled, read/write page mappings.
//! [`SystemPages`] talks to `mmap`/`munmap`; [`RecordingPages`] wraps any
//! source and counts its traffic so tests can observe mapping behavior.
//!
//! Errors are raw errno values, mirroring the syscall convention.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::stats::global_counters;

/// Page size used when the environment cannot report one.
pub const FALLBACK_PAGE_SIZE: usize = 4096;

static PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);

/// Virtual-memory page size, queried once and cached.
#[must_use]
pub fn page_size() -> usize {
    let cached = PAGE_SIZE.load(Ordering::Relaxed);
    if cached != 0 {
        return cached;
    }
    // SAFETY: sysconf has no memory-safety preconditions.
    let raw = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    let size = if raw > 0 && (raw as usize).is_power_of_two() {
        raw as usize
    } else {
        FALLBACK_PAGE_SIZE
    };
    PAGE_SIZE.store(size, Ordering::Relaxed);
    size
}

/// Supplier of page-aligned, zero-filled memory.
pub trait PageSource {
    /// Map `len` bytes (a multiple of the page size).
    ///
    /// The returned range is page aligned, readable, writable and zeroed.
    fn map(&self, len: usize) -> Result<NonNull<u8>, i32>;

    /// Unmap `[ptr, ptr + len)`.
    ///
    /// # Safety
    ///
    /// The range must be page aligned, lie entirely inside mappings produced
    /// by `map` on this source, and must not be accessed afterwards.
    unsafe fn unmap(&self, ptr: NonNull<u8>, len: usize) -> Result<(), i32>;
}

impl<T: PageSource + ?Sized> PageSource for &T {
    #[inline]
    fn map(&self, len: usize) -> Result<NonNull<u8>, i32> {
        (**self).map(len)
    }

    #[inline]
    unsafe fn unmap(&self, ptr: NonNull<u8>, len: usize) -> Result<(), i32> {
        // SAFETY: forwarded caller contract.
        unsafe { (**self).unmap(ptr, len) }
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
const MAP_FLAGS: libc::c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_POPULATE;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const MAP_FLAGS: libc::c_int = libc::MAP_PRIVATE | libc::MAP_ANON;

#[inline]
fn last_errno() -> i32 {
    std::io::Error::last_os_error()
        .raw_os_error()
        .unwrap_or(libc::ENOMEM)
}

/// Anonymous private mappings straight from the kernel.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPages;

impl PageSource for SystemPages {
    fn map(&self, len: usize) -> Result<NonNull<u8>, i32> {
        // SAFETY: anonymous mapping with a null hint; no existing memory is touched.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                MAP_FLAGS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(last_errno());
        }
        global_counters().record_map(len / page_size());
        NonNull::new(ptr.cast::<u8>()).ok_or(libc::ENOMEM)
    }

    unsafe fn unmap(&self, ptr: NonNull<u8>, len: usize) -> Result<(), i32> {
        // SAFETY: caller guarantees the range is ours and no longer used.
        let rc = unsafe { libc::munmap(ptr.as_ptr().cast::<libc::c_void>(), len) };
        if rc != 0 {
            return Err(last_errno());
        }
        global_counters().record_unmap(len / page_size());
        Ok(())
    }
}

/// Counting wrapper around another page source.
///
/// Keeps totals plus the most recent unmapped range; allocation free, so it
/// is safe to use beneath a global allocator.
#[derive(Debug, Default)]
pub struct RecordingPages<S = SystemPages> {
    inner: S,
    maps: AtomicU64,
    unmaps: AtomicU64,
    bytes_mapped: AtomicU64,
    bytes_unmapped: AtomicU64,
    last_unmap_base: AtomicUsize,
    last_unmap_len: AtomicUsize,
}

/// Totals observed by a [`RecordingPages`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Recorded {
    pub maps: u64,
    pub unmaps: u64,
    pub bytes_mapped: u64,
    pub bytes_unmapped: u64,
}

impl RecordingPages<SystemPages> {
    /// Record traffic to the system page source.
    #[must_use]
    pub const fn system() -> Self {
        Self::new(SystemPages)
    }
}

impl<S> RecordingPages<S> {
    /// Wrap `inner`.
    #[must_use]
    pub const fn new(inner: S) -> Self {
        Self {
            inner,
            maps: AtomicU64::new(0),
            unmaps: AtomicU64::new(0),
            bytes_mapped: AtomicU64::new(0),
            bytes_unmapped: AtomicU64::new(0),
            last_unmap_base: AtomicUsize::new(0),
            last_unmap_len: AtomicUsize::new(0),
        }
    }

    /// Current totals.
    #[must_use]
    pub fn recorded(&self) -> Recorded {
        Recorded {
            maps: self.maps.load(Ordering::Acquire),
            unmaps: self.unmaps.load(Ordering::Acquire),
            bytes_mapped: self.bytes_mapped.load(Ordering::Acquire),
            bytes_unmapped: self.bytes_unmapped.load(Ordering::Acquire),
        }
    }

    /// Base address and length of the most recent successful unmap.
    #[must_use]
    pub fn last_unmap(&self) -> Option<(usize, usize)> {
        let base = self.last_unmap_base.load(Ordering::Acquire);
        (base != 0).then(|| (base, self.last_unmap_len.load(Ordering::Acquire)))
    }
}

impl<S: PageSource> PageSource for RecordingPages<S> {
    fn map(&self, len: usize) -> Result<NonNull<u8>, i32> {
        let ptr = self.inner.map(len)?;
        self.maps.fetch_add(1, Ordering::AcqRel);
        self.bytes_mapped.fetch_add(len as u64, Ordering::AcqRel);
        Ok(ptr)
    }

    unsafe fn unmap(&self, ptr: NonNull<u8>, len: usize) -> Result<(), i32> {
        // SAFETY: forwarded caller contract.
        unsafe { self.inner.unmap(ptr, len) }?;
        self.last_unmap_len.store(len, Ordering::Release);
        self.last_unmap_base
            .store(ptr.as_ptr() as usize, Ordering::Release);
        self.unmaps.fetch_add(1, Ordering::AcqRel);
        self.bytes_unmapped.fetch_add(len as u64, Ordering::AcqRel);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_is_power_of_two_and_cached() {
        let first = page_size();
        assert!(first.is_power_of_two());
        assert!(first >= 4096);
        assert_eq!(page_size(), first);
    }

    #[test]
    fn system_mapping_is_zeroed_and_writable() {
        let page = page_size();
        let ptr = SystemPages.map(2 * page).expect("mmap");
        assert_eq!(ptr.as_ptr() as usize % page, 0);

        // SAFETY: fresh mapping of 2 pages.
        let bytes = unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), 2 * page) };
        assert!(bytes.iter().all(|&b| b == 0));
        bytes[0] = 0xAA;
        bytes[2 * page - 1] = 0x55;

        // SAFETY: unmapping exactly what we mapped.
        unsafe { SystemPages.unmap(ptr, 2 * page) }.expect("munmap");
    }

    #[test]
    fn unmap_of_misaligned_range_reports_errno() {
        let page = page_size();
        let ptr = SystemPages.map(page).expect("mmap");
        let misaligned = NonNull::new(ptr.as_ptr().wrapping_add(1)).expect("non-null");
        // SAFETY: the kernel rejects the misaligned address before touching anything.
        let err = unsafe { SystemPages.unmap(misaligned, page) }.unwrap_err();
        assert_eq!(err, libc::EINVAL);
        // SAFETY: unmapping exactly what we mapped.
        unsafe { SystemPages.unmap(ptr, page) }.expect("munmap");
    }

    #[test]
    fn recording_counts_traffic() {
        let page = page_size();
        let rec = RecordingPages::system();
        assert_eq!(rec.last_unmap(), None);

        let a = rec.map(page).expect("mmap");
        let b = (&rec).map(3 * page).expect("mmap");
        // SAFETY: ranges come from `rec.map`.
        unsafe {
            rec.unmap(a, page).expect("munmap");
            rec.unmap(b, 3 * page).expect("munmap");
        }

        let seen = rec.recorded();
        assert_eq!(seen.maps, 2);
        assert_eq!(seen.unmaps, 2);
        assert_eq!(seen.bytes_mapped, 4 * page as u64);
        assert_eq!(seen.bytes_unmapped, 4 * page as u64);
        assert_eq!(rec.last_unmap(), Some((b.as_ptr() as usize, 3 * page)));
    }
}
