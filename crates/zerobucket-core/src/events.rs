//! Cold-path diagnostics.
//!
//! Every event goes through `tracing`, but only outside bucket locks and
//! arena borrows. A subscriber may allocate while recording; that allocation
//! re-enters the allocator, and the depth guard keeps it from logging again.

use std::cell::Cell;

use crate::stats::global_counters;

thread_local! {
    static DIAG_DEPTH: Cell<u32> = const { Cell::new(0) };
}

struct DiagGuard;

impl Drop for DiagGuard {
    fn drop(&mut self) {
        let _ = DIAG_DEPTH.try_with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

#[inline]
fn enter() -> Option<DiagGuard> {
    DIAG_DEPTH
        .try_with(|depth| {
            let current = depth.get();
            if current > 0 {
                None
            } else {
                depth.set(current + 1);
                Some(DiagGuard)
            }
        })
        .ok()
        .flatten()
}

pub(crate) fn run_mapped(base: usize, pages: usize) {
    if let Some(_guard) = enter() {
        tracing::trace!(base, pages, "mapped preallocation run");
    }
}

pub(crate) fn out_of_memory(bytes: usize, errno: i32) {
    global_counters().record_oom();
    if let Some(_guard) = enter() {
        tracing::error!(bytes, errno, "page mapping failed");
    }
}

pub(crate) fn unmap_failed(base: usize, len: usize, errno: i32) {
    global_counters().record_unmap_failure();
    if let Some(_guard) = enter() {
        tracing::warn!(base, len, errno, "page unmapping failed; range leaked");
    }
}

pub(crate) fn unrecognized_release(addr: usize) {
    if let Some(_guard) = enter() {
        tracing::warn!(addr, "release of a pointer this allocator never returns; ignored");
    }
}

pub(crate) fn thread_bucket_closed(disposed: bool, released_pages: usize) {
    if let Some(_guard) = enter() {
        tracing::debug!(disposed, released_pages, "closed thread bucket");
    }
}
