#![allow(unsafe_code)]

use zerobucket_core::config::{self, PREALLOC_ENV};
use zerobucket_core::size_class::bucket_capacity;
use zerobucket_core::{Arena, RecordingPages, release};

// Single test: the tunable is resolved once per process.
#[test]
fn environment_sets_the_run_length() {
    // SAFETY: no other thread of this test binary touches the environment.
    unsafe { std::env::set_var(PREALLOC_ENV, "3") };
    assert_eq!(config::prealloc_pages(), 3);

    let mut arena = Arena::new(RecordingPages::system());
    let page = arena.page_size();
    let cap = bucket_capacity(page);
    let objects: Vec<_> = (0..7).map(|_| arena.allocate(cap).expect("alloc")).collect();
    // Buckets 1-3 share a run, 4-6 the next, 7 starts a third.
    assert_eq!(arena.source().recorded().maps, 3);
    assert_eq!(arena.stats().prealloc_claims, 4);

    assert_eq!(config::set_prealloc_pages(5000), config::MAX_PREALLOC_PAGES);
    assert_eq!(arena.prealloc_pages(), config::MAX_PREALLOC_PAGES);

    for ptr in objects {
        // SAFETY: live allocation from this arena.
        unsafe { release(arena.source(), page, ptr) };
    }
}
