#![allow(unsafe_code)]

use std::ptr::NonNull;

use zerobucket_core::bucket::BUCKET_HEADER_SIZE;
use zerobucket_core::size_class::bucket_capacity;
use zerobucket_core::{
    Arena, GRANULARITY, RecordingPages, Released, SizeClass, classify, release,
};

#[derive(Clone, Copy, Debug)]
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    fn gen_range(&mut self, low: usize, high_inclusive: usize) -> usize {
        let span = high_inclusive - low + 1;
        low + (self.next_u64() as usize % span)
    }
}

fn bytes<'a>(ptr: NonNull<u8>, len: usize) -> &'a mut [u8] {
    // SAFETY: tests only pass live allocations of at least `len` bytes.
    unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), len) }
}

#[test]
fn boundary_sizes_route_to_expected_classes() {
    let mut arena = Arena::with_prealloc(RecordingPages::system(), 16);
    let page = arena.page_size();
    let header = BUCKET_HEADER_SIZE;

    let cases = [
        (page - header, SizeClass::Bucket),
        (page - header + 1, SizeClass::SinglePage),
        (page, SizeClass::SinglePage),
        (page + 1, SizeClass::MultiPage),
    ];
    for (size, class) in cases {
        let ptr = arena.allocate(size).expect("alloc");
        assert_eq!(classify(ptr.as_ptr() as usize, page), Some(class), "size {size}");
        bytes(ptr, size).fill(0x3C);
        // SAFETY: live allocation from this arena.
        let released = unsafe { release(arena.source(), page, ptr) };
        assert_eq!(released.class(), Some(class), "size {size}");
    }

    // pageSize + 1 needs the header word too: two pages.
    let ptr = arena.allocate(page + 1).expect("alloc");
    // SAFETY: live allocation from this arena.
    assert_eq!(
        unsafe { release(arena.source(), page, ptr) },
        Released::MultiPage { pages: 2 }
    );
}

#[test]
fn random_sizes_are_zeroed_aligned_and_classified() {
    let mut arena = Arena::with_prealloc(RecordingPages::system(), 8);
    let page = arena.page_size();
    let mut rng = XorShift64::new(0x5EED_0BAD_CAFE_F00D);

    let mut live = Vec::new();
    for _ in 0..2_000 {
        let size = match rng.gen_range(0, 9) {
            0 => rng.gen_range(page - 64, page + 64),
            1 => rng.gen_range(page + 1, 6 * page),
            _ => rng.gen_range(1, 512),
        };
        let ptr = arena.allocate(size).expect("alloc");
        let addr = ptr.as_ptr() as usize;
        assert_eq!(addr % GRANULARITY, 0);

        let expected = if size.next_multiple_of(GRANULARITY) <= bucket_capacity(page) {
            SizeClass::Bucket
        } else if size <= page {
            SizeClass::SinglePage
        } else {
            SizeClass::MultiPage
        };
        assert_eq!(classify(addr, page), Some(expected), "size {size}");

        let region = bytes(ptr, size);
        assert!(region.iter().all(|&b| b == 0), "size {size}");
        region.fill(0xFF);
        live.push(ptr);

        if live.len() > 64 {
            let victim = live.swap_remove(rng.gen_range(0, live.len() - 1));
            // SAFETY: live allocation from this arena.
            unsafe { release(arena.source(), page, victim) };
        }
    }
    for ptr in live {
        // SAFETY: live allocation from this arena.
        unsafe { release(arena.source(), page, ptr) };
    }
    arena.close_current();

    let recorded = arena.source().recorded();
    assert_eq!(recorded.bytes_mapped, recorded.bytes_unmapped);
}

#[test]
fn closed_bucket_stays_mapped_until_last_object() {
    let mut arena = Arena::with_prealloc(RecordingPages::system(), 2);
    let page = arena.page_size();
    let size = 96;
    let n = bucket_capacity(page) / size;

    let objects: Vec<_> = (0..n).map(|_| arena.allocate(size).expect("alloc")).collect();
    let header = objects[0].as_ptr() as usize - BUCKET_HEADER_SIZE;
    let spill = arena.allocate(size).expect("alloc");
    assert_ne!(spill.as_ptr() as usize & !(page - 1), header);

    for &ptr in &objects[..n - 1] {
        // SAFETY: live allocation from this arena.
        unsafe { release(arena.source(), page, ptr) };
        assert_eq!(arena.source().recorded().unmaps, 0);
    }
    // Survivor is still readable: its page was not unmapped.
    assert!(bytes(objects[n - 1], size).iter().all(|&b| b == 0));

    // SAFETY: last live object of the closed bucket.
    let released = unsafe { release(arena.source(), page, objects[n - 1]) };
    assert_eq!(released, Released::BucketObject { disposed: true });
    assert_eq!(arena.source().last_unmap(), Some((header, page)));

    // SAFETY: live allocation from this arena.
    unsafe { release(arena.source(), page, spill) };
}

#[test]
fn one_mapping_serves_a_whole_run_of_buckets() {
    let mut arena = Arena::with_prealloc(RecordingPages::system(), 16);
    let page = arena.page_size();
    let cap = bucket_capacity(page);

    let mut objects = Vec::new();
    for opened in 1..=16 {
        objects.push(arena.allocate(cap).expect("alloc"));
        assert_eq!(arena.stats().buckets_opened, opened);
        assert_eq!(arena.source().recorded().maps, 1);
    }
    objects.push(arena.allocate(cap).expect("alloc"));
    assert_eq!(arena.source().recorded().maps, 2);

    for ptr in objects {
        // SAFETY: live allocation from this arena.
        unsafe { release(arena.source(), page, ptr) };
    }
}
