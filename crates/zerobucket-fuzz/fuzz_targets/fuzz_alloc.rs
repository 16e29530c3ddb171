#![no_main]
use libfuzzer_sys::fuzz_target;
use zerobucket_core::{Arena, RecordingPages, Released, SizeClass, classify, release};

// Each 4-byte chunk: op, size (u16 LE, scaled by the last byte).
fuzz_target!(|data: &[u8]| {
    if data.len() < 4 {
        return;
    }

    let source = RecordingPages::system();
    let mut arena = Arena::with_prealloc(&source, 1 + (data[0] as usize % 16));
    let page = arena.page_size();
    let mut live: Vec<(std::ptr::NonNull<u8>, usize, u8)> = Vec::new();

    for chunk in data.chunks_exact(4) {
        let size = u16::from_le_bytes([chunk[1], chunk[2]]) as usize * (1 + chunk[3] as usize % 4);
        match chunk[0] % 4 {
            0 | 1 => {
                let Ok(ptr) = arena.allocate(size) else {
                    continue;
                };
                assert_eq!(ptr.as_ptr() as usize % 16, 0);
                // SAFETY: fresh allocation of at least `size` bytes.
                let bytes = unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), size) };
                assert!(bytes.iter().all(|&b| b == 0));
                bytes.fill(chunk[3]);
                live.push((ptr, size, chunk[3]));
            }
            2 => {
                if live.is_empty() {
                    continue;
                }
                let (ptr, size, byte) = live.swap_remove(chunk[1] as usize % live.len());
                // SAFETY: still live; checked before release.
                let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), size) };
                assert!(bytes.iter().all(|&b| b == byte));
                let class = classify(ptr.as_ptr() as usize, page);
                // SAFETY: live allocation from this arena, released once.
                let released = unsafe { release(&source, page, ptr) };
                assert_eq!(released.class(), class);
                assert_ne!(released, Released::Unrecognized);
            }
            _ => {
                if arena.close_current().is_some() {
                    assert!(arena.current_bucket().is_none());
                }
            }
        }
    }

    for (ptr, _, _) in live.drain(..) {
        let class = classify(ptr.as_ptr() as usize, page);
        assert!(matches!(
            class,
            Some(SizeClass::Bucket | SizeClass::SinglePage | SizeClass::MultiPage)
        ));
        // SAFETY: live allocation from this arena, released once.
        unsafe { release(&source, page, ptr) };
    }
    drop(arena);

    let recorded = source.recorded();
    assert_eq!(recorded.bytes_mapped, recorded.bytes_unmapped);
});
