#![allow(unsafe_code)]

use std::collections::HashMap;
use std::sync::mpsc;

use zerobucket_core::{SizeClass, ZeroBucket, classify, global_counters, page_size};

#[global_allocator]
static ALLOC: ZeroBucket = ZeroBucket;

#[test]
fn std_collections_run_on_the_allocator() {
    let mut words: HashMap<String, usize> = HashMap::new();
    for i in 0..10_000 {
        *words.entry(format!("key-{}", i % 257)).or_default() += i;
    }
    assert_eq!(words.len(), 257);

    let mut grow = Vec::new();
    for i in 0..100_000u32 {
        grow.push(i);
    }
    assert_eq!(grow.iter().map(|&v| v as u64).sum::<u64>(), 4_999_950_000);
}

#[test]
fn boxes_land_in_their_size_class() {
    let page = page_size();
    let small = Box::new([0u8; 64]);
    let medium = vec![0u8; page];
    let large = vec![0u8; 3 * page];

    assert_eq!(
        classify(small.as_ptr() as usize, page),
        Some(SizeClass::Bucket)
    );
    assert_eq!(
        classify(medium.as_ptr() as usize, page),
        Some(SizeClass::SinglePage)
    );
    assert_eq!(
        classify(large.as_ptr() as usize, page),
        Some(SizeClass::MultiPage)
    );
    assert!(large.iter().all(|&b| b == 0));
}

#[test]
fn strings_cross_threads_and_die_elsewhere() {
    let before = global_counters().snapshot();
    let (tx, rx) = mpsc::channel::<String>();

    let producers: Vec<_> = (0..4)
        .map(|t| {
            let tx = tx.clone();
            std::thread::spawn(move || {
                for i in 0..2_000 {
                    tx.send(format!("thread {t} message {i}")).expect("receiver alive");
                }
            })
        })
        .collect();
    drop(tx);

    let consumer = std::thread::spawn(move || rx.into_iter().map(|s| s.len()).sum::<usize>());
    for handle in producers {
        handle.join().expect("producer panicked");
    }
    let total = consumer.join().expect("consumer panicked");
    assert!(total > 0);

    let delta = global_counters().snapshot().since(&before);
    assert!(delta.maps > 0);
    assert!(delta.buckets_disposed > 0);
}
