//! Multi-threaded stress workloads over [`Block`].
//!
//! Each worker keeps a sliding window of live blocks. New blocks are checked
//! for zero fill and stamped with a per-block byte; retired blocks are
//! checked for that byte before they are released. With handoff enabled,
//! retired blocks travel to a partner thread which verifies and drops them,
//! so most releases happen off the allocating thread.

use std::collections::VecDeque;
use std::sync::mpsc;
use std::time::Instant;

use serde::Serialize;
use zerobucket_core::{Block, SizeClass, VmSnapshot, global_counters};

use crate::HarnessError;
use crate::rng::XorShift64;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StressConfig {
    pub threads: usize,
    pub ops_per_thread: usize,
    /// Largest request; sizes above one page appear with low probability.
    pub max_size: usize,
    /// Live blocks kept per worker before the oldest is retired.
    pub window: usize,
    pub seed: u64,
    /// Release retired blocks on a partner thread.
    pub handoff: bool,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            ops_per_thread: 50_000,
            max_size: 64 * 1024,
            window: 256,
            seed: 0xB0C7_E7A1_10C5_EED5,
            handoff: false,
        }
    }
}

impl StressConfig {
    pub fn validate(&self) -> Result<(), HarnessError> {
        if self.threads == 0 {
            return Err(HarnessError::InvalidArgument {
                name: "threads",
                reason: "must be at least 1".into(),
            });
        }
        if self.max_size == 0 {
            return Err(HarnessError::InvalidArgument {
                name: "max_size",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

/// Per-class allocation counts.
#[derive(Debug, Default, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct ClassCounts {
    pub bucket: u64,
    pub single_page: u64,
    pub multi_page: u64,
}

impl ClassCounts {
    fn record(&mut self, class: Option<SizeClass>) {
        match class {
            Some(SizeClass::Bucket) => self.bucket += 1,
            Some(SizeClass::SinglePage) => self.single_page += 1,
            Some(SizeClass::MultiPage) => self.multi_page += 1,
            None => {}
        }
    }

    fn merge(&mut self, other: &Self) {
        self.bucket += other.bucket;
        self.single_page += other.single_page;
        self.multi_page += other.multi_page;
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.bucket + self.single_page + self.multi_page
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    classes: ClassCounts,
    bytes_requested: u64,
    zero_fill_violations: u64,
    pattern_violations: u64,
    released_remotely: u64,
}

impl Tally {
    fn merge(&mut self, other: &Self) {
        self.classes.merge(&other.classes);
        self.bytes_requested += other.bytes_requested;
        self.zero_fill_violations += other.zero_fill_violations;
        self.pattern_violations += other.pattern_violations;
        self.released_remotely += other.released_remotely;
    }
}

/// VM counter movement during the run.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct VmDelta {
    pub maps: u64,
    pub unmaps: u64,
    pub pages_mapped: u64,
    pub pages_unmapped: u64,
    pub unmap_failures: u64,
    pub oom_events: u64,
    pub buckets_disposed: u64,
}

impl From<VmSnapshot> for VmDelta {
    fn from(s: VmSnapshot) -> Self {
        Self {
            maps: s.maps,
            unmaps: s.unmaps,
            pages_mapped: s.pages_mapped,
            pages_unmapped: s.pages_unmapped,
            unmap_failures: s.unmap_failures,
            oom_events: s.oom_events,
            buckets_disposed: s.buckets_disposed,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StressReport {
    pub config: StressConfig,
    pub allocations: ClassCounts,
    pub bytes_requested: u64,
    pub zero_fill_violations: u64,
    pub pattern_violations: u64,
    pub released_remotely: u64,
    pub vm: VmDelta,
    pub elapsed_ms: u64,
    pub ops_per_sec: f64,
}

impl StressReport {
    /// No block ever came back dirty or corrupted.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.zero_fill_violations == 0 && self.pattern_violations == 0
    }
}

fn pick_size(rng: &mut XorShift64, max_size: usize, page: usize) -> usize {
    let small_max = max_size.min(page / 4).max(1);
    if max_size <= small_max || rng.chance(90) {
        rng.gen_range(1, small_max)
    } else if max_size <= page || rng.chance(70) {
        rng.gen_range(small_max, max_size.min(page))
    } else {
        rng.gen_range(page + 1, max_size)
    }
}

fn stamp(seed: u64) -> u8 {
    (seed as u8) | 1
}

fn check_stamp(block: &Block, byte: u8, tally: &mut Tally) {
    if block.as_slice().iter().any(|&b| b != byte) {
        tally.pattern_violations += 1;
    }
}

fn worker(
    index: usize,
    config: &StressConfig,
    handoff: Option<mpsc::SyncSender<(Block, u8)>>,
) -> Result<Tally, HarnessError> {
    let page = zerobucket_core::page_size();
    let mut rng = XorShift64::new(config.seed ^ (index as u64).wrapping_mul(0x9E37_79B9));
    let mut tally = Tally::default();
    let mut window: VecDeque<(Block, u8)> = VecDeque::with_capacity(config.window + 1);

    for _ in 0..config.ops_per_thread {
        let size = pick_size(&mut rng, config.max_size, page);
        let mut block = Block::new(size)?;
        tally.classes.record(block.size_class());
        tally.bytes_requested += size as u64;
        if block.as_slice().iter().any(|&b| b != 0) {
            tally.zero_fill_violations += 1;
        }
        let byte = stamp(rng.next_u64());
        block.as_mut_slice().fill(byte);
        window.push_back((block, byte));

        if window.len() > config.window {
            if let Some((retired, byte)) = window.pop_front() {
                match &handoff {
                    Some(tx) => {
                        // A vanished partner means it already failed; drop locally.
                        if let Err(mpsc::SendError(returned)) = tx.send((retired, byte)) {
                            check_stamp(&returned.0, returned.1, &mut tally);
                        }
                    }
                    None => check_stamp(&retired, byte, &mut tally),
                }
            }
        }
    }
    for (block, byte) in window {
        check_stamp(&block, byte, &mut tally);
    }
    Ok(tally)
}

fn partner(rx: mpsc::Receiver<(Block, u8)>) -> Tally {
    let mut tally = Tally::default();
    for (block, byte) in rx {
        check_stamp(&block, byte, &mut tally);
        tally.released_remotely += 1;
    }
    tally
}

/// Run the workload described by `config`.
pub fn run_stress(config: &StressConfig) -> Result<StressReport, HarnessError> {
    config.validate()?;
    let before = global_counters().snapshot();
    let started = Instant::now();

    let tallies: Vec<Result<Tally, HarnessError>> = std::thread::scope(|scope| {
        let mut workers = Vec::with_capacity(config.threads);
        let mut partners = Vec::new();
        for index in 0..config.threads {
            let tx = if config.handoff {
                let (tx, rx) = mpsc::sync_channel(config.window.max(1));
                partners.push(scope.spawn(move || partner(rx)));
                Some(tx)
            } else {
                None
            };
            workers.push(scope.spawn(move || worker(index, config, tx)));
        }

        let mut out: Vec<Result<Tally, HarnessError>> = workers
            .into_iter()
            .enumerate()
            .map(|(index, handle)| {
                handle
                    .join()
                    .unwrap_or(Err(HarnessError::WorkerPanicked { index }))
            })
            .collect();
        out.extend(partners.into_iter().enumerate().map(|(index, handle)| {
            handle
                .join()
                .map_err(|_| HarnessError::WorkerPanicked { index })
        }));
        out
    });

    let mut total = Tally::default();
    for tally in tallies {
        total.merge(&tally?);
    }

    let elapsed = started.elapsed();
    let ops = (config.threads * config.ops_per_thread) as f64;
    let vm = global_counters().snapshot().since(&before);
    Ok(StressReport {
        config: config.clone(),
        allocations: total.classes,
        bytes_requested: total.bytes_requested,
        zero_fill_violations: total.zero_fill_violations,
        pattern_violations: total.pattern_violations,
        released_remotely: total.released_remotely,
        vm: vm.into(),
        elapsed_ms: elapsed.as_millis() as u64,
        ops_per_sec: if elapsed.as_secs_f64() > 0.0 {
            ops / elapsed.as_secs_f64()
        } else {
            ops
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_stay_in_range() {
        let page = 4096;
        let mut rng = XorShift64::new(9);
        for _ in 0..10_000 {
            let size = pick_size(&mut rng, 3 * page, page);
            assert!((1..=3 * page).contains(&size));
        }
        for _ in 0..1_000 {
            assert!(pick_size(&mut rng, 40, page) <= 40);
        }
    }

    #[test]
    fn validate_rejects_empty_runs() {
        let config = StressConfig {
            threads: 0,
            ..StressConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(HarnessError::InvalidArgument { name: "threads", .. })
        ));
    }

    #[test]
    fn small_local_run_is_clean() {
        let config = StressConfig {
            threads: 2,
            ops_per_thread: 2_000,
            window: 32,
            ..StressConfig::default()
        };
        let report = run_stress(&config).unwrap();
        assert!(report.passed());
        assert_eq!(report.allocations.total(), 4_000);
        assert_eq!(report.released_remotely, 0);
        assert!(report.vm.maps > 0);
    }
}
