//! # zerobucket-core
//!
//! Zero-filling bucket allocator over anonymous page mappings.
//!
//! Every allocation comes from freshly mapped memory, so it reads as zero.
//! There are no free lists: small objects are carved sequentially from a
//! per-thread bucket page, mid-sized requests get a page of their own, and
//! large requests get a page run with a page-count header. A pointer's
//! offset within its page is enough to release it.
//!
//! Only the page-mapping, header-in-page, futex, thread-local and
//! `GlobalAlloc` modules use `unsafe`.

#![deny(unsafe_code)]

#[allow(unsafe_code)]
pub mod arena;
#[allow(unsafe_code)]
pub mod block;
#[allow(unsafe_code)]
pub mod bucket;
pub mod config;
pub mod error;
mod events;
#[allow(unsafe_code)]
pub mod futex;
#[allow(unsafe_code)]
pub mod global;
pub mod size_class;
pub mod stats;
#[allow(unsafe_code)]
pub mod thread;
#[allow(unsafe_code)]
pub mod vm;

pub use arena::{Arena, ArenaStats, CloseOutcome, Released, release};
pub use block::Block;
pub use error::AllocError;
pub use global::{ZeroBucket, allocate_layout};
pub use size_class::{GRANULARITY, SizeClass, classify};
pub use stats::{VmSnapshot, global_counters};
pub use thread::{allocate, free, page_size};
pub use vm::{PageSource, RecordingPages, SystemPages};
