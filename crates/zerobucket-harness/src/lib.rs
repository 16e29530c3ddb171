//! Stress and inspection tooling for zerobucket.
//!
//! This crate provides:
//! - Stress runs: multi-threaded allocate/verify/release workloads with
//!   optional cross-thread handoff, summarized as a JSON report
//! - Geometry: the page and header arithmetic the allocator runs with
//! - Classification: which size class a request lands in
//! - Structured logging: JSONL records for every harness step

#![forbid(unsafe_code)]

pub mod error;
pub mod geometry;
pub mod rng;
pub mod structured_log;
pub mod workload;

pub use error::HarnessError;
pub use geometry::{Geometry, SizeReport};
pub use workload::{StressConfig, StressReport};
