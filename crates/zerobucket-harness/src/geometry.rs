//! Allocator geometry and per-size routing, as serializable records.

use serde::Serialize;
use zerobucket_core::bucket::BUCKET_HEADER_SIZE;
use zerobucket_core::config;
use zerobucket_core::size_class::{self, GRANULARITY, LARGE_HEADER_SIZE, SizeClass};

use crate::HarnessError;

/// Constants the allocator derives from the page size.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Geometry {
    pub page_size: usize,
    pub granularity: usize,
    pub bucket_header_size: usize,
    pub bucket_capacity: usize,
    pub large_header_size: usize,
    pub prealloc_pages: usize,
}

impl Geometry {
    #[must_use]
    pub fn current() -> Self {
        let page_size = zerobucket_core::page_size();
        Self {
            page_size,
            granularity: GRANULARITY,
            bucket_header_size: BUCKET_HEADER_SIZE,
            bucket_capacity: size_class::bucket_capacity(page_size),
            large_header_size: LARGE_HEADER_SIZE,
            prealloc_pages: config::prealloc_pages(),
        }
    }

    /// Where a request of `requested` bytes goes.
    pub fn route(&self, requested: usize) -> Result<SizeReport, HarnessError> {
        let rounded = size_class::align_up(requested.max(1)).ok_or_else(|| {
            HarnessError::InvalidArgument {
                name: "size",
                reason: format!("{requested} overflows when rounded"),
            }
        })?;
        let class = size_class::route(rounded, self.page_size);
        let (pages, per_bucket) = match class {
            SizeClass::Bucket => (0, self.bucket_capacity / rounded),
            SizeClass::SinglePage => (1, 0),
            SizeClass::MultiPage => {
                let pages = size_class::pages_for(rounded, self.page_size).ok_or_else(|| {
                    HarnessError::InvalidArgument {
                        name: "size",
                        reason: format!("{requested} needs more pages than fit in usize"),
                    }
                })?;
                (pages, 0)
            }
        };
        Ok(SizeReport {
            requested,
            rounded,
            class: class.as_str(),
            pages,
            objects_per_bucket: per_bucket,
        })
    }
}

/// Routing of one request size.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SizeReport {
    pub requested: usize,
    pub rounded: usize,
    pub class: &'static str,
    /// Pages mapped for this request alone (0 for bucket objects).
    pub pages: usize,
    /// How many such requests fill one bucket (0 outside the bucket class).
    pub objects_per_bucket: usize,
}
