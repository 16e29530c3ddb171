//! Preallocation tunable.
//!
//! The number of pages mapped per preallocation run is read from the
//! `ZEROBUCKET_PREALLOC_PAGES` environment variable on first use:
//! - unset or unparsable: [`DEFAULT_PREALLOC_PAGES`]
//! - otherwise the decimal value clamped to `1..=MAX_PREALLOC_PAGES`
//!
//! Raising it trades reserved-but-unused memory for fewer mapping calls.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Environment variable holding the preallocation run length.
pub const PREALLOC_ENV: &str = "ZEROBUCKET_PREALLOC_PAGES";

/// Pages mapped per run when nothing else is configured.
pub const DEFAULT_PREALLOC_PAGES: usize = 16;

/// Upper bound on the run length.
pub const MAX_PREALLOC_PAGES: usize = 1024;

// Atomic cache: 0=unresolved, usize::MAX=resolving, anything else=resolved.
// Reading the environment allocates, and allocation lands back here; a
// reentrant call during resolution sees RESOLVING and gets the default.
static CACHED_PREALLOC: AtomicUsize = AtomicUsize::new(UNRESOLVED);

const UNRESOLVED: usize = 0;
const RESOLVING: usize = usize::MAX;

/// Clamp a requested run length into the supported range.
#[must_use]
pub const fn clamp_prealloc(pages: usize) -> usize {
    if pages == 0 {
        1
    } else if pages > MAX_PREALLOC_PAGES {
        MAX_PREALLOC_PAGES
    } else {
        pages
    }
}

fn parse_prealloc_env(raw: &str) -> usize {
    match raw.trim().parse::<usize>() {
        Ok(pages) => clamp_prealloc(pages),
        Err(_) => DEFAULT_PREALLOC_PAGES,
    }
}

/// Pages mapped per preallocation run (reads the env var once, caches thereafter).
#[must_use]
pub fn prealloc_pages() -> usize {
    let cached = CACHED_PREALLOC.load(Ordering::Relaxed);
    if cached != UNRESOLVED && cached != RESOLVING {
        return cached;
    }
    if cached == RESOLVING {
        return DEFAULT_PREALLOC_PAGES;
    }

    if CACHED_PREALLOC
        .compare_exchange(UNRESOLVED, RESOLVING, Ordering::SeqCst, Ordering::Relaxed)
        .is_err()
    {
        let v = CACHED_PREALLOC.load(Ordering::Relaxed);
        return if v != UNRESOLVED && v != RESOLVING {
            v
        } else {
            DEFAULT_PREALLOC_PAGES
        };
    }

    let pages = std::env::var(PREALLOC_ENV)
        .map(|v| parse_prealloc_env(&v))
        .unwrap_or(DEFAULT_PREALLOC_PAGES);
    // A concurrent `set_prealloc_pages` wins over the environment.
    match CACHED_PREALLOC.compare_exchange(RESOLVING, pages, Ordering::Release, Ordering::Relaxed)
    {
        Ok(_) => pages,
        Err(current) => current,
    }
}

/// Override the run length for every arena created or refilled afterwards.
///
/// Returns the clamped value that is now in effect.
pub fn set_prealloc_pages(pages: usize) -> usize {
    let pages = clamp_prealloc(pages);
    CACHED_PREALLOC.store(pages, Ordering::Release);
    pages
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_env_values() {
        assert_eq!(parse_prealloc_env("16"), 16);
        assert_eq!(parse_prealloc_env(" 64 "), 64);
        assert_eq!(parse_prealloc_env("0"), 1);
        assert_eq!(parse_prealloc_env("1"), 1);
        assert_eq!(parse_prealloc_env("1000000"), MAX_PREALLOC_PAGES);
        assert_eq!(parse_prealloc_env("-3"), DEFAULT_PREALLOC_PAGES);
        assert_eq!(parse_prealloc_env("lots"), DEFAULT_PREALLOC_PAGES);
        assert_eq!(parse_prealloc_env(""), DEFAULT_PREALLOC_PAGES);
    }

    #[test]
    fn clamp_keeps_minimum_one() {
        assert_eq!(clamp_prealloc(0), 1);
        assert_eq!(clamp_prealloc(7), 7);
        assert_eq!(clamp_prealloc(MAX_PREALLOC_PAGES + 1), MAX_PREALLOC_PAGES);
    }

    #[test]
    fn cache_states() {
        let previous = CACHED_PREALLOC.swap(RESOLVING, Ordering::SeqCst);
        assert_eq!(prealloc_pages(), DEFAULT_PREALLOC_PAGES);

        CACHED_PREALLOC.store(32, Ordering::SeqCst);
        assert_eq!(prealloc_pages(), 32);
        assert_eq!(prealloc_pages(), 32);

        assert_eq!(set_prealloc_pages(0), 1);
        assert_eq!(prealloc_pages(), 1);

        CACHED_PREALLOC.store(previous, Ordering::SeqCst);
    }
}
