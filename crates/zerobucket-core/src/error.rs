//! Allocation errors.

use thiserror::Error;

/// Failure to serve an allocation request.
///
/// Release never fails: an unexpected unmap failure is counted and logged,
/// since the caller could not act on it anyway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    /// The virtual-memory subsystem refused a mapping.
    #[error("out of memory: mapping {bytes} bytes failed (errno {errno})")]
    OutOfMemory { bytes: usize, errno: i32 },
    /// The request cannot be rounded or paged without overflowing `usize`.
    #[error("request of {requested} bytes overflows the address space")]
    SizeOverflow { requested: usize },
    /// The alignment cannot be honored for this size.
    #[error("alignment {align} is unsupported for a {size}-byte request")]
    UnsupportedAlignment { align: usize, size: usize },
}

impl AllocError {
    /// The errno a C caller should observe for this failure.
    #[must_use]
    pub const fn errno(&self) -> i32 {
        match self {
            Self::OutOfMemory { .. } | Self::SizeOverflow { .. } => libc::ENOMEM,
            Self::UnsupportedAlignment { .. } => libc::EINVAL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_failure() {
        let oom = AllocError::OutOfMemory {
            bytes: 65536,
            errno: libc::ENOMEM,
        };
        assert!(oom.to_string().contains("65536"));

        let overflow = AllocError::SizeOverflow {
            requested: usize::MAX,
        };
        assert!(overflow.to_string().contains("overflows"));
    }

    #[test]
    fn errno_mapping() {
        assert_eq!(
            AllocError::SizeOverflow { requested: 1 }.errno(),
            libc::ENOMEM
        );
        assert_eq!(
            AllocError::UnsupportedAlignment {
                align: 8192,
                size: 1 << 20
            }
            .errno(),
            libc::EINVAL
        );
    }
}
