use thiserror::Error;
use zerobucket_core::AllocError;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("allocation failed: {0}")]
    Alloc(#[from] AllocError),
    #[error("invalid argument `{name}`: {reason}")]
    InvalidArgument { name: &'static str, reason: String },
    #[error("worker thread {index} panicked")]
    WorkerPanicked { index: usize },
}

impl HarnessError {
    /// The allocator's errno when the failure came from an allocation.
    #[must_use]
    pub const fn errno(&self) -> Option<i32> {
        match self {
            Self::Alloc(err) => Some(err.errno()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_allocation_failures_carry_errno() {
        let cause = AllocError::OutOfMemory {
            bytes: 4096,
            errno: 12,
        };
        assert_eq!(HarnessError::from(cause).errno(), Some(cause.errno()));
        assert_eq!(HarnessError::WorkerPanicked { index: 1 }.errno(), None);
    }
}
