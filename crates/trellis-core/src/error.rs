//! Error types for Trellis core.

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the observation and lifecycle layers.
///
/// Errors are cheap to clone so a single task failure can be delivered to
/// every waiter of an aggregate task.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A host-provided function reported a failure.
    #[error("{0}")]
    Host(String),

    /// Dirty checking is configured to throw instead of silently polling.
    #[error("Property '{property}' cannot be observed without dirty checking")]
    DirtyCheckRefused {
        /// The property that required the dirty-check fallback.
        property: String,
    },

    /// A write would grow an array past [`ArrayRef::MAX_LEN`](crate::ArrayRef::MAX_LEN).
    #[error("Array length {requested} exceeds the maximum of {max}")]
    ArrayTooLong {
        /// The length the write asked for.
        requested: usize,
        /// The maximum length.
        max: usize,
    },

    /// A lifecycle task was rejected.
    #[error("Lifecycle task rejected: {reason}")]
    TaskRejected {
        /// The rejection reason.
        reason: String,
    },
}

impl Error {
    /// Create a host error.
    pub fn host(message: impl Into<String>) -> Self {
        Self::Host(message.into())
    }

    /// Create a task rejection error.
    pub fn task_rejected(reason: impl Into<String>) -> Self {
        Self::TaskRejected {
            reason: reason.into(),
        }
    }
}

static_assertions::assert_impl_all!(Error: Send, Sync, Clone);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(Error::host("boom").to_string(), "boom");
        assert_eq!(
            Error::DirtyCheckRefused {
                property: "name".into()
            }
            .to_string(),
            "Property 'name' cannot be observed without dirty checking"
        );
        assert_eq!(
            Error::ArrayTooLong { requested: 10, max: 4 }.to_string(),
            "Array length 10 exceeds the maximum of 4"
        );
        assert_eq!(
            Error::task_rejected("swap failed").to_string(),
            "Lifecycle task rejected: swap failed"
        );
    }
}
