use thiserror::Error;

/// The single error type of this crate.
///
/// Every fallible operation reports one of two reasons:
/// [`Busy`](LockError::Busy) when an acquisition or rename could not
/// complete within its deadline, and [`NotFound`](LockError::NotFound)
/// when a rename source does not exist.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    /// The lock could not be acquired (or the rename could not complete)
    /// before the deadline.
    #[error("busy: {0}")]
    Busy(String),

    /// The rename source path does not resolve to a live node.
    #[error("not found: {0}")]
    NotFound(String),
}

impl LockError {
    pub(crate) fn busy(path: impl Into<String>) -> Self {
        LockError::Busy(path.into())
    }

    pub(crate) fn not_found(path: impl Into<String>) -> Self {
        LockError::NotFound(path.into())
    }
}
