// SPDX-License-Identifier: Apache-2.0
//! Error taxonomy for the node transaction layer (`spec.md` §7).

use xylem_storage_api::StorageError;

/// Errors surfaced across the cursor, write-transaction, and session APIs.
#[derive(Debug, thiserror::Error)]
pub enum TxnError {
    /// The underlying storage engine failed. Fatal for the affected transaction.
    #[error("storage I/O error: {0}")]
    Io(#[from] StorageError),

    /// A precondition was violated: closed transaction, unsupported custom
    /// timestamp, negative max-node-count, commit conflict, write-lock timeout.
    #[error("usage error: {0}")]
    UsageError(String),

    /// An internal invariant was violated: unexpected singleton kind,
    /// duplicate transaction ID. Indicates a bug in this crate, not misuse.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// A path expression failed to parse during filter construction.
    #[error("path expression error: {0}")]
    PathException(String),

    /// The calling thread was interrupted while waiting on a semaphore.
    #[error("interrupted while waiting: {0}")]
    Interrupted(String),
}

impl TxnError {
    /// Builds a [`TxnError::UsageError`] from a display-able reason.
    #[must_use]
    pub fn usage(reason: impl Into<String>) -> Self {
        Self::UsageError(reason.into())
    }

    /// Builds a [`TxnError::IllegalState`] from a display-able reason.
    #[must_use]
    pub fn illegal_state(reason: impl Into<String>) -> Self {
        Self::IllegalState(reason.into())
    }
}

/// Convenience alias used throughout this crate's public APIs.
pub type TxnResult<T> = Result<T, TxnError>;
