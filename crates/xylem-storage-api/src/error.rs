// SPDX-License-Identifier: Apache-2.0
//! Error taxonomy for the storage contracts (`spec.md` "Error Handling Design").

use crate::ident::{NodeKey, PageKey};

/// Failure modes a [`crate::traits::StorageEngineReader`] or
/// [`crate::traits::StorageEngineWriter`] may report.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// No slot exists for the given key.
    #[error("node {0} not found")]
    NotFound(NodeKey),

    /// A page's bytes could not be decoded into the expected record shape.
    #[error("page {page:?} is corrupt: {reason}")]
    Corrupt {
        /// The offending page.
        page: PageKey,
        /// Human-readable description of what failed to decode.
        reason: String,
    },

    /// The underlying medium (disk, network, in-memory bound) failed.
    #[error("storage I/O error: {0}")]
    Io(String),
}

impl StorageError {
    /// Builds a [`StorageError::Corrupt`] from a page key and a reason.
    #[must_use]
    pub fn corrupt(page: PageKey, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            page,
            reason: reason.into(),
        }
    }
}
