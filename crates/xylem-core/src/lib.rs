// SPDX-License-Identifier: Apache-2.0
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]
//! Node transaction layer: cursor navigation, structural hashing, index
//! dispatch, write transactions, and resource sessions over a
//! `xylem-storage-api` backend.
//!
//! Module map:
//! - [`cursor`]: zero-allocation, singleton-rebind node-tree navigation.
//! - [`hash`]: rolling and postorder subtree hash maintenance.
//! - [`item_list`]: per-transaction transient node table.
//! - [`index`]: secondary-index change notification dispatch.
//! - [`txn`]: the write-transaction state machine and commit protocol.
//! - [`session`]: revision history, the write lock, and point-in-time reads.

pub mod cursor;
pub mod error;
pub mod hash;
pub mod index;
pub mod item_list;
pub mod session;
pub mod txn;

pub use cursor::{Cursor, CursorCheckpoint, CursorTarget};
pub use error::{TxnError, TxnResult};
pub use hash::{HashMode, ROLLING_PRIME};
pub use index::{
    CasRange, ChangeEvent, ChangeKind, ChangeListener, FilterFactory, IndexController, IndexKind, PathExpressionParser,
    PathFilter, PrimitiveChangeEvent, PrimitiveChangeListener,
};
pub use item_list::ItemList;
pub use session::{ReadPoint, ResourceSession, RevisionHistoryEntry, TxnId, DEFAULT_WRITE_LOCK_TIMEOUT};
pub use txn::{AfterCommitState, DiffTuple, PostCommitHook, PreCommitHook, TxnSnapshot, TxnState, WriteTxn};
