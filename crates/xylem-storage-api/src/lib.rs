// SPDX-License-Identifier: Apache-2.0
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]
//! Page/record storage contracts consumed by the node transaction layer.
//!
//! This crate defines the vocabulary a storage engine must expose to back a
//! resource's node transaction layer — [`traits::StorageEngineReader`],
//! [`traits::StorageEngineWriter`], [`traits::PageStorageEngine`],
//! [`traits::RecordPersister`] — plus the [`node::Node`] record shape itself
//! and a single in-memory reference backend ([`memory::InMemoryPageStore`])
//! sufficient to exercise those contracts in tests. It does not implement a
//! production page cache, on-disk format, or durability story.

pub mod error;
pub mod guard;
pub mod ident;
pub mod memory;
pub mod node;
pub mod traits;

pub use error::StorageError;
pub use guard::{PageGuard, PageHandle, PageReleaser};
pub use ident::{DeweyId, ItemListKey, NodeKey, PageKey, SlotOffset, DOCUMENT_ROOT, NO_KEY};
pub use memory::{InMemoryPageStore, NaiveRecordPersister};
pub use node::{Node, NodeKind, NodeKindFamily, NodeValue};
pub use traits::{PageStorageEngine, RecordPersister, StorageEngineReader, StorageEngineWriter};
