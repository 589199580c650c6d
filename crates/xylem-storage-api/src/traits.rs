// SPDX-License-Identifier: Apache-2.0
//! Collaborator contracts the node transaction layer depends on but does not
//! implement (`spec.md`, out-of-scope collaborators).
//!
//! Every trait here is object-safe: no generic methods, no `impl Trait`
//! return positions, so engines can be held as `Arc<dyn StorageEngineReader>`
//! / `Box<dyn StorageEngineWriter>` without the transaction layer knowing a
//! concrete backend type.

use crate::error::StorageError;
use crate::guard::{PageGuard, PageReleaser};
use crate::ident::{NodeKey, PageKey};
use crate::node::Node;

/// Read-only access to materialized node records.
pub trait StorageEngineReader: Send + Sync {
    /// Overwrites `out` with the record stored under `key`, reusing `out`'s
    /// allocations. This is the zero-allocation path a cursor's singleton
    /// rebind relies on; prefer it over [`StorageEngineReader::read_node`] on
    /// any hot navigation path.
    fn read_node_into(&self, key: NodeKey, out: &mut Node) -> Result<(), StorageError>;

    /// Returns `true` if a record exists under `key` without materializing it.
    fn contains(&self, key: NodeKey) -> bool;

    /// Reads the record stored under `key` into a freshly allocated [`Node`].
    ///
    /// Provided in terms of [`StorageEngineReader::read_node_into`]; callers
    /// on a hot path should use that method directly instead to avoid the
    /// allocation this default pulls in.
    fn read_node(&self, key: NodeKey) -> Result<Node, StorageError> {
        let mut out = Node::bare(key, crate::node::NodeKind::DocumentRoot, key, 0);
        self.read_node_into(key, &mut out)?;
        Ok(out)
    }

    /// The highest node key this engine has ever allocated.
    ///
    /// A cursor's `get_max_node_key` surfaces this directly; it is not
    /// affected by intervening removals, only by allocation.
    fn max_node_key(&self) -> NodeKey;
}

/// Mutating access to node records within a single write transaction.
///
/// Implementations back exactly one writer at a time (`spec.md`'s single
/// writer per resource invariant); the trait carries no locking of its own.
pub trait StorageEngineWriter: StorageEngineReader {
    /// Returns a mutable handle to the record under `key`, preparing it for
    /// in-place modification (e.g. copy-on-write of its backing page).
    ///
    /// The returned borrow's lifetime is tied to `&mut self`: a caller cannot
    /// obtain a second handle (to this key or any other) while the first is
    /// alive, which is exactly the discipline the source system's like-named
    /// operation required callers to observe manually. Capture the fields you
    /// need from the first handle before requesting a second.
    fn prepare_record_for_modification(&mut self, key: NodeKey)
        -> Result<&mut Node, StorageError>;

    /// Inserts `node` as a new record, returning the key it was assigned.
    fn create_node(&mut self, node: Node) -> Result<NodeKey, StorageError>;

    /// Removes and returns the record stored under `key`.
    fn remove_node(&mut self, key: NodeKey) -> Result<Node, StorageError>;

    /// Commits all modifications made through this writer.
    fn commit(&mut self) -> Result<(), StorageError>;

    /// Discards all modifications made through this writer.
    fn rollback(&mut self) -> Result<(), StorageError>;

    /// Type-erased downcast hook.
    ///
    /// A session that knows its own concrete backend uses this to recover a
    /// typed view after committing (e.g. to snapshot the resulting state into
    /// a new immutable revision); callers that only hold the trait object
    /// never need it.
    fn as_any(&self) -> &dyn std::any::Any;
}

/// Encodes and decodes [`Node`] records to and from a storage engine's
/// on-page byte representation.
///
/// Separated from the engine traits so a single encoding can be shared across
/// multiple [`PageStorageEngine`] implementations (in-memory, memory-mapped,
/// remote) without each reimplementing the wire format.
pub trait RecordPersister: Send + Sync {
    /// Serializes `node` into `out`, appending rather than truncating.
    fn encode_node(&self, node: &Node, out: &mut Vec<u8>) -> Result<(), StorageError>;

    /// Decodes a record previously written by [`RecordPersister::encode_node`]
    /// into `out`, reusing its allocations.
    fn decode_node(&self, bytes: &[u8], out: &mut Node) -> Result<(), StorageError>;
}

/// Page-level storage: the pinning/eviction boundary beneath the record layer.
pub trait PageStorageEngine: PageReleaser {
    /// Returns the page a node's record currently lives on, without pinning it.
    ///
    /// Lets a cursor check whether a move target shares the page it already
    /// holds a guard for, so it can take the same-page fast path instead of
    /// pinning and releasing a guard on every step.
    fn page_key_for_node(&self, key: NodeKey) -> Result<PageKey, StorageError>;

    /// Pins and returns the page holding `key`'s record.
    fn pin_page_for_node(&self, key: NodeKey) -> Result<PageGuard, StorageError>;

    /// Pins and returns a specific page by its own key.
    fn pin_page(&self, key: PageKey) -> Result<PageGuard, StorageError>;

    /// Number of pages currently pinned. Exposed for tests and diagnostics.
    fn pinned_page_count(&self) -> usize;
}
