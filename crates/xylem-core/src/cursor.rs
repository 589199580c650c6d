// SPDX-License-Identifier: Apache-2.0
//! Read-only cursor (`spec.md` §4.2): a position plus a small set of
//! per-position accessors, built around a zero-allocation "singleton rebind"
//! hot path.

use std::sync::Arc;

use xylem_storage_api::{
    DeweyId, ItemListKey, Node, NodeKey, NodeKind, NodeValue, PageGuard, PageStorageEngine,
    StorageEngineReader, StorageError, NO_KEY,
};

use crate::error::{TxnError, TxnResult};
use crate::item_list::ItemList;

/// What a cursor's current position refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorTarget {
    /// A node materialized from storage.
    Node(NodeKey),
    /// A transient entry in the transaction-local item list.
    Item(ItemListKey),
}

/// Saved state sufficient to restore a cursor's exact position afterward,
/// including whether it was in singleton mode (`spec.md` §8, property 5).
#[derive(Debug, Clone)]
pub struct CursorCheckpoint {
    target: CursorTarget,
    singleton_mode: bool,
}

/// A position over a node tree, bound to one revision.
///
/// Navigation primitives read off a single reused [`Node`] buffer (the
/// "singleton") whenever possible; [`Cursor::get_current_node`] is the one
/// escape hatch that allocates, producing a stable owned snapshot that
/// survives subsequent `move_to` calls.
pub struct Cursor {
    reader: Arc<dyn StorageEngineReader>,
    pager: Arc<dyn PageStorageEngine>,
    revision: u64,
    revision_timestamp: u64,
    guard: Option<PageGuard>,
    singleton: Node,
    scratch: Node,
    object_node: Option<Node>,
    singleton_mode: bool,
    target: CursorTarget,
    dewey_bound: bool,
    item_list: ItemList,
    allocation_probe: u64,
}

impl Cursor {
    /// Opens a cursor at `start_key` (typically the document root) against
    /// the given revision's storage, committed at `revision_timestamp`.
    pub fn open(
        reader: Arc<dyn StorageEngineReader>,
        pager: Arc<dyn PageStorageEngine>,
        revision: u64,
        revision_timestamp: u64,
        start_key: NodeKey,
    ) -> TxnResult<Self> {
        let mut cursor = Self {
            reader,
            pager,
            revision,
            revision_timestamp,
            guard: None,
            singleton: Node::bare(start_key, NodeKind::DocumentRoot, NO_KEY, revision),
            scratch: Node::bare(start_key, NodeKind::DocumentRoot, NO_KEY, revision),
            object_node: None,
            singleton_mode: true,
            target: CursorTarget::Node(start_key),
            dewey_bound: false,
            item_list: ItemList::new(),
            allocation_probe: 0,
        };
        if !cursor.move_to(start_key as ItemListKey)? {
            return Err(TxnError::illegal_state("start key does not resolve to a node"));
        }
        Ok(cursor)
    }

    /// The revision this cursor observes.
    #[must_use]
    pub const fn revision_number(&self) -> u64 {
        self.revision
    }

    /// `get_revision_timestamp`: when the observed revision was committed,
    /// as milliseconds since the Unix epoch.
    #[must_use]
    pub const fn get_revision_timestamp(&self) -> u64 {
        self.revision_timestamp
    }

    /// `get_max_node_key`: the highest node key the backing engine has ever
    /// allocated, unaffected by intervening removals.
    #[must_use]
    pub fn get_max_node_key(&self) -> NodeKey {
        self.reader.max_node_key()
    }

    /// Mutable access to the transaction-local item list, for query
    /// evaluation to populate before a cursor navigates into it.
    pub fn item_list_mut(&mut self) -> &mut ItemList {
        &mut self.item_list
    }

    /// Number of allocations [`Cursor::get_current_node`] has performed over
    /// this cursor's lifetime. Test-only instrumentation for the
    /// zero-allocation navigation property (`spec.md` §8, property 6):
    /// every other accessor and `move_to` leaves this counter unchanged.
    #[must_use]
    pub const fn allocation_probe(&self) -> u64 {
        self.allocation_probe
    }

    fn current(&self) -> &Node {
        if self.singleton_mode {
            &self.singleton
        } else {
            self.object_node.as_ref().unwrap_or(&self.singleton)
        }
    }

    /// `move_to(key)` (`spec.md` §4.2). `key < 0` addresses the item list and
    /// never touches a page guard; otherwise resolves through storage with
    /// the same-page fast path. Returns `false` with the position and guard
    /// left untouched on any failure to resolve `key`.
    #[tracing::instrument(level = "trace", skip(self), fields(revision = self.revision))]
    pub fn move_to(&mut self, key: ItemListKey) -> TxnResult<bool> {
        if key < 0 {
            return Ok(self.move_to_item_list_entry(key));
        }
        self.move_to_node(key as NodeKey)
    }

    fn move_to_item_list_entry(&mut self, key: ItemListKey) -> bool {
        let Some(node) = self.item_list.get(key) else {
            return false;
        };
        match &mut self.object_node {
            Some(existing) => existing.rebind_from(node),
            None => self.object_node = Some(node.clone()),
        }
        self.singleton_mode = false;
        self.target = CursorTarget::Item(key);
        self.guard = None;
        true
    }

    fn move_to_node(&mut self, key: NodeKey) -> TxnResult<bool> {
        let target_page = match self.pager.page_key_for_node(key) {
            Ok(p) => p,
            Err(StorageError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        let same_page = self.guard.as_ref().map(PageGuard::key) == Some(target_page);

        if same_page {
            // Peek into the scratch buffer first: a failed move must leave
            // the singleton (and therefore the observable position) intact.
            match self.reader.read_node_into(key, &mut self.scratch) {
                Ok(()) => {}
                Err(StorageError::NotFound(_)) => return Ok(false),
                Err(e) => return Err(e.into()),
            }
            if self.scratch.kind.is_tombstone() {
                return Ok(false);
            }
            self.singleton.rebind_from(&self.scratch);
            self.finish_move(key);
            return Ok(true);
        }

        let new_guard = self.pager.pin_page(target_page)?;
        match self.reader.read_node_into(key, &mut self.scratch) {
            Ok(()) => {}
            Err(StorageError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e.into()),
        }
        if self.scratch.kind.is_tombstone() {
            return Ok(false);
        }
        self.singleton.rebind_from(&self.scratch);
        self.guard = Some(new_guard);
        self.finish_move(key);
        Ok(true)
    }

    fn finish_move(&mut self, key: NodeKey) {
        self.object_node = None;
        self.singleton_mode = true;
        self.target = CursorTarget::Node(key);
        self.dewey_bound = false;
    }

    /// Snapshots a checkpoint sufficient to restore the current position.
    #[must_use]
    pub fn checkpoint(&self) -> CursorCheckpoint {
        CursorCheckpoint {
            target: self.target,
            singleton_mode: self.singleton_mode,
        }
    }

    /// `has_node(k)` (`spec.md` §8, property 5): probes whether `move_to(k)`
    /// would succeed, restoring the exact prior position (including
    /// `singleton_mode`) regardless of the outcome.
    pub fn has_node(&mut self, key: ItemListKey) -> TxnResult<bool> {
        let before = self.checkpoint();
        let found = self.move_to(key)?;
        self.restore(&before)?;
        Ok(found)
    }

    fn restore(&mut self, checkpoint: &CursorCheckpoint) -> TxnResult<bool> {
        match checkpoint.target {
            CursorTarget::Node(key) => {
                let restored = self.move_to_node(key)?;
                debug_assert_eq!(self.singleton_mode, checkpoint.singleton_mode);
                Ok(restored)
            }
            CursorTarget::Item(key) => Ok(self.move_to_item_list_entry(key)),
        }
    }

    /// `get_current_node`: the escape hatch. Materializes a stable owned
    /// snapshot of the current position that survives subsequent `move_to`
    /// calls. This is the one allocation point on the read path.
    pub fn get_current_node(&mut self) -> Node {
        let snapshot = self.current().clone();
        self.allocation_probe += 1;
        snapshot
    }

    /// The current position's node key.
    #[must_use]
    pub fn get_node_key(&self) -> NodeKey {
        self.current().node_key
    }

    /// The current position's kind.
    #[must_use]
    pub fn get_kind(&self) -> NodeKind {
        self.current().kind
    }

    /// The current position's structural hash.
    #[must_use]
    pub fn get_hash(&self) -> u64 {
        self.current().hash
    }

    /// The current position's parent key.
    #[must_use]
    pub fn get_parent_key(&self) -> NodeKey {
        self.current().parent_key
    }

    /// The current position's first child key.
    #[must_use]
    pub fn get_first_child_key(&self) -> NodeKey {
        self.current().first_child_key
    }

    /// The current position's last child key.
    #[must_use]
    pub fn get_last_child_key(&self) -> NodeKey {
        self.current().last_child_key
    }

    /// The current position's left sibling key.
    #[must_use]
    pub fn get_left_sibling_key(&self) -> NodeKey {
        self.current().left_sibling_key
    }

    /// The current position's right sibling key.
    #[must_use]
    pub fn get_right_sibling_key(&self) -> NodeKey {
        self.current().right_sibling_key
    }

    /// The current position's direct child count.
    #[must_use]
    pub fn get_child_count(&self) -> u32 {
        self.current().child_count
    }

    /// The current position's descendant count.
    #[must_use]
    pub fn get_descendant_count(&self) -> u64 {
        self.current().descendant_count
    }

    /// The current position's path-summary pointer, if name-bearing.
    #[must_use]
    pub fn get_path_node_key(&self) -> Option<NodeKey> {
        self.current().path_node_key
    }

    /// The current position's local name key (string-table reference), if
    /// name-bearing. Decoding the key into text is a string-table
    /// collaborator's concern, out of scope here.
    #[must_use]
    pub fn get_name(&self) -> Option<u64> {
        self.current().name_key
    }

    /// The current position's decoded scalar value, if value-bearing.
    #[must_use]
    pub fn get_value(&self) -> Option<&NodeValue> {
        self.current().value.as_ref()
    }

    /// The current position's value as a boolean, if it is one.
    #[must_use]
    pub fn get_boolean_value(&self) -> Option<bool> {
        match self.current().value {
            Some(NodeValue::Boolean(b)) => Some(b),
            _ => None,
        }
    }

    /// The current position's value as a number, if it is one.
    #[must_use]
    pub fn get_number_value(&self) -> Option<f64> {
        match self.current().value {
            Some(NodeValue::Number(n)) => Some(n),
            _ => None,
        }
    }

    /// Binds and returns the current position's Dewey label, fetching it
    /// from storage lazily on first access per the current rebind
    /// (`spec.md` §4.2, §9 "Dewey-ID lazy binding").
    pub fn get_dewey_id(&mut self) -> TxnResult<Option<&DeweyId>> {
        if !self.dewey_bound {
            if self.current().dewey_id.is_none() {
                let key = self.current().node_key;
                let fetched = self.reader.read_node(key)?.dewey_id;
                let current = self.current_mut();
                current.dewey_id = fetched;
            }
            self.dewey_bound = true;
        }
        Ok(self.current().dewey_id.as_ref())
    }

    fn current_mut(&mut self) -> &mut Node {
        if self.singleton_mode {
            return &mut self.singleton;
        }
        if self.object_node.is_none() {
            self.object_node = Some(self.singleton.clone());
        }
        match self.object_node.as_mut() {
            Some(node) => node,
            None => &mut self.singleton,
        }
    }

    /// `has_first_child`.
    #[must_use]
    pub fn has_first_child(&self) -> bool {
        self.current().has_first_child()
    }

    /// `has_left_sibling`.
    #[must_use]
    pub fn has_left_sibling(&self) -> bool {
        self.current().has_left_sibling()
    }

    /// `has_right_sibling`.
    #[must_use]
    pub fn has_right_sibling(&self) -> bool {
        self.current().has_right_sibling()
    }

    /// `has_parent`.
    #[must_use]
    pub fn has_parent(&self) -> bool {
        self.current().has_parent()
    }

    /// `move_to_parent`.
    pub fn move_to_parent(&mut self) -> TxnResult<bool> {
        if !self.has_parent() {
            return Ok(false);
        }
        let parent = self.current().parent_key;
        self.move_to(parent as ItemListKey)
    }

    /// `move_to_first_child`.
    pub fn move_to_first_child(&mut self) -> TxnResult<bool> {
        if !self.has_first_child() {
            return Ok(false);
        }
        let child = self.current().first_child_key;
        self.move_to(child as ItemListKey)
    }

    /// `move_to_last_child`.
    pub fn move_to_last_child(&mut self) -> TxnResult<bool> {
        let last = self.current().last_child_key;
        if last == NO_KEY {
            return Ok(false);
        }
        self.move_to(last as ItemListKey)
    }

    /// `move_to_left_sibling`.
    pub fn move_to_left_sibling(&mut self) -> TxnResult<bool> {
        if !self.has_left_sibling() {
            return Ok(false);
        }
        let left = self.current().left_sibling_key;
        self.move_to(left as ItemListKey)
    }

    /// `move_to_right_sibling`.
    pub fn move_to_right_sibling(&mut self) -> TxnResult<bool> {
        if !self.has_right_sibling() {
            return Ok(false);
        }
        let right = self.current().right_sibling_key;
        self.move_to(right as ItemListKey)
    }

    /// `move_to_document_root`.
    pub fn move_to_document_root(&mut self) -> TxnResult<bool> {
        self.move_to(xylem_storage_api::DOCUMENT_ROOT as ItemListKey)
    }

    /// `move_to_next`: right sibling if present, else ascend until a right
    /// sibling exists and descend into it (`move_to_next_following`).
    pub fn move_to_next(&mut self) -> TxnResult<bool> {
        if self.has_right_sibling() {
            return self.move_to_right_sibling();
        }
        self.move_to_next_following()
    }

    fn move_to_next_following(&mut self) -> TxnResult<bool> {
        let before = self.checkpoint();
        loop {
            if !self.move_to_parent()? {
                self.restore(&before)?;
                return Ok(false);
            }
            if self.has_right_sibling() {
                return self.move_to_right_sibling();
            }
        }
    }

    /// `move_to_previous`: left sibling then its rightmost descendant, else
    /// parent. The source's documented copy-paste bug (forwarding straight
    /// to `move_to_parent`) is intentionally not reproduced here.
    pub fn move_to_previous(&mut self) -> TxnResult<bool> {
        if self.has_left_sibling() {
            if !self.move_to_left_sibling()? {
                return Ok(false);
            }
            while self.move_to_last_child()? {}
            return Ok(true);
        }
        self.move_to_parent()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xylem_storage_api::{InMemoryPageStore, StorageEngineReader, StorageEngineWriter};

    fn build_two_children_store() -> (InMemoryPageStore, NodeKey, NodeKey) {
        let mut store = InMemoryPageStore::new().with_document_root();
        let k1 = store
            .create_node(Node::bare(0, NodeKind::Object, 0, 1))
            .expect("create k1");
        let k2 = store
            .create_node(Node::bare(0, NodeKind::Object, 0, 1))
            .expect("create k2");
        {
            let k1_ref = store.prepare_record_for_modification(k1).expect("prepare k1");
            k1_ref.right_sibling_key = k2;
        }
        {
            let k2_ref = store.prepare_record_for_modification(k2).expect("prepare k2");
            k2_ref.left_sibling_key = k1;
        }
        {
            let root = store.prepare_record_for_modification(0).expect("prepare root");
            root.first_child_key = k1;
            root.last_child_key = k2;
            root.child_count = 2;
        }
        (store, k1, k2)
    }

    #[test]
    fn singleton_rebind_same_page_round_trip() {
        let (store, k1, k2) = build_two_children_store();
        let store = Arc::new(store);
        let reader: Arc<dyn StorageEngineReader> = store.clone();
        let pager: Arc<dyn PageStorageEngine> = store;

        let mut cursor = Cursor::open(reader, pager, 1, 1_000, 0).expect("open");
        let mut keys = vec![cursor.get_node_key()];

        assert!(cursor.move_to_first_child().expect("to k1"));
        keys.push(cursor.get_node_key());
        assert!(cursor.move_to_right_sibling().expect("to k2"));
        keys.push(cursor.get_node_key());
        assert!(cursor.move_to_parent().expect("to root"));
        keys.push(cursor.get_node_key());

        assert_eq!(keys, vec![0, k1, k2, 0]);
        assert_eq!(cursor.allocation_probe(), 0);
    }

    #[test]
    fn move_to_missing_key_leaves_position_unchanged() {
        let (store, k1, _k2) = build_two_children_store();
        let store = Arc::new(store);
        let reader: Arc<dyn StorageEngineReader> = store.clone();
        let pager: Arc<dyn PageStorageEngine> = store;
        let mut cursor = Cursor::open(reader, pager, 1, 1_000, 0).expect("open");

        assert!(cursor.move_to_first_child().expect("to k1"));
        assert_eq!(cursor.get_node_key(), k1);

        let found = cursor.move_to(9999).expect("move_to missing");
        assert!(!found);
        assert_eq!(cursor.get_node_key(), k1);
    }

    #[test]
    fn has_node_restores_exact_prior_position() {
        let (store, k1, _k2) = build_two_children_store();
        let store = Arc::new(store);
        let reader: Arc<dyn StorageEngineReader> = store.clone();
        let pager: Arc<dyn PageStorageEngine> = store;
        let mut cursor = Cursor::open(reader, pager, 1, 1_000, 0).expect("open");
        cursor.move_to_first_child().expect("to k1");

        let exists = cursor.has_node(0).expect("probe root");
        assert!(exists);
        assert_eq!(cursor.get_node_key(), k1);
    }

    #[test]
    fn move_to_tombstoned_slot_returns_false() {
        let (mut store, k1, _k2) = build_two_children_store();
        {
            let k1_ref = store.prepare_record_for_modification(k1).expect("prepare k1");
            k1_ref.kind = NodeKind::Deleted;
        }
        let store = Arc::new(store);
        let reader: Arc<dyn StorageEngineReader> = store.clone();
        let pager: Arc<dyn PageStorageEngine> = store;
        let mut cursor = Cursor::open(reader, pager, 1, 1_000, 0).expect("open");

        let found = cursor.move_to(k1 as ItemListKey).expect("move to tombstone");
        assert!(!found);
        assert_eq!(cursor.get_node_key(), 0);
    }
}
