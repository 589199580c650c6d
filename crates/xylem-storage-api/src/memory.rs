// SPDX-License-Identifier: Apache-2.0
//! Reference in-memory backend, sufficient to exercise the storage contracts
//! in tests. Not a production page cache: no eviction, no durability, one
//! page per node.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::StorageError;
use crate::guard::{PageGuard, PageHandle, PageReleaser};
use crate::ident::{NodeKey, PageKey};
use crate::node::{Node, NodeKind, NodeValue};
use crate::traits::{PageStorageEngine, RecordPersister, StorageEngineReader, StorageEngineWriter};

/// In-memory node store keyed directly by [`NodeKey`], with a one-page-per-node
/// pinning model. Modeled on a content-addressed memory tier's pin-counted
/// HashMap storage, adapted from byte blobs to structured node records.
pub struct InMemoryPageStore {
    nodes: RwLock<HashMap<NodeKey, Node>>,
    pins: Arc<Mutex<HashMap<PageKey, u32>>>,
    next_key: AtomicU64,
}

impl InMemoryPageStore {
    /// Builds an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            pins: Arc::new(Mutex::new(HashMap::new())),
            next_key: AtomicU64::new(1),
        }
    }

    /// Seeds the store with a document root at key `0`, returning its key.
    #[must_use]
    pub fn with_document_root(self) -> Self {
        let root = Node::bare(crate::ident::DOCUMENT_ROOT, NodeKind::DocumentRoot, crate::ident::NO_KEY, 0);
        self.nodes.write().insert(root.node_key, root);
        self
    }

    fn page_key_for(node_key: NodeKey) -> PageKey {
        PageKey(node_key)
    }

    /// Number of records currently stored. Diagnostics / test assertion helper.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    /// Returns `true` if the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    /// Copies the current record set into a brand new, independent store.
    ///
    /// Used to give a write transaction a private working copy so committed
    /// revisions stay immutable and already-open readers keep seeing the
    /// snapshot they opened against.
    #[must_use]
    pub fn snapshot(&self) -> Self {
        let nodes = self.nodes.read().clone();
        let next_key = self.next_key.load(Ordering::SeqCst);
        Self {
            nodes: RwLock::new(nodes),
            pins: Arc::new(Mutex::new(HashMap::new())),
            next_key: AtomicU64::new(next_key),
        }
    }
}

impl Default for InMemoryPageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEngineReader for InMemoryPageStore {
    fn read_node_into(&self, key: NodeKey, out: &mut Node) -> Result<(), StorageError> {
        let nodes = self.nodes.read();
        let node = nodes.get(&key).ok_or(StorageError::NotFound(key))?;
        out.rebind_from(node);
        Ok(())
    }

    fn contains(&self, key: NodeKey) -> bool {
        self.nodes.read().contains_key(&key)
    }

    fn max_node_key(&self) -> NodeKey {
        self.next_key.load(Ordering::SeqCst).saturating_sub(1)
    }
}

impl StorageEngineWriter for InMemoryPageStore {
    fn prepare_record_for_modification(
        &mut self,
        key: NodeKey,
    ) -> Result<&mut Node, StorageError> {
        let nodes = self.nodes.get_mut();
        nodes.get_mut(&key).ok_or(StorageError::NotFound(key))
    }

    fn create_node(&mut self, node: Node) -> Result<NodeKey, StorageError> {
        let key = if node.kind == NodeKind::DocumentRoot {
            node.node_key
        } else {
            self.next_key.fetch_add(1, Ordering::SeqCst)
        };
        let mut stored = node;
        stored.node_key = key;
        self.nodes.get_mut().insert(key, stored);
        Ok(key)
    }

    fn remove_node(&mut self, key: NodeKey) -> Result<Node, StorageError> {
        self.nodes
            .get_mut()
            .remove(&key)
            .ok_or(StorageError::NotFound(key))
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        // Direct mutation, no staging area: nothing to flush.
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StorageError> {
        // No staging area to discard either. A transactional backend would
        // keep a shadow map here and swap it away; this reference store
        // intentionally has no undo log.
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl PageReleaser for InMemoryPageStore {
    fn release_page(&self, key: PageKey) {
        let mut pins = self.pins.lock();
        if let Some(count) = pins.get_mut(&key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                pins.remove(&key);
            }
        }
    }
}

impl PageStorageEngine for InMemoryPageStore {
    fn page_key_for_node(&self, key: NodeKey) -> Result<PageKey, StorageError> {
        if !self.contains(key) {
            return Err(StorageError::NotFound(key));
        }
        Ok(Self::page_key_for(key))
    }

    fn pin_page_for_node(&self, key: NodeKey) -> Result<PageGuard, StorageError> {
        if !self.contains(key) {
            return Err(StorageError::NotFound(key));
        }
        self.pin_page(Self::page_key_for(key))
    }

    fn pin_page(&self, key: PageKey) -> Result<PageGuard, StorageError> {
        *self.pins.lock().entry(key).or_insert(0) += 1;
        let handle = PageHandle::new(key, Arc::from(Vec::new()));
        let releaser: Arc<dyn PageReleaser> = Arc::new(PinMapReleaser(Arc::clone(&self.pins)));
        Ok(PageGuard::new(handle, releaser))
    }

    fn pinned_page_count(&self) -> usize {
        self.pins.lock().len()
    }
}

/// Releases a pin by decrementing a shared pin-count map.
///
/// Holds only the pin-count map, not the whole store, so a [`PageGuard`] can
/// outlive any particular borrow of the [`InMemoryPageStore`] that issued it
/// without the two needing to share ownership of node data.
struct PinMapReleaser(Arc<Mutex<HashMap<PageKey, u32>>>);

impl PageReleaser for PinMapReleaser {
    fn release_page(&self, key: PageKey) {
        let mut pins = self.0.lock();
        if let Some(count) = pins.get_mut(&key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                pins.remove(&key);
            }
        }
    }
}

/// A minimal, non-production [`RecordPersister`] used to exercise the trait
/// contract in tests. Encodes only the fields needed to round-trip a node's
/// identity, links, and scalar value; not a durable on-disk format.
#[derive(Debug, Default)]
pub struct NaiveRecordPersister;

impl RecordPersister for NaiveRecordPersister {
    fn encode_node(&self, node: &Node, out: &mut Vec<u8>) -> Result<(), StorageError> {
        out.extend_from_slice(&node.node_key.to_le_bytes());
        out.push(kind_tag(node.kind));
        out.extend_from_slice(&node.parent_key.to_le_bytes());
        out.extend_from_slice(&node.left_sibling_key.to_le_bytes());
        out.extend_from_slice(&node.right_sibling_key.to_le_bytes());
        out.extend_from_slice(&node.first_child_key.to_le_bytes());
        out.extend_from_slice(&node.last_child_key.to_le_bytes());
        out.extend_from_slice(&node.hash.to_le_bytes());
        match &node.value {
            Some(NodeValue::Str(s)) => {
                out.push(1);
                out.extend_from_slice(&(s.len() as u32).to_le_bytes());
                out.extend_from_slice(s.as_bytes());
            }
            Some(NodeValue::Number(n)) => {
                out.push(2);
                out.extend_from_slice(&n.to_le_bytes());
            }
            Some(NodeValue::Boolean(b)) => {
                out.push(3);
                out.push(u8::from(*b));
            }
            Some(NodeValue::Null) => out.push(4),
            None => out.push(0),
        }
        Ok(())
    }

    fn decode_node(&self, bytes: &[u8], out: &mut Node) -> Result<(), StorageError> {
        let mut cur = bytes;
        let node_key = take_u64(&mut cur)?;
        let kind = untag_kind(take_u8(&mut cur)?)?;
        let parent_key = take_u64(&mut cur)?;
        let left_sibling_key = take_u64(&mut cur)?;
        let right_sibling_key = take_u64(&mut cur)?;
        let first_child_key = take_u64(&mut cur)?;
        let last_child_key = take_u64(&mut cur)?;
        let hash = take_u64(&mut cur)?;
        let tag = take_u8(&mut cur)?;
        let value = match tag {
            0 => None,
            1 => {
                let len = take_u32(&mut cur)? as usize;
                if cur.len() < len {
                    return Err(StorageError::corrupt(PageKey(node_key), "truncated string value"));
                }
                let s = String::from_utf8(cur[..len].to_vec())
                    .map_err(|_| StorageError::corrupt(PageKey(node_key), "invalid utf-8"))?;
                cur = &cur[len..];
                Some(NodeValue::Str(s))
            }
            2 => {
                let bits = take_u64(&mut cur)?;
                Some(NodeValue::Number(f64::from_bits(bits)))
            }
            3 => Some(NodeValue::Boolean(take_u8(&mut cur)? != 0)),
            4 => Some(NodeValue::Null),
            other => {
                return Err(StorageError::corrupt(
                    PageKey(node_key),
                    format!("unknown value tag {other}"),
                ))
            }
        };

        out.node_key = node_key;
        out.kind = kind;
        out.parent_key = parent_key;
        out.left_sibling_key = left_sibling_key;
        out.right_sibling_key = right_sibling_key;
        out.first_child_key = first_child_key;
        out.last_child_key = last_child_key;
        out.hash = hash;
        out.value = value;
        Ok(())
    }
}

const fn kind_tag(kind: NodeKind) -> u8 {
    match kind {
        NodeKind::DocumentRoot => 0,
        NodeKind::Object => 1,
        NodeKind::Array => 2,
        NodeKind::ObjectKey => 3,
        NodeKind::Element => 4,
        NodeKind::StringValue => 5,
        NodeKind::NumberValue => 6,
        NodeKind::BooleanValue => 7,
        NodeKind::NullValue => 8,
        NodeKind::Text => 9,
        NodeKind::Comment => 10,
        NodeKind::ProcessingInstruction => 11,
        NodeKind::Attribute => 12,
        NodeKind::Namespace => 13,
        NodeKind::ObjectStringValue => 14,
        NodeKind::ObjectNumberValue => 15,
        NodeKind::ObjectBooleanValue => 16,
        NodeKind::ObjectNullValue => 17,
        NodeKind::Deleted => 18,
    }
}

fn untag_kind(tag: u8) -> Result<NodeKind, StorageError> {
    NodeKind::all()
        .iter()
        .copied()
        .find(|k| kind_tag(*k) == tag)
        .ok_or_else(|| StorageError::corrupt(PageKey(0), format!("unknown kind tag {tag}")))
}

fn take_u64(cur: &mut &[u8]) -> Result<u64, StorageError> {
    if cur.len() < 8 {
        return Err(StorageError::corrupt(PageKey(0), "truncated u64"));
    }
    let (head, tail) = cur.split_at(8);
    *cur = tail;
    Ok(u64::from_le_bytes(head.try_into().unwrap_or([0; 8])))
}

fn take_u32(cur: &mut &[u8]) -> Result<u32, StorageError> {
    if cur.len() < 4 {
        return Err(StorageError::corrupt(PageKey(0), "truncated u32"));
    }
    let (head, tail) = cur.split_at(4);
    *cur = tail;
    Ok(u32::from_le_bytes(head.try_into().unwrap_or([0; 4])))
}

fn take_u8(cur: &mut &[u8]) -> Result<u8, StorageError> {
    let (first, tail) = cur.split_first().ok_or_else(|| StorageError::corrupt(PageKey(0), "truncated u8"))?;
    *cur = tail;
    Ok(*first)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_read_remove_round_trip() {
        let mut store = InMemoryPageStore::new().with_document_root();
        let node = Node::bare(0, NodeKind::Object, crate::ident::NO_KEY, 1);
        let key = store.create_node(node).expect("create");
        assert!(store.contains(key));

        let mut out = Node::bare(key, NodeKind::DocumentRoot, 0, 0);
        store.read_node_into(key, &mut out).expect("read");
        assert_eq!(out.kind, NodeKind::Object);

        let removed = store.remove_node(key).expect("remove");
        assert_eq!(removed.node_key, key);
        assert!(!store.contains(key));
    }

    #[test]
    fn pin_and_release_tracks_count() {
        let store = InMemoryPageStore::new().with_document_root();
        let guard = store.pin_page_for_node(0).expect("pin");
        assert_eq!(store.pinned_page_count(), 1);
        drop(guard);
        assert_eq!(store.pinned_page_count(), 0);
    }

    #[test]
    fn naive_persister_round_trips_string_value() {
        let mut node = Node::bare(7, NodeKind::StringValue, 3, 2);
        node.value = Some(NodeValue::Str("hello".to_string()));
        node.left_sibling_key = 5;

        let persister = NaiveRecordPersister;
        let mut bytes = Vec::new();
        persister.encode_node(&node, &mut bytes).expect("encode");

        let mut out = Node::bare(0, NodeKind::DocumentRoot, 0, 0);
        persister.decode_node(&bytes, &mut out).expect("decode");

        assert_eq!(out.node_key, 7);
        assert_eq!(out.kind, NodeKind::StringValue);
        assert_eq!(out.left_sibling_key, 5);
        assert_eq!(out.value, Some(NodeValue::Str("hello".to_string())));
    }
}
