// SPDX-License-Identifier: Apache-2.0
//! Structural hashing (`spec.md` §4.1): rolling and postorder subtree
//! fingerprints, and the ancestor-chain propagation that keeps them current
//! as the tree is mutated.

use xylem_storage_api::{
    Node, NodeKey, NodeKindFamily, NodeValue, StorageEngineReader, StorageEngineWriter, NO_KEY,
};

use crate::error::TxnResult;

/// Constant multiplier in the rolling-hash recurrence.
pub const ROLLING_PRIME: u64 = 77_081;

/// Which hashing scheme a resource was configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashMode {
    /// Hashing disabled; `hash` fields are left at their default value.
    #[default]
    None,
    /// Incremental rolling-hash recurrence along the ancestor axis.
    Rolling,
    /// Full bottom-up recompute of the ancestor chain on each mutation.
    Postorder,
}

/// Domain-separated hash of a node's serialized identity and payload.
///
/// Folds in everything the rolling/postorder schemes treat as part of a
/// node's "own data": kind, sibling keys, child count, and any scalar value
/// — serialized identically regardless of hash mode so the two schemes start
/// from the same per-node base hash.
#[must_use]
pub fn compute_own_hash(node: &Node) -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"xylem:node-hash:v1:");
    hasher.update(&(node.kind as u8 as u64).to_le_bytes());
    hasher.update(&node.child_count.to_le_bytes());
    hasher.update(&node.left_sibling_key.to_le_bytes());
    hasher.update(&node.right_sibling_key.to_le_bytes());
    if let Some(name_key) = node.name_key {
        hasher.update(b"name:");
        hasher.update(&name_key.to_le_bytes());
    }
    match &node.value {
        Some(NodeValue::Str(s)) => {
            hasher.update(b"str:");
            hasher.update(s.as_bytes());
        }
        Some(NodeValue::Number(n)) => {
            hasher.update(b"num:");
            hasher.update(&n.to_bits().to_le_bytes());
        }
        Some(NodeValue::Boolean(b)) => {
            hasher.update(b"bool:");
            hasher.update(&[u8::from(*b)]);
        }
        Some(NodeValue::Null) => {
            hasher.update(b"null");
        }
        None => {
            hasher.update(b"novalue");
        }
    };
    let digest = hasher.finalize();
    u64::from_le_bytes(digest.as_bytes()[0..8].try_into().unwrap_or([0; 8]))
}

/// Folds a name-bearing element's attribute/namespace hashes into `h_self`,
/// in declaration order, per the `H_self' = H_self·P + hash(attr/ns_i)` rule.
#[must_use]
pub fn fold_attrs_and_namespaces(h_self: u64, attr_ns_hashes: impl IntoIterator<Item = u64>) -> u64 {
    attr_ns_hashes
        .into_iter()
        .fold(h_self, |acc, h| acc.wrapping_mul(ROLLING_PRIME).wrapping_add(h))
}

/// Folds child hashes into a (possibly attr/ns-folded) self hash, per
/// `hash(parent) = H_self + Σ hash(cᵢ)·P`.
#[must_use]
pub fn fold_children_rolling(h_self_folded: u64, child_hashes: impl IntoIterator<Item = u64>) -> u64 {
    child_hashes.into_iter().fold(h_self_folded, |acc, h| {
        acc.wrapping_add(h.wrapping_mul(ROLLING_PRIME))
    })
}

fn bump_descendant_count(existing: u64, inserted_subtree_count: u64) -> u64 {
    let inc = if inserted_subtree_count == 0 { 1 } else { inserted_subtree_count + 1 };
    existing + inc
}

fn drop_descendant_count(existing: u64, removed_subtree_count: u64) -> u64 {
    let dec = if removed_subtree_count == 0 { 1 } else { removed_subtree_count + 1 };
    existing.saturating_sub(dec)
}

/// `adapt_hashes_with_add` (`spec.md` §4.1): propagates a newly inserted
/// node's hash up the ancestor chain, bumping descendant counts along the way.
///
/// Captures `parent_key`/`descendant_count` from each prepared node before
/// preparing the next one, honoring the write-side singleton aliasing
/// discipline: a second `prepare_record_for_modification` call may return
/// the same handle a prior call did, so nothing from the prior handle may be
/// read after the next call is made.
pub fn adapt_hashes_with_add(writer: &mut dyn StorageEngineWriter, node_key: NodeKey) -> TxnResult<()> {
    let (mut hash_to_add, inserted_descendant_count, mut ancestor_key) = {
        let node = writer.prepare_record_for_modification(node_key)?;
        if node.kind.is_value_bearing() {
            node.hash = compute_own_hash(node);
        }
        (node.hash, node.descendant_count, node.parent_key)
    };

    let mut is_first_ancestor = true;
    let mut possible_old_hash: u64 = 0;

    while ancestor_key != NO_KEY {
        let (new_hash, next_ancestor_key, old_hash) = {
            let ancestor = writer.prepare_record_for_modification(ancestor_key)?;
            let old_hash = ancestor.hash;
            let new_hash = if is_first_ancestor {
                ancestor.hash.wrapping_add(hash_to_add.wrapping_mul(ROLLING_PRIME))
            } else {
                ancestor
                    .hash
                    .wrapping_sub(possible_old_hash.wrapping_mul(ROLLING_PRIME))
                    .wrapping_add(hash_to_add.wrapping_mul(ROLLING_PRIME))
            };
            ancestor.hash = new_hash;
            if is_first_ancestor {
                ancestor.descendant_count = bump_descendant_count(ancestor.descendant_count, inserted_descendant_count);
            }
            (new_hash, ancestor.parent_key, old_hash)
        };

        hash_to_add = new_hash;
        possible_old_hash = old_hash;
        ancestor_key = next_ancestor_key;
        is_first_ancestor = false;
    }

    Ok(())
}

/// `adapt_hashes_with_remove` (`spec.md` §4.1): the inverse of
/// [`adapt_hashes_with_add`] — subtracts the removed node's contribution at
/// every ancestor and decrements descendant counts.
pub fn adapt_hashes_with_remove(
    writer: &mut dyn StorageEngineWriter,
    removed_hash: u64,
    removed_descendant_count: u64,
    removed_parent_key: NodeKey,
) -> TxnResult<()> {
    let mut hash_to_remove = removed_hash;
    let mut ancestor_key = removed_parent_key;
    let mut is_first_ancestor = true;
    let mut possible_old_hash: u64 = 0;

    while ancestor_key != NO_KEY {
        let (new_hash, next_ancestor_key, old_hash) = {
            let ancestor = writer.prepare_record_for_modification(ancestor_key)?;
            let old_hash = ancestor.hash;
            let new_hash = if is_first_ancestor {
                ancestor.hash.wrapping_sub(hash_to_remove.wrapping_mul(ROLLING_PRIME))
            } else {
                ancestor
                    .hash
                    .wrapping_sub(possible_old_hash.wrapping_mul(ROLLING_PRIME))
                    .wrapping_add(hash_to_remove.wrapping_mul(ROLLING_PRIME))
            };
            ancestor.hash = new_hash;
            if is_first_ancestor {
                ancestor.descendant_count =
                    drop_descendant_count(ancestor.descendant_count, removed_descendant_count);
            }
            (new_hash, ancestor.parent_key, old_hash)
        };

        hash_to_remove = new_hash;
        possible_old_hash = old_hash;
        ancestor_key = next_ancestor_key;
        is_first_ancestor = false;
    }

    Ok(())
}

/// `adapt_hashed_with_update` (`spec.md` §4.1): a node's own payload changed
/// without a structural insert/remove. Recomputes its own hash and applies
/// the same `old_hash`/`new_hash` delta at every ancestor.
pub fn adapt_hashes_with_update(writer: &mut dyn StorageEngineWriter, node_key: NodeKey) -> TxnResult<()> {
    let (old_hash, new_hash, mut ancestor_key) = {
        let node = writer.prepare_record_for_modification(node_key)?;
        let old_hash = node.hash;
        let new_hash = compute_own_hash(node);
        node.hash = new_hash;
        (old_hash, new_hash, node.parent_key)
    };

    while ancestor_key != NO_KEY {
        let next_ancestor_key = {
            let ancestor = writer.prepare_record_for_modification(ancestor_key)?;
            ancestor.hash = ancestor
                .hash
                .wrapping_sub(old_hash.wrapping_mul(ROLLING_PRIME))
                .wrapping_add(new_hash.wrapping_mul(ROLLING_PRIME));
            ancestor.parent_key
        };
        ancestor_key = next_ancestor_key;
    }

    Ok(())
}

/// Recomputes a single node's postorder hash from its already-correct direct
/// children, without recursing further down.
fn compute_postorder_hash_of_node(reader: &dyn StorageEngineWriter, key: NodeKey) -> TxnResult<u64> {
    let node = reader.read_node(key)?;
    let h_self = compute_own_hash(&node);

    if node.kind.family() != NodeKindFamily::Structural || !node.has_first_child() {
        return Ok(h_self);
    }

    let mut running = h_self;
    let mut child_key = node.first_child_key;
    while child_key != NO_KEY {
        let child = reader.read_node(child_key)?;
        running = running.wrapping_mul(ROLLING_PRIME).wrapping_add(child.hash);
        child_key = child.right_sibling_key;
    }
    Ok(running)
}

/// `adapt_hashes_in_postorder_traversal` (`spec.md` §4.1, §4.4 bulk-insert
/// mode): recomputes the ancestor chain from `start_key` to the document
/// root, bottom-up, in postorder mode. Insert and update funnel through this
/// routine directly; a remove should move to the parent first and call this
/// with the parent as `start_key`.
pub fn recompute_postorder(writer: &mut dyn StorageEngineWriter, start_key: NodeKey) -> TxnResult<()> {
    let mut current_key = start_key;
    loop {
        let new_hash = compute_postorder_hash_of_node(&*writer, current_key)?;
        let parent_key = {
            let node = writer.prepare_record_for_modification(current_key)?;
            node.hash = new_hash;
            node.parent_key
        };
        if parent_key == NO_KEY {
            return Ok(());
        }
        current_key = parent_key;
    }
}

/// Applies the configured [`HashMode`]'s insert propagation, or does nothing
/// when hashing is disabled.
pub fn on_insert(mode: HashMode, writer: &mut dyn StorageEngineWriter, node_key: NodeKey) -> TxnResult<()> {
    match mode {
        HashMode::None => Ok(()),
        HashMode::Rolling => adapt_hashes_with_add(writer, node_key),
        HashMode::Postorder => recompute_postorder(writer, node_key),
    }
}

/// Applies the configured [`HashMode`]'s update propagation.
pub fn on_update(mode: HashMode, writer: &mut dyn StorageEngineWriter, node_key: NodeKey) -> TxnResult<()> {
    match mode {
        HashMode::None => Ok(()),
        HashMode::Rolling => adapt_hashes_with_update(writer, node_key),
        HashMode::Postorder => recompute_postorder(writer, node_key),
    }
}

/// Applies the configured [`HashMode`]'s remove propagation. Must be called
/// with the fields of the just-removed node captured *before* the removal,
/// since after removal `node_key` no longer resolves through `writer`.
pub fn on_remove(
    mode: HashMode,
    writer: &mut dyn StorageEngineWriter,
    removed_hash: u64,
    removed_descendant_count: u64,
    removed_parent_key: NodeKey,
) -> TxnResult<()> {
    match mode {
        HashMode::None => Ok(()),
        HashMode::Rolling => {
            adapt_hashes_with_remove(writer, removed_hash, removed_descendant_count, removed_parent_key)
        }
        HashMode::Postorder => {
            if removed_parent_key == NO_KEY {
                Ok(())
            } else {
                recompute_postorder(writer, removed_parent_key)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xylem_storage_api::{InMemoryPageStore, NodeKind, NO_KEY as NOK};

    fn object_with_number_child(store: &mut InMemoryPageStore, root: u64) -> (u64, u64) {
        let mut key_node = Node::bare(0, NodeKind::ObjectKey, root, 1);
        key_node.name_key = Some(42);
        let key_key = store.create_node(key_node).expect("create key");

        let mut val_node = Node::bare(0, NodeKind::ObjectNumberValue, key_key, 1);
        val_node.value = Some(NodeValue::Number(1.0));
        let val_key = store.create_node(val_node).expect("create value");

        {
            let key_ref = store.prepare_record_for_modification(key_key).expect("prepare key");
            key_ref.first_child_key = val_key;
            key_ref.last_child_key = val_key;
            key_ref.child_count = 1;
        }
        (key_key, val_key)
    }

    #[test]
    fn insert_then_remove_restores_root_hash() {
        let mut store = InMemoryPageStore::new().with_document_root();
        let h_root_0 = store.read_node(0).expect("read root").hash;

        let (key_key, val_key) = object_with_number_child(&mut store, 0);
        adapt_hashes_with_add(&mut store, val_key).expect("add value");
        adapt_hashes_with_add(&mut store, key_key).expect("add key");

        {
            let root = store.prepare_record_for_modification(0).expect("prepare root");
            root.first_child_key = key_key;
            root.last_child_key = key_key;
            root.child_count = 1;
        }

        let root_after_insert = store.read_node(0).expect("read root");
        assert_ne!(root_after_insert.hash, h_root_0);

        let removed_key_node = store.read_node(key_key).expect("read key before remove");
        let removed_hash = removed_key_node.hash;
        let removed_descendant_count = removed_key_node.descendant_count;
        let removed_parent_key = removed_key_node.parent_key;

        store.remove_node(val_key).expect("remove value");
        store.remove_node(key_key).expect("remove key");
        adapt_hashes_with_remove(&mut store, removed_hash, removed_descendant_count, removed_parent_key)
            .expect("remove propagation");

        {
            let root = store.prepare_record_for_modification(0).expect("prepare root again");
            root.first_child_key = NOK;
            root.last_child_key = NOK;
            root.child_count = 0;
        }

        let root_after_remove = store.read_node(0).expect("read root after remove");
        assert_eq!(root_after_remove.hash, h_root_0);
        assert_eq!(root_after_remove.descendant_count, 0);
    }

    #[test]
    fn postorder_recompute_is_deterministic() {
        let mut store = InMemoryPageStore::new().with_document_root();
        let (key_key, val_key) = object_with_number_child(&mut store, 0);
        {
            let root = store.prepare_record_for_modification(0).expect("prepare root");
            root.first_child_key = key_key;
            root.last_child_key = key_key;
            root.child_count = 1;
        }

        recompute_postorder(&mut store, val_key).expect("postorder pass 1");
        let hash_1 = store.read_node(0).expect("read root").hash;
        recompute_postorder(&mut store, val_key).expect("postorder pass 2");
        let hash_2 = store.read_node(0).expect("read root").hash;
        assert_eq!(hash_1, hash_2);
    }
}
