// SPDX-License-Identifier: Apache-2.0
//! Per-transaction item list (`spec.md` §4.2, GLOSSARY "Item list").
//!
//! Transient values produced by query evaluation, addressed by negative
//! keys. Entries never acquire a page guard and are never written to storage.

use std::collections::HashMap;

use xylem_storage_api::{ItemListKey, Node};

/// A transaction-local table of transient, negative-keyed node snapshots.
#[derive(Debug, Default)]
pub struct ItemList {
    entries: HashMap<ItemListKey, Node>,
    next_key: ItemListKey,
}

impl ItemList {
    /// Builds an empty item list. Keys are allocated starting at `-1` and
    /// decrease from there, keeping the whole table disjoint from any
    /// non-negative `NodeKey`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            next_key: -1,
        }
    }

    /// Stores `node` under a freshly allocated negative key, returning it.
    pub fn insert(&mut self, node: Node) -> ItemListKey {
        let key = self.next_key;
        self.next_key -= 1;
        self.entries.insert(key, node);
        key
    }

    /// Looks up an entry by its negative key.
    #[must_use]
    pub fn get(&self, key: ItemListKey) -> Option<&Node> {
        self.entries.get(&key)
    }

    /// Removes every entry. Called when a write transaction's item-list
    /// scope ends (commit or rollback).
    pub fn clear(&mut self) {
        self.entries.clear();
        self.next_key = -1;
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the item list holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
