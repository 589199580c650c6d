// SPDX-License-Identifier: Apache-2.0
//! End-to-end cycle: link a node into the tree inside a write transaction,
//! adapt structural hashes, commit, then read the result back through a
//! fresh cursor opened against the published revision.
//!
//! Linking children into a parent's sibling chain is a language-specific
//! insert primitive out of scope for this crate; this test performs that
//! linking directly through `StorageEngineWriter` to exercise the hashing
//! and session machinery this crate does own.

use std::time::Duration;

use xylem_core::hash::{adapt_hashes_with_add, adapt_hashes_with_remove};
use xylem_core::{AfterCommitState, HashMode};
use xylem_core::ResourceSession;
use xylem_storage_api::{Node, NodeKind, NodeValue, StorageEngineReader, StorageEngineWriter, DOCUMENT_ROOT, NO_KEY};

#[tokio::test]
async fn insert_then_remove_child_restores_root_hash() {
    let mut session = ResourceSession::new(HashMode::Rolling, 0);
    let id = session.begin_write_txn(Duration::from_secs(1)).await.expect("begin write");

    let root_hash_before = {
        let writer = session.write_txn_mut(id).expect("writer").writer_mut();
        writer.read_node(DOCUMENT_ROOT).expect("read root").hash
    };

    let child_key = {
        let writer = session.write_txn_mut(id).expect("writer").writer_mut();
        let mut child = Node::bare(0, NodeKind::StringValue, DOCUMENT_ROOT, 0);
        child.value = Some(NodeValue::Str("hello".to_string()));
        let key = writer.create_node(child).expect("create child");
        {
            let parent = writer.prepare_record_for_modification(DOCUMENT_ROOT).expect("prepare root");
            parent.first_child_key = key;
            parent.last_child_key = key;
            parent.child_count = 1;
        }
        key
    };

    session
        .write_txn_mut(id)
        .expect("writer")
        .check_access_and_commit()
        .expect("record modification");
    adapt_hashes_with_add(session.write_txn_mut(id).expect("writer").writer_mut(), child_key)
        .expect("adapt hashes on insert");

    let root_hash_with_child = {
        let writer = session.write_txn_mut(id).expect("writer").writer_mut();
        writer.read_node(DOCUMENT_ROOT).expect("read root").hash
    };
    assert_ne!(root_hash_before, root_hash_with_child, "inserting a child must change the root's fingerprint");

    // Undo the structural change the same way a remove primitive would:
    // capture the removed node's contribution, unlink it, then subtract.
    {
        let writer = session.write_txn_mut(id).expect("writer").writer_mut();
        let removed = writer.remove_node(child_key).expect("remove child");
        let parent = writer.prepare_record_for_modification(DOCUMENT_ROOT).expect("prepare root");
        parent.first_child_key = NO_KEY;
        parent.last_child_key = NO_KEY;
        parent.child_count = 0;
        adapt_hashes_with_remove(writer, removed.hash, removed.descendant_count, removed.parent_key)
            .expect("adapt hashes on remove");
    }

    let root_hash_after_remove = {
        let writer = session.write_txn_mut(id).expect("writer").writer_mut();
        writer.read_node(DOCUMENT_ROOT).expect("read root").hash
    };
    assert_eq!(
        root_hash_before, root_hash_after_remove,
        "removing the only child must restore the root's original fingerprint"
    );

    let new_revision = session.commit_write_txn(id, AfterCommitState::Close, None).expect("commit");
    assert_eq!(new_revision, 1);

    let (read_id, cursor) = session.begin_read_txn(None).expect("open read cursor");
    assert_eq!(cursor.get_hash(), root_hash_before);
    assert!(!cursor.has_first_child());
    session.close_read_txn(read_id).expect("close read txn");
}
