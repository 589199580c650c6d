// SPDX-License-Identifier: Apache-2.0
//! Resource session (`spec.md` §4.5): revision history, the single-writer
//! lock, point-in-time reads, and transaction-ID bookkeeping.
//!
//! This crate's reference storage backend keeps the full node set resident
//! rather than paging from disk, so "revisions" here are immutable snapshots
//! held in memory, not a durable log. A production session would swap this
//! module's [`xylem_storage_api::InMemoryPageStore`] backend for a real
//! multi-version page store without changing this module's API.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use xylem_storage_api::{InMemoryPageStore, PageStorageEngine, StorageEngineReader, DOCUMENT_ROOT};

use crate::cursor::Cursor;
use crate::error::{TxnError, TxnResult};
use crate::hash::HashMode;
use crate::txn::{now_millis, AfterCommitState, WriteTxn};

/// Identifies one open read or write transaction within a session.
pub type TxnId = u64;

/// How long [`ResourceSession::begin_write_txn`] waits for the write lock
/// before failing, absent an explicit override.
pub const DEFAULT_WRITE_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Which axis a read transaction is opened against (`spec.md` §6:
/// `begin_node_read_only_trx(revision | Instant)`).
///
/// These are deliberately distinct lookups: a revision number floors over the
/// set of *committed revision numbers*, while an instant floors over
/// *commit timestamps* — two different axes that happen to both be `u64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPoint {
    /// Floor over committed revision numbers (`spec.md` §4.5.1).
    Revision(u64),
    /// Floor over commit timestamps, as milliseconds since the Unix epoch
    /// (`spec.md` §4.5.1, §8 boundary scenario (d)).
    Instant(u64),
}

/// Tracks which revisions are pinned by open transactions, gating eviction of
/// older snapshots a real multi-version backend would otherwise reclaim.
#[derive(Default)]
struct RevisionEpochs {
    pin_counts: BTreeMap<u64, u32>,
}

impl RevisionEpochs {
    fn pin(&mut self, revision: u64) {
        *self.pin_counts.entry(revision).or_insert(0) += 1;
    }

    fn unpin(&mut self, revision: u64) {
        if let Some(count) = self.pin_counts.get_mut(&revision) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.pin_counts.remove(&revision);
            }
        }
    }

    fn min_active_revision(&self) -> Option<u64> {
        self.pin_counts.keys().next().copied()
    }

    fn active_revisions(&self) -> impl Iterator<Item = u64> + '_ {
        self.pin_counts.keys().copied()
    }
}

/// A resource's committed revision history plus the single active writer.
///
/// Read transactions pin an immutable snapshot by revision number; at most
/// one write transaction may be open at a time, serialized by a binary
/// semaphore with a timeout and orphan reclamation on timeout.
pub struct ResourceSession {
    revisions: BTreeMap<u64, Arc<InMemoryPageStore>>,
    /// Commit timestamp (ms since Unix epoch) for each revision, in the same
    /// key space as `revisions`. Strictly non-decreasing with revision
    /// number, which is what lets [`ResourceSession::get_revision_number`]
    /// floor-search it directly instead of maintaining a second sorted index.
    timestamps: BTreeMap<u64, u64>,
    write_lock: Arc<Semaphore>,
    write_permit: Option<tokio::sync::OwnedSemaphorePermit>,
    epochs: RevisionEpochs,
    readers: std::collections::HashMap<TxnId, u64>,
    writer: Option<(TxnId, WriteTxn)>,
    next_txn_id: TxnId,
    hash_mode: HashMode,
    max_node_count: u64,
}

/// One entry in a session's revision history (`spec.md` §6 `get_history`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevisionHistoryEntry {
    /// The revision number.
    pub revision: u64,
    /// When it was committed, as milliseconds since the Unix epoch.
    pub timestamp: u64,
}

impl ResourceSession {
    /// Opens a session with a fresh, empty revision `0`, timestamped at
    /// session creation.
    #[must_use]
    pub fn new(hash_mode: HashMode, max_node_count: u64) -> Self {
        let mut revisions = BTreeMap::new();
        revisions.insert(0, Arc::new(InMemoryPageStore::new().with_document_root()));
        let mut timestamps = BTreeMap::new();
        timestamps.insert(0, now_millis());
        Self {
            revisions,
            timestamps,
            write_lock: Arc::new(Semaphore::new(1)),
            write_permit: None,
            epochs: RevisionEpochs::default(),
            readers: std::collections::HashMap::new(),
            writer: None,
            next_txn_id: 1,
            hash_mode,
            max_node_count,
        }
    }

    /// The most recently committed revision number.
    #[must_use]
    pub fn most_recent_revision(&self) -> u64 {
        *self.revisions.keys().next_back().unwrap_or(&0)
    }

    /// Point-in-time floor lookup (`spec.md` §4.5.1): the latest committed
    /// revision at or before `target`, clamped to `0` below the oldest
    /// revision and to the most recent revision above it.
    #[must_use]
    pub fn floor_revision(&self, target: u64) -> u64 {
        match self.revisions.range(..=target).next_back() {
            Some((&rev, _)) => rev,
            None => *self.revisions.keys().next().unwrap_or(&0),
        }
    }

    /// Point-in-time floor lookup over commit *timestamps* (`spec.md` §4.5.1,
    /// boundary scenario §8(d)): the revision committed at or immediately
    /// before `instant`, milliseconds since the Unix epoch.
    ///
    /// `instant` before the oldest recorded timestamp clamps to revision `0`
    /// rather than erroring; `instant` after the newest clamps to the most
    /// recent revision. This is a distinct axis from
    /// [`ResourceSession::floor_revision`], which floors over revision
    /// numbers themselves — the two coincide only by coincidence of value,
    /// never by definition.
    #[must_use]
    pub fn get_revision_number(&self, instant: u64) -> u64 {
        match self.timestamps.iter().rev().find(|&(_, &ts)| ts <= instant) {
            Some((&rev, _)) => rev,
            None => *self.timestamps.keys().next().unwrap_or(&0),
        }
    }

    fn allocate_txn_id(&mut self) -> TxnId {
        let id = self.next_txn_id;
        self.next_txn_id += 1;
        id
    }

    /// Opens a read-only cursor pinned to the floor revision of `point`
    /// (`spec.md` §4.5.1, §6 `begin_node_read_only_trx(revision | Instant)`).
    /// Pass `None` to read the most recent revision.
    pub fn begin_read_txn(&mut self, point: Option<ReadPoint>) -> TxnResult<(TxnId, Cursor)> {
        let revision = match point {
            None => self.most_recent_revision(),
            Some(ReadPoint::Revision(r)) => self.floor_revision(r),
            Some(ReadPoint::Instant(t)) => self.get_revision_number(t),
        };
        let store = self
            .revisions
            .get(&revision)
            .cloned()
            .ok_or_else(|| TxnError::illegal_state("floor revision resolved to a missing snapshot"))?;
        let revision_timestamp = self.timestamps.get(&revision).copied().unwrap_or(0);
        let reader: Arc<dyn StorageEngineReader> = store.clone();
        let pager: Arc<dyn PageStorageEngine> = store;
        let cursor = Cursor::open(reader, pager, revision, revision_timestamp, DOCUMENT_ROOT)?;
        let id = self.allocate_txn_id();
        self.epochs.pin(revision);
        self.readers.insert(id, revision);
        Ok((id, cursor))
    }

    /// Closes a read transaction, unpinning its revision.
    pub fn close_read_txn(&mut self, id: TxnId) -> TxnResult<()> {
        let revision = self
            .readers
            .remove(&id)
            .ok_or_else(|| TxnError::usage(format!("no open read transaction with id {id}")))?;
        self.epochs.unpin(revision);
        Ok(())
    }

    /// Acquires the write lock (waiting up to `timeout`) and opens a write
    /// transaction against a private copy of the most recent revision.
    ///
    /// On timeout this reclaims the lock from an orphaned holder: if no
    /// writer is recorded in this session (the prior holder's process is
    /// presumed gone), the lock is force-reset rather than left deadlocked.
    pub async fn begin_write_txn(&mut self, timeout: Duration) -> TxnResult<TxnId> {
        if self.writer.is_some() {
            return Err(TxnError::usage("a write transaction is already open in this session"));
        }
        let permit = match tokio::time::timeout(timeout, self.write_lock.clone().acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(e)) => return Err(TxnError::Interrupted(e.to_string())),
            Err(_) => {
                // Timed out. This session has no record of an active writer,
                // so the held permit belongs to an orphan; replace the
                // semaphore outright rather than wait on a holder that will
                // never release it.
                tracing::warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "write lock timed out with no tracked writer; reclaiming as orphaned"
                );
                self.write_lock = Arc::new(Semaphore::new(1));
                self.write_lock
                    .clone()
                    .try_acquire_owned()
                    .map_err(|e| TxnError::usage(format!("could not reclaim orphaned write lock: {e}")))?
            }
        };
        self.write_permit = Some(permit);

        let snapshot = self.revisions.values().next_back().map_or_else(
            || InMemoryPageStore::new().with_document_root(),
            |store| store.snapshot(),
        );
        let revision = self.most_recent_revision();
        let txn = WriteTxn::new(Box::new(snapshot), revision, self.hash_mode, self.max_node_count);
        let id = self.allocate_txn_id();
        self.writer = Some((id, txn));
        Ok(id)
    }

    /// `get_history`: the full committed revision history, oldest first.
    #[must_use]
    pub fn get_history(&self) -> Vec<RevisionHistoryEntry> {
        self.timestamps
            .iter()
            .map(|(&revision, &timestamp)| RevisionHistoryEntry { revision, timestamp })
            .collect()
    }

    /// `get_history(n)`: the `n` most recent revisions, oldest first.
    #[must_use]
    pub fn get_history_last_n(&self, n: usize) -> Vec<RevisionHistoryEntry> {
        let history = self.get_history();
        let start = history.len().saturating_sub(n);
        history[start..].to_vec()
    }

    /// `get_history(from, to)`: revisions in the inclusive range `[from, to]`,
    /// oldest first.
    #[must_use]
    pub fn get_history_range(&self, from: u64, to: u64) -> Vec<RevisionHistoryEntry> {
        self.timestamps
            .range(from..=to)
            .map(|(&revision, &timestamp)| RevisionHistoryEntry { revision, timestamp })
            .collect()
    }

    fn release_write_lock(&mut self) {
        self.write_permit = None;
    }

    /// Mutable access to the open write transaction, for insert/remove
    /// primitives implemented by a language-specific subtype.
    pub fn write_txn_mut(&mut self, id: TxnId) -> TxnResult<&mut WriteTxn> {
        match &mut self.writer {
            Some((active_id, txn)) if *active_id == id => Ok(txn),
            _ => Err(TxnError::usage(format!("no open write transaction with id {id}"))),
        }
    }

    /// Commits the open write transaction, publishing its working copy as a
    /// new revision. Releases the write lock unconditionally, regardless of
    /// `after_commit`, since this reference backend supports only one
    /// logical write-txn slot per session.
    ///
    /// `message` is forwarded to [`WriteTxn::commit`] as its optional commit
    /// message; a custom `timestamp` is never accepted here since this
    /// backend always stamps commits with the current wall-clock time.
    pub fn commit_write_txn(
        &mut self,
        id: TxnId,
        after_commit: AfterCommitState,
        message: Option<String>,
    ) -> TxnResult<u64> {
        let (active_id, mut txn) = self.writer.take().ok_or_else(|| TxnError::usage("no open write transaction"))?;
        if active_id != id {
            self.writer = Some((active_id, txn));
            return Err(TxnError::usage(format!("no open write transaction with id {id}")));
        }
        let result = txn.commit(after_commit, message, None);
        self.release_write_lock();
        match result {
            Ok(new_revision) => {
                // This session only ever builds a write transaction over the
                // in-memory reference backend, so the downcast always
                // succeeds; a session wired to a different backend would
                // instead receive its new revision directly from that
                // backend's own multi-version commit path.
                let store = txn
                    .writer()
                    .as_any()
                    .downcast_ref::<InMemoryPageStore>()
                    .ok_or_else(|| TxnError::illegal_state("write transaction backend was not the in-memory reference store"))?
                    .snapshot();
                self.revisions.insert(new_revision, Arc::new(store));
                self.timestamps.insert(new_revision, txn.last_commit_timestamp().unwrap_or_else(now_millis));
                Ok(new_revision)
            }
            Err(e) => Err(e),
        }
    }

    /// Rolls back and discards the open write transaction, releasing the
    /// write lock without publishing a new revision.
    pub fn rollback_write_txn(&mut self, id: TxnId) -> TxnResult<()> {
        let (active_id, mut txn) = self.writer.take().ok_or_else(|| TxnError::usage("no open write transaction"))?;
        if active_id != id {
            self.writer = Some((active_id, txn));
            return Err(TxnError::usage(format!("no open write transaction with id {id}")));
        }
        let result = txn.rollback();
        self.release_write_lock();
        result
    }

    /// The oldest revision still pinned by an open read transaction, or
    /// `None` if no reads are outstanding. A background sweeper uses this to
    /// decide which older revisions are safe to evict.
    #[must_use]
    pub fn min_active_revision(&self) -> Option<u64> {
        self.epochs.min_active_revision()
    }

    /// Every revision currently pinned by an open read transaction, in no
    /// particular order. A background sweeper or a test asserting "no
    /// eviction of an in-epoch revision" iterates this directly.
    pub fn active_revisions(&self) -> impl Iterator<Item = u64> + '_ {
        self.epochs.active_revisions()
    }

    /// Evicts committed revisions strictly older than
    /// [`ResourceSession::min_active_revision`] (or all but the most recent,
    /// if no reads are outstanding), keeping revision `0` as the permanent
    /// floor for `floor_revision` clamping.
    pub fn sweep_old_revisions(&mut self) {
        let keep_from = self.min_active_revision().unwrap_or_else(|| self.most_recent_revision());
        self.revisions.retain(|&rev, _| rev == 0 || rev >= keep_from);
    }

    /// Closes the session: rolls back any open write transaction and clears
    /// read-transaction bookkeeping. Per-resource revision snapshots are not
    /// cleared, since a shared cache may still serve other sessions.
    pub fn close(&mut self) -> TxnResult<()> {
        if let Some((id, _)) = &self.writer {
            let id = *id;
            self.rollback_write_txn(id)?;
        }
        self.readers.clear();
        self.epochs = RevisionEpochs::default();
        Ok(())
    }
}
