// SPDX-License-Identifier: Apache-2.0
//! RAII page pinning (`spec.md` §4 collaborator contracts).

use std::fmt;
use std::sync::Arc;

use crate::ident::PageKey;

/// Anything capable of releasing a page previously pinned on its behalf.
///
/// Kept as a narrow trait separate from [`crate::traits::PageStorageEngine`]
/// so a [`PageGuard`] can hold a type-erased release target without the
/// engine trait itself needing to be object-safe in a particular shape; any
/// engine implements this by forwarding to its own unpin logic.
pub trait PageReleaser: Send + Sync {
    /// Releases the pin held on `key`. Called at most once per guard, from
    /// that guard's `Drop`.
    fn release_page(&self, key: PageKey);
}

/// Immutable bytes of a pinned page, shared without copying.
#[derive(Clone)]
pub struct PageHandle {
    key: PageKey,
    bytes: Arc<[u8]>,
}

impl PageHandle {
    /// Wraps page bytes under the given key.
    #[must_use]
    pub fn new(key: PageKey, bytes: Arc<[u8]>) -> Self {
        Self { key, bytes }
    }

    /// The page's key.
    #[must_use]
    pub const fn key(&self) -> PageKey {
        self.key
    }

    /// The page's raw bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for PageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageHandle")
            .field("key", &self.key)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// A pin on a page, released automatically when dropped.
///
/// Holding a `PageGuard` is what makes it safe to read a node slot's bytes
/// without racing a concurrent writer's in-place slot reuse: the page cannot
/// be evicted or overwritten while at least one guard over it is alive.
pub struct PageGuard {
    handle: PageHandle,
    releaser: Arc<dyn PageReleaser>,
    released: bool,
}

impl PageGuard {
    /// Wraps a pinned page handle together with the engine that will release it.
    #[must_use]
    pub fn new(handle: PageHandle, releaser: Arc<dyn PageReleaser>) -> Self {
        Self {
            handle,
            releaser,
            released: false,
        }
    }

    /// The guarded page's key.
    #[must_use]
    pub const fn key(&self) -> PageKey {
        self.handle.key()
    }

    /// The guarded page's bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        self.handle.bytes()
    }

    /// Releases the pin early, before the guard's scope ends.
    pub fn release_now(mut self) {
        self.do_release();
    }

    fn do_release(&mut self) {
        if !self.released {
            self.releaser.release_page(self.handle.key());
            self.released = true;
        }
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        self.do_release();
    }
}

impl fmt::Debug for PageGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageGuard")
            .field("handle", &self.handle)
            .field("released", &self.released)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct CountingReleaser {
        count: AtomicU64,
    }

    impl PageReleaser for CountingReleaser {
        fn release_page(&self, _key: PageKey) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn drop_releases_exactly_once() {
        let releaser = Arc::new(CountingReleaser {
            count: AtomicU64::new(0),
        });
        let handle = PageHandle::new(PageKey(1), Arc::from(vec![0u8; 4]));
        let guard = PageGuard::new(handle, releaser.clone());
        drop(guard);
        assert_eq!(releaser.count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn release_now_prevents_double_release_on_drop() {
        let releaser = Arc::new(CountingReleaser {
            count: AtomicU64::new(0),
        });
        let handle = PageHandle::new(PageKey(1), Arc::from(vec![0u8; 4]));
        let guard = PageGuard::new(handle, releaser.clone());
        guard.release_now();
        assert_eq!(releaser.count.load(Ordering::SeqCst), 1);
    }
}
