use crate::error::Result;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Holds the processor's "draining" flag for as long as it lives.
///
/// Acquisition is a single compare-and-swap; dropping the guard clears the
/// flag, so early returns and panics cannot leave the processor wedged.
pub struct DrainGuard {
    flag: Arc<AtomicBool>,
}

impl DrainGuard {
    pub fn try_acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| DrainGuard {
                flag: Arc::clone(flag),
            })
    }
}

impl Drop for DrainGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// A tantivy writer bound to a drain guard.
///
/// Fields drop in declaration order: the writer (and its directory lock) is
/// released before the draining flag is cleared.
pub struct ManagedIndexWriter {
    inner: tantivy::IndexWriter,
    _guard: DrainGuard,
}

impl ManagedIndexWriter {
    pub(crate) fn new(inner: tantivy::IndexWriter, guard: DrainGuard) -> Self {
        ManagedIndexWriter {
            inner,
            _guard: guard,
        }
    }

    /// Block until background merges finish, then release the writer and the guard.
    pub fn finish(self) -> Result<()> {
        let ManagedIndexWriter { inner, _guard } = self;
        inner.wait_merging_threads()?;
        Ok(())
    }
}

impl Deref for ManagedIndexWriter {
    type Target = tantivy::IndexWriter;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for ManagedIndexWriter {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}
