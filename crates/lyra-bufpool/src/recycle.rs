use std::{fmt, sync::Arc};

use parking_lot::Mutex;

/// Types that can be reset and handed out again.
pub trait Reuse {
    /// Clear the value for its next use.
    ///
    /// Returns `false` if the value should be dropped instead of kept.
    fn reuse(&mut self) -> bool;
}

struct RecyclerInner<T> {
    free: Vec<T>,
    max_free: usize,
    created: u64,
    reused: u64,
}

/// Bounded free-list of reusable wrappers.
///
/// Cloning yields another handle onto the same list.
pub struct Recycler<T> {
    inner: Arc<Mutex<RecyclerInner<T>>>,
}

impl<T> Clone for Recycler<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Recycler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Recycler")
            .field("free", &inner.free.len())
            .field("max_free", &inner.max_free)
            .field("created", &inner.created)
            .field("reused", &inner.reused)
            .finish()
    }
}

impl<T: Reuse + Default> Recycler<T> {
    #[must_use]
    pub fn new(max_free: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RecyclerInner {
                free: Vec::with_capacity(max_free.min(64)),
                max_free,
                created: 0,
                reused: 0,
            })),
        }
    }

    /// Take a cleared value, creating one if the list is empty.
    pub fn get(&self) -> T {
        let mut inner = self.inner.lock();
        if let Some(value) = inner.free.pop() {
            inner.reused += 1;
            value
        } else {
            inner.created += 1;
            T::default()
        }
    }

    /// Hand a value back. Dropped when the list is full.
    pub fn recycle(&self, mut value: T) {
        if !value.reuse() {
            return;
        }
        let mut inner = self.inner.lock();
        if inner.free.len() < inner.max_free {
            inner.free.push(value);
        }
    }

    pub fn available(&self) -> usize {
        self.inner.lock().free.len()
    }

    /// `(created, reused)` counters.
    pub fn counters(&self) -> (u64, u64) {
        let inner = self.inner.lock();
        (inner.created, inner.reused)
    }
}
