//! Free-list pooling for payload containers.
//!
//! A [`Recycler`] hands out [`Pooled`] values. Dropping a `Pooled` (or
//! passing it to [`Recycler::put`]) clears the value with
//! [`Recycle::recycle`] and returns it to the free list, so every value handed
//! out by [`Recycler::get`] starts empty.
//!
//! Pooling is optional behind the same interface: [`Pooled::detached`] wraps
//! a value that is simply dropped at the end of its life.

use parking_lot::Mutex;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Default upper bound on idle instances kept per free list.
pub const DEFAULT_MAX_IDLE: usize = 64;

/// Values that can be cleared for reuse.
pub trait Recycle {
    /// Reset to the state of a freshly created value.
    fn recycle(&mut self);
}

struct RecyclerInner<T> {
    free: Mutex<Vec<T>>,
    max_idle: usize,
    allocated: AtomicUsize,
    in_use: AtomicUsize,
}

impl<T: Recycle> RecyclerInner<T> {
    fn give_back(&self, mut value: T) {
        value.recycle();
        self.in_use.fetch_sub(1, Ordering::AcqRel);
        let mut free = self.free.lock();
        if free.len() < self.max_idle {
            free.push(value);
        }
    }
}

/// Thread-safe free list of reusable values.
///
/// Cloning a `Recycler` yields another handle to the same free list.
pub struct Recycler<T> {
    inner: Arc<RecyclerInner<T>>,
}

impl<T> Clone for Recycler<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Recycle + Default> Recycler<T> {
    /// Create a recycler keeping at most [`DEFAULT_MAX_IDLE`] idle values.
    pub fn new() -> Self {
        Self::with_max_idle(DEFAULT_MAX_IDLE)
    }

    /// Create a recycler keeping at most `max_idle` idle values.
    pub fn with_max_idle(max_idle: usize) -> Self {
        Self {
            inner: Arc::new(RecyclerInner {
                free: Mutex::new(Vec::new()),
                max_idle,
                allocated: AtomicUsize::new(0),
                in_use: AtomicUsize::new(0),
            }),
        }
    }

    /// Take a cleared value from the free list, or allocate a new one.
    pub fn get(&self) -> Pooled<T> {
        let reused = self.inner.free.lock().pop();
        let value = reused.unwrap_or_else(|| {
            self.inner.allocated.fetch_add(1, Ordering::Relaxed);
            T::default()
        });
        self.inner.in_use.fetch_add(1, Ordering::AcqRel);
        Pooled {
            value,
            home: Some(Arc::clone(&self.inner)),
        }
    }

    /// Return a value to its free list.
    ///
    /// Equivalent to dropping it; values from another recycler go back to
    /// their own free list, detached values are dropped.
    pub fn put(&self, pooled: Pooled<T>) {
        drop(pooled);
    }

    /// Number of values waiting in the free list.
    pub fn idle(&self) -> usize {
        self.inner.free.lock().len()
    }

    /// Number of values currently handed out.
    pub fn in_use(&self) -> usize {
        self.inner.in_use.load(Ordering::Acquire)
    }

    /// Total number of values ever allocated by this recycler.
    pub fn allocated(&self) -> usize {
        self.inner.allocated.load(Ordering::Relaxed)
    }

    /// Maximum number of idle values kept.
    pub fn max_idle(&self) -> usize {
        self.inner.max_idle
    }
}

impl<T: Recycle + Default> Default for Recycler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Recycler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recycler")
            .field("max_idle", &self.inner.max_idle)
            .field("allocated", &self.inner.allocated.load(Ordering::Relaxed))
            .field("in_use", &self.inner.in_use.load(Ordering::Relaxed))
            .finish()
    }
}

/// A value on loan from a [`Recycler`].
///
/// Returns to its free list when dropped.
pub struct Pooled<T: Recycle + Default> {
    value: T,
    home: Option<Arc<RecyclerInner<T>>>,
}

impl<T: Recycle + Default> Pooled<T> {
    /// Wrap a value that doesn't belong to any pool.
    pub fn detached(value: T) -> Self {
        Self { value, home: None }
    }

    /// Check whether this value returns to a pool when dropped.
    pub fn is_pooled(&self) -> bool {
        self.home.is_some()
    }

    /// Take the value out of pool accounting.
    pub fn into_inner(mut self) -> T {
        if let Some(home) = self.home.take() {
            home.in_use.fetch_sub(1, Ordering::AcqRel);
        }
        std::mem::take(&mut self.value)
    }
}

impl<T: Recycle + Default> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T: Recycle + Default> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

impl<T: Recycle + Default> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(home) = self.home.take() {
            home.give_back(std::mem::take(&mut self.value));
        }
    }
}

impl<T: Recycle + Default + fmt::Debug> fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.value.fmt(f)
    }
}

impl<T: Recycle + Default> From<T> for Pooled<T> {
    fn from(value: T) -> Self {
        Self::detached(value)
    }
}
