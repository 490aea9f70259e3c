//! Compute-once cache for derived values.

use std::sync::OnceLock;

/// A value computed on first access and cached forever, including an
/// absent result.
///
/// Unlike a plain `Option` cache, a `None` result is remembered and the
/// computation is never attempted again.
#[derive(Debug)]
pub struct Memo<T> {
    cell: OnceLock<Option<T>>,
}

impl<T> Default for Memo<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Memo<T> {
    pub const fn new() -> Self {
        Self {
            cell: OnceLock::new(),
        }
    }

    /// Returns the cached value, running `compute` if this is the first access.
    ///
    /// Concurrent first accesses block until the single computation finishes.
    pub fn get_or_compute<F>(&self, compute: F) -> Option<&T>
    where
        F: FnOnce() -> Option<T>,
    {
        self.cell.get_or_init(compute).as_ref()
    }

    /// Returns true once the computation has run.
    pub fn is_computed(&self) -> bool {
        self.cell.get().is_some()
    }
}
