//! An AtomicCell type which uses a critical_section Mutex to enforce atomic store/load
//!
//! Values shared between a dictionary handler and application code are held in these, typically
//! behind an `Arc`, so that a handler can be `Send` while the application keeps its own reference.

use core::{cell::Cell, ops::Add};
use critical_section::Mutex;

/// A `Copy` value which can be shared and updated without `&mut`
#[derive(Debug)]
pub struct AtomicCell<T: Copy> {
    inner: Mutex<Cell<T>>,
}

impl<T: Send + Copy> AtomicCell<T> {
    /// Create a cell
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(Cell::new(value)),
        }
    }

    /// Read the current value
    pub fn load(&self) -> T {
        critical_section::with(|cs| self.inner.borrow(cs).get())
    }

    /// Replace the current value
    pub fn store(&self, value: T) {
        critical_section::with(|cs| self.inner.borrow(cs).set(value));
    }

    /// Replace the current value, returning the old one
    pub fn swap(&self, value: T) -> T {
        critical_section::with(|cs| self.inner.borrow(cs).replace(value))
    }

    /// Apply `f` to the current value
    ///
    /// If `f` returns `Some`, the new value is stored and the old one returned as `Ok`. Otherwise
    /// the cell is unchanged and the current value is returned as `Err`.
    pub fn fetch_update(&self, mut f: impl FnMut(T) -> Option<T>) -> Result<T, T> {
        critical_section::with(|cs| {
            let cell = self.inner.borrow(cs);
            let old_value = cell.get();
            if let Some(new_value) = f(old_value) {
                cell.set(new_value);
                Ok(old_value)
            } else {
                Err(old_value)
            }
        })
    }
}

impl<T: Send + Copy + Default> AtomicCell<T> {
    /// Read the current value, leaving the default in its place
    pub fn take(&self) -> T {
        critical_section::with(|cs| self.inner.borrow(cs).take())
    }
}

impl<T: Copy + Add<Output = T>> AtomicCell<T> {
    /// Add to the current value, returning the old one
    pub fn fetch_add(&self, value: T) -> T {
        critical_section::with(|cs| {
            let cell = self.inner.borrow(cs);
            let old_value = cell.get();
            cell.set(old_value + value);
            old_value
        })
    }
}

impl<T: Default + Copy + Send> Default for AtomicCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}
