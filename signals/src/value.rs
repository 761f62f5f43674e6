use crate::change::Changed;
use std::sync::Arc;

/// Shared storage for a signal's present value.
pub struct ValueCell<T>(Arc<std::sync::RwLock<T>>);

/// A read-only value container that shares storage with a [`ValueCell`].
pub struct ReadValueCell<T>(Arc<std::sync::RwLock<T>>);

impl<T> Clone for ValueCell<T> {
    fn clone(&self) -> Self { Self(self.0.clone()) }
}

impl<T> Clone for ReadValueCell<T> {
    fn clone(&self) -> Self { Self(self.0.clone()) }
}

impl<T> ValueCell<T> {
    pub fn new(value: T) -> Self { Self(Arc::new(std::sync::RwLock::new(value))) }

    pub fn set(&self, value: T) {
        let mut current = self.0.write().expect("value cell poisoned");
        *current = value;
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let guard = self.0.read().expect("value cell poisoned");
        f(&guard)
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.0.write().expect("value cell poisoned");
        f(&mut guard)
    }

    /// Create a read-only view of this value
    pub fn readvalue(&self) -> ReadValueCell<T> { ReadValueCell(self.0.clone()) }
}

impl<T: Changed> ValueCell<T> {
    /// Store `new` only if the change policy considers it different from the
    /// current value. Returns whether the store happened.
    pub fn set_if_changed(&self, new: T) -> bool {
        let mut current = self.0.write().expect("value cell poisoned");
        if current.changed(&new) {
            *current = new;
            true
        } else {
            false
        }
    }
}

impl<T: Clone> ValueCell<T> {
    pub fn value(&self) -> T { self.0.read().expect("value cell poisoned").clone() }
}

impl<T> ReadValueCell<T> {
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let guard = self.0.read().expect("value cell poisoned");
        f(&guard)
    }
}

impl<T: Clone> ReadValueCell<T> {
    pub fn value(&self) -> T { self.0.read().expect("value cell poisoned").clone() }
}
