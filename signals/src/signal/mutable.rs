use crate::broadcast::Broadcast;
use crate::change::Changed;
use crate::hooks;
use crate::signal::read::Read;
use crate::value::ValueCell;
use std::sync::{Arc, RwLock};

/// Mutable (stateful) signal. We intentionally do not implement subscription
/// methods for this signal type: readers subscribe and track through the
/// [`Read`] view returned by [`Mut::read`], writers hold the `Mut`.
///
/// A write runs the [`Changed`] policy against the current value first. A
/// write that does not count as a change has no side effects at all: no
/// version bump, no notification, nothing for subscribers to see.
pub struct Mut<T> {
    value: ValueCell<T>,
    broadcast: Broadcast,
    name: Arc<RwLock<Option<String>>>,
}

impl<T> Clone for Mut<T> {
    fn clone(&self) -> Self { Self { value: self.value.clone(), broadcast: self.broadcast.clone(), name: self.name.clone() } }
}

impl<T: Send + Sync + 'static> Mut<T> {
    pub fn new(value: T) -> Self {
        let signal = Self { value: ValueCell::new(value), broadcast: Broadcast::new(), name: Arc::new(RwLock::new(None)) };
        hooks::on_created(&signal.read());
        signal
    }

    /// Attach a diagnostic name. No semantic effect.
    pub fn named(self, name: impl Into<String>) -> Self {
        *self.name.write().expect("name cell poisoned") = Some(name.into());
        hooks::on_named(&self.read());
        self
    }

    /// Readonly signal downstream of this mutable signal
    pub fn read(&self) -> Read<T> {
        Read { value: self.value.clone(), broadcast: self.broadcast.clone(), name: self.name.clone() }
    }

    /// Calls a closure with a borrow of the current value,
    /// not tracked by the current context
    pub fn with_untracked<R>(&self, f: impl FnOnce(&T) -> R) -> R { self.value.with(f) }

    /// Mutate the value in place and notify subscribers.
    ///
    /// Mutation through a borrow always counts as a change: there is no old
    /// value left to compare against once the closure has run, so the version
    /// is bumped and subscribers are notified unconditionally.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let result = self.value.update(f);
        self.broadcast.bump();
        tracing::trace!(signal = ?self.broadcast.id(), "updated in place");
        hooks::on_updated(&self.read());
        self.broadcast.send();
        result
    }
}

impl<T: Changed + Send + Sync + 'static> Mut<T> {
    pub fn set(&self, value: T) {
        if self.value.set_if_changed(value) {
            self.broadcast.bump();
            tracing::trace!(signal = ?self.broadcast.id(), version = self.broadcast.version(), "changed");
            hooks::on_updated(&self.read());
            self.broadcast.send();
        }
    }
}

impl<T: Changed + Clone + Send + Sync + 'static> Mut<T> {
    /// Temporarily replace the value for the duration of a scope.
    ///
    /// The replacement goes through the normal write path, so dependents see
    /// it as an ordinary change. When the returned guard drops - on any exit
    /// path - the value captured at entry is written back, again through the
    /// normal write path, overwriting any writes made inside the scope.
    pub fn scoped(&self, value: T) -> ScopedValue<T> {
        let saved = self.value.value();
        self.set(value);
        ScopedValue { target: self.clone(), saved: Some(saved) }
    }
}

impl<T: Clone> Mut<T> {
    /// Returns a clone of the current value - not tracked by the current context
    pub fn peek(&self) -> T { self.value.value() }
}

/// Guard for a scoped override created by [`Mut::scoped`]; restores the
/// original value when dropped.
pub struct ScopedValue<T: Changed + Clone + Send + Sync + 'static> {
    target: Mut<T>,
    saved: Option<T>,
}

impl<T: Changed + Clone + Send + Sync + 'static> Drop for ScopedValue<T> {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            self.target.set(saved);
        }
    }
}
