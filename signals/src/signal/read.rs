use std::sync::{Arc, RwLock};

use crate::broadcast::{Broadcast, BroadcastId, Listener, ListenerGuard};
use crate::context::CurrentObserver;
use crate::hooks;
use crate::porcelain::{Subscribe, SubscriptionGuard, subscribe::IntoSubscribeListener};
use crate::signal::map::Map;
use crate::signal::{Get, Peek, Signal, With};
use crate::value::{ReadValueCell, ValueCell};

/// Read-only signal
pub struct Read<T> {
    pub(crate) value: ValueCell<T>,
    pub(crate) broadcast: Broadcast,
    pub(crate) name: Arc<RwLock<Option<String>>>,
}

impl<T> Clone for Read<T> {
    fn clone(&self) -> Self { Self { value: self.value.clone(), broadcast: self.broadcast.clone(), name: self.name.clone() } }
}

impl<T> Read<T> {
    /// Returns a clone of the current value - not tracked by the current context
    pub fn value(&self) -> T
    where T: Clone {
        self.value.value()
    }

    /// Number of live subscriptions on this signal.
    pub fn listener_count(&self) -> usize { self.broadcast.listener_count() }

    /// Get a read-only cell sharing this signal's storage.
    pub fn readvalue(&self) -> ReadValueCell<T> { self.value.readvalue() }

    /// Create a mapped signal that transforms this signal's values on-demand
    pub fn map<Output, Transform>(&self, transform: Transform) -> Map<Self, T, Output, Transform>
    where
        T: Send + Sync + 'static,
        Transform: Fn(&T) -> Output,
        Output: 'static,
    {
        Map::new(self.clone(), transform)
    }
}

impl<T: Clone + Send + Sync + 'static> Get<T> for Read<T> {
    fn get(&self) -> T {
        CurrentObserver::track(self);
        hooks::on_read(self);
        self.value.value()
    }
}

impl<T: Clone + Send + Sync + 'static> Peek<T> for Read<T> {
    fn peek(&self) -> T { self.value.value() }
}

impl<T: Send + Sync + 'static> With<T> for Read<T> {
    fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        CurrentObserver::track(self);
        hooks::on_read(self);
        self.value.with(f)
    }
}

impl<T: Send + Sync + 'static> Signal for Read<T> {
    fn listen(&self, listener: Listener) -> ListenerGuard { self.broadcast.listen(listener) }

    fn broadcast_id(&self) -> BroadcastId { self.broadcast.id() }

    fn version(&self) -> u64 { self.broadcast.version() }

    fn name(&self) -> Option<String> { self.name.read().expect("name cell poisoned").clone() }
}

/// foo == bar will automatically track the signals used in the comparison against the current observer
impl<T: PartialEq + Send + Sync + 'static> PartialEq for Read<T> {
    fn eq(&self, other: &Self) -> bool {
        // Short-circuit if comparing to self to avoid deadlock from nested with calls
        if std::ptr::eq(self, other) {
            return true;
        }
        self.with(|self_val| other.with(|other_val| self_val == other_val))
    }
}

impl<T: Eq + Send + Sync + 'static> Eq for Read<T> {}

impl<T: std::fmt::Display + Send + Sync + 'static> std::fmt::Display for Read<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { self.with(|v| write!(f, "{}", v)) }
}

impl<T> Subscribe<T> for Read<T>
where T: Clone + Send + Sync + 'static
{
    fn subscribe<F>(&self, listener: F) -> SubscriptionGuard
    where F: IntoSubscribeListener<T> {
        let listener = listener.into_subscribe_listener();
        let ro_value = self.readvalue(); // Shares storage without keeping a tracking surface alive
        let subscription = self.listen(Arc::new(move || {
            // Get current value when the broadcast fires
            let current_value = ro_value.value();
            listener(current_value);
        }));
        SubscriptionGuard::new(subscription)
    }
}
