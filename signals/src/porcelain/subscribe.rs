use crate::broadcast::ListenerGuard;
use crate::signal::{Get, Peek};

/// Type alias for subscribe listeners
pub type SubscribeListener<T> = Box<dyn Fn(T) + Send + Sync + 'static>;

/// Trait for types that can be converted into subscribe listeners
pub trait IntoSubscribeListener<T> {
    fn into_subscribe_listener(self) -> SubscribeListener<T>;
}

/// Trait for subscribing to changes - provides the subscribe method
pub trait Subscribe<T: 'static> {
    /// Subscribe to changes with a listener that receives the new value
    fn subscribe<F>(&self, listener: F) -> SubscriptionGuard
    where F: IntoSubscribeListener<T>;
}

pub trait DynSubscribe<T: 'static> {
    fn dyn_subscribe(&self, listener: Box<dyn Fn(T) + Send + Sync + 'static>) -> SubscriptionGuard;
}

impl<S, T: 'static> DynSubscribe<T> for S
where S: Subscribe<T>
{
    fn dyn_subscribe(&self, listener: Box<dyn Fn(T) + Send + Sync + 'static>) -> SubscriptionGuard { Subscribe::subscribe(self, listener) }
}

/// The capability set of a value-bearing node, as a dyn-safe bundle: tracked
/// and untracked reads plus subscription. Useful for type-erased handles.
pub trait GetAndDynSubscribe<T: 'static>: Get<T> + Peek<T> + DynSubscribe<T> {}
impl<T: 'static, S> GetAndDynSubscribe<T> for S where S: Get<T> + Peek<T> + DynSubscribe<T> {}

/// A guard for a subscription to a signal
pub struct SubscriptionGuard {
    _listenerguard: ListenerGuard,
}

impl SubscriptionGuard {
    pub fn new(guard: ListenerGuard) -> Self { Self { _listenerguard: guard } }
}

// IntoSubscribeListener implementation for std::sync::mpsc channels
impl<T: Send + 'static> IntoSubscribeListener<T> for std::sync::mpsc::Sender<T> {
    fn into_subscribe_listener(self) -> SubscribeListener<T> {
        Box::new(move |value| {
            let _ = self.send(value);
        })
    }
}

// IntoSubscribeListener implementation for tokio channels
#[cfg(feature = "tokio")]
impl<T: Send + 'static> IntoSubscribeListener<T> for tokio::sync::mpsc::UnboundedSender<T> {
    fn into_subscribe_listener(self) -> SubscribeListener<T> {
        Box::new(move |value| {
            let _ = self.send(value);
        })
    }
}

// Implementations for converting closures to SubscribeListener<T>
impl<F, T> IntoSubscribeListener<T> for F
where F: Fn(T) + Send + Sync + 'static
{
    fn into_subscribe_listener(self) -> SubscribeListener<T> { Box::new(self) }
}
