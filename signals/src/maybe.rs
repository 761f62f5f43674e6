use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use crate::change::Changed;
use crate::porcelain::{DynSubscribe, GetAndDynSubscribe, SubscriptionGuard};
use crate::signal::{Calculated, Get, Mut, Peek, Read};

/// Either a plain value or a handle to a value-bearing reactive node.
///
/// This is the boundary type for layers that accept "a `T` or a signal of
/// `T`" - arithmetic sugar, formatting, collection helpers. [`MaybeSignal::get`]
/// collapses either shape to a plain value; for the dynamic shape the read is
/// tracked, so code that collapses inside a compute function picks up the
/// dependency as usual.
pub enum MaybeSignal<T: 'static> {
    /// A plain value, yielded as-is.
    Static(T),
    /// A live node; reads go through it and are tracked.
    Dynamic(Arc<dyn GetAndDynSubscribe<T> + Send + Sync>),
}

impl<T: Clone> Clone for MaybeSignal<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Static(value) => Self::Static(value.clone()),
            Self::Dynamic(signal) => Self::Dynamic(signal.clone()),
        }
    }
}

impl<T: Clone + 'static> MaybeSignal<T> {
    /// Collapse to a plain value. Idempotent: collapsing what is already a
    /// plain value is a clone, nothing more.
    pub fn get(&self) -> T {
        match self {
            Self::Static(value) => value.clone(),
            Self::Dynamic(signal) => signal.get(),
        }
    }

    /// Like [`get`](MaybeSignal::get) but never tracked.
    pub fn peek(&self) -> T {
        match self {
            Self::Static(value) => value.clone(),
            Self::Dynamic(signal) => signal.peek(),
        }
    }

    /// True when this holds a live node rather than a plain value.
    pub fn is_dynamic(&self) -> bool { matches!(self, Self::Dynamic(_)) }

    /// Subscribe to changes; a plain value never changes, so there is nothing
    /// to subscribe to.
    pub fn subscribe(&self, listener: impl Fn(T) + Send + Sync + 'static) -> Option<SubscriptionGuard> {
        match self {
            Self::Static(_) => None,
            Self::Dynamic(signal) => Some(signal.dyn_subscribe(Box::new(listener))),
        }
    }
}

impl<T: 'static> From<T> for MaybeSignal<T> {
    fn from(value: T) -> Self { Self::Static(value) }
}

impl<T: Clone + Send + Sync + 'static> From<Read<T>> for MaybeSignal<T> {
    fn from(signal: Read<T>) -> Self { Self::Dynamic(Arc::new(signal)) }
}

impl<T: Changed + Clone + Send + Sync + 'static> From<Calculated<T>> for MaybeSignal<T> {
    fn from(signal: Calculated<T>) -> Self { Self::Dynamic(Arc::new(signal)) }
}

impl<T: Clone + Send + Sync + 'static> From<&Mut<T>> for MaybeSignal<T> {
    fn from(signal: &Mut<T>) -> Self { Self::Dynamic(Arc::new(signal.read())) }
}

/// Collapse an ordered sequence of values-or-nodes to plain values.
pub fn deep_unref_vec<T: Clone + 'static>(items: &[MaybeSignal<T>]) -> Vec<T> {
    items.iter().map(MaybeSignal::get).collect()
}

/// Collapse a mapping whose values are values-or-nodes to plain values.
pub fn deep_unref_map<K, V>(map: &HashMap<K, MaybeSignal<V>>) -> HashMap<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone + 'static,
{
    map.iter().map(|(key, value)| (key.clone(), value.get())).collect()
}
