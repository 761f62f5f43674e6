use std::marker::PhantomData;
use std::sync::Arc;

use crate::broadcast::{BroadcastId, Listener, ListenerGuard};
use crate::error::Error;
use crate::porcelain::{Subscribe, SubscriptionGuard, subscribe::IntoSubscribeListener};
use crate::signal::{Get, Peek, Signal, With};

/// A signal that is a transformed view of another signal. Stateless: the
/// transform runs on every read, and notifications are the upstream's.
pub struct Map<U, I, O, F> {
    upstream: U,
    transform: Arc<F>,
    _shape: PhantomData<fn(&I) -> O>,
}

impl<U, I, O, F> Map<U, I, O, F>
where
    U: Signal + With<I>,
    I: 'static,
    O: 'static,
    F: Fn(&I) -> O,
{
    pub fn new(upstream: U, transform: F) -> Self { Self { upstream, transform: Arc::new(transform), _shape: PhantomData } }
}

impl<U: Clone, I, O, F> Clone for Map<U, I, O, F> {
    fn clone(&self) -> Self { Self { upstream: self.upstream.clone(), transform: self.transform.clone(), _shape: PhantomData } }
}

impl<U, I, O, F> With<O> for Map<U, I, O, F>
where
    U: Signal + With<I>,
    I: 'static,
    O: 'static,
    F: Fn(&I) -> O,
{
    fn with<R>(&self, f: impl FnOnce(&O) -> R) -> R {
        self.upstream.with(|input| {
            let mapped = (self.transform)(input);
            f(&mapped)
        })
    }
}

impl<U, I, O, F> Signal for Map<U, I, O, F>
where
    U: Signal,
    I: Send + Sync + 'static,
    O: Send + Sync + 'static,
    F: Fn(&I) -> O + Send + Sync,
{
    fn listen(&self, listener: Listener) -> ListenerGuard { self.upstream.listen(listener) }

    fn broadcast_id(&self) -> BroadcastId { self.upstream.broadcast_id() }

    fn version(&self) -> u64 { self.upstream.version() }

    fn settle(&self) -> Result<u64, Error> { self.upstream.settle() }

    fn name(&self) -> Option<String> { self.upstream.name() }
}

impl<U, I, O, F> Get<O> for Map<U, I, O, F>
where
    U: Signal + With<I>,
    I: Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
    F: Fn(&I) -> O + Send + Sync,
{
    fn get(&self) -> O { self.with(|value| value.clone()) }
}

impl<U, I, O, F> Subscribe<O> for Map<U, I, O, F>
where
    U: Signal + Peek<I> + Clone + Send + Sync + 'static,
    I: Clone + Send + Sync + 'static,
    O: Send + Sync + 'static,
    F: Fn(&I) -> O + Send + Sync + 'static,
{
    fn subscribe<L>(&self, listener: L) -> SubscriptionGuard
    where L: IntoSubscribeListener<O> {
        let listener = listener.into_subscribe_listener();
        let upstream = self.upstream.clone();
        let transform = self.transform.clone();
        let subscription = self.listen(Arc::new(move || {
            // Untracked read: a subscription callback must not register
            // dependencies against whatever frame happens to be active
            let value = transform(&upstream.peek());
            listener(value);
        }));
        SubscriptionGuard::new(subscription)
    }
}
