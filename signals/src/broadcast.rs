use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

/// A listener that can be called when broadcast notifications are sent.
pub type Listener = Arc<dyn Fn() + Send + Sync + 'static>;

/// Trait for types that can be converted into broadcast listeners.
pub trait IntoListener {
    /// Convert this type into a listener function that can be called on notifications.
    fn into_listener(self) -> Listener;
}

/// Identifies a broadcast for subscription deduplication.
///
/// Multiple signals may share the same broadcast (and thus the same id). The id
/// remains a valid deduplication key as long as some handle to the broadcast is
/// held; observers that keep a handle in their dependency entries rely on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BroadcastId(usize);

/// Per-node notification hub: an ordered set of listeners plus the node's
/// monotonic version counter.
///
/// Listeners are delivered in the order they subscribed. `send` iterates a
/// snapshot, so a listener may subscribe or unsubscribe (including itself)
/// during delivery without disturbing the pass. The version counter starts at 0
/// and is bumped by the owning node exactly when a write or recomputation
/// counted as a real change, always before the corresponding `send`.
#[derive(Clone)]
pub struct Broadcast(Arc<Inner>);

struct Inner {
    listeners: std::sync::RwLock<BTreeMap<usize, Listener>>,
    next_id: AtomicUsize,
    version: AtomicU64,
}

/// A listen-only reference to a broadcast
pub struct Ref<'a>(&'a Broadcast);

/// A subscription handle that can be used to unsubscribe from notifications.
pub struct ListenerGuard {
    inner: Weak<Inner>,
    id: usize,
}

/// Panics captured from several listeners during one notification pass.
///
/// Every listener still runs; the captured payloads are bundled into this
/// composite and resumed as one panic so the writer sees all of the failures,
/// not just the first. A pass with a single failing listener resumes that
/// listener's original payload instead, so typed payloads survive the trip.
pub struct ListenerPanics(pub Vec<Box<dyn Any + Send>>);

impl ListenerPanics {
    /// Best-effort message for each captured payload.
    pub fn messages(&self) -> Vec<&str> {
        self.0
            .iter()
            .map(|payload| {
                if let Some(message) = payload.downcast_ref::<&str>() {
                    message
                } else if let Some(message) = payload.downcast_ref::<String>() {
                    message.as_str()
                } else {
                    "<non-string panic payload>"
                }
            })
            .collect()
    }
}

impl std::fmt::Debug for ListenerPanics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerPanics").field("count", &self.0.len()).field("messages", &self.messages()).finish()
    }
}

impl Broadcast {
    /// Creates a new Broadcast with no listeners and version 0
    pub fn new() -> Self {
        Self(Arc::new(Inner {
            listeners: std::sync::RwLock::new(BTreeMap::new()),
            next_id: AtomicUsize::new(0),
            version: AtomicU64::new(0),
        }))
    }

    /// Get a unique identifier for this broadcast (for deduplication purposes)
    pub fn id(&self) -> BroadcastId { BroadcastId(Arc::as_ptr(&self.0) as usize) }

    /// The owning node's change counter.
    pub fn version(&self) -> u64 { self.0.version.load(Ordering::Acquire) }

    /// Advance the change counter, returning the new value.
    pub fn bump(&self) -> u64 { self.0.version.fetch_add(1, Ordering::AcqRel) + 1 }

    /// Number of currently registered listeners.
    pub fn listener_count(&self) -> usize { self.0.listeners.read().expect("listener table poisoned").len() }

    /// Sends a notification to all active listeners, in subscription order.
    ///
    /// A panicking listener does not stop the pass: every listener is called,
    /// and the captured panics are resumed afterwards - a lone payload as-is,
    /// several bundled into a [`ListenerPanics`] composite - so the writer
    /// observes every failure.
    pub fn send(&self) {
        // Snapshot so listeners can (un)subscribe during delivery
        let listeners = {
            let listeners = self.0.listeners.read().expect("listener table poisoned");
            listeners.values().cloned().collect::<Vec<_>>()
        };

        let mut panicked = Vec::new();
        for callback in listeners {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| callback())) {
                tracing::error!(broadcast = ?self.id(), "listener panicked during notification");
                panicked.push(payload);
            }
        }
        match panicked.len() {
            0 => {}
            1 => resume_unwind(panicked.pop().expect("one captured payload")),
            _ => resume_unwind(Box::new(ListenerPanics(panicked))),
        }
    }

    /// Register an already-built listener.
    pub fn listen(&self, listener: Listener) -> ListenerGuard {
        let id = self.0.next_id.fetch_add(1, Ordering::Relaxed);
        self.0.listeners.write().expect("listener table poisoned").insert(id, listener);
        ListenerGuard { inner: Arc::downgrade(&self.0), id }
    }

    /// Get a read-only reference to this sender that can only subscribe to notifications.
    /// This avoids cloning the sender while still forbidding the user from sending notifications.
    pub fn reference(&self) -> Ref<'_> { Ref(self) }
}

impl Default for Broadcast {
    fn default() -> Self { Self::new() }
}

impl<'a> Ref<'a> {
    /// Subscribe to notifications from the associated sender.
    pub fn listen<L>(&self, listener: L) -> ListenerGuard
    where L: IntoListener {
        self.0.listen(listener.into_listener())
    }

    /// Get a unique identifier for this broadcast (for deduplication purposes)
    pub fn id(&self) -> BroadcastId { self.0.id() }
}

impl Drop for ListenerGuard {
    /// Automatically unsubscribes when the subscription handle is dropped.
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.listeners.write().expect("listener table poisoned").remove(&self.id);
        }
    }
}

// IntoListener implementations for various types

impl<F> IntoListener for F
where F: Fn() + Send + Sync + 'static
{
    fn into_listener(self) -> Listener { Arc::new(self) }
}

#[cfg(feature = "tokio")]
impl IntoListener for tokio::sync::mpsc::UnboundedSender<()> {
    fn into_listener(self) -> Listener {
        Arc::new(move || {
            let _ = self.send(()); // Ignore send errors
        })
    }
}

impl IntoListener for std::sync::mpsc::Sender<()> {
    fn into_listener(self) -> Listener {
        Arc::new(move || {
            let _ = self.send(()); // Ignore send errors
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_multiple_listeners() {
        let sender = Broadcast::new();

        let counter = Arc::new(Mutex::new(0));

        let _sub1 = {
            let counter = counter.clone();
            sender.reference().listen(move || *counter.lock().unwrap() += 1)
        };

        let sub2 = {
            let counter = counter.clone();
            sender.reference().listen(move || *counter.lock().unwrap() += 10)
        };

        sender.send();
        assert_eq!(*counter.lock().unwrap(), 11); // 1 + 10

        drop(sub2);

        sender.send();
        assert_eq!(*counter.lock().unwrap(), 12); // 11 + 1 (only sub1)
    }

    #[test]
    fn test_delivery_in_subscription_order() {
        let sender = Broadcast::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let _subs: Vec<_> = ["a", "b", "c"]
            .into_iter()
            .map(|tag| {
                let log = log.clone();
                sender.reference().listen(move || log.lock().unwrap().push(tag))
            })
            .collect();

        sender.send();
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_version_counter() {
        let sender = Broadcast::new();
        assert_eq!(sender.version(), 0);
        assert_eq!(sender.bump(), 1);
        assert_eq!(sender.bump(), 2);
        assert_eq!(sender.version(), 2);
    }

    #[test]
    fn test_panicking_listener_does_not_stop_delivery() {
        let sender = Broadcast::new();
        let counter = Arc::new(Mutex::new(0));

        let _sub1 = sender.reference().listen(|| panic!("listener failure"));
        let _sub2 = {
            let counter = counter.clone();
            sender.reference().listen(move || *counter.lock().unwrap() += 1)
        };

        let payload = std::panic::catch_unwind(AssertUnwindSafe(|| sender.send())).unwrap_err();
        assert_eq!(*counter.lock().unwrap(), 1, "the second listener was still delivered");
        // A lone failure keeps its original payload
        assert_eq!(*payload.downcast_ref::<&str>().unwrap(), "listener failure");
    }

    #[test]
    fn test_multiple_panicking_listeners_surface_as_composite() {
        let sender = Broadcast::new();
        let counter = Arc::new(Mutex::new(0));

        let _sub1 = sender.reference().listen(|| panic!("first failure"));
        let _sub2 = {
            let counter = counter.clone();
            sender.reference().listen(move || *counter.lock().unwrap() += 1)
        };
        let _sub3 = sender.reference().listen(|| panic!("second failure"));

        let payload = std::panic::catch_unwind(AssertUnwindSafe(|| sender.send())).unwrap_err();
        assert_eq!(*counter.lock().unwrap(), 1, "the well-behaved listener was still delivered");

        let panics = payload.downcast_ref::<ListenerPanics>().expect("composite payload");
        assert_eq!(panics.0.len(), 2, "every failure is carried, not just the first");
        assert_eq!(panics.messages(), vec!["first failure", "second failure"]);
    }

    #[test]
    fn test_reentrant_subscription_during_send() {
        let sender = Broadcast::new();
        let counter = Arc::new(Mutex::new(0));

        // A listener that subscribes and unsubscribes during the delivery pass;
        // the snapshot iteration must not deadlock or skip anyone.
        let sender_clone = sender.clone();
        let counter_clone = counter.clone();
        let _sub = sender.reference().listen(move || {
            *counter_clone.lock().unwrap() += 1;

            let _temp_sub = sender_clone.reference().listen(|| {});
            // temp_sub drops here, removing itself from the table mid-send
        });

        sender.send();
        assert_eq!(*counter.lock().unwrap(), 1);

        sender.send();
        assert_eq!(*counter.lock().unwrap(), 2);
    }

    #[test]
    fn test_channel_sender_listener() {
        let sender = Broadcast::new();
        let (tx, rx) = std::sync::mpsc::channel::<()>();

        let _sub = sender.reference().listen(tx);

        sender.send();
        assert!(rx.try_recv().is_ok());

        sender.send();
        assert!(rx.try_recv().is_ok());

        assert!(rx.try_recv().is_err());
    }
}
