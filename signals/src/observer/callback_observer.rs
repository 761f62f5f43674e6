use super::Observer;
use crate::broadcast::BroadcastId;
use crate::broadcast::ListenerGuard;
use crate::context::CurrentObserver;
use crate::signal::BoxedSignal;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

/// A CallbackObserver is an observer that wraps a callback which is called
/// whenever the observed signals notify the observer of a change.
///
/// Each trigger re-runs the callback under this observer's tracking frame, so
/// the watched set is re-collected from scratch every run: signals the callback
/// no longer reads are unsubscribed (mark-and-sweep), signals it newly reads
/// are subscribed. This is the building block for render loops and other
/// eager effects that sit outside the lazy graph.
#[derive(Clone)]
pub struct CallbackObserver(Arc<Inner>);

struct SubscriptionEntry {
    _guard: ListenerGuard,
    marked_for_removal: bool,
}

struct Inner {
    // The callback to call when the observed signals notify the observer of a change
    callback: Box<dyn Fn() + Send + Sync>,
    // Subscriptions mapped by broadcast ID for mark-and-sweep
    entries: std::sync::RwLock<HashMap<BroadcastId, SubscriptionEntry>>,
}

struct WeakCallbackObserver(Weak<Inner>);

impl WeakCallbackObserver {
    fn upgrade(&self) -> Option<CallbackObserver> { self.0.upgrade().map(CallbackObserver) }
}

impl CallbackObserver {
    /// Create a new callback observer
    pub fn new<F: Fn() + Send + Sync + 'static>(callback: F) -> Self {
        Self(Arc::new(Inner { callback: Box::new(callback), entries: std::sync::RwLock::new(HashMap::new()) }))
    }

    /// Trigger the callback using this observer's context
    pub fn trigger(&self) { self.with_context(&self.0.callback); }

    /// Execute a function with this observer as the current context
    pub fn with_context<F: Fn() + ?Sized>(&self, f: &F) {
        // Mark all existing listeners for removal
        self.mark_all_for_removal();

        let frame = CurrentObserver::enter(Arc::new(self.clone()));
        f();
        drop(frame);

        // Sweep away any listeners that weren't preserved during the callback
        self.sweep_marked_listeners();
    }

    pub fn clear(&self) {
        // Clear all listeners - they'll be dropped automatically
        self.0.entries.write().expect("entries lock is poisoned").clear();
    }

    /// Mark all existing listeners for removal (mark phase of mark-and-sweep)
    fn mark_all_for_removal(&self) {
        let mut entries = self.0.entries.write().expect("entries lock is poisoned");
        for entry in entries.values_mut() {
            entry.marked_for_removal = true;
        }
    }

    /// Remove all listeners that are still marked for removal (sweep phase)
    fn sweep_marked_listeners(&self) {
        let mut entries = self.0.entries.write().expect("entries lock is poisoned");
        entries.retain(|_, entry| !entry.marked_for_removal);
    }
}

// Observer trait implementation - dyn safe
impl Observer for CallbackObserver {
    fn observe(&self, signal: BoxedSignal) {
        let broadcast_id = signal.broadcast_id();

        {
            // We may already hold a listener for this broadcast; just unmark it
            let mut entries = self.0.entries.write().expect("entries lock is poisoned");
            if let Some(entry) = entries.get_mut(&broadcast_id) {
                entry.marked_for_removal = false;
                return;
            }
        }
        // Lock released before calling listen() to avoid recursive locking

        let weak = WeakCallbackObserver(Arc::downgrade(&self.0));
        let guard = signal.listen(Arc::new(move || {
            if let Some(observer) = weak.upgrade() {
                observer.trigger();
            }
        }));

        let mut entries = self.0.entries.write().expect("entries lock is poisoned");
        entries.insert(broadcast_id, SubscriptionEntry { _guard: guard, marked_for_removal: false });
    }

    fn observer_id(&self) -> usize { Arc::as_ptr(&self.0) as usize }

    #[doc(hidden)]
    fn as_any(&self) -> &dyn std::any::Any { self }
}
