//! Global hook points for optional plugin layers (debuggers, graph
//! visualizers, logging integrations).
//!
//! Hooks observe the engine, they never steer it: every method has a no-op
//! default and the engine ignores whatever a hook does. Registration is
//! guard-based, so a plugin unhooks itself by dropping its
//! [`HookRegistration`].

use crate::signal::Signal;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

/// Callbacks invoked at the engine's lifecycle points.
pub trait Hooks: Send + Sync {
    /// A node was constructed.
    fn on_created(&self, node: &dyn Signal) { let _ = node; }

    /// A node was given a diagnostic name.
    fn on_named(&self, node: &dyn Signal) { let _ = node; }

    /// A node's value was read through a tracked accessor.
    fn on_read(&self, node: &dyn Signal) { let _ = node; }

    /// A node's value actually changed (per the change policy) - the version
    /// has been bumped, subscribers are about to be notified.
    fn on_updated(&self, node: &dyn Signal) { let _ = node; }
}

static REGISTRY: RwLock<Vec<(usize, Arc<dyn Hooks>)>> = RwLock::new(Vec::new());
static NEXT_ID: AtomicUsize = AtomicUsize::new(0);

/// Register a hook set; it stays active until the returned guard drops.
pub fn register(hooks: Arc<dyn Hooks>) -> HookRegistration {
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    REGISTRY.write().expect("hook registry poisoned").push((id, hooks));
    HookRegistration { id }
}

/// Keeps a hook set registered; unregisters it on drop.
pub struct HookRegistration {
    id: usize,
}

impl Drop for HookRegistration {
    fn drop(&mut self) {
        REGISTRY.write().expect("hook registry poisoned").retain(|(id, _)| *id != self.id);
    }
}

// Snapshot before calling out so a hook can register or unregister hooks
fn snapshot() -> Vec<Arc<dyn Hooks>> {
    let registry = REGISTRY.read().expect("hook registry poisoned");
    registry.iter().map(|(_, hooks)| hooks.clone()).collect()
}

pub(crate) fn on_created(node: &dyn Signal) {
    for hooks in snapshot() {
        hooks.on_created(node);
    }
}

pub(crate) fn on_named(node: &dyn Signal) {
    for hooks in snapshot() {
        hooks.on_named(node);
    }
}

pub(crate) fn on_read(node: &dyn Signal) {
    for hooks in snapshot() {
        hooks.on_read(node);
    }
}

pub(crate) fn on_updated(node: &dyn Signal) {
    for hooks in snapshot() {
        hooks.on_updated(node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::{Get, Mut};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn record(&self, kind: &str, node: &dyn Signal) {
            // Other tests may run concurrently; only track the node we named
            if node.name().as_deref() == Some("traced") {
                self.events.lock().unwrap().push(kind.to_string());
            }
        }
    }

    impl Hooks for Recorder {
        fn on_created(&self, node: &dyn Signal) { self.record("created", node); }
        fn on_named(&self, node: &dyn Signal) { self.record("named", node); }
        fn on_read(&self, node: &dyn Signal) { self.record("read", node); }
        fn on_updated(&self, node: &dyn Signal) { self.record("updated", node); }
    }

    #[test]
    fn hooks_fire_at_lifecycle_points_until_unregistered() {
        let recorder = Arc::new(Recorder::default());
        let registration = register(recorder.clone());

        let signal = Mut::new(1).named("traced");
        let _ = signal.read().get();
        signal.set(2);
        signal.set(2); // no change, no update event

        let events = recorder.events.lock().unwrap().clone();
        assert_eq!(events, vec!["named", "read", "updated"]);

        drop(registration);
        signal.set(3);
        let events = recorder.events.lock().unwrap().clone();
        assert_eq!(events.len(), 3, "unregistered hooks must not fire");
    }
}
