pub mod callback_observer;

pub use callback_observer::CallbackObserver;

use crate::signal::BoxedSignal;

/// A node that can be told "something you depend on changed".
///
/// Observers receive owned signal handles from the tracking context as they
/// read; `observe` must be idempotent per broadcast id, because a compute
/// function may read the same signal any number of times in one run.
///
/// Observers are held weakly by the signals they watch (the listener closures
/// installed by `observe` capture only a weak self-reference), so dropping an
/// observer both stops its notifications and lets it be collected.
pub trait Observer: Send + Sync {
    /// Record `signal` as a dependency of this observer and subscribe to it.
    fn observe(&self, signal: BoxedSignal);

    /// Stable identity for this observer, shared by all of its clones.
    fn observer_id(&self) -> usize;

    #[doc(hidden)]
    fn as_any(&self) -> &dyn std::any::Any;
}
