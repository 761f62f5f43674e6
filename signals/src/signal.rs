pub mod calculated;
pub mod map;
pub mod mutable;
pub mod read;

pub use calculated::*;
pub use map::*;
pub use mutable::*;
pub use read::*;

use crate::broadcast::{BroadcastId, Listener, ListenerGuard};
use crate::error::Error;

/// An owned, type-erased handle to a signal, as handed to observers.
pub type BoxedSignal = Box<dyn Signal>;

/// Core trait for signals - provides observation capability without regard to a payload value.
///
/// This is the dyn-safe surface observers hold onto: a way to listen for
/// change/staleness notifications, an identity for deduplicating
/// subscriptions, and the node's version counter for cheap "did anything
/// actually happen" checks.
///
/// Note: Multiple signals may share the same broadcast (and thus the same broadcast_id).
/// This is intentional and allows observers to deduplicate subscriptions efficiently.
pub trait Signal: Send + Sync {
    /// Listen to changes to this signal with a listener function
    /// Takes an Arc-wrapped closure for efficiency - wrap your closure with Arc::new(|| { ... })
    fn listen(&self, listener: Listener) -> ListenerGuard;

    /// Get the broadcast identifier for this signal.
    fn broadcast_id(&self) -> BroadcastId;

    /// The node's change counter: bumped exactly when a write or
    /// recomputation produced a value the change policy considered different.
    fn version(&self) -> u64;

    /// Bring the node up to date and report the settled version.
    ///
    /// For source signals this is just [`version`](Signal::version). Derived
    /// signals first re-evaluate if they are stale, so the returned version
    /// reflects current upstream values; that evaluation can fail on a cycle.
    fn settle(&self) -> Result<u64, Error> { Ok(self.version()) }

    /// Diagnostic name attached via a `named` builder, if any. No semantic effect.
    fn name(&self) -> Option<String> { None }
}

/// Trait for getting the current value of a signal in a way that will be tracked by the current context
pub trait Get<T: 'static>: Signal {
    fn get(&self) -> T;
}

/// Trait for accessing the current value of a signal with a closure in a way that will be tracked by the current context
pub trait With<T: 'static> {
    fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R;
}

/// Trait for getting the current value of a signal in a way that will not be tracked by the current context
pub trait Peek<T: 'static> {
    fn peek(&self) -> T;
}
