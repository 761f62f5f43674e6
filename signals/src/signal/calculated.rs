use indexmap::IndexMap;
use std::collections::HashSet;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::broadcast::{Broadcast, BroadcastId, Listener, ListenerGuard};
use crate::change::Changed;
use crate::context::CurrentObserver;
use crate::error::Error;
use crate::hooks;
use crate::observer::Observer;
use crate::porcelain::{Subscribe, SubscriptionGuard, subscribe::IntoSubscribeListener};
use crate::signal::{BoxedSignal, Get, Peek, Signal, With};
use crate::value::ValueCell;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// A dependency may have changed since the last run; re-check on next read.
    Stale,
    /// The cached value is current for the last-observed dependency versions.
    Fresh,
    /// The compute function is running right now. A read in this state is a cycle.
    Evaluating,
}

/// One edge to an upstream signal this node read during its last run.
struct DepEntry {
    /// Owned handle to the dependency, kept so it can be settled and its
    /// version compared without re-running the compute function.
    source: BoxedSignal,
    /// Severs the subscription when the entry is dropped or swept.
    _guard: ListenerGuard,
    /// The dependency's version as of the moment this node last read it.
    last_seen: u64,
    marked_for_removal: bool,
}

struct Inner<T> {
    /// The compute function
    compute: Box<dyn Fn() -> T + Send + Sync>,
    /// Cached result of the last successful run; None until the first read.
    cached: ValueCell<Option<T>>,
    state: RwLock<State>,
    /// Set when a dependency notifies while the compute function is mid-run.
    dirtied_during_eval: AtomicBool,
    /// Set by `invalidate`: the next read must run the compute function even
    /// if every recorded dependency version still matches.
    force_recompute: AtomicBool,
    /// Notifies downstream observers (stale wave and confirmed changes).
    broadcast: Broadcast,
    /// Subscriptions to upstream signals, in first-read order, keyed by
    /// broadcast ID for mark-and-sweep re-collection.
    entries: RwLock<IndexMap<BroadcastId, DepEntry>>,
    name: RwLock<Option<String>>,
}

/// A lazily-evaluated derived signal that computes its value from other signals.
///
/// Nothing runs at construction. The first read runs the compute function
/// under a tracking frame, so every signal it reads registers itself as a
/// dependency; dependencies are re-collected from scratch on every run,
/// because control flow inside the function may change what it reads.
///
/// When an upstream signal changes, this node is only *marked* stale (and the
/// mark ripples further downstream); recomputation is deferred to the next
/// read. If that recomputation produces a value the [`Changed`] policy
/// considers equal to the cached one, the cache, the version and downstream
/// nodes are all left untouched - a spurious stale mark is cleared at the cost
/// of one compute call, and often for free via the recorded dependency
/// versions.
///
/// # Example
/// ```
/// use trellis_signals::{Calculated, Get, Mut};
///
/// let price = Mut::new(4u32);
/// let total = {
///     let price = price.read();
///     Calculated::new(move || price.get() * 10)
/// };
///
/// assert_eq!(total.get(), 40);
/// price.set(6);
/// assert_eq!(total.get(), 60);
/// ```
///
/// Cloning a `Calculated` shares the same underlying node.
pub struct Calculated<T>(Arc<Inner<T>>);

impl<T> Clone for Calculated<T> {
    fn clone(&self) -> Self { Self(Arc::clone(&self.0)) }
}

impl<T: Changed + Clone + Send + Sync + 'static> Calculated<T> {
    /// Create a new calculated signal from a compute function.
    ///
    /// The function is not called here; the first read evaluates it and
    /// discovers its dependencies.
    pub fn new<F>(compute: F) -> Self
    where F: Fn() -> T + Send + Sync + 'static {
        let calculated = Self(Arc::new(Inner {
            compute: Box::new(compute),
            cached: ValueCell::new(None),
            state: RwLock::new(State::Stale),
            dirtied_during_eval: AtomicBool::new(false),
            force_recompute: AtomicBool::new(false),
            broadcast: Broadcast::new(),
            entries: RwLock::new(IndexMap::new()),
            name: RwLock::new(None),
        }));
        hooks::on_created(&calculated);
        calculated
    }

    /// Attach a diagnostic name. No semantic effect.
    pub fn named(self, name: impl Into<String>) -> Self {
        *self.0.name.write().expect("name cell poisoned") = Some(name.into());
        hooks::on_named(&self);
        self
    }

    /// Read the current value, recomputing first if a dependency changed.
    ///
    /// Registers this node with the current tracking frame, so calculated
    /// signals chain. Fails with [`Error::Cycle`] if this node is already
    /// mid-evaluation - including when the cycle is closed several compute
    /// functions deep.
    pub fn try_get(&self) -> Result<T, Error> {
        self.ensure_fresh()?;
        CurrentObserver::track(self);
        hooks::on_read(self);
        Ok(self.0.cached.with(|cached| cached.clone().expect("cached value present after evaluation")))
    }

    /// Whether the next read will re-check dependencies before answering.
    pub fn is_stale(&self) -> bool { *self.0.state.read().expect("state lock poisoned") != State::Fresh }

    /// Number of live subscriptions on this signal.
    pub fn listener_count(&self) -> usize { self.0.broadcast.listener_count() }

    /// Force the next read to re-run the compute function.
    ///
    /// This exists for rewiring the engine cannot observe: when a compute
    /// function reaches signals through some mutable structure and that
    /// structure is reseated to point at different signals, no dependency
    /// notification fires. `invalidate` marks the node stale and defeats the
    /// recorded-version shortcut, so the next read re-runs and re-collects
    /// dependencies. The version is not bumped and nothing is notified;
    /// propagation happens, as always, when a read finds an actual change.
    pub fn invalidate(&self) {
        self.0.force_recompute.store(true, Ordering::Release);
        let mut state = self.0.state.write().expect("state lock poisoned");
        match *state {
            State::Fresh => *state = State::Stale,
            State::Evaluating => {
                drop(state);
                self.0.dirtied_during_eval.store(true, Ordering::Release);
            }
            State::Stale => {}
        }
    }

    fn ensure_fresh(&self) -> Result<(), Error> {
        let state = *self.0.state.read().expect("state lock poisoned");
        match state {
            State::Fresh => Ok(()),
            State::Evaluating => Err(Error::Cycle { name: self.0.name.read().expect("name cell poisoned").clone() }),
            State::Stale => self.evaluate(),
        }
    }

    /// Run one evaluation: either confirm nothing changed via recorded
    /// dependency versions, or re-run the compute function and re-collect
    /// dependencies.
    fn evaluate(&self) -> Result<(), Error> {
        *self.0.state.write().expect("state lock poisoned") = State::Evaluating;
        self.0.dirtied_during_eval.store(false, Ordering::Release);
        // Restores Stale on every early exit, including unwinds
        let reset = StateReset::arm(&self.0.state);

        let forced = self.0.force_recompute.swap(false, Ordering::AcqRel);
        let has_cache = self.0.cached.with(|cached| cached.is_some());
        if !forced && has_cache && self.settled_versions_match()? {
            tracing::trace!(signal = ?self.0.broadcast.id(), "dependency versions unchanged, skipping recompute");
            reset.settle(State::Fresh);
            return Ok(());
        }

        // Mark phase: entries not re-observed by this run get swept afterwards.
        // The pre-run edge set is kept so a failed run can be rolled back.
        let previous: HashSet<BroadcastId> = {
            let mut entries = self.0.entries.write().expect("entries lock poisoned");
            for entry in entries.values_mut() {
                entry.marked_for_removal = true;
            }
            entries.keys().copied().collect()
        };

        tracing::debug!(signal = ?self.0.broadcast.id(), name = ?self.name(), "evaluating");
        let frame = CurrentObserver::enter(Arc::new(self.0.clone()));
        let outcome = catch_unwind(AssertUnwindSafe(|| (self.0.compute)()));
        drop(frame);

        let new_value = match outcome {
            Ok(value) => value,
            Err(payload) => {
                // Failed run: restore the graph exactly as it was. Edges the
                // run added before failing are dropped (their guards sever the
                // subscriptions); the pre-existing ones are kept and unmarked.
                // The next read must actually retry the compute function, not
                // fast-path over dependency versions this run already
                // refreshed, so the force flag is set.
                self.0.force_recompute.store(true, Ordering::Release);
                let mut entries = self.0.entries.write().expect("entries lock poisoned");
                entries.retain(|id, _| previous.contains(id));
                for entry in entries.values_mut() {
                    entry.marked_for_removal = false;
                }
                drop(entries);
                match payload.downcast::<Error>() {
                    Ok(error) => return Err(*error),
                    Err(payload) => resume_unwind(payload),
                }
            }
        };

        // Sweep phase: unsubscribe from dependencies this run no longer read
        {
            let mut entries = self.0.entries.write().expect("entries lock poisoned");
            entries.retain(|_, entry| !entry.marked_for_removal);
        }

        let changed = self.0.cached.with(|cached| match cached {
            Some(old) => old.changed(&new_value),
            None => true,
        });

        // A dependency notification that arrived mid-run leaves this node
        // stale, exactly as one arriving a moment later would. The next read
        // settles the dependencies and clears the mark without recomputing
        // when their settled versions still match the recorded ones.
        let queued = self.0.dirtied_during_eval.swap(false, Ordering::AcqRel);
        let next = if queued { State::Stale } else { State::Fresh };

        if changed {
            self.0.cached.set(Some(new_value));
            let version = self.0.broadcast.bump();
            reset.settle(next);
            tracing::trace!(signal = ?self.0.broadcast.id(), version, "changed");
            hooks::on_updated(self);
            self.0.broadcast.send();
        } else {
            tracing::trace!(signal = ?self.0.broadcast.id(), "recomputed to an equal value, not propagating");
            reset.settle(next);
        }
        Ok(())
    }

    /// Settle every recorded dependency and compare versions. True means
    /// nothing observable changed since the last run and the compute function
    /// need not run.
    ///
    /// Settling a dependency may recompute *it*, but never re-enters this
    /// node's entry table; a dependency that reads back into this node is a
    /// cycle and surfaces as such.
    fn settled_versions_match(&self) -> Result<bool, Error> {
        let entries = self.0.entries.read().expect("entries lock poisoned");
        for entry in entries.values() {
            if entry.source.settle()? != entry.last_seen {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Transition on a dependency notification. Fresh nodes go stale and ripple
/// the mark downstream; already-stale nodes stay put (the wave has passed
/// through them before); a mid-evaluation node just queues the fact.
fn mark_stale<T>(inner: &Arc<Inner<T>>) {
    let prior = {
        let mut state = inner.state.write().expect("state lock poisoned");
        let prior = *state;
        if prior == State::Fresh {
            *state = State::Stale;
        }
        prior
    };
    match prior {
        State::Fresh => {
            tracing::trace!(signal = ?inner.broadcast.id(), "marked stale");
            inner.broadcast.send();
        }
        State::Evaluating => {
            inner.dirtied_during_eval.store(true, Ordering::Release);
        }
        State::Stale => {}
    }
}

/// Puts the node back to Stale if an evaluation exits without settling a
/// final state (compute panic, cycle error, dependency failure).
struct StateReset<'a> {
    state: &'a RwLock<State>,
    armed: bool,
}

impl<'a> StateReset<'a> {
    fn arm(state: &'a RwLock<State>) -> Self { Self { state, armed: true } }

    fn settle(mut self, next: State) {
        *self.state.write().expect("state lock poisoned") = next;
        self.armed = false;
    }
}

impl Drop for StateReset<'_> {
    fn drop(&mut self) {
        if self.armed {
            *self.state.write().expect("state lock poisoned") = State::Stale;
        }
    }
}

impl<T: Send + Sync + 'static> Observer for Arc<Inner<T>> {
    fn observe(&self, signal: BoxedSignal) {
        let broadcast_id = signal.broadcast_id();
        let version = signal.version();
        {
            // We may already hold a subscription for this signal; refresh it
            let mut entries = self.entries.write().expect("entries lock poisoned");
            if let Some(entry) = entries.get_mut(&broadcast_id) {
                entry.marked_for_removal = false;
                entry.last_seen = version;
                return;
            }
        }
        // Lock released before calling listen() to avoid recursive locking

        let weak = Arc::downgrade(self);
        let guard = signal.listen(Arc::new(move || {
            if let Some(inner) = weak.upgrade() {
                mark_stale(&inner);
            }
        }));

        let mut entries = self.entries.write().expect("entries lock poisoned");
        entries.insert(broadcast_id, DepEntry { source: signal, _guard: guard, last_seen: version, marked_for_removal: false });
    }

    fn observer_id(&self) -> usize { Arc::as_ptr(self) as usize }

    #[doc(hidden)]
    fn as_any(&self) -> &dyn std::any::Any { self }
}

impl<T: Changed + Clone + Send + Sync + 'static> Signal for Calculated<T> {
    fn listen(&self, listener: Listener) -> ListenerGuard { self.0.broadcast.listen(listener) }

    fn broadcast_id(&self) -> BroadcastId { self.0.broadcast.id() }

    fn version(&self) -> u64 { self.0.broadcast.version() }

    fn settle(&self) -> Result<u64, Error> {
        self.ensure_fresh()?;
        Ok(self.0.broadcast.version())
    }

    fn name(&self) -> Option<String> { self.0.name.read().expect("name cell poisoned").clone() }
}

impl<T: Changed + Clone + Send + Sync + 'static> Get<T> for Calculated<T> {
    /// Tracked read. Panics on a cycle; inside a compute function the panic
    /// carries the typed [`Error`] so the outermost [`Calculated::try_get`]
    /// reports it as `Err` instead.
    fn get(&self) -> T {
        match self.try_get() {
            Ok(value) => value,
            Err(error) => std::panic::panic_any(error),
        }
    }
}

impl<T: Changed + Clone + Send + Sync + 'static> Peek<T> for Calculated<T> {
    /// Untracked read; still recomputes if stale.
    fn peek(&self) -> T {
        match self.ensure_fresh() {
            Ok(()) => self.0.cached.with(|cached| cached.clone().expect("cached value present after evaluation")),
            Err(error) => std::panic::panic_any(error),
        }
    }
}

impl<T: Changed + Clone + Send + Sync + 'static> With<T> for Calculated<T> {
    fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        if let Err(error) = self.ensure_fresh() {
            std::panic::panic_any(error);
        }
        CurrentObserver::track(self);
        hooks::on_read(self);
        self.0.cached.with(|cached| f(cached.as_ref().expect("cached value present after evaluation")))
    }
}

impl<T> Subscribe<T> for Calculated<T>
where T: Changed + Clone + Send + Sync + 'static
{
    /// Subscribe to confirmed changes of the derived value.
    ///
    /// Subscribing settles the node once so the dependency graph is wired even
    /// if nothing has read it yet. Each upstream notification settles it again
    /// and the listener fires only when the version actually advanced, so a
    /// recomputation that produced an equal value delivers nothing.
    fn subscribe<F>(&self, listener: F) -> SubscriptionGuard
    where F: IntoSubscribeListener<T> {
        let listener = listener.into_subscribe_listener();
        let _ = self.settle();
        let last_delivered = AtomicU64::new(self.0.broadcast.version());
        let weak = Arc::downgrade(&self.0);
        let subscription = self.listen(Arc::new(move || {
            let Some(inner) = weak.upgrade() else { return };
            let node = Calculated(inner);
            let Ok(version) = node.settle() else { return };
            if last_delivered.swap(version, Ordering::AcqRel) != version {
                let value = node.0.cached.with(|cached| cached.clone());
                if let Some(value) = value {
                    listener(value);
                }
            }
        }));
        SubscriptionGuard::new(subscription)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::mutable::Mut;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_basic_calculated() {
        let a = Mut::new(1);
        let b = Mut::new(2);

        let sum = Calculated::new({
            let a = a.read();
            let b = b.read();
            move || a.get() + b.get()
        });

        assert_eq!(sum.get(), 3);

        a.set(10);
        assert_eq!(sum.get(), 12);

        b.set(5);
        assert_eq!(sum.get(), 15);
    }

    #[test]
    fn test_lazy_until_first_read() {
        let runs = Arc::new(AtomicUsize::new(0));

        let source = Mut::new(1);
        let derived = Calculated::new({
            let source = source.read();
            let runs = runs.clone();
            move || {
                runs.fetch_add(1, Ordering::SeqCst);
                source.get() * 2
            }
        });

        assert_eq!(runs.load(Ordering::SeqCst), 0, "construction must not evaluate");
        assert!(derived.is_stale());

        assert_eq!(derived.get(), 2);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        // Reading again without a change reuses the cache
        assert_eq!(derived.get(), 2);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_write_marks_stale_without_recompute() {
        let runs = Arc::new(AtomicUsize::new(0));

        let source = Mut::new(1);
        let derived = Calculated::new({
            let source = source.read();
            let runs = runs.clone();
            move || {
                runs.fetch_add(1, Ordering::SeqCst);
                source.get() * 2
            }
        });

        assert_eq!(derived.get(), 2);
        source.set(7);
        assert!(derived.is_stale());
        assert_eq!(runs.load(Ordering::SeqCst), 1, "the write alone must not recompute");

        assert_eq!(derived.get(), 14);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_equal_recompute_does_not_bump_version() {
        let source = Mut::new(2i32);
        let parity = Calculated::new({
            let source = source.read();
            move || source.get() % 2
        });

        assert_eq!(parity.get(), 0);
        let version = parity.version();

        source.set(4); // parity unchanged
        assert_eq!(parity.get(), 0);
        assert_eq!(parity.version(), version);
    }

    #[test]
    fn test_chained_calculated() {
        let base = Mut::new(2);

        let doubled = Calculated::new({
            let base = base.read();
            move || base.get() * 2
        });

        let quadrupled = Calculated::new(move || doubled.get() * 2);

        assert_eq!(quadrupled.get(), 8);

        base.set(5);
        assert_eq!(quadrupled.get(), 20);
    }

    #[test]
    fn test_dependencies_recollected_each_run() {
        let which = Mut::new(true);
        let left = Mut::new(10);
        let right = Mut::new(20);

        let runs = Arc::new(AtomicUsize::new(0));
        let picked = Calculated::new({
            let which = which.read();
            let left = left.read();
            let right = right.read();
            let runs = runs.clone();
            move || {
                runs.fetch_add(1, Ordering::SeqCst);
                if which.get() { left.get() } else { right.get() }
            }
        });

        assert_eq!(picked.get(), 10);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        // Not currently a dependency: a write to `right` must not dirty us
        right.set(21);
        assert!(!picked.is_stale());
        assert_eq!(picked.get(), 10);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        which.set(false);
        assert_eq!(picked.get(), 21);
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        // Sides swapped: now `left` is the one that no longer matters
        left.set(11);
        assert!(!picked.is_stale());
        assert_eq!(picked.get(), 21);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_direct_cycle_is_an_error() {
        let cell: Arc<RwLock<Option<Calculated<i32>>>> = Arc::new(RwLock::new(None));
        let node = Calculated::new({
            let cell = cell.clone();
            move || {
                let this = cell.read().unwrap().clone().expect("cell seeded");
                this.get() + 1
            }
        })
        .named("ouroboros");
        *cell.write().unwrap() = Some(node.clone());

        let err = node.try_get().unwrap_err();
        assert_eq!(err, Error::Cycle { name: Some("ouroboros".to_string()) });

        // Not poisoned: the node is stale again and a retry reports the same error
        assert!(node.is_stale());
        assert!(node.try_get().is_err());
    }

    #[test]
    fn test_failed_run_drops_edges_it_added() {
        let existing = Mut::new(1);
        let extra = Mut::new(0);
        let explode = Mut::new(false);
        let derived = Calculated::new({
            let existing = existing.read();
            let extra = extra.read();
            let explode = explode.read();
            move || {
                let base = existing.get();
                if explode.get() {
                    let _ = extra.get(); // an edge this node never had before
                    panic!("compute failure");
                }
                base
            }
        });

        assert_eq!(derived.get(), 1);
        assert_eq!(extra.read().listener_count(), 0);

        explode.set(true);
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| derived.get()));
        assert!(result.is_err());

        // The graph is exactly as it was before the failed run: the edge the
        // run added is gone, the pre-existing ones are intact
        assert_eq!(extra.read().listener_count(), 0);
        assert_eq!(existing.read().listener_count(), 1);
        assert_eq!(explode.read().listener_count(), 1);

        explode.set(false);
        assert_eq!(derived.get(), 1);
        assert_eq!(extra.read().listener_count(), 0);
    }

    #[test]
    fn test_write_during_run_leaves_node_stale() {
        let f = Mut::new(1);
        let e = {
            let f = f.read();
            Calculated::new(move || f.get() * 10)
        };
        let d = {
            let e = e.clone();
            let f = f.clone();
            Calculated::new(move || {
                let value = e.get();
                f.set(f.peek() + 1); // dirties the upstream mid-run
                value
            })
        };

        assert_eq!(d.get(), 10);
        assert!(d.is_stale(), "a dependency dirtied mid-run must leave the node stale");
        assert!(e.is_stale());

        // The next read settles the chain and picks up the run's own write
        assert_eq!(d.get(), 20);
    }

    #[test]
    fn test_compute_panic_leaves_old_value() {
        let source = Mut::new(1);
        let explode = Mut::new(false);
        let derived = Calculated::new({
            let source = source.read();
            let explode = explode.read();
            move || {
                if explode.get() {
                    panic!("compute failure");
                }
                source.get() * 100
            }
        });

        assert_eq!(derived.get(), 100);

        explode.set(true);
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| derived.get()));
        assert!(result.is_err());

        // Previous cache intact, node stale, next read retries
        assert!(derived.is_stale());
        explode.set(false);
        assert_eq!(derived.get(), 100);
    }
}
