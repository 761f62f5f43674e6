/*!
A lazy reactive signal graph with auto-tracked dependencies.

Two node kinds make up the graph: [`Mut`], a mutable cell, and [`Calculated`],
a derived value computed from other nodes. Dependency edges are discovered by
observation: while a compute function runs, every signal it reads registers
itself with the evaluating node, so the graph always reflects what the code
actually read on its last run.

Change propagation is split into a cheap phase and a deferred one. A write
that actually changes a value (per the [`Changed`] policy) bumps the node's
version and ripples a *stale* mark through its downstream subscribers -
bookkeeping only, no user code runs. Recomputation happens later, when a stale
node is read; if the recomputed value is equal to the cached one, nothing
propagates further, so a chain of derived nodes absorbs upstream churn that
does not affect it.

Subscribers are held weakly: dropping a derived node (or an observer) severs
its subscriptions, so long-lived sources never pin ephemeral derived values in
memory.

# Basic usage

```rust
use trellis_signals::*;

let price = Mut::new(10u32);
let quantity = Mut::new(2u32);

let total = {
    let price = price.read();
    let quantity = quantity.read();
    Calculated::new(move || price.get() * quantity.get())
};

assert_eq!(total.get(), 20);
price.set(15);
assert_eq!(total.get(), 30);
```

# Equal results stop the wave

```rust
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use trellis_signals::*;

let x = Mut::new(3i32);
let square = {
    let x = x.read();
    Calculated::new(move || x.get() * x.get())
};
let runs = Arc::new(AtomicUsize::new(0));
let plus_one = {
    let square = square.clone();
    let runs = runs.clone();
    Calculated::new(move || {
        runs.fetch_add(1, Ordering::SeqCst);
        square.get() + 1
    })
};

assert_eq!(plus_one.get(), 10);

x.set(-3); // the square recomputes to the same value...
assert_eq!(plus_one.get(), 10);
assert_eq!(runs.load(Ordering::SeqCst), 1); // ...so this thunk never re-ran
```

The model is single-threaded cooperative: reads, writes and notifications
nest synchronously on one thread, and the tracking context is thread-local.
Concurrent access from multiple threads is not defined; serialize externally
if you need it.
*/

pub mod broadcast;
mod change;
mod context;
mod error;
pub mod hooks;
mod maybe;
mod observer;
mod porcelain;
mod signal;
mod value;

pub use broadcast::{Broadcast, BroadcastId, IntoListener, Listener, ListenerGuard, ListenerPanics};
pub use change::Changed;
pub use context::{ContextFrame, CurrentObserver};
pub use error::Error;
pub use maybe::{MaybeSignal, deep_unref_map, deep_unref_vec};
pub use observer::{CallbackObserver, Observer};
pub use porcelain::*;
pub use signal::*;
pub use value::{ReadValueCell, ValueCell};
