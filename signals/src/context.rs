use crate::{Observer, Signal};
use std::cell::RefCell;
use std::sync::Arc;

thread_local! {
    static OBSERVER_STACK: RefCell<Vec<Arc<dyn Observer>>> = const { RefCell::new(Vec::new()) };
}

/// Manages the stack of currently-evaluating observers and attributes tracked
/// signal reads to the innermost one.
///
/// The stack is thread-local: the engine is single-threaded cooperative, and
/// every push is paired with a pop in strict LIFO order. Code that evaluates
/// under an observer should prefer [`CurrentObserver::enter`], whose frame
/// guard restores the stack on every exit path, including unwinding.
pub struct CurrentObserver {}

impl CurrentObserver {
    /// Registers `signal` with the innermost evaluating observer, if any.
    ///
    /// The observer receives an owned handle so it can keep the dependency
    /// alive and interrogate its version later.
    pub fn track<S>(signal: &S)
    where S: Signal + Clone + 'static {
        let current = OBSERVER_STACK.with(|stack| stack.borrow().last().cloned());
        if let Some(observer) = current {
            observer.observe(Box::new(signal.clone()));
        }
    }

    /// Sets an observer as the current context, pushing it onto the stack
    pub fn set<O: Observer + 'static>(observer: O) {
        OBSERVER_STACK.with(|stack| {
            stack.borrow_mut().push(Arc::new(observer));
        });
    }

    /// Push an observer and receive a frame that pops it again on drop.
    pub fn enter(observer: Arc<dyn Observer>) -> ContextFrame {
        let observer_id = observer.observer_id();
        OBSERVER_STACK.with(|stack| {
            stack.borrow_mut().push(observer);
        });
        ContextFrame { observer_id }
    }

    /// Removes the current observer from the stack, restoring the previous one
    pub fn pop() {
        OBSERVER_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }

    /// Removes a specific observer from the stack
    pub fn remove(observer: &dyn Observer) {
        Self::remove_id(observer.observer_id());
    }

    fn remove_id(target_id: usize) {
        OBSERVER_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            if let Some(last) = stack.last()
                && last.observer_id() == target_id
            {
                stack.pop();
                return;
            }
            stack.retain(|o| o.observer_id() != target_id);
        });
    }

    /// Get a copy of the current observer context (for testing/debugging)
    pub fn current() -> Option<Arc<dyn Observer>> { OBSERVER_STACK.with(|stack| stack.borrow().last().cloned()) }
}

/// Scope guard for one tracking frame; pops its observer when dropped.
pub struct ContextFrame {
    observer_id: usize,
}

impl Drop for ContextFrame {
    fn drop(&mut self) { CurrentObserver::remove_id(self.observer_id); }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BoxedSignal;

    struct NullObserver(usize);

    impl Observer for NullObserver {
        fn observe(&self, _signal: BoxedSignal) {}
        fn observer_id(&self) -> usize { self.0 }
        fn as_any(&self) -> &dyn std::any::Any { self }
    }

    #[test]
    fn frame_restores_stack_on_unwind() {
        assert!(CurrentObserver::current().is_none());

        let result = std::panic::catch_unwind(|| {
            let _frame = CurrentObserver::enter(Arc::new(NullObserver(1)));
            assert!(CurrentObserver::current().is_some());
            panic!("mid-evaluation failure");
        });
        assert!(result.is_err());
        assert!(CurrentObserver::current().is_none(), "the frame must pop on the unwind path");
    }

    #[test]
    fn frames_nest_lifo() {
        let outer = CurrentObserver::enter(Arc::new(NullObserver(1)));
        {
            let _inner = CurrentObserver::enter(Arc::new(NullObserver(2)));
            assert_eq!(CurrentObserver::current().unwrap().observer_id(), 2);
        }
        assert_eq!(CurrentObserver::current().unwrap().observer_id(), 1);
        drop(outer);
        assert!(CurrentObserver::current().is_none());
    }

    #[test]
    fn remove_tolerates_absent_observer() {
        CurrentObserver::remove(&NullObserver(99));
        assert!(CurrentObserver::current().is_none());
    }
}
