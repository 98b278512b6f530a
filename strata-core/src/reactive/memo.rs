//! Memo Implementation
//!
//! A Memo is a cached derived value. It is lazy: nothing runs at
//! creation, and a read first revalidates the memo (recomputing only if a
//! source actually changed) before returning the cached value.
//!
//! A memo whose recomputation produces an equal value (under its `equals`
//! comparison) does not notify its subscribers, even though it re-ran —
//! the equality short-circuit that keeps a diamond of derived values from
//! cascading.

use std::any::Any;
use std::cell::RefCell;
use std::marker::PhantomData;
use std::rc::Rc;

use crate::error::SignalError;
use crate::graph::node::{ComputeFn, Node, NodeId};
use crate::reactive::runtime::{read_node, read_node_untracked, register_computation};
use crate::reactive::signal::{erase_equals, read_has_error, read_is_pending, SignalOptions};

/// A cached derived value.
pub struct Memo<T> {
    pub(crate) id: NodeId,
    marker: PhantomData<T>,
}

impl<T> Memo<T> {
    pub(crate) fn new(id: NodeId) -> Self {
        Self {
            id,
            marker: PhantomData,
        }
    }

    pub(crate) fn node_id(&self) -> NodeId {
        self.id
    }
}

impl<T> Clone for Memo<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Memo<T> {}

impl<T: Clone + 'static> Memo<T> {
    /// Get the memo's value, revalidating first. Records a dependency
    /// when called inside a tracking context.
    ///
    /// # Panics
    ///
    /// Panics if the computation is pending or failed; use
    /// [`Memo::try_get`] for asynchronous or fallible computations.
    pub fn get(&self) -> T {
        self.try_get()
            .expect("memo value unavailable (pending or failed); use try_get")
    }

    /// Fallible read: surfaces `NotReady` and stored computation errors.
    pub fn try_get(&self) -> Result<T, SignalError> {
        read_node(self.id)
    }

    /// Untracked read.
    ///
    /// # Panics
    ///
    /// Panics if the computation is pending or failed.
    pub fn get_untracked(&self) -> T {
        self.try_get_untracked()
            .expect("memo value unavailable (pending or failed); use try_get_untracked")
    }

    /// Untracked, fallible read.
    pub fn try_get_untracked(&self) -> Result<T, SignalError> {
        read_node_untracked(self.id)
    }

    /// Whether the memo is currently pending, without forcing the value.
    pub fn is_pending(&self) -> bool {
        read_is_pending(self.id)
    }

    /// Whether the memo is currently in error, without forcing the value.
    pub fn has_error(&self) -> bool {
        read_has_error(self.id)
    }
}

/// Create a memo with the default `PartialEq` change comparison.
pub fn create_memo<T: Clone + PartialEq + 'static>(f: impl Fn() -> T + 'static) -> Memo<T> {
    create_memo_with(None, SignalOptions::with_partial_eq(), move |_| f())
}

/// Create a memo whose computation may suspend or fail.
///
/// The computation's `Result` feeds the node's status: `NotReady` marks
/// it pending, a real error is stored and re-surfaced to readers. No
/// equality comparison is applied (every successful run notifies).
pub fn create_try_memo<T: Clone + 'static>(
    f: impl Fn() -> Result<T, SignalError> + 'static,
) -> Memo<T> {
    let compute: ComputeFn = Rc::new(move || f().map(|value| Box::new(value) as Box<dyn Any>));
    let node = Node::derived(compute);
    Memo::new(register_computation(node))
}

/// Create a memo with a seed and explicit options. The computation
/// receives the previous value (the seed on the first run), which makes
/// reducer-style memos possible.
pub fn create_memo_with<T: Clone + 'static>(
    seed: Option<T>,
    options: SignalOptions<T>,
    f: impl Fn(Option<&T>) -> T + 'static,
) -> Memo<T> {
    let previous: Rc<RefCell<Option<T>>> = Rc::new(RefCell::new(seed));
    let compute: ComputeFn = Rc::new(move || {
        let value = {
            let guard = previous.borrow();
            f(guard.as_ref())
        };
        *previous.borrow_mut() = Some(value.clone());
        Ok(Box::new(value) as Box<dyn Any>)
    });

    let mut node = Node::derived(compute);
    node.equals = options.equals.map(erase_equals);
    node.unobserved = options.unobserved;
    node.debug_name = options.name;
    Memo::new(register_computation(node))
}
