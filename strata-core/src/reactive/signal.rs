//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive: a leaf node holding a
//! value. Reading it inside a tracking context records a dependency
//! edge; writing it marks the subscriber graph and schedules a flush.
//!
//! Handles come in a read/write pair. Both are plain copies of the node
//! ID: cloning a handle never duplicates state, and every copy observes
//! the same value.
//!
//! Asynchronous sources ([`create_async_signal`]) start in the `Pending`
//! status; readers receive the `NotReady` sentinel until the paired
//! resolver settles them.

use std::any::Any;
use std::marker::PhantomData;
use std::rc::Rc;

use crate::error::{EvalError, SignalError};
use crate::graph::node::{EqualsFn, Node, NodeId, UnobservedFn, ValueStatus};
use crate::reactive::runtime::{
    dispose_node_now, read_node, read_node_untracked, with_runtime,
};
use crate::reactive::transition::Transition;

/// Options recognized when creating a signal (or memo): a change
/// comparison, an unobserved callback, and a debug name.
pub struct SignalOptions<T> {
    /// Decides whether a write counts as a change. `None` forces
    /// always-notify.
    pub equals: Option<Rc<dyn Fn(&T, &T) -> bool>>,

    /// Fired when the node loses its last subscriber. The store layer
    /// uses this to drop per-property signals lazily.
    pub unobserved: Option<UnobservedFn>,

    /// Name shown in trace output.
    pub name: Option<String>,
}

impl<T> Default for SignalOptions<T> {
    fn default() -> Self {
        Self {
            equals: None,
            unobserved: None,
            name: None,
        }
    }
}

impl<T> SignalOptions<T> {
    /// Always-notify options (equality check disabled).
    pub fn always_notify() -> Self {
        Self::default()
    }

    /// Use a custom change comparison.
    pub fn with_equals(mut self, equals: impl Fn(&T, &T) -> bool + 'static) -> Self {
        self.equals = Some(Rc::new(equals));
        self
    }

    /// Fire `callback` when the last subscriber unlinks.
    pub fn on_unobserved(mut self, callback: impl Fn() + 'static) -> Self {
        self.unobserved = Some(Rc::new(callback));
        self
    }

    /// Name the node for trace output.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl<T: PartialEq + 'static> SignalOptions<T> {
    /// The default comparison: `PartialEq`.
    pub fn with_partial_eq() -> Self {
        Self::default().with_equals(|a: &T, b: &T| a == b)
    }
}

/// Erase a typed comparison into the graph's `dyn Any` form.
pub(crate) fn erase_equals<T: 'static>(equals: Rc<dyn Fn(&T, &T) -> bool>) -> EqualsFn {
    Rc::new(move |a, b| {
        match (a.downcast_ref::<T>(), b.downcast_ref::<T>()) {
            (Some(a), Some(b)) => (*equals)(a, b),
            // A type mismatch always counts as a change.
            _ => false,
        }
    })
}

/// The reading half of a signal.
pub struct ReadSignal<T> {
    pub(crate) id: NodeId,
    marker: PhantomData<T>,
}

impl<T> ReadSignal<T> {
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

impl<T> Clone for ReadSignal<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ReadSignal<T> {}

impl<T: Clone + 'static> ReadSignal<T> {
    /// Get the current value, recording a dependency when called inside a
    /// tracking context.
    ///
    /// # Panics
    ///
    /// Panics if the value is pending or failed; use [`ReadSignal::try_get`]
    /// for asynchronous or fallible sources.
    pub fn get(&self) -> T {
        self.try_get()
            .expect("signal value unavailable (pending or failed); use try_get")
    }

    /// Get the current value, surfacing `NotReady` and stored errors.
    pub fn try_get(&self) -> Result<T, SignalError> {
        read_node(self.id)
    }

    /// Get the current value without recording a dependency.
    ///
    /// # Panics
    ///
    /// Panics if the value is pending or failed.
    pub fn get_untracked(&self) -> T {
        self.try_get_untracked()
            .expect("signal value unavailable (pending or failed); use try_get_untracked")
    }

    /// Untracked, fallible read.
    pub fn try_get_untracked(&self) -> Result<T, SignalError> {
        read_node_untracked(self.id)
    }

    /// Whether the value is currently pending, observed through the
    /// node's lazily created pending overlay (reading it never forces the
    /// value itself).
    pub fn is_pending(&self) -> bool {
        read_is_pending(self.id)
    }

    /// Whether the value is currently in error, observed through the
    /// node's lazily created error overlay.
    pub fn has_error(&self) -> bool {
        read_has_error(self.id)
    }
}

/// The writing half of a signal.
pub struct WriteSignal<T> {
    pub(crate) id: NodeId,
    marker: PhantomData<T>,
}

impl<T> WriteSignal<T> {
    pub(crate) fn new(id: NodeId) -> Self {
        Self {
            id,
            marker: PhantomData,
        }
    }
}

impl<T> Clone for WriteSignal<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for WriteSignal<T> {}

impl<T: Clone + 'static> WriteSignal<T> {
    /// Write a new value.
    ///
    /// Under the signal's equality an unchanged value is a no-op. The
    /// write marks subscribers and schedules a flush; inside an open
    /// transition it is captured as a shadow value instead.
    pub fn set(&self, value: T) {
        write_node_value(self.id, Box::new(value));
    }

    /// Write a value derived from the current one.
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> Result<(), SignalError> {
        let current = read_node_untracked::<T>(self.id)?;
        self.set(f(&current));
        Ok(())
    }
}

/// Route a write: captured as a transition shadow value when a transition
/// is open (or when the target itself is pending, which opens one),
/// committed directly otherwise.
pub(crate) fn write_node_value(id: NodeId, value: Box<dyn Any>) {
    with_runtime(move |rt| {
        let target_pending = rt
            .graph
            .node(id)
            .map(|n| n.status.is_pending())
            .unwrap_or(false);
        // A write targeting a still-pending value opens (or joins) the
        // current generation's transition even outside start_transition.
        let capture = rt.transition_depth > 0 || target_pending;
        if capture {
            let generation = rt.clock;
            let scope = rt.current_owner;
            let transition = rt
                .transition
                .get_or_insert_with(|| Transition::new(generation, scope));
            if target_pending {
                transition.pending_sources.insert(id);
            }
            transition.writes.insert(id, value);
            tracing::trace!(node = id.raw(), "write captured as shadow value");
        } else {
            rt.commit_write(id, value);
        }
    });
}

/// Which status overlay a read targets.
#[derive(Clone, Copy)]
pub(crate) enum StatusOverlay {
    Pending,
    Error,
}

/// Read a node's status overlay, creating it on first use. The overlay is
/// a plain `bool` source kept in sync by status transitions, so asking
/// "is this pending/erroring" never forces the value itself.
pub(crate) fn read_status_overlay(id: NodeId, which: StatusOverlay) -> bool {
    let overlay = with_runtime(|rt| {
        let existing = rt.graph.node(id).and_then(|n| match which {
            StatusOverlay::Pending => n.pending_overlay,
            StatusOverlay::Error => n.error_overlay,
        });
        match existing {
            Some(overlay) => Some(overlay),
            None => {
                let currently = rt.graph.node(id).map(|n| match which {
                    StatusOverlay::Pending => n.status.is_pending(),
                    StatusOverlay::Error => matches!(n.status, ValueStatus::Failed(_)),
                })?;
                let mut node = Node::source(Box::new(currently));
                node.equals = Some(erase_equals::<bool>(Rc::new(|a, b| a == b)));
                let overlay = rt.graph.add_node(node);
                if let Some(target) = rt.graph.node_mut(id) {
                    match which {
                        StatusOverlay::Pending => target.pending_overlay = Some(overlay),
                        StatusOverlay::Error => target.error_overlay = Some(overlay),
                    }
                }
                Some(overlay)
            }
        }
    });
    match overlay {
        Some(overlay) => read_node::<bool>(overlay).unwrap_or(false),
        None => false,
    }
}

pub(crate) fn read_is_pending(id: NodeId) -> bool {
    read_status_overlay(id, StatusOverlay::Pending)
}

pub(crate) fn read_has_error(id: NodeId) -> bool {
    read_status_overlay(id, StatusOverlay::Error)
}

/// Create a signal with the default `PartialEq` change comparison.
pub fn create_signal<T: Clone + PartialEq + 'static>(
    initial: T,
) -> (ReadSignal<T>, WriteSignal<T>) {
    create_signal_with(initial, SignalOptions::with_partial_eq())
}

/// Create a signal with explicit options.
pub fn create_signal_with<T: Clone + 'static>(
    initial: T,
    options: SignalOptions<T>,
) -> (ReadSignal<T>, WriteSignal<T>) {
    let id = with_runtime(|rt| {
        let mut node = Node::source(Box::new(initial));
        node.equals = options.equals.map(erase_equals);
        node.unobserved = options.unobserved;
        node.debug_name = options.name;
        node.owner = rt.current_owner;
        rt.graph.add_node(node)
    });
    // The owning scope tears the node down with everything else it owns.
    // Outside any owner the signal simply lives for the thread.
    let _ = crate::reactive::owner::on_cleanup(move || dispose_node_now(id));
    (ReadSignal::new(id), WriteSignal::new(id))
}

/// Create an asynchronous source: a signal that starts `Pending` and is
/// settled through the returned resolver.
pub fn create_async_signal<T: Clone + 'static>() -> (ReadSignal<T>, AsyncResolver<T>) {
    let id = with_runtime(|rt| {
        let mut node = Node::pending_source();
        node.owner = rt.current_owner;
        rt.graph.add_node(node)
    });
    let _ = crate::reactive::owner::on_cleanup(move || dispose_node_now(id));
    (ReadSignal::new(id), AsyncResolver::new(id))
}

/// Settles an asynchronous source.
pub struct AsyncResolver<T> {
    id: NodeId,
    marker: PhantomData<T>,
}

impl<T> Clone for AsyncResolver<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for AsyncResolver<T> {}

impl<T: Clone + 'static> AsyncResolver<T> {
    fn new(id: NodeId) -> Self {
        Self {
            id,
            marker: PhantomData,
        }
    }

    /// Resolve the source with a value and flush.
    ///
    /// If an open transition tracks this source, the value lands in the
    /// transition's shadow set and becomes visible when the transition
    /// commits; otherwise it commits directly. Resolving a source whose
    /// owner was already disposed is a no-op: the disposed node rejects
    /// the write, so a stale asynchronous callback cannot resurrect state.
    pub fn resolve(&self, value: T) -> Result<(), SignalError> {
        let id = self.id;
        with_runtime(move |rt| {
            let joined = rt
                .transition
                .as_ref()
                .map(|t| t.pending_sources.contains(&id))
                .unwrap_or(false);
            if joined {
                let transition = rt.transition.as_mut().expect("transition checked above");
                transition.pending_sources.remove(&id);
                transition.writes.insert(id, Box::new(value));
                tracing::trace!(node = id.raw(), "async source settled into transition");
            } else {
                rt.commit_write(id, Box::new(value));
            }
        });
        crate::reactive::runtime::flush()
    }

    /// Reject the source with an error and flush. Readers observe the
    /// error as data; an open transition stops waiting on this source.
    pub fn reject(&self, error: EvalError) -> Result<(), SignalError> {
        let id = self.id;
        with_runtime(move |rt| {
            if let Some(transition) = rt.transition.as_mut() {
                transition.pending_sources.remove(&id);
            }
            rt.clock += 1;
            let clock = rt.clock;
            if let Some(node) = rt.graph.node_mut(id) {
                node.last_changed = clock;
                node.last_validated = clock;
            }
            rt.set_status(id, ValueStatus::Failed(Rc::new(error)));
            rt.mark_subscribers(id);
        });
        crate::reactive::runtime::flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_get_and_set() {
        let (read, write) = create_signal(0);
        assert_eq!(read.get(), 0);

        write.set(42);
        assert_eq!(read.get(), 42);
    }

    #[test]
    fn signal_update() {
        let (read, write) = create_signal(10);
        write.update(|v| v + 5).unwrap();
        assert_eq!(read.get(), 15);
    }

    #[test]
    fn signal_handles_are_copies_of_shared_state() {
        let (read1, write) = create_signal(0);
        let read2 = read1;

        write.set(42);
        assert_eq!(read1.get(), 42);
        assert_eq!(read2.get(), 42);
    }

    #[test]
    fn async_signal_starts_pending() {
        let (read, resolver) = create_async_signal::<i32>();
        assert!(matches!(
            read.try_get(),
            Err(SignalError::NotReady(_))
        ));
        assert!(read.is_pending());

        resolver.resolve(9).unwrap();
        assert_eq!(read.get(), 9);
        assert!(!read.is_pending());
    }

    #[test]
    fn rejected_async_signal_surfaces_the_error_to_readers() {
        let (read, resolver) = create_async_signal::<i32>();
        resolver.reject(EvalError::new("fetch failed")).unwrap();

        match read.try_get() {
            Err(SignalError::Failed(err)) => assert_eq!(err.message(), "fetch failed"),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[test]
    fn custom_equality_suppresses_redundant_notifications() {
        use std::cell::Cell;

        // Compare only the integral part: fractional churn is not a change.
        let (read, write) = create_signal_with(
            1.2f64,
            SignalOptions::default().with_equals(|a: &f64, b: &f64| a.trunc() == b.trunc()),
        );

        let runs = Rc::new(Cell::new(0));
        let counter = runs.clone();
        let truncated = crate::reactive::memo::create_memo(move || {
            counter.set(counter.get() + 1);
            read.get() as i64
        });

        assert_eq!(truncated.get(), 1);
        assert_eq!(runs.get(), 1);

        // Same integral part: the write is not a change, nothing re-runs.
        write.set(1.9);
        assert_eq!(truncated.get(), 1);
        assert_eq!(runs.get(), 1);

        // Crossing the integral boundary is a change.
        write.set(2.5);
        assert_eq!(truncated.get(), 2);
        assert_eq!(runs.get(), 2);
    }
}
