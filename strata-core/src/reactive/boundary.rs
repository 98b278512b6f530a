//! Boundary Queues
//!
//! Error and loading boundaries are interceptors in the scheduler's queue
//! hierarchy: they sit at an owner scope and capture PENDING / ERROR
//! status notifications coming up from descendants instead of letting
//! them reach the parent queue (which, for an unhandled error, means
//! propagating out of `flush`). Captured notifications live in a
//! boundary-local held set; when the condition clears — the failed node
//! recomputes successfully, or the pending source resolves — the boundary
//! releases them and normal recomputation resumes.
//!
//! The underlying propagation algorithm is untouched: boundaries only
//! override where a status notification is delivered.

use crate::error::SignalError;
use crate::graph::node::NodeId;
use crate::reactive::memo::{create_try_memo, Memo};
use crate::reactive::runtime::{with_runtime, Runtime};
use crate::reactive::signal::{create_signal_with, SignalOptions};

/// What a boundary intercepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BoundaryKind {
    /// Captures ERROR statuses.
    Error,

    /// Captures PENDING statuses.
    Load,
}

/// How a status notification is being routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Routing {
    /// A real error looking for a handler.
    Error,

    /// A suspension notification. Never escalates to an error.
    Pending,
}

/// A boundary registered at an owner scope.
pub(crate) struct BoundaryEntry {
    pub kind: BoundaryKind,

    /// The boundary's condition signal. Error boundaries hold an
    /// `Option<SignalError>`; load boundaries hold a held-count.
    pub signal: NodeId,

    /// Nodes whose status notifications this boundary captured.
    pub held: Vec<NodeId>,
}

/// Deliver a status notification from `node` upward: the node's own error
/// callback gets first refusal, then the nearest matching boundary in the
/// owner chain captures it, and only an unhandled error falls through to
/// the flush loop.
pub(crate) fn route_status(node: NodeId, routing: Routing, error: SignalError) {
    if routing == Routing::Error {
        let handler = with_runtime(|rt| rt.graph.node(node).and_then(|n| n.error_handler.clone()));
        if let Some(handler) = handler {
            // First refusal: the effect's own callback, borrow released.
            (*handler)(&error);
            return;
        }
    }

    let captured = with_runtime(|rt| {
        let wanted = match routing {
            Routing::Error => BoundaryKind::Error,
            Routing::Pending => BoundaryKind::Load,
        };
        let mut cursor = rt.graph.node(node).and_then(|n| n.owner);
        while let Some(owner) = cursor {
            if let Some(entry) = rt.boundaries.get_mut(&owner) {
                if entry.kind == wanted {
                    if !entry.held.contains(&node) {
                        entry.held.push(node);
                    }
                    let signal = entry.signal;
                    let held = entry.held.len() as u64;
                    return Some((signal, held));
                }
            }
            cursor = rt.owners.get(&owner).and_then(|o| o.parent);
        }
        None
    });

    match (captured, routing) {
        (Some((signal, _)), Routing::Error) => {
            tracing::debug!(node = node.raw(), "error captured by boundary");
            with_runtime(|rt| {
                rt.commit_write(signal, Box::new(Some(error)));
            });
        }
        (Some((signal, held)), Routing::Pending) => {
            tracing::trace!(node = node.raw(), held, "pending captured by boundary");
            with_runtime(|rt| {
                rt.commit_write(signal, Box::new(held));
            });
        }
        (None, Routing::Error) => {
            // No handler, no boundary: the error leaves the flush loop.
            with_runtime(|rt| {
                if rt.flush_error.is_none() {
                    rt.flush_error = Some(error);
                }
            });
        }
        (None, Routing::Pending) => {
            // A suspension with nobody watching stays parked on the node;
            // the tracked edge to the pending source re-marks it later.
        }
    }
}

/// A held node's status cleared: drop it from every boundary holding it
/// and re-emit by resetting the boundary condition signal once its held
/// set drains.
pub(crate) fn release_held(rt: &mut Runtime, node: NodeId) {
    let mut cleared = Vec::new();
    for entry in rt.boundaries.values_mut() {
        if let Some(pos) = entry.held.iter().position(|held| *held == node) {
            entry.held.remove(pos);
            cleared.push((entry.signal, entry.kind, entry.held.len() as u64));
        }
    }
    for (signal, kind, remaining) in cleared {
        match kind {
            BoundaryKind::Error => {
                if remaining == 0 {
                    rt.commit_write(signal, Box::new(None::<SignalError>));
                }
            }
            BoundaryKind::Load => {
                rt.commit_write(signal, Box::new(remaining));
            }
        }
    }
}

/// Register `entry` at the owner scope of the boundary's accessor memo.
fn register_boundary<T: Clone + 'static>(memo: &Memo<T>, entry: BoundaryEntry) {
    with_runtime(|rt| {
        if let Some(scope) = rt.graph.node(memo.node_id()).and_then(|n| n.owner) {
            rt.boundaries.insert(scope, entry);
        }
    });
}

/// Create an error boundary: a reactive accessor that evaluates `body`
/// and substitutes `fallback` whenever the body fails or a descendant
/// effect's unhandled error is captured.
///
/// The `NotReady` sentinel is explicitly not an error: it passes through
/// to the nearest load boundary instead.
pub fn create_error_boundary<T: Clone + 'static>(
    body: impl Fn() -> Result<T, SignalError> + 'static,
    fallback: impl Fn(&SignalError) -> T + 'static,
) -> Memo<T> {
    let (caught, _set_caught) =
        create_signal_with(None::<SignalError>, SignalOptions::always_notify());

    let accessor = create_try_memo(move || {
        if let Some(error) = caught.get() {
            return Ok(fallback(&error));
        }
        match body() {
            Ok(value) => Ok(value),
            Err(error) if error.is_not_ready() => Err(error),
            Err(error) => {
                tracing::debug!("error boundary rendering fallback");
                Ok(fallback(&error))
            }
        }
    });

    register_boundary(
        &accessor,
        BoundaryEntry {
            kind: BoundaryKind::Error,
            signal: caught.node_id(),
            held: Vec::new(),
        },
    );
    accessor
}

/// Create a loading boundary: a reactive accessor that evaluates `body`
/// and substitutes `fallback` while the body (or a captured descendant)
/// is waiting on an asynchronous source.
pub fn create_load_boundary<T: Clone + 'static>(
    body: impl Fn() -> Result<T, SignalError> + 'static,
    fallback: impl Fn() -> T + 'static,
) -> Memo<T> {
    let (held_count, _set_held) = create_signal_with(0u64, SignalOptions::always_notify());

    let accessor = create_try_memo(move || {
        // Condition subscription: captured pending statuses re-run the
        // accessor when they change.
        let _held = held_count.get();
        match body() {
            Ok(value) => Ok(value),
            Err(SignalError::NotReady(_)) => Ok(fallback()),
            Err(error) => Err(error),
        }
    });

    register_boundary(
        &accessor,
        BoundaryEntry {
            kind: BoundaryKind::Load,
            signal: held_count.node_id(),
            held: Vec::new(),
        },
    );
    accessor
}
