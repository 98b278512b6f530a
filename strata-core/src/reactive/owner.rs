//! Ownership & Disposal Tree
//!
//! Every reactive scope (an effect, a memo, or a bare root) is an *owner*:
//! a node in a parent/child tree that holds cleanup callbacks and context
//! values. Disposing an owner recursively disposes its descendants depth
//! first, so a leaf's cleanups always run before its ancestor's, then
//! unlinks the scope's graph node from the dependency graph.
//!
//! Disposal that targets a descendant still participating in an unsettled
//! transition does not tear it down immediately: the descendant is tagged
//! zombie and parked in the zombie scheduler queue until the transition
//! resolves, then finally torn down.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use smallvec::SmallVec;

use crate::error::{ContextError, OwnerError};
use crate::graph::node::NodeId;
use crate::reactive::runtime::with_runtime;

/// Unique identifier for an owner scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerId(u64);

impl OwnerId {
    /// Generate a new unique owner ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for OwnerId {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle of an owner scope. Transitions only move forward:
/// `Active -> Disposing -> Disposed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerState {
    /// The scope is live.
    Active,

    /// Disposal has started; cleanups may still be running.
    Disposing,

    /// Terminal. The scope's node and edges are gone.
    Disposed,
}

impl OwnerState {
    /// Advance to `next`, ignoring attempts to move backwards.
    pub fn advance(self, next: OwnerState) -> OwnerState {
        match (self, next) {
            (OwnerState::Active, n) => n,
            (OwnerState::Disposing, OwnerState::Disposed) => OwnerState::Disposed,
            (state, _) => state,
        }
    }
}

/// A cleanup callback registered with [`on_cleanup`].
pub type CleanupFn = Box<dyn FnOnce()>;

/// An owner scope in the disposal tree.
pub(crate) struct OwnerNode {
    /// Parent scope, if any.
    pub parent: Option<OwnerId>,

    /// Child scopes, in creation order.
    pub children: SmallVec<[OwnerId; 4]>,

    /// Cleanup callbacks, run in registration order at disposal.
    pub cleanups: SmallVec<[CleanupFn; 2]>,

    /// The graph node this scope *is*, when the scope belongs to a
    /// computation.
    pub node: Option<NodeId>,

    /// Context values provided in this scope.
    pub contexts: HashMap<TypeId, Rc<dyn Any>>,

    /// Lifecycle state.
    pub state: OwnerState,

    /// Ordinal allocator for child naming in trace output.
    pub child_counter: u64,
}

impl OwnerNode {
    pub fn new(parent: Option<OwnerId>) -> Self {
        Self {
            parent,
            children: SmallVec::new(),
            cleanups: SmallVec::new(),
            node: None,
            contexts: HashMap::new(),
            state: OwnerState::Active,
            child_counter: 0,
        }
    }
}

/// Handle to an owner scope.
///
/// Handles are plain IDs: copying one does not extend the scope's life,
/// and using a handle after disposal reports [`OwnerError::NoOwner`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Owner {
    pub(crate) id: OwnerId,
}

impl Owner {
    /// Dispose this scope and everything beneath it.
    pub fn dispose(&self) {
        dispose_owner(self.id);
    }

    /// Whether the scope is still active.
    pub fn is_active(&self) -> bool {
        with_runtime(|rt| {
            rt.owners
                .get(&self.id)
                .map(|o| o.state == OwnerState::Active)
                .unwrap_or(false)
        })
    }
}

/// Create a new root scope, run `f` inside it, and return its result.
///
/// The root is a child of the currently active owner (so context values
/// are inherited) but is normally disposed explicitly through the handle
/// passed to `f`.
pub fn create_root<T>(f: impl FnOnce(Owner) -> T) -> T {
    let id = with_runtime(|rt| {
        let parent = rt.current_owner;
        let id = rt.new_owner(parent);
        rt.current_owner = Some(id);
        id
    });
    tracing::trace!(owner = id.raw(), "entering root scope");
    let result = f(Owner { id });
    with_runtime(|rt| {
        rt.current_owner = rt.owners.get(&id).and_then(|o| o.parent);
    });
    result
}

/// Run `f` with `owner` as the active scope.
///
/// Everything `f` creates (signals, effects, cleanups, contexts) is owned
/// by `owner` rather than by whatever scope was active before.
pub fn run_with_owner<T>(owner: Owner, f: impl FnOnce() -> T) -> Result<T, OwnerError> {
    let prev = with_runtime(|rt| {
        match rt.owners.get(&owner.id) {
            Some(o) if o.state == OwnerState::Active => {}
            _ => return Err(OwnerError::NoOwner),
        }
        let prev = rt.current_owner;
        rt.current_owner = Some(owner.id);
        Ok(prev)
    })?;
    let result = f();
    with_runtime(|rt| rt.current_owner = prev);
    Ok(result)
}

/// Register a cleanup callback on the active owner.
///
/// Cleanups run exactly once, in registration order, when the owner is
/// disposed or (for computation scopes) immediately before the
/// computation re-runs.
pub fn on_cleanup(f: impl FnOnce() + 'static) -> Result<(), OwnerError> {
    with_runtime(|rt| {
        let Some(id) = rt.current_owner else {
            return Err(OwnerError::NoOwner);
        };
        match rt.owners.get_mut(&id) {
            Some(owner) if owner.state == OwnerState::Active => {
                owner.cleanups.push(Box::new(f));
                Ok(())
            }
            _ => Err(OwnerError::NoOwner),
        }
    })
}

/// Provide a context value on the active owner.
///
/// The value is visible to [`use_context`] lookups from this scope and
/// every scope beneath it, shadowing any provider further up.
pub fn provide_context<T: 'static>(value: T) -> Result<(), OwnerError> {
    with_runtime(|rt| {
        let Some(id) = rt.current_owner else {
            return Err(OwnerError::NoOwner);
        };
        match rt.owners.get_mut(&id) {
            Some(owner) if owner.state == OwnerState::Active => {
                owner.contexts.insert(TypeId::of::<T>(), Rc::new(value));
                Ok(())
            }
            _ => Err(OwnerError::NoOwner),
        }
    })
}

/// Look up a context value by type, walking up the owner chain.
pub fn use_context<T: 'static>() -> Result<Rc<T>, ContextError> {
    with_runtime(|rt| {
        let mut cursor = rt.current_owner;
        while let Some(id) = cursor {
            let Some(owner) = rt.owners.get(&id) else {
                break;
            };
            if let Some(value) = owner.contexts.get(&TypeId::of::<T>()) {
                return value
                    .clone()
                    .downcast::<T>()
                    .map_err(|_| ContextError::NotFound);
            }
            cursor = owner.parent;
        }
        Err(ContextError::NotFound)
    })
}

/// Dispose an owner scope: children depth-first, then own cleanups, then
/// graph unlinking.
pub(crate) fn dispose_owner(id: OwnerId) {
    // Phase 1: collect the subtree in post-order (children before
    // parents) and mark it all Disposing, so re-entrant disposal and
    // late `on_cleanup` calls see a closed scope.
    let Some((postorder, rolled_back)) = with_runtime(|rt| {
        let owner = rt.owners.get(&id)?;
        if owner.state != OwnerState::Active {
            return None;
        }

        let mut postorder = Vec::new();
        collect_postorder(rt, id, &mut postorder);
        for o in &postorder {
            if let Some(owner) = rt.owners.get_mut(o) {
                owner.state = owner.state.advance(OwnerState::Disposing);
            }
        }

        // Disposing the scope a transition belongs to rolls the whole
        // transition back: its shadow writes are discarded before any
        // dependent could observe them.
        let in_subtree = rt
            .transition
            .as_ref()
            .and_then(|t| t.scope)
            .map(|scope| postorder.contains(&scope))
            .unwrap_or(false);
        let rollback = if in_subtree { rt.transition.take() } else { None };

        Some((postorder, rollback))
    }) else {
        return;
    };

    tracing::debug!(
        owner = id.raw(),
        scopes = postorder.len(),
        rollback = rolled_back.is_some(),
        "disposing owner subtree"
    );

    let mut deferred_zombies = Vec::new();
    if let Some(t) = rolled_back {
        // Zombies parked by the rolled-back transition are finally torn
        // down along with this subtree.
        deferred_zombies.extend(t.zombie_owners);
        drop(t.writes);
    }

    for owner in postorder {
        finish_one_owner(owner, true);
    }
    for owner in deferred_zombies {
        finish_one_owner(owner, false);
    }
}

/// Collect `id`'s subtree in post-order.
fn collect_postorder(
    rt: &crate::reactive::runtime::Runtime,
    id: OwnerId,
    out: &mut Vec<OwnerId>,
) {
    if let Some(owner) = rt.owners.get(&id) {
        for child in owner.children.clone() {
            collect_postorder(rt, child, out);
        }
    }
    out.push(id);
}

/// Tear down a single owner: run cleanups, unlink its node, drop the
/// entry. When `allow_zombie` is set and the scope's node still
/// participates in an unsettled transition, teardown is deferred instead.
pub(crate) fn finish_one_owner(id: OwnerId, allow_zombie: bool) {
    enum Plan {
        Gone,
        Defer,
        Proceed {
            cleanups: SmallVec<[CleanupFn; 2]>,
            node: Option<NodeId>,
        },
    }

    let plan = with_runtime(|rt| {
        let Some(owner) = rt.owners.get_mut(&id) else {
            return Plan::Gone;
        };
        if owner.state == OwnerState::Disposed {
            return Plan::Gone;
        }
        let node = owner.node;

        if allow_zombie {
            if let (Some(n), Some(t)) = (node, rt.transition.as_mut()) {
                if t.touches_node(n)
                    || rt
                        .graph
                        .node(n)
                        .map(|node| node.status.is_pending())
                        .unwrap_or(false)
                {
                    t.zombie_owners.push(id);
                    if let Some(node) = rt.graph.node_mut(n) {
                        node.zombie = true;
                    }
                    // Detach from the parent now: the scope only lingers
                    // for final teardown at settlement and must not be
                    // visited by further disposal walks.
                    let parent = rt.owners.get_mut(&id).and_then(|owner| owner.parent.take());
                    if let Some(parent) = parent.and_then(|p| rt.owners.get_mut(&p)) {
                        parent.children.retain(|c| *c != id);
                    }
                    tracing::trace!(owner = id.raw(), node = n.raw(), "deferring teardown: zombie");
                    return Plan::Defer;
                }
            }
        }

        let cleanups = std::mem::take(&mut rt.owners.get_mut(&id).expect("owner checked above").cleanups);
        Plan::Proceed { cleanups, node }
    });

    match plan {
        Plan::Gone | Plan::Defer => {}
        Plan::Proceed { cleanups, node } => {
            // Cleanups run with the runtime borrow released: they are user
            // code and may read or write reactive state.
            for cleanup in cleanups {
                cleanup();
            }

            let unobserved = with_runtime(|rt| {
                let mut callbacks = Vec::new();
                if let Some(n) = node {
                    callbacks = rt.teardown_node(n);
                }
                let parent = rt.owners.get_mut(&id).map(|owner| {
                    owner.state = owner.state.advance(OwnerState::Disposed);
                    owner.parent
                });
                if let Some(parent) = parent.flatten().and_then(|p| rt.owners.get_mut(&p)) {
                    parent.children.retain(|c| *c != id);
                }
                rt.owners.remove(&id);
                rt.boundaries.remove(&id);
                if rt.current_owner == Some(id) {
                    rt.current_owner = None;
                }
                callbacks
            });
            for callback in unobserved {
                (*callback)();
            }
        }
    }
}

/// Reset a computation's scope between runs: dispose every child owner
/// and run this scope's own cleanups, keeping the scope itself alive.
pub(crate) fn reset_scope(id: OwnerId) {
    loop {
        let child = with_runtime(|rt| {
            rt.owners
                .get(&id)
                .and_then(|owner| owner.children.last().copied())
        });
        match child {
            Some(child) => dispose_owner(child),
            None => break,
        }
    }

    let cleanups = with_runtime(|rt| {
        rt.owners
            .get_mut(&id)
            .map(|owner| std::mem::take(&mut owner.cleanups))
            .unwrap_or_default()
    });
    for cleanup in cleanups {
        cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_state_only_moves_forward() {
        assert_eq!(
            OwnerState::Active.advance(OwnerState::Disposing),
            OwnerState::Disposing
        );
        assert_eq!(
            OwnerState::Disposing.advance(OwnerState::Disposed),
            OwnerState::Disposed
        );
        assert_eq!(
            OwnerState::Disposed.advance(OwnerState::Active),
            OwnerState::Disposed
        );
        assert_eq!(
            OwnerState::Disposing.advance(OwnerState::Active),
            OwnerState::Disposing
        );
    }

    #[test]
    fn on_cleanup_outside_any_owner_fails() {
        assert_eq!(on_cleanup(|| {}).unwrap_err(), OwnerError::NoOwner);
    }

    #[test]
    fn cleanups_run_child_before_parent() {
        use std::cell::RefCell;

        let order: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));

        create_root(|root| {
            let order_outer = order.clone();
            on_cleanup(move || order_outer.borrow_mut().push("parent")).unwrap();

            create_root(|_child| {
                let order_inner = order.clone();
                on_cleanup(move || order_inner.borrow_mut().push("child")).unwrap();
            });

            root.dispose();
        });

        assert_eq!(*order.borrow(), vec!["child", "parent"]);
    }

    #[test]
    fn cleanups_run_exactly_once() {
        use std::cell::Cell;

        let count = Rc::new(Cell::new(0));
        create_root(|root| {
            let count = count.clone();
            on_cleanup(move || count.set(count.get() + 1)).unwrap();
            root.dispose();
            root.dispose();
        });
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn context_lookup_walks_up_and_shadows() {
        create_root(|_| {
            provide_context(41u32).unwrap();
            assert_eq!(*use_context::<u32>().unwrap(), 41);

            create_root(|_| {
                // Inherited from the parent scope.
                assert_eq!(*use_context::<u32>().unwrap(), 41);
                // Shadow it.
                provide_context(42u32).unwrap();
                assert_eq!(*use_context::<u32>().unwrap(), 42);
                // Missing type reports NotFound.
                assert_eq!(
                    use_context::<String>().unwrap_err(),
                    ContextError::NotFound
                );
            });

            assert_eq!(*use_context::<u32>().unwrap(), 41);
        });
    }

    #[test]
    fn run_with_owner_targets_the_given_scope() {
        use std::cell::Cell;

        let ran = Rc::new(Cell::new(false));
        create_root(|root| {
            let ran = ran.clone();
            run_with_owner(root, move || ran.set(true)).unwrap();
        });
        assert!(ran.get());
    }

    #[test]
    fn run_with_owner_after_dispose_fails() {
        let owner = create_root(|root| {
            root.dispose();
            root
        });
        assert!(run_with_owner(owner, || ()).is_err());
    }
}
