//! Graph Nodes
//!
//! This module defines the single node shape shared by plain signals and
//! computations. A node carries its last committed value, an explicit
//! status enum describing whether that value is usable, the Check/Dirty
//! propagation mark, a height used for topological scheduling, and the
//! heads of the two doubly linked edge lists (subscribers and sources).
//!
//! # Height
//!
//! A node's height is always strictly greater than the height of every
//! node it currently reads. Processing the scheduler queue in ascending
//! height order therefore visits every source before its observers, which
//! is what makes propagation glitch-free: a diamond `A -> B, C -> D` can
//! never recompute `D` with one fresh and one stale input.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{EvalError, SignalError};
use crate::graph::link::LinkId;
use crate::reactive::owner::OwnerId;

/// Unique identifier for a node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

/// Which phase of the flush loop an effect's body runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectPhase {
    /// Render-phase effects run before user-phase effects in every flush.
    Render,

    /// User-phase effects run last and get first refusal on error handling.
    User,
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A source node (signal). Roots of the graph: no sources, only
    /// subscribers.
    Source,

    /// A derived node (memo). Has sources and may have subscribers; caches
    /// its computed value.
    Derived,

    /// An effect node. Has sources but no value consumers; its deferred
    /// body runs in the given flush phase.
    Effect(EffectPhase),
}

impl NodeKind {
    /// Whether this node runs a compute function.
    pub fn is_computation(&self) -> bool {
        !matches!(self, NodeKind::Source)
    }
}

/// Propagation mark of a node.
///
/// The variants are ordered: `Clean < Check < Dirty`. Marking never
/// weakens an existing mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DirtyState {
    /// The node's value is up-to-date.
    Clean,

    /// A transitive source changed; the node must revalidate its direct
    /// sources before deciding whether to recompute.
    Check,

    /// A direct source definitely changed; the node must recompute.
    Dirty,
}

impl DirtyState {
    /// Escalate to `mark` if it is stronger than the current state.
    ///
    /// This is the single transition function for the propagation marks:
    /// marks only ever get stronger until the node is processed and reset
    /// to `Clean`.
    pub fn escalate(self, mark: DirtyState) -> DirtyState {
        self.max(mark)
    }
}

/// Well-formedness of a node's value.
#[derive(Debug, Clone)]
pub enum ValueStatus {
    /// The node has never produced a value.
    Uninitialized,

    /// The value is usable.
    Ready,

    /// The value is waiting on an asynchronous source.
    Pending,

    /// The computation producing the value failed.
    Failed(Rc<EvalError>),
}

impl ValueStatus {
    /// Whether the value is usable right now.
    pub fn is_ready(&self) -> bool {
        matches!(self, ValueStatus::Ready)
    }

    /// Whether the node is waiting on an asynchronous source.
    pub fn is_pending(&self) -> bool {
        matches!(self, ValueStatus::Pending)
    }

    /// Whether two statuses are observably the same kind. Failed statuses
    /// compare by error identity.
    pub fn same_kind(&self, other: &ValueStatus) -> bool {
        match (self, other) {
            (ValueStatus::Uninitialized, ValueStatus::Uninitialized) => true,
            (ValueStatus::Ready, ValueStatus::Ready) => true,
            (ValueStatus::Pending, ValueStatus::Pending) => true,
            (ValueStatus::Failed(a), ValueStatus::Failed(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Comparison deciding whether a newly computed value counts as a change.
pub type EqualsFn = Rc<dyn Fn(&dyn Any, &dyn Any) -> bool>;

/// A computation body. Returns the new value, the `NotReady` sentinel, or
/// a real error.
pub type ComputeFn = Rc<dyn Fn() -> Result<Box<dyn Any>, SignalError>>;

/// A deferred effect body, invoked with the effect's computed value in the
/// post-propagation phase.
pub type EffectBodyFn = Rc<RefCell<dyn FnMut(&dyn Any)>>;

/// An effect's optional error callback.
pub type ErrorHandlerFn = Rc<dyn Fn(&SignalError)>;

/// Callback fired when a node loses its last subscriber.
pub type UnobservedFn = Rc<dyn Fn()>;

/// A node in the dependency graph.
pub struct Node {
    /// Unique identifier for this node.
    pub id: NodeId,

    /// What kind of node this is.
    pub kind: NodeKind,

    /// Last committed output, type-erased.
    pub value: Option<Box<dyn Any>>,

    /// Well-formedness of `value`.
    pub status: ValueStatus,

    /// Current propagation mark.
    pub dirty: DirtyState,

    /// Longest path from a leaf source; see module docs.
    pub height: u32,

    /// Whether the node is currently a member of a scheduler queue.
    /// Tracked here so queue insertion is idempotent.
    pub in_queue: bool,

    /// Whether the node's compute function is currently running.
    pub recomputing: bool,

    /// Whether the node's owner is mid-disposal under an active transition.
    /// Zombie nodes live in the zombie scheduler queue until the transition
    /// settles, then are torn down.
    pub zombie: bool,

    /// Terminal lifecycle flag.
    pub disposed: bool,

    /// Head of this node's subscriber list.
    pub subscribers_head: Option<LinkId>,

    /// Tail of this node's subscriber list.
    pub subscribers_tail: Option<LinkId>,

    /// Head of this node's source list.
    pub sources_head: Option<LinkId>,

    /// Tail of this node's source list.
    pub sources_tail: Option<LinkId>,

    /// Change comparison; `None` disables the check (always notify).
    pub equals: Option<EqualsFn>,

    /// Compute function (computations only).
    pub compute: Option<ComputeFn>,

    /// Deferred body (effects only).
    pub effect_body: Option<EffectBodyFn>,

    /// Optional error callback (effects only).
    pub error_handler: Option<ErrorHandlerFn>,

    /// Back-reference into the ownership tree: the owner scope this
    /// computation *is* (for computations) or was created under.
    pub owner: Option<OwnerId>,

    /// Lazily created `bool` source answering "is this node pending"
    /// without forcing a read of the value itself.
    pub pending_overlay: Option<NodeId>,

    /// Lazily created `bool` source answering "is this node in error"
    /// without forcing a read of the value itself.
    pub error_overlay: Option<NodeId>,

    /// Fired when the last subscriber unlinks.
    pub unobserved: Option<UnobservedFn>,

    /// Logical clock stamp of the last committed change.
    pub last_changed: u64,

    /// Logical clock stamp of the last successful validation.
    pub last_validated: u64,

    /// Optional name used in tracing output.
    pub debug_name: Option<String>,
}

impl Node {
    fn base(kind: NodeKind) -> Self {
        Self {
            id: NodeId::new(),
            kind,
            value: None,
            status: ValueStatus::Uninitialized,
            dirty: match kind {
                NodeKind::Source => DirtyState::Clean,
                // Computations start dirty so the first evaluation runs.
                _ => DirtyState::Dirty,
            },
            height: 0,
            in_queue: false,
            recomputing: false,
            zombie: false,
            disposed: false,
            subscribers_head: None,
            subscribers_tail: None,
            sources_head: None,
            sources_tail: None,
            equals: None,
            compute: None,
            effect_body: None,
            error_handler: None,
            owner: None,
            pending_overlay: None,
            error_overlay: None,
            unobserved: None,
            last_changed: 0,
            last_validated: 0,
            debug_name: None,
        }
    }

    /// Create a source (signal) node holding `value`.
    pub fn source(value: Box<dyn Any>) -> Self {
        let mut node = Self::base(NodeKind::Source);
        node.value = Some(value);
        node.status = ValueStatus::Ready;
        node
    }

    /// Create a source node with no value yet (an asynchronous source).
    pub fn pending_source() -> Self {
        let mut node = Self::base(NodeKind::Source);
        node.status = ValueStatus::Pending;
        node
    }

    /// Create a derived (memo) node. The computation does not run until
    /// first read.
    pub fn derived(compute: ComputeFn) -> Self {
        let mut node = Self::base(NodeKind::Derived);
        node.compute = Some(compute);
        node
    }

    /// Create an effect node for the given phase.
    pub fn effect(phase: EffectPhase, compute: ComputeFn, body: EffectBodyFn) -> Self {
        let mut node = Self::base(NodeKind::Effect(phase));
        node.compute = Some(compute);
        node.effect_body = Some(body);
        node
    }

    /// Whether this node has any subscribers.
    pub fn is_observed(&self) -> bool {
        self.subscribers_head.is_some()
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("status", &self.status)
            .field("dirty", &self.dirty)
            .field("height", &self.height)
            .field("zombie", &self.zombie)
            .field("disposed", &self.disposed)
            .field("name", &self.debug_name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_ids_are_unique() {
        let id1 = NodeId::new();
        let id2 = NodeId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn source_node_starts_clean_and_ready() {
        let node = Node::source(Box::new(5i32));
        assert_eq!(node.kind, NodeKind::Source);
        assert_eq!(node.dirty, DirtyState::Clean);
        assert!(node.status.is_ready());
    }

    #[test]
    fn derived_node_starts_dirty_and_uninitialized() {
        let node = Node::derived(Rc::new(|| Ok(Box::new(1i32) as Box<dyn Any>)));
        assert_eq!(node.kind, NodeKind::Derived);
        assert_eq!(node.dirty, DirtyState::Dirty);
        assert!(matches!(node.status, ValueStatus::Uninitialized));
    }

    #[test]
    fn pending_source_reports_pending() {
        let node = Node::pending_source();
        assert!(node.status.is_pending());
        assert!(node.value.is_none());
    }

    #[test]
    fn escalate_never_weakens() {
        assert_eq!(
            DirtyState::Clean.escalate(DirtyState::Check),
            DirtyState::Check
        );
        assert_eq!(
            DirtyState::Check.escalate(DirtyState::Dirty),
            DirtyState::Dirty
        );
        assert_eq!(
            DirtyState::Dirty.escalate(DirtyState::Check),
            DirtyState::Dirty
        );
        assert_eq!(
            DirtyState::Dirty.escalate(DirtyState::Clean),
            DirtyState::Dirty
        );
    }

    #[test]
    fn status_same_kind_compares_failed_by_identity() {
        let a = Rc::new(EvalError::new("a"));
        let b = Rc::new(EvalError::new("a"));
        assert!(ValueStatus::Failed(a.clone()).same_kind(&ValueStatus::Failed(a.clone())));
        assert!(!ValueStatus::Failed(a).same_kind(&ValueStatus::Failed(b)));
        assert!(ValueStatus::Ready.same_kind(&ValueStatus::Ready));
        assert!(!ValueStatus::Ready.same_kind(&ValueStatus::Pending));
    }
}
