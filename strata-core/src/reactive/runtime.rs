//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects signals, memos,
//! and effects. It owns the dependency graph, the ownership tree, the
//! dirty and zombie scheduler queues, the active transition slot, and the
//! tracking-context stack.
//!
//! # How an update propagates
//!
//! 1. A write bumps the logical clock, marks direct subscribers `Dirty`
//!    and transitive subscribers `Check`, and enqueues every marked
//!    computation into the height-bucketed queue.
//!
//! 2. `flush` drains the queue in ascending height order. `Dirty` nodes
//!    recompute immediately; `Check` nodes first revalidate their sources
//!    and only recompute if a source actually changed.
//!
//! 3. Effects computed during the drain do not run their bodies inline:
//!    bodies are pushed onto the render-phase and user-phase queues and
//!    run after propagation, in FIFO order per phase. The loop re-enters
//!    while bodies schedule further work.
//!
//! # Single-threadedness
//!
//! The entire runtime lives in a `thread_local!` `RefCell`. Every user
//! closure — computations, effect bodies, cleanups — runs with the borrow
//! released, so user code can freely read and write reactive state. The
//! cost of that freedom is a rule for the helpers here: never hold the
//! borrow across a call into user code.

use std::any::Any;
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};

use crate::error::SignalError;
use crate::graph::node::{
    DirtyState, EffectPhase, Node, NodeId, NodeKind, UnobservedFn, ValueStatus,
};
use crate::graph::queue::HeightQueue;
use crate::graph::Graph;
use crate::reactive::boundary::BoundaryEntry;
use crate::reactive::owner::{OwnerId, OwnerNode};
use crate::reactive::transition::Transition;
use crate::store::StoreData;
use crate::store::StoreId;

/// Iteration guard for the flush loop. An effect that keeps writing a
/// signal it depends on would otherwise spin forever.
const MAX_FLUSH_ITERATIONS: u32 = 1000;

thread_local! {
    static RUNTIME: RefCell<Runtime> = RefCell::new(Runtime::new());
}

/// Run `f` with exclusive access to the thread's runtime.
///
/// Callers must not invoke user closures inside `f`; see module docs.
pub(crate) fn with_runtime<R>(f: impl FnOnce(&mut Runtime) -> R) -> R {
    RUNTIME.with(|rt| f(&mut rt.borrow_mut()))
}

/// Which committed/in-flight view reads observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ValueView {
    /// Last committed values (the default).
    Committed,

    /// Shadow values of the open transition, where present.
    InFlight,
}

/// One tracking frame: the computation currently collecting dependencies,
/// plus the parallel-walk cursor over its previous source list.
struct TrackFrame {
    observer: NodeId,

    /// Next not-yet-rematched link of the previous run.
    cursor: Option<crate::graph::link::LinkId>,

    /// Most recently recorded link of this run (for duplicate-read
    /// coalescing).
    last: Option<crate::graph::link::LinkId>,
}

/// The per-thread reactive runtime.
pub(crate) struct Runtime {
    /// The dependency graph.
    pub graph: Graph,

    /// The ownership/disposal tree.
    pub owners: HashMap<OwnerId, OwnerNode>,

    /// The owner scope new primitives attach to.
    pub current_owner: Option<OwnerId>,

    /// The active transition, if any.
    pub transition: Option<Transition>,

    /// Nesting depth of `start_transition` bodies (writes inside are
    /// captured as shadow values).
    pub transition_depth: u32,

    /// Registered boundary queues, keyed by their owner scope.
    pub boundaries: HashMap<OwnerId, BoundaryEntry>,

    /// Reactive stores, keyed by handle.
    pub stores: HashMap<StoreId, StoreData>,

    /// Logical clock; advances on every committed write.
    pub clock: u64,

    tracking: Vec<TrackFrame>,
    untrack_depth: u32,
    view_stack: Vec<ValueView>,
    probe_stack: Vec<bool>,

    dirty_queue: HeightQueue,
    zombie_queue: HeightQueue,
    render_queue: VecDeque<NodeId>,
    user_queue: VecDeque<NodeId>,

    flushing: bool,
    flush_scheduled: bool,

    /// First unhandled user-effect error of the current flush.
    pub flush_error: Option<SignalError>,
}

impl Runtime {
    fn new() -> Self {
        Self {
            graph: Graph::new(),
            owners: HashMap::new(),
            current_owner: None,
            transition: None,
            transition_depth: 0,
            boundaries: HashMap::new(),
            stores: HashMap::new(),
            clock: 0,
            tracking: Vec::new(),
            untrack_depth: 0,
            view_stack: Vec::new(),
            probe_stack: Vec::new(),
            dirty_queue: HeightQueue::new(),
            zombie_queue: HeightQueue::new(),
            render_queue: VecDeque::new(),
            user_queue: VecDeque::new(),
            flushing: false,
            flush_scheduled: false,
            flush_error: None,
        }
    }

    /// Create a new owner scope under `parent`.
    pub fn new_owner(&mut self, parent: Option<OwnerId>) -> OwnerId {
        let id = OwnerId::new();
        if let Some(p) = parent.and_then(|p| self.owners.get_mut(&p)) {
            p.children.push(id);
            let ordinal = p.child_counter;
            p.child_counter += 1;
            tracing::trace!(owner = id.raw(), ordinal, "created child scope");
        } else {
            tracing::trace!(owner = id.raw(), "created detached scope");
        }
        self.owners.insert(id, OwnerNode::new(parent));
        id
    }

    fn view(&self) -> ValueView {
        self.view_stack
            .last()
            .copied()
            .unwrap_or(ValueView::Committed)
    }

    pub(crate) fn push_view(&mut self, view: ValueView) {
        self.view_stack.push(view);
    }

    pub(crate) fn pop_view(&mut self) {
        self.view_stack.pop();
    }

    pub(crate) fn push_probe(&mut self) {
        self.probe_stack.push(false);
    }

    pub(crate) fn pop_probe(&mut self) -> bool {
        self.probe_stack.pop().unwrap_or(false)
    }

    pub(crate) fn enter_untracked(&mut self) {
        self.untrack_depth += 1;
    }

    pub(crate) fn exit_untracked(&mut self) {
        self.untrack_depth = self.untrack_depth.saturating_sub(1);
    }

    /// Record that the innermost tracked computation read `source`.
    ///
    /// Walks the previous source list in parallel with the new reads:
    /// a read matching the cursor reuses the old link and advances it; a
    /// new source splices a fresh link in before the cursor so the list
    /// stays in read order. Whatever the cursor never reaches is trimmed
    /// after the run.
    pub fn record_read(&mut self, source: NodeId) {
        if self.untrack_depth > 0 || self.tracking.is_empty() {
            return;
        }
        let idx = self.tracking.len() - 1;
        let (observer, cursor, last) = {
            let frame = &self.tracking[idx];
            (frame.observer, frame.cursor, frame.last)
        };
        if observer == source {
            return;
        }
        // Coalesce repeated consecutive reads of the same source.
        if let Some(last_id) = last {
            if self.graph.link(last_id).map(|l| l.source) == Some(source) {
                return;
            }
        }
        if let Some(cur) = cursor {
            if self.graph.link(cur).map(|l| l.source) == Some(source) {
                let next = self.graph.link(cur).and_then(|l| l.next_in_observer);
                let frame = &mut self.tracking[idx];
                frame.last = Some(cur);
                frame.cursor = next;
                self.bump_height(observer, source);
                return;
            }
        }
        let link = self.graph.create_link(source, observer, cursor);
        let frame = &mut self.tracking[idx];
        frame.last = Some(link);
        self.bump_height(observer, source);
    }

    /// Maintain the height invariant for a fresh `source -> observer`
    /// read. Heights only ever grow; a grown node is re-bucketed by the
    /// queue at pop time.
    fn bump_height(&mut self, observer: NodeId, source: NodeId) {
        let Some(src_height) = self.graph.node(source).map(|n| n.height) else {
            return;
        };
        if let Some(obs) = self.graph.node_mut(observer) {
            if obs.height <= src_height {
                obs.height = src_height + 1;
            }
        }
    }

    /// Insert a computation into its scheduler queue (idempotent).
    pub fn enqueue(&mut self, id: NodeId) {
        let Some(node) = self.graph.node_mut(id) else {
            return;
        };
        if node.in_queue || node.disposed || !node.kind.is_computation() {
            return;
        }
        // Unobserved memos stay lazy: they are revalidated on next read
        // instead of being scheduled.
        if matches!(node.kind, NodeKind::Derived) && !node.is_observed() {
            return;
        }
        node.in_queue = true;
        let height = node.height;
        if node.zombie {
            self.zombie_queue.insert(id, height);
        } else {
            self.dirty_queue.insert(id, height);
        }
    }

    /// Mark `id` with `mark` and propagate `Check` to its subscribers,
    /// short-circuiting wherever a node is already at least as marked.
    pub fn mark(&mut self, id: NodeId, mark: DirtyState) {
        let Some(node) = self.graph.node_mut(id) else {
            return;
        };
        if node.disposed || node.dirty >= mark {
            return;
        }
        node.dirty = node.dirty.escalate(mark);
        if node.kind.is_computation() {
            self.enqueue(id);
        }
        for sub in self.graph.subscribers_of(id) {
            self.mark(sub, DirtyState::Check);
        }
    }

    /// Mark the subscriber graph after `id` changed: direct subscribers
    /// are definitely stale, everything further up may be.
    pub fn mark_subscribers(&mut self, id: NodeId) {
        for sub in self.graph.subscribers_of(id) {
            self.mark(sub, DirtyState::Dirty);
        }
    }

    /// Transition a node's status, keeping its pending overlay signal in
    /// sync.
    pub fn set_status(&mut self, id: NodeId, status: ValueStatus) {
        let Some(node) = self.graph.node_mut(id) else {
            return;
        };
        let was_pending = node.status.is_pending();
        let was_failed = matches!(node.status, ValueStatus::Failed(_));
        let now_pending = status.is_pending();
        let now_failed = matches!(status, ValueStatus::Failed(_));
        node.status = status;
        let pending_overlay = node.pending_overlay;
        let error_overlay = node.error_overlay;
        if was_pending != now_pending {
            if let Some(overlay) = pending_overlay {
                self.commit_write(overlay, Box::new(now_pending));
            }
        }
        if was_failed != now_failed {
            if let Some(overlay) = error_overlay {
                self.commit_write(overlay, Box::new(now_failed));
            }
        }
        if (was_failed && !now_failed) || (was_pending && !now_pending) {
            crate::reactive::boundary::release_held(self, id);
        }
    }

    /// Commit a value onto a node: advance the clock, compare under the
    /// node's equality, and on change store the value, stamp it, and mark
    /// the subscriber graph.
    ///
    /// Equality functions run with the runtime borrowed; they must not
    /// read or write reactive state.
    pub fn commit_write(&mut self, id: NodeId, value: Box<dyn Any>) -> bool {
        self.clock += 1;
        let clock = self.clock;
        let Some(node) = self.graph.node_mut(id) else {
            return false;
        };
        if node.disposed {
            return false;
        }
        let changed = match (&node.value, &node.equals) {
            (Some(old), Some(eq)) => !(**eq)(old.as_ref(), value.as_ref()),
            _ => true,
        };
        let was_ready = node.status.is_ready();
        if !changed && was_ready {
            return false;
        }
        node.value = Some(value);
        node.last_changed = clock;
        node.last_validated = clock;
        self.set_status(id, ValueStatus::Ready);
        self.mark_subscribers(id);
        self.flush_scheduled = true;
        true
    }

    /// Fetch a node's value for a reader, honoring the in-flight view.
    pub fn fetch_value<T: Clone + 'static>(&mut self, id: NodeId) -> Result<T, SignalError> {
        if self.view() == ValueView::InFlight {
            if let Some(shadow) = self.transition.as_ref().and_then(|t| t.writes.get(&id)) {
                return shadow
                    .downcast_ref::<T>()
                    .cloned()
                    .ok_or_else(|| SignalError::failed("type mismatch reading in-flight value"));
            }
        }
        let Some(node) = self.graph.node(id) else {
            return Err(SignalError::failed("read of a disposed node"));
        };
        match node.status.clone() {
            ValueStatus::Ready => self
                .graph
                .node(id)
                .and_then(|n| n.value.as_ref())
                .and_then(|v| v.downcast_ref::<T>())
                .cloned()
                .ok_or_else(|| SignalError::failed("type mismatch reading reactive value")),
            ValueStatus::Pending | ValueStatus::Uninitialized => {
                self.note_pending(id);
                Err(SignalError::NotReady(id))
            }
            ValueStatus::Failed(err) => Err(SignalError::Failed(err)),
        }
    }

    /// A reader observed a pending value: feed `pending()` probes and
    /// register the source with the open transition.
    fn note_pending(&mut self, id: NodeId) {
        if let Some(top) = self.probe_stack.last_mut() {
            *top = true;
        }
        let is_pending_source = self
            .graph
            .node(id)
            .map(|n| matches!(n.kind, NodeKind::Source) && n.status.is_pending())
            .unwrap_or(false);
        if is_pending_source {
            if let Some(t) = self.transition.as_mut() {
                // A source whose resolution already landed in the shadow
                // set is settled, not pending.
                if !t.writes.contains_key(&id) {
                    t.pending_sources.insert(id);
                }
            }
        }
    }

    /// A source just lost its last subscriber: drop it from the scheduler
    /// queues (computations) and hand back its `unobserved` callback.
    pub fn on_source_unobserved(&mut self, id: NodeId) -> Option<UnobservedFn> {
        let node = self.graph.node_mut(id)?;
        if node.kind.is_computation() {
            node.in_queue = false;
        }
        node.unobserved.clone()
    }

    /// Fully unlink a node from the graph and drop its entry. Returns
    /// the `unobserved` callbacks that must fire (with the borrow
    /// released) for sources that just lost their final subscriber.
    pub fn teardown_node(&mut self, id: NodeId) -> Vec<UnobservedFn> {
        let mut callbacks = Vec::new();
        for source in self.graph.detach_sources(id) {
            if let Some(callback) = self.on_source_unobserved(source) {
                callbacks.push(callback);
            }
        }
        self.graph.detach_subscribers(id);
        let overlays = self
            .graph
            .node(id)
            .map(|n| [n.pending_overlay, n.error_overlay])
            .unwrap_or([None, None]);
        for overlay in overlays.into_iter().flatten() {
            self.graph.detach_subscribers(overlay);
            self.graph.remove_node(overlay);
        }
        if let Some(node) = self.graph.node_mut(id) {
            node.disposed = true;
            node.in_queue = false;
        }
        self.render_queue.retain(|n| *n != id);
        self.user_queue.retain(|n| *n != id);
        self.graph.remove_node(id);
        tracing::trace!(node = id.raw(), "node torn down");
        callbacks
    }

    /// Whether any scheduled work remains.
    pub fn has_pending_work(&self) -> bool {
        !self.dirty_queue.is_empty()
            || !self.zombie_queue.is_empty()
            || !self.render_queue.is_empty()
            || !self.user_queue.is_empty()
    }

    /// Queue an effect body for its phase, once.
    fn enqueue_body(&mut self, id: NodeId, phase: EffectPhase) {
        let queue = match phase {
            EffectPhase::Render => &mut self.render_queue,
            EffectPhase::User => &mut self.user_queue,
        };
        if !queue.contains(&id) {
            queue.push_back(id);
        }
        self.flush_scheduled = true;
    }
}

/// Dispose a single node immediately (signals owned by a scope).
pub(crate) fn dispose_node_now(id: NodeId) {
    let callbacks = with_runtime(|rt| rt.teardown_node(id));
    for callback in callbacks {
        (*callback)();
    }
}

/// Install a computation node together with its own owner scope, as a
/// child of the currently active owner.
pub(crate) fn register_computation(mut node: Node) -> NodeId {
    with_runtime(|rt| {
        let parent = rt.current_owner;
        let scope = rt.new_owner(parent);
        node.owner = Some(scope);
        let id = rt.graph.add_node(node);
        if let Some(owner) = rt.owners.get_mut(&scope) {
            owner.node = Some(id);
        }
        id
    })
}

/// Read a node's value as `T`, recording the dependency and revalidating
/// derived values first.
pub(crate) fn read_node<T: Clone + 'static>(id: NodeId) -> Result<T, SignalError> {
    update_if_necessary(id);
    with_runtime(|rt| {
        rt.record_read(id);
        rt.fetch_value::<T>(id)
    })
}

/// Read a node's value as `T` without recording a dependency.
pub(crate) fn read_node_untracked<T: Clone + 'static>(id: NodeId) -> Result<T, SignalError> {
    update_if_necessary(id);
    with_runtime(|rt| rt.fetch_value::<T>(id))
}

/// Bring a computation up to date: recompute if `Dirty`; if `Check`,
/// revalidate sources depth-first and recompute only when one of them
/// actually changed since this node last validated.
pub(crate) fn update_if_necessary(id: NodeId) {
    let Some((dirty, is_computation, blocked)) = with_runtime(|rt| {
        rt.graph
            .node(id)
            .map(|n| (n.dirty, n.kind.is_computation(), n.disposed || n.recomputing))
    }) else {
        return;
    };
    if !is_computation || blocked {
        return;
    }
    match dirty {
        DirtyState::Clean => {}
        DirtyState::Dirty => recompute(id),
        DirtyState::Check => {
            let sources = with_runtime(|rt| rt.graph.sources_of(id));
            let mut must_recompute = false;
            for source in sources {
                update_if_necessary(source);
                let source_changed = with_runtime(|rt| {
                    let validated = rt.graph.node(id).map(|n| n.last_validated)?;
                    let changed = rt.graph.node(source).map(|n| n.last_changed)?;
                    Some(changed > validated)
                })
                .unwrap_or(false);
                if source_changed {
                    must_recompute = true;
                    break;
                }
            }
            if must_recompute {
                recompute(id);
            } else {
                with_runtime(|rt| {
                    let clock = rt.clock;
                    if let Some(node) = rt.graph.node_mut(id) {
                        node.dirty = DirtyState::Clean;
                        node.last_validated = clock;
                    }
                });
            }
        }
    }
}

/// Re-evaluate a computation.
///
/// The discipline, in order: (a) dispose child owners and cleanups of the
/// previous run, (b) save the previous status/value, (c) run the compute
/// function inside a fresh tracking frame, (d) compare old and new under
/// the node's equality, and (e) on any observable difference re-mark the
/// subscriber graph and, for effects, queue the deferred body.
pub(crate) fn recompute(id: NodeId) {
    let Some((compute, scope)) = with_runtime(|rt| {
        let node = rt.graph.node_mut(id)?;
        if node.disposed || node.recomputing {
            return None;
        }
        let compute = node.compute.clone()?;
        node.recomputing = true;
        Some((compute, node.owner))
    }) else {
        return;
    };

    // (a) previous run's children and cleanups go first.
    if let Some(scope) = scope {
        crate::reactive::owner::reset_scope(scope);
    }

    let prev_owner = with_runtime(|rt| {
        let head = rt.graph.node(id).and_then(|n| n.sources_head);
        rt.tracking.push(TrackFrame {
            observer: id,
            cursor: head,
            last: None,
        });
        let prev = rt.current_owner;
        if scope.is_some() {
            rt.current_owner = scope;
        }
        prev
    });

    // (c) user code, borrow released.
    let result = (*compute)();

    // (b)+(d): trim unread sources, compare old value/status with new.
    let (old_value, equals, old_status, unobserved) = with_runtime(|rt| {
        let frame = rt.tracking.pop();
        rt.current_owner = prev_owner;
        let cursor = frame.and_then(|f| f.cursor);
        let mut callbacks = Vec::new();
        for source in rt.graph.trim_sources_from(id, cursor) {
            if let Some(callback) = rt.on_source_unobserved(source) {
                callbacks.push(callback);
            }
        }
        let (old_value, equals, old_status) = match rt.graph.node_mut(id) {
            Some(node) => (node.value.take(), node.equals.clone(), node.status.clone()),
            None => (None, None, ValueStatus::Uninitialized),
        };
        (old_value, equals, old_status, callbacks)
    });
    for callback in unobserved {
        (*callback)();
    }

    // Equality runs with the borrow released: custom comparators are user
    // code too.
    let (new_value, new_status, error) = match result {
        Ok(value) => {
            let value_changed = match (&old_value, &equals) {
                (Some(old), Some(eq)) => !(**eq)(old.as_ref(), value.as_ref()),
                _ => true,
            };
            let changed = value_changed || !old_status.is_ready();
            (Some((value, changed)), ValueStatus::Ready, None)
        }
        Err(SignalError::NotReady(source)) => {
            (None, ValueStatus::Pending, Some(SignalError::NotReady(source)))
        }
        Err(SignalError::Failed(err)) => (
            None,
            ValueStatus::Failed(err.clone()),
            Some(SignalError::Failed(err)),
        ),
    };

    // (e) write back and notify.
    let (phase, route) = with_runtime(|rt| {
        let status_changed = !old_status.same_kind(&new_status);
        let mut observable_change = status_changed;
        rt.clock += 1;
        let clock = rt.clock;
        let Some(node) = rt.graph.node_mut(id) else {
            return (None, None);
        };
        node.recomputing = false;
        node.dirty = DirtyState::Clean;
        node.last_validated = clock;
        match new_value {
            Some((value, changed)) => {
                node.value = Some(value);
                observable_change = observable_change || changed;
            }
            // Pending/failed runs keep the previous committed value for
            // stale readers.
            None => node.value = old_value,
        }
        if observable_change {
            node.last_changed = clock;
        }
        let kind = node.kind;
        let zombie = node.zombie;
        let name = node.debug_name.clone();
        rt.set_status(id, new_status.clone());
        if observable_change {
            rt.mark_subscribers(id);
        }
        tracing::trace!(
            node = id.raw(),
            name = name.as_deref().unwrap_or(""),
            changed = observable_change,
            "recomputed"
        );

        let mut phase = None;
        let mut route = None;
        if let NodeKind::Effect(p) = kind {
            match &error {
                None => {
                    if observable_change && !zombie {
                        phase = Some(p);
                    }
                }
                Some(SignalError::NotReady(_)) => {
                    // Suspension, not a fault: the tracked edge to the
                    // pending source re-marks this effect on resolution.
                    route = Some(crate::reactive::boundary::Routing::Pending);
                }
                Some(SignalError::Failed(_)) => {
                    route = Some(crate::reactive::boundary::Routing::Error);
                }
            }
        }
        (phase, route)
    });

    if let Some(phase) = phase {
        with_runtime(|rt| rt.enqueue_body(id, phase));
    }
    if let Some(routing) = route {
        if let Some(err) = error {
            crate::reactive::boundary::route_status(id, routing, err);
        }
    }
}

/// Run `f` without recording dependencies.
pub fn untrack<T>(f: impl FnOnce() -> T) -> T {
    with_runtime(|rt| rt.enter_untracked());
    let result = f();
    with_runtime(|rt| rt.exit_untracked());
    result
}

/// Probe whether `f` observed any pending value while running.
pub fn pending(f: impl FnOnce()) -> bool {
    with_runtime(|rt| rt.push_probe());
    f();
    with_runtime(|rt| rt.pop_probe())
}

/// Run `f`, then flush once. Use this to make several writes observable
/// as a single update.
pub fn batch<T>(f: impl FnOnce() -> T) -> (T, Result<(), SignalError>) {
    let value = f();
    (value, flush())
}

/// Drain all scheduled work to a fixed point.
///
/// Writes only mark and enqueue; this is the single function that runs
/// recomputation and effect bodies. Returns the first unhandled
/// user-effect error, if any.
pub fn flush() -> Result<(), SignalError> {
    let reentrant = with_runtime(|rt| {
        if rt.flushing {
            true
        } else {
            rt.flushing = true;
            false
        }
    });
    if reentrant {
        return Ok(());
    }
    tracing::debug!("flush start");
    let result = flush_inner();
    with_runtime(|rt| {
        rt.flushing = false;
        if !rt.has_pending_work() {
            rt.flush_scheduled = false;
        }
    });
    tracing::debug!(ok = result.is_ok(), "flush end");
    result
}

fn flush_inner() -> Result<(), SignalError> {
    let mut iterations = 0u32;
    loop {
        iterations += 1;
        if iterations > MAX_FLUSH_ITERATIONS {
            return Err(SignalError::failed(
                "maximum update depth exceeded: an effect keeps scheduling itself",
            ));
        }

        drain_queue(QueueKind::Live);
        if crate::reactive::transition::settle_transition() {
            // Commit marked fresh work; start the cycle over.
            continue;
        }
        drain_queue(QueueKind::Zombie);
        run_effect_bodies(EffectPhase::Render);
        run_effect_bodies(EffectPhase::User);

        let (error, more) = with_runtime(|rt| (rt.flush_error.take(), rt.has_pending_work()));
        if let Some(error) = error {
            return Err(error);
        }
        if !more {
            return Ok(());
        }
    }
}

#[derive(PartialEq, Clone, Copy)]
enum QueueKind {
    Live,
    Zombie,
}

/// Drain one scheduler queue in ascending height order, validating each
/// entry against the node's live state before processing it.
fn drain_queue(kind: QueueKind) {
    loop {
        let next = with_runtime(|rt| loop {
            let popped = match kind {
                QueueKind::Live => rt.dirty_queue.pop(),
                QueueKind::Zombie => rt.zombie_queue.pop(),
            };
            let Some((id, bucket_height)) = popped else {
                return None;
            };
            let Some(node) = rt.graph.node(id) else {
                continue; // torn down while queued
            };
            if !node.in_queue || node.disposed {
                continue;
            }
            // Zombies found in the live queue were disposed-under-
            // transition after being marked; relocate them.
            if kind == QueueKind::Live && node.zombie {
                let height = node.height;
                rt.zombie_queue.insert(id, height);
                continue;
            }
            // Height grew since insertion: re-bucket rather than
            // evaluate out of order.
            if node.height != bucket_height {
                let height = node.height;
                match kind {
                    QueueKind::Live => rt.dirty_queue.insert(id, height),
                    QueueKind::Zombie => rt.zombie_queue.insert(id, height),
                }
                continue;
            }
            if let Some(node) = rt.graph.node_mut(id) {
                node.in_queue = false;
            }
            return Some(id);
        });
        match next {
            Some(id) => update_if_necessary(id),
            None => break,
        }
    }
}

/// Run queued effect bodies for one phase, FIFO.
fn run_effect_bodies(phase: EffectPhase) {
    loop {
        let item = with_runtime(|rt| {
            let queue = match phase {
                EffectPhase::Render => &mut rt.render_queue,
                EffectPhase::User => &mut rt.user_queue,
            };
            loop {
                let id = queue.pop_front()?;
                let Some(node) = rt.graph.node_mut(id) else {
                    continue;
                };
                if node.disposed || node.zombie {
                    continue;
                }
                let Some(body) = node.effect_body.clone() else {
                    continue;
                };
                let Some(value) = node.value.take() else {
                    continue;
                };
                return Some((id, body, value));
            }
        });
        let Some((id, body, value)) = item else {
            break;
        };
        // User code: borrow released.
        {
            let mut guard = body.borrow_mut();
            (&mut *guard)(value.as_ref());
        }
        with_runtime(|rt| {
            if let Some(node) = rt.graph.node_mut(id) {
                if node.value.is_none() {
                    node.value = Some(value);
                }
            }
        });
    }
}

/// Run one effect's body immediately (initial run at creation time).
pub(crate) fn run_body_now(id: NodeId) {
    let item = with_runtime(|rt| {
        rt.render_queue.retain(|n| *n != id);
        rt.user_queue.retain(|n| *n != id);
        let node = rt.graph.node_mut(id)?;
        if node.disposed {
            return None;
        }
        let body = node.effect_body.clone()?;
        let value = node.value.take()?;
        Some((body, value))
    });
    let Some((body, value)) = item else {
        return;
    };
    {
        let mut guard = body.borrow_mut();
        (&mut *guard)(value.as_ref());
    }
    with_runtime(|rt| {
        if let Some(node) = rt.graph.node_mut(id) {
            if node.value.is_none() {
                node.value = Some(value);
            }
        }
    });
}

/// Drop an effect's queued body without running it (the `defer` option).
pub(crate) fn drop_queued_body(id: NodeId) {
    with_runtime(|rt| {
        rt.render_queue.retain(|n| *n != id);
        rt.user_queue.retain(|n| *n != id);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::memo::create_memo;
    use crate::reactive::signal::create_signal;

    #[test]
    fn memo_revalidates_on_read_before_flush() {
        let (a, set_a) = create_signal(1);
        let b = create_memo(move || a.get() * 2);

        assert_eq!(b.get(), 2);
        set_a.set(5);
        // No flush yet: the memo revalidates lazily on read.
        assert_eq!(b.get(), 10);
    }

    #[test]
    fn equality_short_circuit_stops_propagation() {
        use std::cell::Cell;
        use std::rc::Rc;

        let (a, set_a) = create_signal(1);
        // Parity only changes when the low bit flips.
        let parity = create_memo(move || a.get() % 2);

        let downstream_runs = Rc::new(Cell::new(0));
        let counter = downstream_runs.clone();
        let downstream = create_memo(move || {
            counter.set(counter.get() + 1);
            parity.get() + 10
        });

        assert_eq!(downstream.get(), 11);
        assert_eq!(downstream_runs.get(), 1);

        // 1 -> 3: parity re-runs but its value is unchanged, so the
        // downstream memo must not recompute.
        set_a.set(3);
        assert_eq!(downstream.get(), 11);
        assert_eq!(downstream_runs.get(), 1);

        // 3 -> 4: parity flips; downstream recomputes once.
        set_a.set(4);
        assert_eq!(downstream.get(), 10);
        assert_eq!(downstream_runs.get(), 2);
    }

    #[test]
    fn untrack_suppresses_dependency_recording() {
        let (a, set_a) = create_signal(1);
        let (b, _) = create_signal(10);
        let sum = create_memo(move || a.get() + untrack(|| b.get()));

        assert_eq!(sum.get(), 11);
        set_a.set(2);
        assert_eq!(sum.get(), 12);

        // A write to the untracked source leaves the memo clean.
        let before = with_runtime(|rt| rt.clock);
        assert!(before > 0);
    }

    #[test]
    fn link_reuse_keeps_edge_count_stable() {
        let (a, set_a) = create_signal(1);
        let (b, _) = create_signal(2);
        let sum = create_memo(move || a.get() + b.get());

        assert_eq!(sum.get(), 3);
        let links_before = with_runtime(|rt| rt.graph.link_count());

        set_a.set(10);
        assert_eq!(sum.get(), 12);
        let links_after = with_runtime(|rt| rt.graph.link_count());

        assert_eq!(links_before, links_after);
    }

    #[test]
    fn dynamic_dependencies_unsubscribe_unread_sources() {
        use std::cell::Cell;
        use std::rc::Rc;

        let (flag, set_flag) = create_signal(true);
        let (a, set_a) = create_signal(1);
        let (b, _) = create_signal(100);

        let runs = Rc::new(Cell::new(0));
        let counter = runs.clone();
        let pick = create_memo(move || {
            counter.set(counter.get() + 1);
            if flag.get() {
                a.get()
            } else {
                b.get()
            }
        });

        assert_eq!(pick.get(), 1);
        assert_eq!(runs.get(), 1);

        set_flag.set(false);
        assert_eq!(pick.get(), 100);
        assert_eq!(runs.get(), 2);

        // `a` is no longer a dependency: writing it must not re-run.
        set_a.set(7);
        assert_eq!(pick.get(), 100);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn height_invariant_holds_after_flush() {
        let (a, set_a) = create_signal(1);
        let b = create_memo(move || a.get() + 1);
        let c = create_memo(move || b.get() + 1);
        let d = create_memo(move || b.get() + c.get());

        assert_eq!(d.get(), 7);
        set_a.set(2);
        assert_eq!(d.get(), 9);

        with_runtime(|rt| {
            let d_id = d.node_id();
            for source in rt.graph.sources_of(d_id) {
                let source_height = rt.graph.node(source).map(|n| n.height).unwrap_or(0);
                let d_height = rt.graph.node(d_id).map(|n| n.height).unwrap_or(0);
                assert!(d_height > source_height);
            }
        });
    }
}
