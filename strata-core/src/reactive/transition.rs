//! Transitions
//!
//! A transition batches writes that depend on asynchronous sources and
//! commits them atomically. While a transition is open, signal writes
//! performed inside it are captured as *shadow* values: normal readers
//! keep observing the previously committed values, and only when every
//! tracked asynchronous source has settled are the shadow values merged
//! into the live graph — marking all dependents dirty in one coordinated
//! batch.
//!
//! If the scope a transition belongs to is disposed before settlement,
//! the transition rolls back: its shadow writes are discarded wholesale,
//! so no dependent ever observes them. Computations that were disposed
//! mid-transition are parked as zombies and torn down at settlement.

use std::any::Any;
use std::collections::{HashMap, HashSet};

use crate::error::SignalError;
use crate::graph::node::NodeId;
use crate::reactive::owner::OwnerId;
use crate::reactive::runtime::{flush, with_runtime, ValueView};

/// State captured by an open transition.
pub(crate) struct Transition {
    /// Logical clock value at open time.
    pub generation: u64,

    /// The owner scope the transition belongs to. Disposing this scope
    /// (or an ancestor) rolls the transition back.
    pub scope: Option<OwnerId>,

    /// Asynchronous leaf sources that are still pending.
    pub pending_sources: HashSet<NodeId>,

    /// Shadow values, keyed by target node.
    pub writes: HashMap<NodeId, Box<dyn Any>>,

    /// Owner scopes whose teardown is deferred until settlement.
    pub zombie_owners: Vec<OwnerId>,
}

impl Transition {
    pub fn new(generation: u64, scope: Option<OwnerId>) -> Self {
        Self {
            generation,
            scope,
            pending_sources: HashSet::new(),
            writes: HashMap::new(),
            zombie_owners: Vec::new(),
        }
    }

    /// Whether the transition involves this node (as a pending source or
    /// a shadow-write target).
    pub fn touches_node(&self, id: NodeId) -> bool {
        self.pending_sources.contains(&id) || self.writes.contains_key(&id)
    }
}

/// Open (or join) the current generation's transition and run `f` inside
/// it. Signal writes inside `f` are captured as shadow values; the
/// returned flush attempts settlement.
pub fn start_transition(f: impl FnOnce()) -> Result<(), SignalError> {
    with_runtime(|rt| {
        if rt.transition.is_none() {
            let generation = rt.clock;
            let scope = rt.current_owner;
            tracing::debug!(generation, "transition opened");
            rt.transition = Some(Transition::new(generation, scope));
        }
        rt.transition_depth += 1;
    });
    f();
    with_runtime(|rt| rt.transition_depth -= 1);
    flush()
}

/// Whether a transition is currently open and unsettled.
pub fn transition_open() -> bool {
    with_runtime(|rt| rt.transition.is_some())
}

/// Run `f` observing the open transition's in-flight shadow values where
/// they exist (normal reads keep observing committed values).
pub fn in_flight<T>(f: impl FnOnce() -> T) -> T {
    with_runtime(|rt| rt.push_view(ValueView::InFlight));
    let result = f();
    with_runtime(|rt| rt.pop_view());
    result
}

/// Run `f` observing only committed values, even inside an [`in_flight`]
/// region. This is the default view; the explicit form exists so stale
/// reads survive being nested under an opted-in caller.
pub fn stale_values<T>(f: impl FnOnce() -> T) -> T {
    with_runtime(|rt| rt.push_view(ValueView::Committed));
    let result = f();
    with_runtime(|rt| rt.pop_view());
    result
}

/// Check the open transition for settlement; commit it when every tracked
/// asynchronous source has resolved. Returns whether a commit happened.
///
/// Called from the flush loop between the queue drain and the effect
/// phases. An unsettled transition parks its work and bumps the logical
/// clock, deferring completion to a later flush.
pub(crate) fn settle_transition() -> bool {
    let settled = with_runtime(|rt| {
        rt.transition.as_ref()?;
        let still_pending: Vec<NodeId> = {
            let t = rt.transition.as_ref().expect("transition checked above");
            t.pending_sources.iter().copied().collect()
        };
        let mut remaining = HashSet::new();
        for id in still_pending {
            let pending = rt
                .graph
                .node(id)
                .map(|n| n.status.is_pending())
                .unwrap_or(false);
            if pending {
                remaining.insert(id);
            }
        }
        let t = rt.transition.as_mut().expect("transition checked above");
        t.pending_sources = remaining;
        if t.pending_sources.is_empty() {
            let t = rt.transition.take().expect("transition checked above");
            Some(t)
        } else {
            // Park: completion is deferred to a later flush.
            rt.clock += 1;
            None
        }
    });

    let Some(transition) = settled else {
        return false;
    };

    tracing::debug!(
        generation = transition.generation,
        writes = transition.writes.len(),
        zombies = transition.zombie_owners.len(),
        "transition committed"
    );

    // Shadow values become real in one batch: each commit marks its
    // dependents dirty, and the flush loop re-drains afterwards.
    with_runtime(|rt| {
        for (id, value) in transition.writes {
            rt.commit_write(id, value);
        }
    });

    // Zombies parked during the transition are finally torn down.
    for owner in transition.zombie_owners {
        crate::reactive::owner::finish_one_owner(owner, false);
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::memo::create_memo;
    use crate::reactive::signal::{create_async_signal, create_signal};

    #[test]
    fn writes_inside_a_transition_stay_shadowed_until_settled() {
        let (pending_src, resolver) = create_async_signal::<i32>();
        let (a, set_a) = create_signal(1);
        let doubled = create_memo(move || a.get() * 2);
        assert_eq!(doubled.get(), 2);

        start_transition(|| {
            // Touch the pending source so the transition tracks it.
            assert!(pending_src.try_get().is_err());
            set_a.set(10);
        })
        .unwrap();

        // The async source has not resolved: committed values still rule.
        assert_eq!(a.get(), 1);
        assert_eq!(doubled.get(), 2);
        assert!(transition_open());

        // Opting in shows the in-flight value.
        assert_eq!(in_flight(|| a.get()), 10);
        assert_eq!(stale_values(|| a.get()), 1);

        resolver.resolve(7).unwrap();

        assert!(!transition_open());
        assert_eq!(a.get(), 10);
        assert_eq!(doubled.get(), 20);
        assert_eq!(pending_src.get(), 7);
    }

    #[test]
    fn stale_values_wins_inside_in_flight() {
        let (pending_src, _resolver) = create_async_signal::<i32>();
        let (a, set_a) = create_signal(1);

        start_transition(|| {
            assert!(pending_src.try_get().is_err());
            set_a.set(5);
        })
        .unwrap();

        let observed = in_flight(|| stale_values(|| a.get()));
        assert_eq!(observed, 1);
    }

    #[test]
    fn transition_without_pending_sources_commits_on_flush() {
        let (a, set_a) = create_signal(1);

        start_transition(|| {
            set_a.set(3);
        })
        .unwrap();

        assert!(!transition_open());
        assert_eq!(a.get(), 3);
    }
}
