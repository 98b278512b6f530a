//! Graph Links
//!
//! A Link is the bidirectional edge object connecting one source node to
//! one observing computation. Every link is a member of two doubly linked
//! lists at once: the source's subscriber list and the observer's source
//! list. Double linking means either endpoint can remove the edge in O(1)
//! without scanning a list.
//!
//! Links are reused across re-evaluations: when a computation re-runs and
//! reads the same source again in the same relative order, the existing
//! link is kept instead of being freed and reallocated.

use std::sync::atomic::{AtomicU64, Ordering};

use super::node::NodeId;

/// Unique identifier for a link in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkId(u64);

impl LinkId {
    /// Generate a new unique link ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for LinkId {
    fn default() -> Self {
        Self::new()
    }
}

/// An edge `source -> observer` in the dependency graph.
///
/// The four neighbor pointers place the link in both endpoint lists:
/// `prev_in_source`/`next_in_source` walk the source's subscriber list,
/// `prev_in_observer`/`next_in_observer` walk the observer's source list.
#[derive(Debug)]
pub struct Link {
    /// The node being observed.
    pub source: NodeId,

    /// The computation observing it.
    pub observer: NodeId,

    /// Previous link in `source`'s subscriber list.
    pub prev_in_source: Option<LinkId>,

    /// Next link in `source`'s subscriber list.
    pub next_in_source: Option<LinkId>,

    /// Previous link in `observer`'s source list.
    pub prev_in_observer: Option<LinkId>,

    /// Next link in `observer`'s source list.
    pub next_in_observer: Option<LinkId>,
}

impl Link {
    /// Create a detached link between the given endpoints.
    ///
    /// The neighbor pointers start empty; the graph wires them up when the
    /// link is spliced into the two endpoint lists.
    pub fn new(source: NodeId, observer: NodeId) -> Self {
        Self {
            source,
            observer,
            prev_in_source: None,
            next_in_source: None,
            prev_in_observer: None,
            next_in_observer: None,
        }
    }
}
