//! Dependency Graph
//!
//! This module owns the side tables for nodes and links and performs all
//! edge-list surgery. Nodes and links are addressed by stable IDs; the
//! cyclic-looking doubly linked lists of the reactive graph are stored as
//! ID pairs in these tables, so there is no pointer lifetime management
//! while edge insertion and removal stay O(1).

pub mod link;
pub mod node;
pub mod queue;

use std::collections::HashMap;

use link::{Link, LinkId};
use node::{Node, NodeId};

/// The dependency graph: all nodes and the links between them.
#[derive(Default)]
pub struct Graph {
    /// All nodes, indexed by ID.
    nodes: HashMap<NodeId, Node>,

    /// All links, indexed by ID.
    links: HashMap<LinkId, Link>,
}

impl Graph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node to the graph, returning its ID.
    pub fn add_node(&mut self, node: Node) -> NodeId {
        let id = node.id;
        self.nodes.insert(id, node);
        id
    }

    /// Get a reference to a node.
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Get a mutable reference to a node.
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    /// Remove a node's entry. The caller must have detached its edges
    /// first; see [`Graph::detach_sources`] and
    /// [`Graph::detach_subscribers`].
    pub fn remove_node(&mut self, id: NodeId) -> Option<Node> {
        self.nodes.remove(&id)
    }

    /// Get a reference to a link.
    pub fn link(&self, id: LinkId) -> Option<&Link> {
        self.links.get(&id)
    }

    /// Total number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Total number of links.
    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Create a link `source -> observer`.
    ///
    /// The link is appended to the tail of `source`'s subscriber list and
    /// spliced into `observer`'s source list immediately before `before`
    /// (or at the tail when `before` is `None`). Splicing before the
    /// re-evaluation cursor is what keeps the source list in read order
    /// when a new dependency shows up mid-list.
    pub fn create_link(
        &mut self,
        source: NodeId,
        observer: NodeId,
        before: Option<LinkId>,
    ) -> LinkId {
        let id = LinkId::new();
        let mut link = Link::new(source, observer);

        // Position in the observer's source list.
        match before {
            Some(next) => {
                link.next_in_observer = Some(next);
                link.prev_in_observer = self.links.get(&next).and_then(|l| l.prev_in_observer);
            }
            None => {
                link.prev_in_observer = self.nodes.get(&observer).and_then(|n| n.sources_tail);
            }
        }

        // Position at the tail of the source's subscriber list.
        link.prev_in_source = self.nodes.get(&source).and_then(|n| n.subscribers_tail);

        let (prev_obs, next_obs, prev_src) = (
            link.prev_in_observer,
            link.next_in_observer,
            link.prev_in_source,
        );
        self.links.insert(id, link);

        // Wire up the observer's source list.
        match prev_obs {
            Some(prev) => {
                if let Some(l) = self.links.get_mut(&prev) {
                    l.next_in_observer = Some(id);
                }
            }
            None => {
                if let Some(n) = self.nodes.get_mut(&observer) {
                    n.sources_head = Some(id);
                }
            }
        }
        match next_obs {
            Some(next) => {
                if let Some(l) = self.links.get_mut(&next) {
                    l.prev_in_observer = Some(id);
                }
            }
            None => {
                if let Some(n) = self.nodes.get_mut(&observer) {
                    n.sources_tail = Some(id);
                }
            }
        }

        // Wire up the source's subscriber list.
        match prev_src {
            Some(prev) => {
                if let Some(l) = self.links.get_mut(&prev) {
                    l.next_in_source = Some(id);
                }
            }
            None => {
                if let Some(n) = self.nodes.get_mut(&source) {
                    n.subscribers_head = Some(id);
                }
            }
        }
        if let Some(n) = self.nodes.get_mut(&source) {
            n.subscribers_tail = Some(id);
        }

        id
    }

    /// Remove a link from both endpoint lists.
    ///
    /// Returns `(source, observer, source_now_unobserved)`; the last flag
    /// is true when the source just lost its final subscriber, so the
    /// caller can fire its `unobserved` callback.
    pub fn unlink(&mut self, id: LinkId) -> Option<(NodeId, NodeId, bool)> {
        let link = self.links.remove(&id)?;

        // Splice out of the source's subscriber list.
        match link.prev_in_source {
            Some(prev) => {
                if let Some(l) = self.links.get_mut(&prev) {
                    l.next_in_source = link.next_in_source;
                }
            }
            None => {
                if let Some(n) = self.nodes.get_mut(&link.source) {
                    n.subscribers_head = link.next_in_source;
                }
            }
        }
        match link.next_in_source {
            Some(next) => {
                if let Some(l) = self.links.get_mut(&next) {
                    l.prev_in_source = link.prev_in_source;
                }
            }
            None => {
                if let Some(n) = self.nodes.get_mut(&link.source) {
                    n.subscribers_tail = link.prev_in_source;
                }
            }
        }

        // Splice out of the observer's source list.
        match link.prev_in_observer {
            Some(prev) => {
                if let Some(l) = self.links.get_mut(&prev) {
                    l.next_in_observer = link.next_in_observer;
                }
            }
            None => {
                if let Some(n) = self.nodes.get_mut(&link.observer) {
                    n.sources_head = link.next_in_observer;
                }
            }
        }
        match link.next_in_observer {
            Some(next) => {
                if let Some(l) = self.links.get_mut(&next) {
                    l.prev_in_observer = link.prev_in_observer;
                }
            }
            None => {
                if let Some(n) = self.nodes.get_mut(&link.observer) {
                    n.sources_tail = link.prev_in_observer;
                }
            }
        }

        let unobserved = self
            .nodes
            .get(&link.source)
            .map(|n| n.subscribers_head.is_none())
            .unwrap_or(false);
        Some((link.source, link.observer, unobserved))
    }

    /// Unlink every source link of `observer` starting at `from`
    /// (inclusive), i.e. the tail of sources that a re-evaluation did not
    /// read again. Returns the sources that became unobserved.
    pub fn trim_sources_from(&mut self, observer: NodeId, from: Option<LinkId>) -> Vec<NodeId> {
        let mut unobserved = Vec::new();
        let mut cursor = from;
        while let Some(id) = cursor {
            cursor = self.links.get(&id).and_then(|l| l.next_in_observer);
            // Guard against a stale cursor pointing at another observer.
            if self.links.get(&id).map(|l| l.observer) != Some(observer) {
                break;
            }
            if let Some((source, _, now_unobserved)) = self.unlink(id) {
                if now_unobserved {
                    unobserved.push(source);
                }
            }
        }
        unobserved
    }

    /// Unlink every source link of `observer`. Returns the sources that
    /// became unobserved.
    pub fn detach_sources(&mut self, observer: NodeId) -> Vec<NodeId> {
        let head = self.nodes.get(&observer).and_then(|n| n.sources_head);
        self.trim_sources_from(observer, head)
    }

    /// Unlink every subscriber link of `node`. Returns the observers that
    /// lost this source.
    pub fn detach_subscribers(&mut self, node: NodeId) -> Vec<NodeId> {
        let mut observers = Vec::new();
        let mut cursor = self.nodes.get(&node).and_then(|n| n.subscribers_head);
        while let Some(id) = cursor {
            cursor = self.links.get(&id).and_then(|l| l.next_in_source);
            if let Some((_, observer, _)) = self.unlink(id) {
                observers.push(observer);
            }
        }
        observers
    }

    /// Collect the observers of `node` in subscription order.
    pub fn subscribers_of(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut cursor = self.nodes.get(&node).and_then(|n| n.subscribers_head);
        while let Some(id) = cursor {
            if let Some(link) = self.links.get(&id) {
                out.push(link.observer);
                cursor = link.next_in_source;
            } else {
                break;
            }
        }
        out
    }

    /// Collect the sources of `node` in read order.
    pub fn sources_of(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut cursor = self.nodes.get(&node).and_then(|n| n.sources_head);
        while let Some(id) = cursor {
            if let Some(link) = self.links.get(&id) {
                out.push(link.source);
                cursor = link.next_in_observer;
            } else {
                break;
            }
        }
        out
    }
}
