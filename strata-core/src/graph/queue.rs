//! Height-Bucketed Scheduler Queue
//!
//! The scheduler visits dirty computations in topological order. Instead
//! of sorting, it exploits the height invariant: every observer is taller
//! than its sources, so draining an array of buckets indexed by height,
//! from 0 upward, visits each source before any of its observers.
//!
//! Membership is tracked on the node itself (the `in_queue` flag), which
//! makes insertion idempotent: marking an already-queued node is a no-op.
//! A node whose height grew while queued is *re-bucketed* at pop time
//! rather than evaluated in place, preserving the ordering guarantee.
//!
//! Two instances of this queue exist: one for live nodes and one for
//! zombie nodes (nodes kept alive under an in-flight transition while
//! their owner is being torn down).

use std::collections::VecDeque;

use super::node::NodeId;

/// A queue of node IDs bucketed by height, drained in ascending order.
#[derive(Debug, Default)]
pub struct HeightQueue {
    /// One FIFO bucket per height.
    buckets: Vec<VecDeque<NodeId>>,

    /// Number of entries across all buckets (including stale ones).
    len: usize,

    /// The lowest bucket that may still hold entries.
    cursor: usize,
}

impl HeightQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node at the given height.
    ///
    /// The caller is responsible for checking and setting the node's
    /// `in_queue` flag; the queue itself stores plain IDs.
    pub fn insert(&mut self, id: NodeId, height: u32) {
        let height = height as usize;
        if height >= self.buckets.len() {
            self.buckets.resize_with(height + 1, VecDeque::new);
        }
        self.buckets[height].push_back(id);
        self.len += 1;
        // Entries normally land at or above the cursor (observers are
        // taller than the node being processed), but walk back if not.
        if height < self.cursor {
            self.cursor = height;
        }
    }

    /// Pop the next entry in ascending height order.
    ///
    /// Returns the node and the height of the bucket it was taken from.
    /// The caller must discard entries whose node is no longer queued
    /// (flag cleared) and re-insert entries whose node height no longer
    /// matches the bucket.
    pub fn pop(&mut self) -> Option<(NodeId, u32)> {
        while self.cursor < self.buckets.len() {
            if let Some(id) = self.buckets[self.cursor].pop_front() {
                self.len -= 1;
                return Some((id, self.cursor as u32));
            }
            self.cursor += 1;
        }
        self.cursor = 0;
        None
    }

    /// Whether the queue holds any entries (stale ones included).
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of entries currently stored (stale ones included).
    pub fn len(&self) -> usize {
        self.len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_in_ascending_height_order() {
        let mut queue = HeightQueue::new();
        let a = NodeId::new();
        let b = NodeId::new();
        let c = NodeId::new();

        queue.insert(c, 5);
        queue.insert(a, 0);
        queue.insert(b, 2);

        assert_eq!(queue.pop(), Some((a, 0)));
        assert_eq!(queue.pop(), Some((b, 2)));
        assert_eq!(queue.pop(), Some((c, 5)));
        assert_eq!(queue.pop(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn fifo_within_a_bucket() {
        let mut queue = HeightQueue::new();
        let a = NodeId::new();
        let b = NodeId::new();

        queue.insert(a, 1);
        queue.insert(b, 1);

        assert_eq!(queue.pop(), Some((a, 1)));
        assert_eq!(queue.pop(), Some((b, 1)));
    }

    #[test]
    fn insert_below_cursor_is_still_found() {
        let mut queue = HeightQueue::new();
        let a = NodeId::new();
        let b = NodeId::new();

        queue.insert(a, 3);
        assert_eq!(queue.pop(), Some((a, 3)));

        // The cursor sits at height 3 now; a lower insert must rewind it.
        queue.insert(b, 1);
        assert_eq!(queue.pop(), Some((b, 1)));
    }

    #[test]
    fn cursor_resets_after_drain() {
        let mut queue = HeightQueue::new();
        let a = NodeId::new();

        queue.insert(a, 4);
        assert_eq!(queue.pop(), Some((a, 4)));
        assert_eq!(queue.pop(), None);

        let b = NodeId::new();
        queue.insert(b, 0);
        assert_eq!(queue.pop(), Some((b, 0)));
    }
}
