//! Store / Structural Proxy Layer
//!
//! A store exposes plain nested data (`serde_json::Value`) as reactive
//! state. Internally the data lives in a tree of entries; each entry
//! lazily grows a per-property value signal on first observed read (and
//! drops it again, through the `unobserved` hook, when the last
//! subscriber leaves), and each container keeps a structural version that
//! fires on added/removed keys and length changes, propagating a deep
//! invalidation up through parent back-references.
//!
//! Writes go through [`reconcile`](StoreSetter::reconcile): a pure diff
//! computes the minimal patch list and the store writes exactly the
//! per-property signals whose effective value changed. Keyed array
//! reconciliation moves an entry (and its signals) to its new index
//! without recreating it.

pub mod reconcile;

use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

use crate::error::SignalError;
use crate::graph::node::{Node, NodeId};
use crate::reactive::owner::on_cleanup;
use crate::reactive::runtime::{dispose_node_now, with_runtime, Runtime};
use crate::reactive::signal::erase_equals;

pub use reconcile::{KeySelector, ReconcileOptions};
use reconcile::{diff, Patch, PatchOp, Slot};

/// Unique identifier for a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StoreId(u64);

impl StoreId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// One step into nested data: an object key or an array index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSeg {
    /// Object property.
    Key(String),

    /// Array element.
    Index(usize),
}

/// A path into a store's nested data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorePath {
    pub(crate) segments: Vec<PathSeg>,
}

impl StorePath {
    /// The root of the store.
    pub fn root() -> Self {
        Self::default()
    }

    /// Extend the path with an object key.
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.segments.push(PathSeg::Key(key.into()));
        self
    }

    /// Extend the path with an array index.
    pub fn index(mut self, index: usize) -> Self {
        self.segments.push(PathSeg::Index(index));
        self
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Whether this is the root path.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

/// The shape of one entry in the store tree.
pub(crate) enum EntryKind {
    Leaf(Value),
    Object(IndexMap<String, usize>),
    Array(Vec<usize>),
}

/// A node of the store tree.
pub(crate) struct StoreEntry {
    pub kind: EntryKind,
    pub parent: Option<usize>,

    /// Per-property value signal (leaves), created on first observed read.
    pub value_signal: Option<NodeId>,

    /// Structural signal (containers): fires on key/length changes.
    pub structure_signal: Option<NodeId>,

    /// Deep signal: fires on any structural change in the subtree.
    pub deep_signal: Option<NodeId>,

    pub structure_version: u64,
    pub deep_version: u64,
}

impl StoreEntry {
    fn new(kind: EntryKind, parent: Option<usize>) -> Self {
        Self {
            kind,
            parent,
            value_signal: None,
            structure_signal: None,
            deep_signal: None,
            structure_version: 0,
            deep_version: 0,
        }
    }
}

/// All state of one store.
pub(crate) struct StoreData {
    pub entries: Vec<Option<StoreEntry>>,
    pub free: Vec<usize>,
    pub root: usize,
}

impl StoreData {
    fn alloc(&mut self, entry: StoreEntry) -> usize {
        match self.free.pop() {
            Some(idx) => {
                self.entries[idx] = Some(entry);
                idx
            }
            None => {
                self.entries.push(Some(entry));
                self.entries.len() - 1
            }
        }
    }

    fn entry(&self, idx: usize) -> Option<&StoreEntry> {
        self.entries.get(idx).and_then(|e| e.as_ref())
    }

    fn entry_mut(&mut self, idx: usize) -> Option<&mut StoreEntry> {
        self.entries.get_mut(idx).and_then(|e| e.as_mut())
    }
}

/// Build an entry subtree from a plain value.
fn build_entry(data: &mut StoreData, value: &Value, parent: Option<usize>) -> usize {
    match value {
        Value::Object(map) => {
            let idx = data.alloc(StoreEntry::new(EntryKind::Object(IndexMap::new()), parent));
            let mut children = IndexMap::new();
            for (key, child_value) in map {
                let child = build_entry(data, child_value, Some(idx));
                children.insert(key.clone(), child);
            }
            if let Some(entry) = data.entry_mut(idx) {
                entry.kind = EntryKind::Object(children);
            }
            idx
        }
        Value::Array(items) => {
            let idx = data.alloc(StoreEntry::new(EntryKind::Array(Vec::new()), parent));
            let mut children = Vec::with_capacity(items.len());
            for item in items {
                children.push(build_entry(data, item, Some(idx)));
            }
            if let Some(entry) = data.entry_mut(idx) {
                entry.kind = EntryKind::Array(children);
            }
            idx
        }
        leaf => data.alloc(StoreEntry::new(EntryKind::Leaf(leaf.clone()), parent)),
    }
}

/// Reassemble the plain value of a subtree.
fn assemble(data: &StoreData, idx: usize) -> Value {
    match data.entry(idx).map(|e| &e.kind) {
        Some(EntryKind::Leaf(value)) => value.clone(),
        Some(EntryKind::Object(children)) => Value::Object(
            children
                .iter()
                .map(|(key, child)| (key.clone(), assemble(data, *child)))
                .collect(),
        ),
        Some(EntryKind::Array(children)) => Value::Array(
            children.iter().map(|child| assemble(data, *child)).collect(),
        ),
        None => Value::Null,
    }
}

/// Walk a path down the entry tree.
fn resolve(data: &StoreData, segments: &[PathSeg]) -> Option<usize> {
    let mut current = data.root;
    for seg in segments {
        let entry = data.entry(current)?;
        current = match (&entry.kind, seg) {
            (EntryKind::Object(children), PathSeg::Key(key)) => *children.get(key)?,
            (EntryKind::Array(children), PathSeg::Index(index)) => *children.get(*index)?,
            _ => return None,
        };
    }
    Some(current)
}

fn ensure_value_signal(rt: &mut Runtime, store: StoreId, idx: usize) -> Option<NodeId> {
    let existing = rt.stores.get(&store)?.entry(idx)?.value_signal;
    if existing.is_some() {
        return existing;
    }
    let leaf = match &rt.stores.get(&store)?.entry(idx)?.kind {
        EntryKind::Leaf(value) => value.clone(),
        _ => return None,
    };
    let mut node = Node::source(Box::new(leaf));
    node.equals = Some(erase_equals::<Value>(Rc::new(|a, b| a == b)));
    let node_id = node.id;
    node.unobserved = Some(Rc::new(move || {
        release_signal(store, idx, node_id, SignalSlot::Value)
    }));
    let id = rt.graph.add_node(node);
    if let Some(entry) = rt.stores.get_mut(&store).and_then(|d| d.entry_mut(idx)) {
        entry.value_signal = Some(id);
    }
    Some(id)
}

fn ensure_structure_signal(rt: &mut Runtime, store: StoreId, idx: usize) -> Option<NodeId> {
    let entry = rt.stores.get(&store)?.entry(idx)?;
    if !matches!(entry.kind, EntryKind::Object(_) | EntryKind::Array(_)) {
        return None;
    }
    if entry.structure_signal.is_some() {
        return entry.structure_signal;
    }
    let version = entry.structure_version;
    let node = version_node(version, store, idx, SignalSlot::Structure);
    let id = rt.graph.add_node(node);
    if let Some(entry) = rt.stores.get_mut(&store).and_then(|d| d.entry_mut(idx)) {
        entry.structure_signal = Some(id);
    }
    Some(id)
}

fn ensure_deep_signal(rt: &mut Runtime, store: StoreId, idx: usize) -> Option<NodeId> {
    let entry = rt.stores.get(&store)?.entry(idx)?;
    if entry.deep_signal.is_some() {
        return entry.deep_signal;
    }
    let version = entry.deep_version;
    let node = version_node(version, store, idx, SignalSlot::Deep);
    let id = rt.graph.add_node(node);
    if let Some(entry) = rt.stores.get_mut(&store).and_then(|d| d.entry_mut(idx)) {
        entry.deep_signal = Some(id);
    }
    Some(id)
}

/// Which lazily created signal an entry slot holds.
#[derive(Clone, Copy, PartialEq)]
enum SignalSlot {
    Value,
    Structure,
    Deep,
}

fn version_node(version: u64, store: StoreId, idx: usize, slot: SignalSlot) -> Node {
    let mut node = Node::source(Box::new(version));
    node.equals = Some(erase_equals::<u64>(Rc::new(|a, b| a == b)));
    let node_id = node.id;
    node.unobserved = Some(Rc::new(move || release_signal(store, idx, node_id, slot)));
    node
}

/// Unobserved hook of a lazily created store signal: forget it and tear
/// it down. The entry keeps the canonical value/version, so a later read
/// simply recreates the signal.
fn release_signal(store: StoreId, idx: usize, node: NodeId, slot: SignalSlot) {
    with_runtime(|rt| {
        if let Some(entry) = rt.stores.get_mut(&store).and_then(|d| d.entry_mut(idx)) {
            let field = match slot {
                SignalSlot::Value => &mut entry.value_signal,
                SignalSlot::Structure => &mut entry.structure_signal,
                SignalSlot::Deep => &mut entry.deep_signal,
            };
            if *field == Some(node) {
                *field = None;
            }
        }
    });
    dispose_node_now(node);
}

/// Bump a container's structural version (and signal, if observed) and
/// propagate the deep invalidation up through parent back-references.
fn bump_structure(rt: &mut Runtime, store: StoreId, idx: usize) {
    let mut writes: Vec<(NodeId, u64)> = Vec::new();
    if let Some(entry) = rt.stores.get_mut(&store).and_then(|d| d.entry_mut(idx)) {
        entry.structure_version += 1;
        if let Some(sig) = entry.structure_signal {
            writes.push((sig, entry.structure_version));
        }
    }
    let mut cursor = Some(idx);
    while let Some(current) = cursor {
        let Some(entry) = rt.stores.get_mut(&store).and_then(|d| d.entry_mut(current)) else {
            break;
        };
        entry.deep_version += 1;
        if let Some(sig) = entry.deep_signal {
            writes.push((sig, entry.deep_version));
        }
        cursor = entry.parent;
    }
    for (sig, version) in writes {
        rt.commit_write(sig, Box::new(version));
    }
}

/// Drop a subtree's entries and tear down their signals.
fn drop_subtree(rt: &mut Runtime, store: StoreId, idx: usize) {
    let mut stack = vec![idx];
    while let Some(current) = stack.pop() {
        let Some(data) = rt.stores.get_mut(&store) else {
            return;
        };
        let Some(entry) = data.entries.get_mut(current).and_then(|e| e.take()) else {
            continue;
        };
        data.free.push(current);
        match &entry.kind {
            EntryKind::Object(children) => stack.extend(children.values().copied()),
            EntryKind::Array(children) => stack.extend(children.iter().copied()),
            EntryKind::Leaf(_) => {}
        }
        for sig in [entry.value_signal, entry.structure_signal, entry.deep_signal]
            .into_iter()
            .flatten()
        {
            rt.teardown_node(sig);
        }
    }
}

/// Replace a subtree in place, notifying readers of the old entry.
fn replace_entry(rt: &mut Runtime, store: StoreId, idx: usize, value: &Value) {
    // Drop old children.
    let children: Vec<usize> = match rt.stores.get(&store).and_then(|d| d.entry(idx)) {
        Some(entry) => match &entry.kind {
            EntryKind::Object(children) => children.values().copied().collect(),
            EntryKind::Array(children) => children.clone(),
            EntryKind::Leaf(_) => Vec::new(),
        },
        None => return,
    };
    for child in children {
        drop_subtree(rt, store, child);
    }

    // Build the replacement shape under the same entry index, so parent
    // references and observed signals survive.
    let new_kind = match value {
        Value::Object(map) => {
            let mut children = IndexMap::new();
            if let Some(data) = rt.stores.get_mut(&store) {
                for (key, child_value) in map {
                    let child = build_entry(data, child_value, Some(idx));
                    children.insert(key.clone(), child);
                }
            }
            EntryKind::Object(children)
        }
        Value::Array(items) => {
            let mut children = Vec::with_capacity(items.len());
            if let Some(data) = rt.stores.get_mut(&store) {
                for item in items {
                    children.push(build_entry(data, item, Some(idx)));
                }
            }
            EntryKind::Array(children)
        }
        leaf => EntryKind::Leaf(leaf.clone()),
    };
    let value_signal = match rt.stores.get_mut(&store).and_then(|d| d.entry_mut(idx)) {
        Some(entry) => {
            entry.kind = new_kind;
            entry.value_signal
        }
        None => return,
    };
    // Readers of the old value re-run and re-track against the new shape;
    // the stale signal is dropped once they let go of it.
    if let Some(sig) = value_signal {
        rt.commit_write(sig, Box::new(value.clone()));
    }
    bump_structure(rt, store, idx);
}

fn apply_patch(rt: &mut Runtime, store: StoreId, base: &[PathSeg], patch: &Patch) {
    let mut full_path: Vec<PathSeg> = Vec::with_capacity(base.len() + patch.path.len());
    full_path.extend_from_slice(base);
    full_path.extend_from_slice(&patch.path);

    let Some(idx) = rt.stores.get(&store).and_then(|d| resolve(d, &full_path)) else {
        return;
    };

    match &patch.op {
        PatchOp::SetLeaf(value) => {
            let signal = match rt.stores.get_mut(&store).and_then(|d| d.entry_mut(idx)) {
                Some(entry) => {
                    entry.kind = EntryKind::Leaf(value.clone());
                    entry.value_signal
                }
                None => return,
            };
            if let Some(sig) = signal {
                rt.commit_write(sig, Box::new(value.clone()));
            }
        }
        PatchOp::ReplaceSubtree(value) => replace_entry(rt, store, idx, value),
        PatchOp::ObjectInsert { key, value } => {
            let child = match rt.stores.get_mut(&store) {
                Some(data) => build_entry(data, value, Some(idx)),
                None => return,
            };
            if let Some(entry) = rt.stores.get_mut(&store).and_then(|d| d.entry_mut(idx)) {
                if let EntryKind::Object(children) = &mut entry.kind {
                    children.insert(key.clone(), child);
                }
            }
            bump_structure(rt, store, idx);
        }
        PatchOp::ObjectRemove { key } => {
            let removed = match rt.stores.get_mut(&store).and_then(|d| d.entry_mut(idx)) {
                Some(entry) => match &mut entry.kind {
                    EntryKind::Object(children) => children.shift_remove(key),
                    _ => None,
                },
                None => return,
            };
            if let Some(child) = removed {
                drop_subtree(rt, store, child);
            }
            bump_structure(rt, store, idx);
        }
        PatchOp::ArrayReorder { slots } => {
            let old_children = match rt.stores.get_mut(&store).and_then(|d| d.entry_mut(idx)) {
                Some(entry) => match &mut entry.kind {
                    EntryKind::Array(children) => std::mem::take(children),
                    _ => return,
                },
                None => return,
            };
            let mut used = vec![false; old_children.len()];
            let mut new_children = Vec::with_capacity(slots.len());
            for slot in slots {
                match slot {
                    Slot::FromOld(from) => {
                        if let Some(child) = old_children.get(*from) {
                            used[*from] = true;
                            new_children.push(*child);
                        }
                    }
                    Slot::Fresh(value) => {
                        if let Some(data) = rt.stores.get_mut(&store) {
                            new_children.push(build_entry(data, value, Some(idx)));
                        }
                    }
                }
            }
            for (position, child) in old_children.iter().enumerate() {
                if !used[position] {
                    drop_subtree(rt, store, *child);
                }
            }
            if let Some(entry) = rt.stores.get_mut(&store).and_then(|d| d.entry_mut(idx)) {
                if let EntryKind::Array(children) = &mut entry.kind {
                    *children = new_children;
                }
            }
            bump_structure(rt, store, idx);
        }
    }
}

/// Apply `next` at `path` using the reconcile diff.
fn apply_at_path(store: StoreId, path: &StorePath, next: Value, options: &ReconcileOptions) {
    // Snapshot the current subtree under the borrow, diff outside it
    // (key functions are user code).
    let old = with_runtime(|rt| {
        let data = rt.stores.get(&store)?;
        resolve(data, &path.segments).map(|idx| assemble(data, idx))
    });

    match old {
        Some(old) => {
            let patches = diff(&old, &next, options);
            if patches.is_empty() {
                return;
            }
            tracing::debug!(store = store.raw(), patches = patches.len(), "reconcile");
            with_runtime(|rt| {
                for patch in &patches {
                    apply_patch(rt, store, &path.segments, patch);
                }
            });
        }
        None => {
            // Creating a missing path: the parent container must exist.
            let Some((last, prefix)) = path.segments.split_last() else {
                return;
            };
            let synthesized = match last {
                PathSeg::Key(key) => Patch {
                    path: Vec::new(),
                    op: PatchOp::ObjectInsert {
                        key: key.clone(),
                        value: next,
                    },
                },
                PathSeg::Index(index) => {
                    let Some(len) = with_runtime(|rt| {
                        let data = rt.stores.get(&store)?;
                        let idx = resolve(data, prefix)?;
                        match &data.entry(idx)?.kind {
                            EntryKind::Array(children) => Some(children.len()),
                            _ => None,
                        }
                    }) else {
                        return;
                    };
                    if *index != len {
                        return; // only appends create new slots
                    }
                    let mut slots: Vec<Slot> = (0..len).map(Slot::FromOld).collect();
                    slots.push(Slot::Fresh(next));
                    Patch {
                        path: Vec::new(),
                        op: PatchOp::ArrayReorder { slots },
                    }
                }
            };
            with_runtime(|rt| apply_patch(rt, store, prefix, &synthesized));
        }
    }
}

/// Read handle to a store.
#[derive(Debug, Clone, Copy)]
pub struct Store {
    id: StoreId,
}

/// Write handle to a store.
#[derive(Debug, Clone, Copy)]
pub struct StoreSetter {
    id: StoreId,
}

/// Create a store over plain nested data.
pub fn create_store(initial: Value) -> (Store, StoreSetter) {
    let id = StoreId::new();
    with_runtime(|rt| {
        let mut data = StoreData {
            entries: Vec::new(),
            free: Vec::new(),
            root: 0,
        };
        let root = build_entry(&mut data, &initial, None);
        data.root = root;
        rt.stores.insert(id, data);
    });
    let _ = on_cleanup(move || dispose_store(id));
    (Store { id }, StoreSetter { id })
}

fn dispose_store(id: StoreId) {
    with_runtime(|rt| {
        if let Some(data) = rt.stores.remove(&id) {
            for entry in data.entries.into_iter().flatten() {
                for sig in [entry.value_signal, entry.structure_signal, entry.deep_signal]
                    .into_iter()
                    .flatten()
                {
                    rt.teardown_node(sig);
                }
            }
        }
    });
}

impl Store {
    /// Read the value at `path`, tracking the per-property signal (for
    /// leaves) or the structural signal (for containers), plus the
    /// structural signal of every container traversed. Returns `None`
    /// for a missing path — reactively: the read re-runs when structure
    /// changes make the path appear.
    pub fn get(&self, path: &StorePath) -> Option<Value> {
        let store = self.id;
        with_runtime(|rt| {
            let root = rt.stores.get(&store)?.root;
            let mut current = root;
            for seg in &path.segments {
                if let Some(sig) = ensure_structure_signal(rt, store, current) {
                    rt.record_read(sig);
                }
                let next = {
                    let data = rt.stores.get(&store)?;
                    let entry = data.entry(current)?;
                    match (&entry.kind, seg) {
                        (EntryKind::Object(children), PathSeg::Key(key)) => {
                            children.get(key).copied()
                        }
                        (EntryKind::Array(children), PathSeg::Index(index)) => {
                            children.get(*index).copied()
                        }
                        _ => None,
                    }
                };
                match next {
                    Some(next) => current = next,
                    None => return None,
                }
            }
            let is_leaf = matches!(
                rt.stores.get(&store)?.entry(current)?.kind,
                EntryKind::Leaf(_)
            );
            let signal = if is_leaf {
                ensure_value_signal(rt, store, current)
            } else {
                ensure_structure_signal(rt, store, current)
            };
            if let Some(sig) = signal {
                rt.record_read(sig);
            }
            let data = rt.stores.get(&store)?;
            Some(assemble(data, current))
        })
    }

    /// Like [`Store::get`] for containers, but tracking the deep signal:
    /// the read re-runs on any structural change anywhere in the subtree.
    pub fn get_deep(&self, path: &StorePath) -> Option<Value> {
        let store = self.id;
        with_runtime(|rt| {
            let data = rt.stores.get(&store)?;
            let idx = resolve(data, &path.segments)?;
            if let Some(sig) = ensure_deep_signal(rt, store, idx) {
                rt.record_read(sig);
            }
            let data = rt.stores.get(&store)?;
            Some(assemble(data, idx))
        })
    }

    /// Read without tracking.
    pub fn get_untracked(&self, path: &StorePath) -> Option<Value> {
        let store = self.id;
        with_runtime(|rt| {
            let data = rt.stores.get(&store)?;
            let idx = resolve(data, &path.segments)?;
            Some(assemble(data, idx))
        })
    }

    /// The whole tree as a plain value, untracked.
    pub fn snapshot(&self) -> Value {
        let store = self.id;
        with_runtime(|rt| match rt.stores.get(&store) {
            Some(data) => assemble(data, data.root),
            None => Value::Null,
        })
    }
}

/// Create a store from any serializable value.
pub fn create_store_from<T: Serialize>(value: &T) -> Result<(Store, StoreSetter), SignalError> {
    let initial = serde_json::to_value(value)
        .map_err(|err| SignalError::failed(format!("store serialization failed: {err}")))?;
    Ok(create_store(initial))
}

impl StoreSetter {
    /// Write a value at `path`. Same-shape updates diff positionally, so
    /// only changed leaves notify. Writing one past the end of an array
    /// appends; writing a missing object key inserts it.
    pub fn set(&self, path: &StorePath, value: Value) {
        apply_at_path(
            self.id,
            path,
            value,
            &ReconcileOptions {
                key: KeySelector::Positional,
                match_all: false,
            },
        );
    }

    /// Reconcile the whole store against `next` (see module docs).
    pub fn reconcile(&self, next: Value, options: ReconcileOptions) {
        apply_at_path(self.id, &StorePath::root(), next, &options);
    }

    /// Snapshot, let `f` mutate the plain value, and reconcile the result
    /// back in.
    pub fn update(&self, f: impl FnOnce(&mut Value)) {
        let mut snapshot = with_runtime(|rt| match rt.stores.get(&self.id) {
            Some(data) => assemble(data, data.root),
            None => Value::Null,
        });
        f(&mut snapshot);
        apply_at_path(
            self.id,
            &StorePath::root(),
            snapshot,
            &ReconcileOptions::default(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::memo::create_memo;
    use serde_json::json;
    use std::cell::Cell;

    #[test]
    fn get_reads_nested_values() {
        let (store, _setter) = create_store(json!({
            "user": {"name": "ada", "age": 36},
            "items": [10, 20, 30],
        }));

        assert_eq!(
            store.get(&StorePath::root().key("user").key("name")),
            Some(json!("ada"))
        );
        assert_eq!(
            store.get(&StorePath::root().key("items").index(1)),
            Some(json!(20))
        );
        assert_eq!(store.get(&StorePath::root().key("missing")), None);
    }

    #[test]
    fn leaf_write_notifies_only_that_property() {
        let (store, setter) = create_store(json!({"a": 1, "b": 2}));

        let a_runs = Rc::new(Cell::new(0));
        let a_counter = a_runs.clone();
        let a_memo = create_memo(move || {
            a_counter.set(a_counter.get() + 1);
            store.get(&StorePath::root().key("a"))
        });

        let b_runs = Rc::new(Cell::new(0));
        let b_counter = b_runs.clone();
        let b_memo = create_memo(move || {
            b_counter.set(b_counter.get() + 1);
            store.get(&StorePath::root().key("b"))
        });

        assert_eq!(a_memo.get(), Some(json!(1)));
        assert_eq!(b_memo.get(), Some(json!(2)));
        assert_eq!((a_runs.get(), b_runs.get()), (1, 1));

        setter.set(&StorePath::root().key("a"), json!(100));

        assert_eq!(a_memo.get(), Some(json!(100)));
        assert_eq!(b_memo.get(), Some(json!(2)));
        // Only the `a` reader re-ran.
        assert_eq!((a_runs.get(), b_runs.get()), (2, 1));
    }

    #[test]
    fn middle_array_edit_rewrites_exactly_one_item_signal() {
        let (store, setter) = create_store(json!([1, 2, 3, 4, 5]));

        // Observe every index so the per-item signals exist.
        let memos: Vec<_> = (0..5)
            .map(|i| create_memo(move || store.get(&StorePath::root().index(i))))
            .collect();
        for (i, memo) in memos.iter().enumerate() {
            assert_eq!(memo.get(), Some(json!(i as i64 + 1)));
        }

        let stamps_before = with_runtime(|rt| {
            let data = rt.stores.get(&store.id).expect("store exists");
            let children = match &data.entry(data.root).expect("root").kind {
                EntryKind::Array(children) => children.clone(),
                _ => panic!("expected array root"),
            };
            children
                .iter()
                .map(|c| {
                    let sig = data.entry(*c).and_then(|e| e.value_signal).expect("signal");
                    rt.graph.node(sig).map(|n| n.last_changed).unwrap_or(0)
                })
                .collect::<Vec<_>>()
        });

        setter.reconcile(json!([1, 2, 99, 4, 5]), ReconcileOptions::default());

        let stamps_after = with_runtime(|rt| {
            let data = rt.stores.get(&store.id).expect("store exists");
            let children = match &data.entry(data.root).expect("root").kind {
                EntryKind::Array(children) => children.clone(),
                _ => panic!("expected array root"),
            };
            children
                .iter()
                .map(|c| {
                    let sig = data.entry(*c).and_then(|e| e.value_signal).expect("signal");
                    rt.graph.node(sig).map(|n| n.last_changed).unwrap_or(0)
                })
                .collect::<Vec<_>>()
        });

        for i in [0usize, 1, 3, 4] {
            assert_eq!(stamps_before[i], stamps_after[i], "index {i} must not move");
        }
        assert!(stamps_after[2] > stamps_before[2], "index 2 must be written");
        assert_eq!(memos[2].get(), Some(json!(99)));
    }

    #[test]
    fn keyed_prepend_moves_entries_without_touching_their_signals() {
        let (store, setter) = create_store(json!([1, 2, 3]));

        // Materialize the per-item signals.
        for i in 0..3 {
            let _ = create_memo(move || store.get(&StorePath::root().index(i))).get();
        }
        let signals_before = with_runtime(|rt| {
            let data = rt.stores.get(&store.id).expect("store exists");
            match &data.entry(data.root).expect("root").kind {
                EntryKind::Array(children) => children
                    .iter()
                    .map(|c| data.entry(*c).and_then(|e| e.value_signal))
                    .collect::<Vec<_>>(),
                _ => panic!("expected array root"),
            }
        });

        setter.reconcile(
            json!([0, 1, 2, 3]),
            ReconcileOptions::keyed_by(|v| v.clone()),
        );

        let signals_after = with_runtime(|rt| {
            let data = rt.stores.get(&store.id).expect("store exists");
            match &data.entry(data.root).expect("root").kind {
                EntryKind::Array(children) => children
                    .iter()
                    .map(|c| data.entry(*c).and_then(|e| e.value_signal))
                    .collect::<Vec<_>>(),
                _ => panic!("expected array root"),
            }
        });

        // One new slot in front; the old entries moved with their
        // signals intact.
        assert_eq!(signals_after.len(), 4);
        assert_eq!(&signals_after[1..], &signals_before[..]);
        assert_eq!(
            store.get_untracked(&StorePath::root()),
            Some(json!([0, 1, 2, 3]))
        );
    }

    #[test]
    fn structural_change_reruns_container_readers() {
        let (store, setter) = create_store(json!({"items": [1, 2]}));

        let runs = Rc::new(Cell::new(0));
        let counter = runs.clone();
        let len_memo = create_memo(move || {
            counter.set(counter.get() + 1);
            store
                .get(&StorePath::root().key("items"))
                .and_then(|v| v.as_array().map(|a| a.len()))
        });

        assert_eq!(len_memo.get(), Some(2));
        assert_eq!(runs.get(), 1);

        // A leaf edit is not structural: the container reader stays put.
        setter.set(&StorePath::root().key("items").index(0), json!(7));
        assert_eq!(len_memo.get(), Some(2));
        assert_eq!(runs.get(), 1);

        setter.update(|v| {
            v["items"].as_array_mut().expect("array").push(json!(3));
        });
        assert_eq!(len_memo.get(), Some(3));
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn unobserved_per_property_signals_are_dropped() {
        let (store, _setter) = create_store(json!({"a": 1}));

        let nodes_before = with_runtime(|rt| rt.graph.node_count());
        crate::reactive::create_root(|root| {
            let memo = create_memo(move || store.get(&StorePath::root().key("a")));
            assert_eq!(memo.get(), Some(json!(1)));
            root.dispose();
        });
        // Disposing the only observer released the lazily created signal.
        let signal = with_runtime(|rt| {
            let data = rt.stores.get(&store.id).expect("store exists");
            let root = data.root;
            let child = match &data.entry(root).expect("root").kind {
                EntryKind::Object(children) => *children.get("a").expect("child a"),
                _ => panic!("expected object root"),
            };
            data.entry(child).and_then(|e| e.value_signal)
        });
        assert!(signal.is_none());
        // The structure signal the reader tracked was released the same
        // way, so the graph is back to its baseline size.
        let nodes_after = with_runtime(|rt| rt.graph.node_count());
        assert_eq!(nodes_after, nodes_before);
    }

    #[test]
    fn store_from_serializable_struct() {
        #[derive(Serialize)]
        struct Config {
            title: String,
            limits: Vec<u32>,
        }

        let (store, _setter) = create_store_from(&Config {
            title: "dashboard".into(),
            limits: vec![1, 2],
        })
        .expect("serializable");

        assert_eq!(
            store.get(&StorePath::root().key("title")),
            Some(json!("dashboard"))
        );
        assert_eq!(
            store.get(&StorePath::root().key("limits").index(1)),
            Some(json!(2))
        );
    }
}
