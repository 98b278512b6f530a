//! Store Reconciliation
//!
//! A pure structural diff over plain `serde_json::Value` trees. The diff
//! produces an ordered patch list (parents before descendants, paths in
//! new-tree coordinates) that the store applies by writing exactly the
//! per-property signals whose effective value changed.
//!
//! Arrays are diffed with a longest-common-prefix / longest-common-suffix
//! scan; the remaining middle section is matched through a key index map
//! (minimal-edit list diff). Matched entries are *moved*, not recreated,
//! so their reactive wrappers survive reorders. Objects are walked over
//! the union of old and new keys.

use std::collections::VecDeque;
use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::Value;

use super::PathSeg;

/// How array elements are matched across a reconcile.
#[derive(Clone)]
pub enum KeySelector {
    /// The default: an object's `"id"` field when present, otherwise the
    /// whole value. Unmatched elements fall back to positional pairing,
    /// which turns a same-length value edit into a plain signal write.
    Auto,

    /// Match by a named object field.
    Field(String),

    /// Match by a caller-supplied key function.
    KeyFn(Rc<dyn Fn(&Value) -> Value>),

    /// No matching at all: pair strictly by index.
    Positional,
}

/// Options for a reconcile pass.
#[derive(Clone)]
pub struct ReconcileOptions {
    /// Element identity for array diffing.
    pub key: KeySelector,

    /// Write every matched leaf signal even when the value is unchanged,
    /// disabling the equality short-circuit.
    pub match_all: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            key: KeySelector::Auto,
            match_all: false,
        }
    }
}

impl ReconcileOptions {
    /// Match array elements by a named object field.
    pub fn keyed_by_field(field: impl Into<String>) -> Self {
        Self {
            key: KeySelector::Field(field.into()),
            match_all: false,
        }
    }

    /// Match array elements by a key function.
    pub fn keyed_by(f: impl Fn(&Value) -> Value + 'static) -> Self {
        Self {
            key: KeySelector::KeyFn(Rc::new(f)),
            match_all: false,
        }
    }

    /// Force every leaf write.
    pub fn match_all(mut self) -> Self {
        self.match_all = true;
        self
    }
}

/// One slot of a reordered array: either an existing element moved here,
/// or a freshly inserted value.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Slot {
    FromOld(usize),
    Fresh(Value),
}

/// A single reconciliation step.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PatchOp {
    /// Write a leaf value.
    SetLeaf(Value),

    /// The value's shape changed (leaf vs container, object vs array);
    /// rebuild the subtree.
    ReplaceSubtree(Value),

    /// Add a key to an object (structural).
    ObjectInsert { key: String, value: Value },

    /// Remove a key from an object (structural).
    ObjectRemove { key: String },

    /// Re-lay-out an array's slots (structural). Moved elements keep
    /// their reactive wrapper.
    ArrayReorder { slots: Vec<Slot> },
}

/// A patch anchored at a path (new-tree coordinates).
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Patch {
    pub path: Vec<PathSeg>,
    pub op: PatchOp,
}

fn is_container(value: &Value) -> bool {
    matches!(value, Value::Object(_) | Value::Array(_))
}

/// Stable hashable rendition of a key value.
fn key_repr(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

fn element_key(value: &Value, selector: &KeySelector) -> Option<String> {
    match selector {
        KeySelector::Positional => None,
        KeySelector::Auto => match value {
            Value::Object(map) => match map.get("id") {
                Some(id) => Some(key_repr(id)),
                None => Some(key_repr(value)),
            },
            _ => Some(key_repr(value)),
        },
        KeySelector::Field(field) => match value {
            Value::Object(map) => map.get(field).map(key_repr),
            _ => Some(key_repr(value)),
        },
        KeySelector::KeyFn(f) => Some(key_repr(&(**f)(value))),
    }
}

fn same_identity(a: &Value, b: &Value, selector: &KeySelector) -> bool {
    match (element_key(a, selector), element_key(b, selector)) {
        (Some(ka), Some(kb)) => ka == kb,
        _ => a == b,
    }
}

/// Diff `old` against `new`, producing the ordered patch list.
pub(crate) fn diff(old: &Value, new: &Value, options: &ReconcileOptions) -> Vec<Patch> {
    let mut patches = Vec::new();
    let mut path = Vec::new();
    diff_at(&mut path, old, new, options, &mut patches);
    patches
}

fn diff_at(
    path: &mut Vec<PathSeg>,
    old: &Value,
    new: &Value,
    options: &ReconcileOptions,
    out: &mut Vec<Patch>,
) {
    match (old, new) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            // Union of keys: removals first, then inserts and recursion
            // in the new map's order.
            for key in old_map.keys() {
                if !new_map.contains_key(key) {
                    out.push(Patch {
                        path: path.clone(),
                        op: PatchOp::ObjectRemove { key: key.clone() },
                    });
                }
            }
            for (key, new_value) in new_map {
                match old_map.get(key) {
                    None => out.push(Patch {
                        path: path.clone(),
                        op: PatchOp::ObjectInsert {
                            key: key.clone(),
                            value: new_value.clone(),
                        },
                    }),
                    Some(old_value) => {
                        path.push(PathSeg::Key(key.clone()));
                        diff_at(path, old_value, new_value, options, out);
                        path.pop();
                    }
                }
            }
        }
        (Value::Array(old_items), Value::Array(new_items)) => {
            diff_array(path, old_items, new_items, options, out);
        }
        (old_leaf, new_leaf) if !is_container(old_leaf) && !is_container(new_leaf) => {
            if old_leaf != new_leaf || options.match_all {
                out.push(Patch {
                    path: path.clone(),
                    op: PatchOp::SetLeaf(new_leaf.clone()),
                });
            }
        }
        _ => {
            // Leaf/container or object/array mismatch: wrappability
            // differs, replace wholesale.
            out.push(Patch {
                path: path.clone(),
                op: PatchOp::ReplaceSubtree(new.clone()),
            });
        }
    }
}

fn diff_array(
    path: &mut Vec<PathSeg>,
    old: &[Value],
    new: &[Value],
    options: &ReconcileOptions,
    out: &mut Vec<Patch>,
) {
    let selector = &options.key;

    // Longest common prefix.
    let mut start = 0;
    let shortest = old.len().min(new.len());
    while start < shortest && same_identity(&old[start], &new[start], selector) {
        start += 1;
    }

    // Longest common suffix (never overlapping the prefix).
    let mut old_end = old.len();
    let mut new_end = new.len();
    while old_end > start
        && new_end > start
        && same_identity(&old[old_end - 1], &new[new_end - 1], selector)
    {
        old_end -= 1;
        new_end -= 1;
    }

    // Key index over the old middle section.
    let mut by_key: IndexMap<String, VecDeque<usize>> = IndexMap::new();
    if !matches!(selector, KeySelector::Positional) {
        for (offset, value) in old[start..old_end].iter().enumerate() {
            if let Some(key) = element_key(value, selector) {
                by_key.entry(key).or_default().push_back(start + offset);
            }
        }
    }

    let mut used = vec![false; old.len()];
    for index in 0..start {
        used[index] = true;
    }
    for index in old_end..old.len() {
        used[index] = true;
    }

    // First pass: match middle elements through the key index.
    let mut middle: Vec<Option<Slot>> = Vec::with_capacity(new_end - start);
    for value in &new[start..new_end] {
        let matched = element_key(value, selector)
            .and_then(|key| by_key.get_mut(&key))
            .and_then(|queue| queue.pop_front());
        match matched {
            Some(old_index) => {
                used[old_index] = true;
                middle.push(Some(Slot::FromOld(old_index)));
            }
            None => middle.push(None),
        }
    }

    // Second pass: positional fallback pairs leftover elements in order,
    // so a same-length value edit is a signal write, not a rebuild.
    let positional_fallback = matches!(selector, KeySelector::Auto | KeySelector::Positional);
    if positional_fallback {
        let mut leftovers = (start..old_end).filter(|i| !used[*i]).collect::<VecDeque<_>>();
        for slot in middle.iter_mut() {
            if slot.is_none() {
                if let Some(old_index) = leftovers.pop_front() {
                    used[old_index] = true;
                    *slot = Some(Slot::FromOld(old_index));
                }
            }
        }
    }

    // Assemble the full slot layout.
    let mut slots: Vec<Slot> = Vec::with_capacity(new.len());
    for index in 0..start {
        slots.push(Slot::FromOld(index));
    }
    for (offset, slot) in middle.into_iter().enumerate() {
        match slot {
            Some(slot) => slots.push(slot),
            None => slots.push(Slot::Fresh(new[start + offset].clone())),
        }
    }
    for (offset, _) in old[old_end..].iter().enumerate() {
        slots.push(Slot::FromOld(old_end + offset));
    }

    // Structural only when the layout actually changed.
    let structural = old.len() != new.len()
        || slots
            .iter()
            .enumerate()
            .any(|(i, slot)| !matches!(slot, Slot::FromOld(from) if *from == i));
    if structural {
        out.push(Patch {
            path: path.clone(),
            op: PatchOp::ArrayReorder {
                slots: slots.clone(),
            },
        });
    }

    // Recurse into moved/kept elements (fresh slots carry their value).
    for (new_index, slot) in slots.iter().enumerate() {
        if let Slot::FromOld(old_index) = slot {
            path.push(PathSeg::Index(new_index));
            diff_at(path, &old[*old_index], &new[new_index], options, out);
            path.pop();
        }
    }
}
