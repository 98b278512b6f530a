//! Store Integration Tests
//!
//! Reconciliation minimality and structural invalidation through the
//! public surface: readers of untouched properties stay asleep, readers
//! of changed ones wake exactly once.

use std::cell::Cell;
use std::rc::Rc;

use serde_json::json;
use strata_core::{
    create_effect, create_memo, create_store, flush, KeySelector, ReconcileOptions, Store,
    StorePath,
};

fn counting_index_reader(store: Store, index: usize) -> (Rc<Cell<i32>>, strata_core::Memo<Option<serde_json::Value>>) {
    let runs = Rc::new(Cell::new(0));
    let counter = runs.clone();
    let memo = create_memo(move || {
        counter.set(counter.get() + 1);
        store.get(&StorePath::root().index(index))
    });
    (runs, memo)
}

/// Reconciling `[1,2,3,4,5]` to `[1,2,99,4,5]` wakes only the reader of
/// index 2.
#[test]
fn middle_edit_wakes_only_the_changed_index() {
    let (store, setter) = create_store(json!([1, 2, 3, 4, 5]));

    let readers: Vec<_> = (0..5).map(|i| counting_index_reader(store, i)).collect();
    for (i, (_, memo)) in readers.iter().enumerate() {
        assert_eq!(memo.get(), Some(json!(i as i64 + 1)));
    }

    setter.reconcile(json!([1, 2, 99, 4, 5]), ReconcileOptions::default());

    assert_eq!(readers[2].1.get(), Some(json!(99)));
    for (i, (runs, memo)) in readers.iter().enumerate() {
        let _ = memo.get();
        let expected = if i == 2 { 2 } else { 1 };
        assert_eq!(runs.get(), expected, "reader {i}");
    }
}

/// A prepend under a keyed reconcile is purely structural: index readers
/// re-run because positions shifted, but the store reports the shift as
/// one new slot plus moves (covered in unit tests by signal identity).
#[test]
fn keyed_prepend_preserves_values_and_updates_structure() {
    let (store, setter) = create_store(json!([1, 2, 3]));

    let (runs, first) = counting_index_reader(store, 0);
    assert_eq!(first.get(), Some(json!(1)));
    assert_eq!(runs.get(), 1);

    setter.reconcile(
        json!([0, 1, 2, 3]),
        ReconcileOptions {
            key: KeySelector::KeyFn(Rc::new(|v| v.clone())),
            match_all: false,
        },
    );

    // Structural change: the index-0 reader re-runs and sees the new head.
    assert_eq!(first.get(), Some(json!(0)));
    assert_eq!(runs.get(), 2);
    assert_eq!(store.snapshot(), json!([0, 1, 2, 3]));
}

/// Object reconciliation walks the union of keys: removed keys vanish,
/// added keys appear, untouched keys stay quiet.
#[test]
fn object_reconcile_updates_keys_minimally() {
    let (store, setter) = create_store(json!({"keep": 1, "drop": 2}));

    let keep_runs = Rc::new(Cell::new(0));
    let counter = keep_runs.clone();
    let keep = create_memo(move || {
        counter.set(counter.get() + 1);
        store.get(&StorePath::root().key("keep"))
    });
    assert_eq!(keep.get(), Some(json!(1)));

    setter.reconcile(
        json!({"keep": 1, "add": 3}),
        ReconcileOptions::default(),
    );

    assert_eq!(store.get_untracked(&StorePath::root().key("drop")), None);
    assert_eq!(
        store.get_untracked(&StorePath::root().key("add")),
        Some(json!(3))
    );

    // The keep-reader tracked the root structure too (its path traverses
    // the root object), so the structural change wakes it; its value is
    // unchanged.
    assert_eq!(keep.get(), Some(json!(1)));
    assert!(keep_runs.get() <= 2);
}

/// Stores drive effects like any other source.
#[test]
fn store_writes_flow_into_effects() {
    let (store, setter) = create_store(json!({"count": 0}));

    let seen: Rc<Cell<i64>> = Rc::new(Cell::new(-1));
    let sink = seen.clone();
    create_effect(
        move || {
            store
                .get(&StorePath::root().key("count"))
                .and_then(|v| v.as_i64())
                .unwrap_or(0)
        },
        move |v| sink.set(*v),
    );

    assert_eq!(seen.get(), 0);

    setter.set(&StorePath::root().key("count"), json!(5));
    flush().unwrap();

    assert_eq!(seen.get(), 5);
}

/// `update` snapshots, mutates, and reconciles: only what changed moves.
#[test]
fn update_reconciles_the_mutated_snapshot() {
    let (store, setter) = create_store(json!({"user": {"name": "ada"}, "items": [1, 2]}));

    setter.update(|v| {
        v["user"]["name"] = json!("grace");
        v["items"].as_array_mut().unwrap().push(json!(3));
    });

    assert_eq!(
        store.get_untracked(&StorePath::root().key("user").key("name")),
        Some(json!("grace"))
    );
    assert_eq!(
        store.get_untracked(&StorePath::root().key("items")),
        Some(json!([1, 2, 3]))
    );
}
