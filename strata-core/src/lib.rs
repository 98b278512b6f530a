//! Strata Core
//!
//! This crate provides the core runtime for the Strata fine-grained
//! reactive state engine. It implements:
//!
//! - Reactive primitives (signals, memos, effects)
//! - A height-ordered, glitch-free propagation scheduler
//! - An ownership/disposal tree with cleanups and context values
//! - Transitions: atomically committed batches of asynchronous updates
//! - A structural-diffing store over plain nested data
//! - Suspense-style error and loading boundaries
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `graph`: nodes, links, and the height-bucketed scheduler queue
//! - `reactive`: the runtime, the primitives, ownership, transitions,
//!   and boundaries
//! - `store`: reactive wrapper and reconciliation over `serde_json::Value`
//! - `error`: the error taxonomy
//!
//! # Example
//!
//! ```rust
//! use strata_core::reactive::{create_effect, create_memo, create_signal, flush};
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! let (count, set_count) = create_signal(1);
//! let doubled = create_memo(move || count.get() * 2);
//!
//! let log: Rc<RefCell<Vec<i32>>> = Rc::new(RefCell::new(Vec::new()));
//! let sink = log.clone();
//! create_effect(move || doubled.get(), move |v| sink.borrow_mut().push(*v));
//!
//! set_count.set(2);
//! flush().unwrap();
//!
//! // The effect observed the initial value and exactly one update,
//! // never a stale intermediate.
//! assert_eq!(*log.borrow(), vec![2, 4]);
//! ```

pub mod error;
pub mod graph;
pub mod reactive;
pub mod store;

pub use error::{ContextError, EvalError, OwnerError, SignalError};
pub use reactive::{
    batch, create_async_signal, create_deferred_effect, create_effect, create_effect_guarded,
    create_error_boundary, create_load_boundary, create_memo, create_memo_with,
    create_render_effect, create_root, create_signal, create_signal_with, create_try_effect,
    create_try_memo, flush,
    in_flight, on_cleanup, pending, provide_context, run_with_owner, stale_values,
    start_transition, transition_open, untrack, use_context, AsyncResolver, Effect, Memo, Owner,
    ReadSignal, SignalOptions, WriteSignal,
};
pub use store::{
    create_store, create_store_from, KeySelector, PathSeg, ReconcileOptions, Store, StorePath,
    StoreSetter,
};
