//! Reactive Primitives
//!
//! This module implements the core reactive system: signals, memos,
//! effects, the ownership tree, transitions, and boundary queues, all
//! coordinated by the thread-local runtime.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. Reading it inside a
//! tracking context (a memo or effect) records a dependency edge; writing
//! it marks every dependent and schedules a flush.
//!
//! ## Memos
//!
//! A Memo is a derived value that caches its result and re-evaluates only
//! when a dependency actually changed. Memos are lazy and revalidate on
//! read.
//!
//! ## Effects
//!
//! An Effect synchronizes reactive state with the outside world. Its
//! tracked source function runs during propagation; its body is deferred
//! to the post-propagation phases.
//!
//! ## Ownership
//!
//! Every primitive belongs to an owner scope. Disposing a scope runs its
//! cleanups (leaves first) and unlinks everything it owns from the graph.
//!
//! ## Transitions
//!
//! Writes that depend on asynchronous sources are captured as shadow
//! values and committed atomically when every tracked source settles —
//! or discarded wholesale if the owning scope is disposed first.

pub mod boundary;
pub mod effect;
pub mod memo;
pub mod owner;
pub mod runtime;
pub mod signal;
pub mod transition;

pub use boundary::{create_error_boundary, create_load_boundary};
pub use effect::{
    create_deferred_effect, create_effect, create_effect_guarded, create_render_effect,
    create_try_effect, Effect,
};
pub use memo::{create_memo, create_memo_with, create_try_memo, Memo};
pub use owner::{
    create_root, on_cleanup, provide_context, run_with_owner, use_context, Owner, OwnerId,
    OwnerState,
};
pub use runtime::{batch, flush, pending, untrack};
pub use signal::{
    create_async_signal, create_signal, create_signal_with, AsyncResolver, ReadSignal,
    SignalOptions, WriteSignal,
};
pub use transition::{in_flight, stale_values, start_transition, transition_open};
