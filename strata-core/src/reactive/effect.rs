//! Effect Implementation
//!
//! Effects are two-phase: a *tracked* source function that reads reactive
//! state and returns a value, and an *untracked* body that receives that
//! value and performs the side effect. During propagation only the source
//! function runs; bodies are queued and executed after the graph is
//! quiescent, render phase first, then user phase, each in FIFO order.
//!
//! The split keeps dependency propagation synchronous while side effects
//! stay deferred, which is what allows an effect body to write signals
//! without re-entering the propagation it was scheduled by.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use crate::error::SignalError;
use crate::graph::node::{
    ComputeFn, EffectBodyFn, EffectPhase, ErrorHandlerFn, Node, NodeId,
};
use crate::reactive::runtime::{
    drop_queued_body, recompute, register_computation, run_body_now, with_runtime,
};

/// Handle to a created effect.
///
/// Dropping the handle does nothing; the effect belongs to its owner
/// scope and is torn down with it, or explicitly via [`Effect::dispose`].
#[derive(Clone, Copy)]
pub struct Effect {
    pub(crate) id: NodeId,
}

impl Effect {
    /// Dispose the effect's scope: cleanups run, edges unlink, and the
    /// body never fires again.
    pub fn dispose(&self) {
        let scope = with_runtime(|rt| rt.graph.node(self.id).and_then(|n| n.owner));
        if let Some(scope) = scope {
            crate::reactive::owner::dispose_owner(scope);
        }
    }
}

fn erase_source<T: Clone + 'static>(source: impl Fn() -> T + 'static) -> ComputeFn {
    Rc::new(move || Ok(Box::new(source()) as Box<dyn Any>))
}

fn erase_try_source<T: Clone + 'static>(
    source: impl Fn() -> Result<T, SignalError> + 'static,
) -> ComputeFn {
    Rc::new(move || source().map(|value| Box::new(value) as Box<dyn Any>))
}

fn erase_body<T: Clone + 'static>(mut body: impl FnMut(&T) + 'static) -> EffectBodyFn {
    Rc::new(RefCell::new(move |value: &dyn Any| {
        if let Some(value) = value.downcast_ref::<T>() {
            body(value);
        }
    }))
}

fn build_effect(
    phase: EffectPhase,
    compute: ComputeFn,
    body: EffectBodyFn,
    error_handler: Option<ErrorHandlerFn>,
    defer_first_run: bool,
) -> Effect {
    let mut node = Node::effect(phase, compute, body);
    node.error_handler = error_handler;
    let id = register_computation(node);

    // The initial run happens inline at creation: dependencies are
    // established and (unless deferred) the body observes the first
    // value. Subsequent runs always go through the flush phases.
    recompute(id);
    if defer_first_run {
        drop_queued_body(id);
    } else {
        run_body_now(id);
    }
    Effect { id }
}

/// Create a user-phase effect: `source` runs tracked, `body` receives its
/// value after propagation.
pub fn create_effect<T: Clone + 'static>(
    source: impl Fn() -> T + 'static,
    body: impl FnMut(&T) + 'static,
) -> Effect {
    build_effect(
        EffectPhase::User,
        erase_source(source),
        erase_body(body),
        None,
        false,
    )
}

/// Create a render-phase effect: same shape as [`create_effect`], but the
/// body runs in the render phase, before any user-phase bodies.
pub fn create_render_effect<T: Clone + 'static>(
    source: impl Fn() -> T + 'static,
    body: impl FnMut(&T) + 'static,
) -> Effect {
    build_effect(
        EffectPhase::Render,
        erase_source(source),
        erase_body(body),
        None,
        false,
    )
}

/// Create a user-phase effect whose body skips the initial value and only
/// fires on subsequent changes.
pub fn create_deferred_effect<T: Clone + 'static>(
    source: impl Fn() -> T + 'static,
    body: impl FnMut(&T) + 'static,
) -> Effect {
    build_effect(
        EffectPhase::User,
        erase_source(source),
        erase_body(body),
        None,
        true,
    )
}

/// Create a user-phase effect with a fallible source and no handler of
/// its own. A failure is delivered to the nearest error boundary, or —
/// with no boundary in the owner chain — propagates out of `flush`. A
/// `NotReady` suspension parks the effect until the pending source
/// settles.
pub fn create_try_effect<T: Clone + 'static>(
    source: impl Fn() -> Result<T, SignalError> + 'static,
    body: impl FnMut(&T) + 'static,
) -> Effect {
    build_effect(
        EffectPhase::User,
        erase_try_source(source),
        erase_body(body),
        None,
        false,
    )
}

/// Create a user-phase effect with a fallible source and an error
/// callback. The callback gets first refusal when the source fails;
/// without it the error would go to the nearest error boundary, or out of
/// `flush`.
pub fn create_effect_guarded<T: Clone + 'static>(
    source: impl Fn() -> Result<T, SignalError> + 'static,
    body: impl FnMut(&T) + 'static,
    on_error: impl Fn(&SignalError) + 'static,
) -> Effect {
    build_effect(
        EffectPhase::User,
        erase_try_source(source),
        erase_body(body),
        Some(Rc::new(on_error)),
        false,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::memo::create_memo;
    use crate::reactive::runtime::flush;
    use crate::reactive::signal::create_signal;
    use std::cell::RefCell;

    #[test]
    fn effect_runs_on_creation_and_after_flush() {
        let log: Rc<RefCell<Vec<i32>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();

        let (a, set_a) = create_signal(1);
        create_effect(move || a.get(), move |v| sink.borrow_mut().push(*v));

        assert_eq!(*log.borrow(), vec![1]);

        set_a.set(2);
        // The body is deferred to the flush.
        assert_eq!(*log.borrow(), vec![1]);
        flush().unwrap();
        assert_eq!(*log.borrow(), vec![1, 2]);
    }

    #[test]
    fn effect_through_memo_never_observes_stale_values() {
        let log: Rc<RefCell<Vec<i32>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();

        let (a, set_a) = create_signal(1);
        let b = create_memo(move || a.get() * 2);
        create_effect(move || b.get(), move |v| sink.borrow_mut().push(*v));

        set_a.set(2);
        flush().unwrap();

        assert_eq!(*log.borrow(), vec![2, 4]);
    }

    #[test]
    fn deferred_effect_skips_the_initial_value() {
        let log: Rc<RefCell<Vec<i32>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();

        let (a, set_a) = create_signal(1);
        create_deferred_effect(move || a.get(), move |v| sink.borrow_mut().push(*v));

        flush().unwrap();
        assert!(log.borrow().is_empty());

        set_a.set(5);
        flush().unwrap();
        assert_eq!(*log.borrow(), vec![5]);
    }

    #[test]
    fn render_phase_bodies_run_before_user_phase_bodies() {
        let order: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));

        let (a, set_a) = create_signal(0);

        let user_order = order.clone();
        create_effect(move || a.get(), move |_| user_order.borrow_mut().push("user"));
        let render_order = order.clone();
        create_render_effect(move || a.get(), move |_| render_order.borrow_mut().push("render"));

        order.borrow_mut().clear();
        set_a.set(1);
        flush().unwrap();

        assert_eq!(*order.borrow(), vec!["render", "user"]);
    }

    #[test]
    fn guarded_effect_handles_its_own_errors() {
        let seen: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();

        let (flag, set_flag) = create_signal(false);
        create_effect_guarded(
            move || {
                if flag.get() {
                    Err(SignalError::failed("effect input broke"))
                } else {
                    Ok(0)
                }
            },
            |_| {},
            move |err| sink.borrow_mut().push(err.to_string()),
        );

        set_flag.set(true);
        // The handler consumed the error, so the flush itself succeeds.
        flush().unwrap();
        assert_eq!(seen.borrow().len(), 1);
        assert!(seen.borrow()[0].contains("effect input broke"));
    }

    #[test]
    fn unhandled_effect_error_escapes_the_flush() {
        let (trip, set_trip) = create_signal(false);
        create_try_effect(
            move || {
                if trip.get() {
                    Err(SignalError::failed("nobody caught this"))
                } else {
                    Ok(())
                }
            },
            |_: &()| {},
        );

        flush().unwrap();

        set_trip.set(true);
        let err = flush().unwrap_err();
        assert!(err.to_string().contains("nobody caught this"));
    }

    #[test]
    fn disposed_effect_never_fires_again() {
        let log: Rc<RefCell<Vec<i32>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();

        let (a, set_a) = create_signal(1);
        let effect = create_effect(move || a.get(), move |v| sink.borrow_mut().push(*v));

        effect.dispose();
        set_a.set(2);
        flush().unwrap();

        assert_eq!(*log.borrow(), vec![1]);
    }
}
