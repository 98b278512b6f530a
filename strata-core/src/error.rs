//! Error Taxonomy
//!
//! Errors in the reactive system fall into two very different groups:
//!
//! - [`SignalError`] values travel through the graph as *data*. A failed
//!   computation stores its error on the node and hands it to whoever reads
//!   the node next; it never aborts the process. The `NotReady` variant is
//!   not a fault at all — it is the control-flow sentinel a computation
//!   returns while an asynchronous source it read has not settled yet.
//!
//! - [`OwnerError`] and [`ContextError`] are API-misuse reports from the
//!   ownership tree: calling an owner-scoped primitive outside any owner,
//!   or looking up a context value nobody provided.

use std::rc::Rc;

use thiserror::Error;

use crate::graph::node::NodeId;

/// A concrete failure produced by a computation body.
///
/// Wrapped in `Rc` wherever it is stored or returned, because the same
/// error may be observed by many readers of the failed node.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct EvalError {
    message: String,
}

impl EvalError {
    /// Create an evaluation error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Result of reading or computing a reactive value.
#[derive(Debug, Clone, Error)]
pub enum SignalError {
    /// The value is not available yet. Carries the node that is still
    /// pending so callers (and load boundaries) can wait on exactly it.
    ///
    /// This is control flow, not a fault: the runtime converts it into the
    /// `Pending` status and re-runs the reader when the source settles.
    #[error("value not ready: waiting on node {0:?}")]
    NotReady(NodeId),

    /// The computation producing this value failed. The error is attached
    /// to the node and re-surfaced to every reader.
    #[error("computation failed: {0}")]
    Failed(Rc<EvalError>),
}

impl SignalError {
    /// Shorthand for a `Failed` error built from a message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(Rc::new(EvalError::new(message)))
    }

    /// Whether this is the `NotReady` sentinel rather than a real fault.
    pub fn is_not_ready(&self) -> bool {
        matches!(self, Self::NotReady(_))
    }
}

/// An ownership-scoped API was called outside any owner scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum OwnerError {
    /// No owner is active on this thread (or the targeted owner has
    /// already been disposed).
    #[error("reactive API called outside of any owner scope")]
    NoOwner,
}

/// A context lookup failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextError {
    /// No provider for the requested type exists in the owner chain and
    /// the lookup has no default.
    #[error("no context value of the requested type was provided")]
    NotFound,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eval_error_formats_message() {
        let err = EvalError::new("division by zero");
        assert_eq!(err.to_string(), "division by zero");
        assert_eq!(err.message(), "division by zero");
    }

    #[test]
    fn not_ready_is_not_a_fault() {
        let err = SignalError::NotReady(NodeId::new());
        assert!(err.is_not_ready());

        let err = SignalError::failed("boom");
        assert!(!err.is_not_ready());
    }

    #[test]
    fn failed_errors_share_the_payload() {
        let err = SignalError::failed("boom");
        let clone = err.clone();
        match (&err, &clone) {
            (SignalError::Failed(a), SignalError::Failed(b)) => {
                assert!(Rc::ptr_eq(a, b));
            }
            _ => panic!("expected Failed variants"),
        }
    }
}
