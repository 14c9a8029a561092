//! The requestor contract.
//!
//! A requestor is one unit of asynchronous work. It is started with a
//! [`Completion`] and an input value, and may hand back a [`Cancel`]
//! capability. The requestor must eventually consume its completion exactly
//! once; both capabilities are single-shot by construction.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use super::reason::Reason;

/// Terminal result of one requestor activation
pub type Outcome = Result<Value, Reason>;

/// Shared handle to a requestor, as stored in combinator sequences
pub type RequestorRef = Arc<dyn Requestor>;

/// One unit of asynchronous work.
///
/// `start` must not block. It begins the work, arranges for `completion` to be
/// called when the work settles, and returns immediately.
pub trait Requestor: Send + Sync {
    /// Begin the work, optionally returning a way to cancel it
    fn start(&self, completion: Completion, input: Value) -> Option<Cancel>;
}

impl<F> Requestor for F
where
    F: Fn(Completion, Value) -> Option<Cancel> + Send + Sync,
{
    fn start(&self, completion: Completion, input: Value) -> Option<Cancel> {
        self(completion, input)
    }
}

/// Wrap a closure as a shareable requestor
pub fn requestor_fn<F>(f: F) -> RequestorRef
where
    F: Fn(Completion, Value) -> Option<Cancel> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Single-shot continuation receiving a requestor's outcome
pub struct Completion {
    deliver: Box<dyn FnOnce(Outcome) + Send>,
}

impl Completion {
    pub fn new<F>(deliver: F) -> Self
    where
        F: FnOnce(Outcome) + Send + 'static,
    {
        Self {
            deliver: Box::new(deliver),
        }
    }

    /// Report the outcome
    pub fn complete(self, outcome: Outcome) {
        (self.deliver)(outcome)
    }

    /// Report success
    pub fn succeed(self, value: Value) {
        self.complete(Ok(value))
    }

    /// Report failure
    pub fn fail(self, reason: Reason) {
        self.complete(Err(reason))
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion").finish_non_exhaustive()
    }
}

/// Single-shot cancellation capability.
///
/// Must tolerate being invoked after the work has already settled.
pub struct Cancel {
    stop: Box<dyn FnOnce(Option<Reason>) + Send>,
}

impl Cancel {
    /// Build a cancel capability that always receives a reason
    pub fn new<F>(stop: F) -> Self
    where
        F: FnOnce(Reason) + Send + 'static,
    {
        Self::with_default(move |reason: Option<Reason>| {
            stop(reason.unwrap_or_else(|| Reason::cancel("requestor")))
        })
    }

    /// Build a cancel capability that decides its own default reason
    pub(crate) fn with_default<F>(stop: F) -> Self
    where
        F: FnOnce(Option<Reason>) + Send + 'static,
    {
        Self {
            stop: Box::new(stop),
        }
    }

    /// Cancel with an explicit reason
    pub fn cancel(self, reason: Reason) {
        (self.stop)(Some(reason))
    }

    /// Cancel with the default "Cancel." reason
    pub fn abort(self) {
        (self.stop)(None)
    }
}

impl fmt::Debug for Cancel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cancel").finish_non_exhaustive()
    }
}
