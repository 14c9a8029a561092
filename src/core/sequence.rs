//! Sequence combinator.
//!
//! A sequence is a parallel throttled to one requestor at a time, without
//! optionals, where each requestor receives the previous one's output and
//! the batch reports only the final value.

use std::sync::Arc;
use std::time::Duration;

use super::engine::Flow;
use super::parallel::{Parallel, Shape, TimeOption};
use crate::domain::{Reason, RequestorRef};

/// Build a requestor that runs `requestors` in order, chaining their values.
///
/// An empty sequence succeeds immediately with its untouched input.
pub fn sequence(
    requestors: Vec<RequestorRef>,
    time_limit: Option<Duration>,
) -> Result<RequestorRef, Reason> {
    let sequence = Parallel::build(
        "sequence",
        requestors,
        Vec::new(),
        time_limit,
        TimeOption::Required,
        1,
        Flow::Chain,
        Shape::Last,
    )?;
    Ok(Arc::new(sequence))
}
