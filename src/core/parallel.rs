//! Parallel combinator: required and optional fan-out.
//!
//! Runs a required sequence (every member must succeed) and an optional
//! sequence (best effort) as one batch. Required requestors always occupy the
//! first slots of the batch, which is how a settlement is classified.

use std::mem;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use super::engine::{Batch, Flow, Policy, Verdict};
use crate::domain::{Cancel, Completion, Outcome, Reason, Requestor, RequestorRef};

/// What happens to optional requestors with respect to the time limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeOption {
    /// Finish as soon as every required requestor has succeeded, without
    /// waiting for optionals. At expiry, fail if a required one is pending.
    #[default]
    Required,

    /// Requireds have no time limit; optionals may keep running until the
    /// time limit expires or the requireds finish, whichever happens last.
    Relaxed,

    /// Wait for every requestor, required and optional, until the time limit.
    All,
}

impl From<Option<bool>> for TimeOption {
    fn from(option: Option<bool>) -> Self {
        match option {
            None => Self::Required,
            Some(false) => Self::Relaxed,
            Some(true) => Self::All,
        }
    }
}

/// How the collected values are reported on success
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Shape {
    /// An array of every slot's value
    Array,

    /// Only the last slot's value
    Last,
}

/// Requestor produced by [`parallel`] and by `sequence`
#[derive(Clone)]
pub struct Parallel {
    batch: Option<Batch>,
    required: usize,
    time_option: TimeOption,
    shape: Shape,
}

impl Parallel {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn build(
        factory: &'static str,
        required: Vec<RequestorRef>,
        optional: Vec<RequestorRef>,
        time_limit: Option<Duration>,
        time_option: TimeOption,
        throttle: usize,
        flow: Flow,
        shape: Shape,
    ) -> Result<Self, Reason> {
        let number_required = required.len();

        // Only optionals: nothing is required, so wait for all of them.
        // Only requireds: there are no optionals to wait for.
        let (requestors, time_option) = match (required.is_empty(), optional.is_empty()) {
            (true, true) => {
                return Ok(Self {
                    batch: None,
                    required: 0,
                    time_option,
                    shape,
                })
            }
            (true, false) => (optional, TimeOption::All),
            (false, true) => (required, TimeOption::Required),
            (false, false) => {
                let mut requestors = required;
                requestors.extend(optional);
                (requestors, time_option)
            }
        };

        let batch = Batch::new(factory, requestors, time_limit, throttle, flow)?;
        Ok(Self {
            batch: Some(batch),
            required: number_required,
            time_option,
            shape,
        })
    }

    /// Effective time option after normalization
    pub fn time_option(&self) -> TimeOption {
        self.time_option
    }

    /// Number of requestors in the batch
    pub fn len(&self) -> usize {
        self.batch.as_ref().map_or(0, Batch::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Requestor for Parallel {
    fn start(&self, completion: Completion, input: Value) -> Option<Cancel> {
        let Some(batch) = &self.batch else {
            let value = match self.shape {
                Shape::Array => Value::Array(Vec::new()),
                Shape::Last => input,
            };
            completion.succeed(value);
            return None;
        };

        let policy = ParallelPolicy {
            factory: batch.factory(),
            time_limit: batch.time_limit().unwrap_or_default(),
            required: self.required,
            pending: batch.len(),
            pending_required: self.required,
            time_option: self.time_option,
            results: vec![None; batch.len()],
            shape: self.shape,
        };

        Some(batch.launch(input, policy, completion))
    }
}

/// Build a requestor running `required` and `optional` as one batch.
///
/// Succeeds with an array of per-slot values (`null` for optional slots that
/// never succeeded). Fails with the reason of the first required requestor to
/// fail. An empty batch succeeds immediately with an empty array.
pub fn parallel(
    required: Vec<RequestorRef>,
    optional: Vec<RequestorRef>,
    time_limit: Option<Duration>,
    time_option: TimeOption,
    throttle: usize,
) -> Result<RequestorRef, Reason> {
    let parallel = Parallel::build(
        "parallel",
        required,
        optional,
        time_limit,
        time_option,
        throttle,
        Flow::Fanout,
        Shape::Array,
    )?;
    Ok(Arc::new(parallel))
}

struct ParallelPolicy {
    factory: &'static str,
    time_limit: Duration,
    required: usize,
    pending: usize,
    pending_required: usize,
    time_option: TimeOption,
    results: Vec<Option<Value>>,
    shape: Shape,
}

impl ParallelPolicy {
    fn collect(&mut self) -> Value {
        let results = mem::take(&mut self.results);
        match self.shape {
            Shape::Array => Value::Array(
                results
                    .into_iter()
                    .map(|value| value.unwrap_or(Value::Null))
                    .collect(),
            ),
            Shape::Last => results.into_iter().last().flatten().unwrap_or(Value::Null),
        }
    }

    fn succeed(&mut self, cancel: Reason) -> Verdict {
        Verdict::Conclude {
            outcome: Ok(self.collect()),
            cancel,
        }
    }
}

impl Policy for ParallelPolicy {
    fn on_settle(&mut self, slot: usize, outcome: Outcome) -> Verdict {
        self.pending = self.pending.saturating_sub(1);
        let required = slot < self.required;
        if required {
            self.pending_required = self.pending_required.saturating_sub(1);
        }

        match outcome {
            Ok(value) => self.results[slot] = Some(value),
            Err(reason) if required => {
                return Verdict::Conclude {
                    outcome: Err(reason.clone()),
                    cancel: reason,
                };
            }
            Err(reason) => debug!(slot, %reason, "optional requestor failed"),
        }

        let requireds_done = self.pending_required == 0;
        if self.pending == 0 || (self.time_option == TimeOption::Required && requireds_done) {
            self.succeed(Reason::new(self.factory, "Optional."))
        } else {
            Verdict::Pending
        }
    }

    fn on_timeout(&mut self) -> Verdict {
        let reason = Reason::timeout(self.factory, self.time_limit);

        if self.time_option == TimeOption::Relaxed {
            // One-time transition: from now on only the requireds are awaited.
            self.time_option = TimeOption::Required;
            return if self.pending_required == 0 {
                self.succeed(reason)
            } else {
                Verdict::Pending
            };
        }

        if self.pending_required == 0 {
            self.succeed(reason)
        } else {
            Verdict::Conclude {
                outcome: Err(reason.clone()),
                cancel: reason,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::requestor_fn;

    fn idle() -> RequestorRef {
        requestor_fn(|_completion: Completion, _input: Value| None)
    }

    fn policy(required: usize, total: usize, time_option: TimeOption) -> ParallelPolicy {
        ParallelPolicy {
            factory: "parallel",
            time_limit: Duration::from_millis(100),
            required,
            pending: total,
            pending_required: required,
            time_option,
            results: vec![None; total],
            shape: Shape::Array,
        }
    }

    #[test]
    fn test_time_option_from_tristate() {
        assert_eq!(TimeOption::from(None), TimeOption::Required);
        assert_eq!(TimeOption::from(Some(false)), TimeOption::Relaxed);
        assert_eq!(TimeOption::from(Some(true)), TimeOption::All);
    }

    #[test]
    fn test_optional_only_waits_for_all() {
        let parallel = Parallel::build(
            "parallel",
            Vec::new(),
            vec![idle(), idle()],
            None,
            TimeOption::Required,
            0,
            Flow::Fanout,
            Shape::Array,
        )
        .unwrap();

        assert_eq!(parallel.time_option(), TimeOption::All);
        assert_eq!(parallel.len(), 2);
    }

    #[test]
    fn test_required_only_ignores_time_option() {
        let parallel = Parallel::build(
            "parallel",
            vec![idle()],
            Vec::new(),
            None,
            TimeOption::Relaxed,
            0,
            Flow::Fanout,
            Shape::Array,
        )
        .unwrap();

        assert_eq!(parallel.time_option(), TimeOption::Required);
    }

    #[test]
    fn test_required_failure_concludes() {
        let mut policy = policy(2, 3, TimeOption::Required);
        let reason = Reason::new("widget", "Failed.");

        match policy.on_settle(1, Err(reason.clone())) {
            Verdict::Conclude { outcome, cancel } => {
                assert_eq!(outcome, Err(reason.clone()));
                assert_eq!(cancel, reason);
            }
            Verdict::Pending => panic!("expected the batch to conclude"),
        }
    }

    #[test]
    fn test_optional_failure_is_tolerated() {
        let mut policy = policy(1, 2, TimeOption::All);

        assert!(matches!(
            policy.on_settle(1, Err(Reason::new("widget", "Failed."))),
            Verdict::Pending
        ));
        match policy.on_settle(0, Ok(Value::from("a"))) {
            Verdict::Conclude { outcome, .. } => {
                assert_eq!(outcome.unwrap(), serde_json::json!(["a", null]));
            }
            Verdict::Pending => panic!("expected the batch to conclude"),
        }
    }

    #[test]
    fn test_relaxed_timeout_degrades_once() {
        let mut policy = policy(1, 2, TimeOption::Relaxed);

        assert!(matches!(policy.on_timeout(), Verdict::Pending));
        assert_eq!(policy.time_option, TimeOption::Required);

        match policy.on_settle(0, Ok(Value::from(1))) {
            Verdict::Conclude { outcome, cancel } => {
                assert_eq!(outcome.unwrap(), serde_json::json!([1, null]));
                assert_eq!(cancel.excuse, "Optional.");
            }
            Verdict::Pending => panic!("expected the batch to conclude"),
        }
    }

    #[test]
    fn test_timeout_with_pending_required_fails() {
        let mut policy = policy(1, 1, TimeOption::Required);

        match policy.on_timeout() {
            Verdict::Conclude { outcome, .. } => {
                let reason = outcome.unwrap_err();
                assert!(reason.is_timeout());
                assert_eq!(reason.evidence, crate::domain::Evidence::Millis(100));
            }
            Verdict::Pending => panic!("expected the batch to conclude"),
        }
    }
}
